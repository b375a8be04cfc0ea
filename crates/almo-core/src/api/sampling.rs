//! Sampler configuration accepted on completion requests.
//!
//! The runtime never interprets these values; they are validated once when a
//! request is accepted and then handed to the engine verbatim, one clone per
//! sample. Field names and aliases follow the wire names used by common
//! OpenAI-compatible clients.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default)]
#[validate(schema(function = "validate_bounds"))]
pub struct SamplingParams {
    /// Maximum number of tokens to generate per sample.
    #[serde(alias = "max_length")]
    pub max_tokens: u32,
    #[serde(alias = "min_length")]
    pub min_tokens: u32,
    pub generate_window: u32,

    /// Stop sequences. Accepts a single string or a list.
    #[serde(alias = "stop_sequence", deserialize_with = "one_or_many")]
    pub stop: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub banned_strings: Vec<String>,
    /// Token ids. Accepts a list or a comma-separated string.
    #[serde(deserialize_with = "list_or_csv")]
    pub banned_tokens: Vec<u32>,
    #[serde(deserialize_with = "list_or_csv")]
    pub allowed_tokens: Vec<u32>,
    pub token_healing: bool,

    #[validate(range(min = 0.0, max = 10.0))]
    pub temperature: f32,
    pub temperature_last: bool,
    #[validate(range(min = 0.0))]
    pub smoothing_factor: f32,
    pub top_k: u32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub top_p: f32,
    #[validate(range(min = 0.0))]
    pub top_a: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_p: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub tfs: f32,
    #[serde(alias = "typical_p")]
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub typical: f32,
    pub skew: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub xtc_probability: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub xtc_threshold: f32,

    #[validate(range(min = 0.0))]
    pub frequency_penalty: f32,
    #[validate(range(min = 0.0))]
    pub presence_penalty: f32,
    #[serde(alias = "rep_pen")]
    #[validate(range(exclusive_min = 0.0))]
    pub repetition_penalty: f32,
    /// `-1` means the whole context.
    #[serde(alias = "repetition_range", alias = "repetition_penalty_range", alias = "rep_pen_range")]
    pub penalty_range: i32,
    pub repetition_decay: u32,

    #[validate(range(min = 0.0))]
    pub dry_multiplier: f32,
    #[validate(range(min = 0.0))]
    pub dry_base: f32,
    pub dry_allowed_length: u32,
    #[serde(alias = "dry_penalty_last_n")]
    pub dry_range: i32,
    #[serde(deserialize_with = "one_or_many")]
    pub dry_sequence_breakers: Vec<String>,

    /// `2` selects mirostat v2; anything else disables it.
    pub mirostat_mode: u8,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,

    pub add_bos_token: bool,
    #[serde(alias = "ignore_eos")]
    pub ban_eos_token: bool,
    pub skip_special_tokens: bool,
    pub logit_bias: Option<BTreeMap<String, f32>>,
    pub negative_prompt: Option<String>,
    pub json_schema: Option<serde_json::Value>,
    pub regex_pattern: Option<String>,
    pub grammar_string: Option<String>,
    pub speculative_ngram: Option<bool>,

    #[serde(alias = "guidance_scale")]
    #[validate(range(min = 0.0))]
    pub cfg_scale: f32,
    #[serde(alias = "dynatemp_high")]
    #[validate(range(min = 0.0))]
    pub max_temp: f32,
    #[serde(alias = "dynatemp_low")]
    #[validate(range(min = 0.0))]
    pub min_temp: f32,
    #[validate(range(min = 0.0))]
    pub temp_exponent: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 150,
            min_tokens: 0,
            generate_window: 512,
            stop: Vec::new(),
            banned_strings: Vec::new(),
            banned_tokens: Vec::new(),
            allowed_tokens: Vec::new(),
            token_healing: false,
            temperature: 1.0,
            temperature_last: false,
            smoothing_factor: 0.0,
            top_k: 0,
            top_p: 1.0,
            top_a: 0.0,
            min_p: 0.0,
            tfs: 1.0,
            typical: 1.0,
            skew: 0.0,
            xtc_probability: 0.0,
            xtc_threshold: 0.1,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            repetition_penalty: 1.0,
            penalty_range: -1,
            repetition_decay: 0,
            dry_multiplier: 0.0,
            dry_base: 0.0,
            dry_allowed_length: 0,
            dry_range: 0,
            dry_sequence_breakers: Vec::new(),
            mirostat_mode: 0,
            mirostat_tau: 1.5,
            mirostat_eta: 0.3,
            add_bos_token: true,
            ban_eos_token: false,
            skip_special_tokens: true,
            logit_bias: None,
            negative_prompt: None,
            json_schema: None,
            regex_pattern: None,
            grammar_string: None,
            speculative_ngram: None,
            cfg_scale: 1.0,
            max_temp: 1.0,
            min_temp: 1.0,
            temp_exponent: 1.0,
        }
    }
}

impl SamplingParams {
    pub fn mirostat(&self) -> bool {
        self.mirostat_mode == 2
    }

    /// Dynamic temperature is active when the range is non-empty.
    pub fn dynamic_temperature(&self) -> bool {
        self.max_temp > self.min_temp
    }
}

fn validate_bounds(params: &SamplingParams) -> Result<(), ValidationError> {
    if params.min_temp > params.max_temp {
        return Err(ValidationError::new("temperature_range")
            .with_message(Cow::Borrowed("min_temp must be less than or equal to max_temp")));
    }
    if params.min_tokens > params.max_tokens {
        return Err(ValidationError::new("token_range")
            .with_message(Cow::Borrowed("min_tokens must be less than or equal to max_tokens")));
    }
    Ok(())
}

// ── private helpers ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrCsv {
    List(Vec<u32>),
    Csv(String),
}

fn list_or_csv<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u32>, D::Error> {
    match Option::<ListOrCsv>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(ListOrCsv::List(v)) => Ok(v),
        Some(ListOrCsv::Csv(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<u32>().map_err(serde::de::Error::custom))
            .collect(),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
