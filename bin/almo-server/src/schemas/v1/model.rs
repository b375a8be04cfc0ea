use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// OpenAI-style model card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelCard {
    pub id: String,
    /// Always `"model"`.
    pub object: String,
    /// Unix timestamp of when the model was loaded.
    pub created: i64,
    pub owned_by: String,
}

impl ModelCard {
    pub fn new(id: impl Into<String>, created: i64) -> Self {
        Self {
            id: id.into(),
            object: "model".to_owned(),
            created,
            owned_by: "almo".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelList {
    /// Always `"list"`.
    pub object: String,
    pub data: Vec<ModelCard>,
}

/// Request body for `POST /v1/model/load`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelLoadRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelUnloadResponse {
    /// Name of the model that was unloaded, if any.
    pub unloaded: Option<String>,
}
