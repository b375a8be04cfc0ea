//! Public request / response types shared by the runtime and the HTTP layer.

pub mod completion;
pub mod sampling;

pub use completion::{CompletionChoice, CompletionLogProbs, CompletionResponse, UsageStats};
pub use sampling::SamplingParams;
