use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Turn;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Upstream server error: {0}")]
    ServerError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Generation knobs passed through to the upstream API unmodified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

#[derive(Clone)]
pub struct CompletionRequest {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub system_instruction: Option<String>,
    /// Prior turns for context, oldest first. Does not include the text
    /// being submitted.
    pub prior_turns: Vec<Turn>,
    pub user_text: String,
    pub options: GenerationOptions,
}

impl std::fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("system_instruction", &self.system_instruction)
            .field("prior_turns", &self.prior_turns.len())
            .field("user_text", &self.user_text)
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: String,
    pub model: String,
}
