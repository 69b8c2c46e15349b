use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::models::*;
use crate::providers::traits::CompletionProvider;
use crate::providers::types::{CompletionRequest, CompletionResponse, ProviderError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

// The upstream dependency is external; never wait on it forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OpenAiProvider {
    client: Client,
}

impl OpenAiProvider {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn build_messages(request: &CompletionRequest) -> Vec<OpenAiMessage> {
        let mut result = Vec::new();

        if let Some(instruction) = request.system_instruction.as_deref() {
            if !instruction.is_empty() {
                result.push(OpenAiMessage {
                    role: "system".to_string(),
                    content: instruction.to_string(),
                });
            }
        }

        for turn in &request.prior_turns {
            result.push(OpenAiMessage {
                role: turn.role.as_str().to_string(),
                content: turn.content.clone(),
            });
        }

        result.push(OpenAiMessage {
            role: "user".to_string(),
            content: request.user_text.clone(),
        });

        result
    }

    fn build_auth_header(api_key: &str) -> Option<String> {
        if api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", api_key))
        }
    }

    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<OpenAiErrorResponse>(body) {
            return format!("HTTP {}: {}", status.as_u16(), parsed.error.message);
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let base = request.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));

        let messages = Self::build_messages(&request);

        let openai_request = OpenAiRequest {
            model: request.model.clone(),
            messages,
            stream: false,
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
            top_p: request.options.top_p,
            reasoning_effort: request.options.reasoning_effort.clone(),
        };

        let mut req = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&openai_request);

        if let Some(auth) = Self::build_auth_header(&request.api_key) {
            req = req.header("Authorization", auth);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: Self::parse_retry_after(&response),
            });
        }

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ServerError(Self::parse_error_message(
                status, &body,
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        Ok(CompletionResponse {
            message: choice.message.content,
            model: parsed.model.unwrap_or(request.model),
        })
    }
}
