use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse, ProviderError};

/// The upstream language-model backend, seen only at its interface.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;
}
