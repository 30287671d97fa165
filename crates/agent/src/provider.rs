use async_trait::async_trait;
use thiserror::Error;

use crate::context::AgentContext;
use crate::response::AiResponse;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned an unreadable response: {0}")]
    Decode(String),
    #[error("provider is not configured: {0}")]
    NotConfigured(String),
}

/// A conversational model endpoint. Implementations are tried in order by
/// the service; any error moves on to the next provider.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, context: &AgentContext) -> Result<AiResponse, ProviderError>;
}
