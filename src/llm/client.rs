use async_trait::async_trait;

use crate::error::Result;
use crate::llm::types::{LlmRequest, LlmResponse};

/// Boundary to the language model service.
///
/// The production implementation wraps the vendor HTTP client; tests use
/// scripted stubs. Implementations should map transport failures to
/// `FactError::Connectivity`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}
