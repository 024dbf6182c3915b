//! LlmClient trait definition

use anyhow::Result;
use async_trait::async_trait;

/// One completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider for JSON-only output where supported.
    pub json_mode: bool,
}

impl LlmRequest {
    /// Deterministic JSON-mode request, the default for structured calls.
    pub fn structured(prompt: String, max_tokens: u32) -> Self {
        LlmRequest {
            prompt,
            max_tokens,
            temperature: 0.0,
            json_mode: true,
        }
    }
}

/// Abstract interface for text completion.
///
/// Implementations must be thread-safe (`Send + Sync`) for use behind
/// `Arc<dyn LlmClient>` across request tasks. Raw completions should only be
/// consumed through [`crate::llm::structured`], which validates the output.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the prompt and return the raw completion text.
    async fn complete(&self, request: &LlmRequest) -> Result<String>;

    /// The model name, for logging and audit records.
    fn model_name(&self) -> &str;
}
