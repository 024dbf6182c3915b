//! Scripted mock LLM client for tests

use super::traits::{LlmClient, LlmRequest};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Mock LLM client that replays a scripted sequence of replies and records
/// every prompt it receives.
///
/// Push `Err` entries with [`MockLlmClient::push_failure`] to simulate
/// transport errors. When the script runs out, calls fail — unless a default
/// reply is configured, which is what dev mode uses to stay answerable
/// offline.
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    default_reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::with_responses(Vec::new())
    }
}

impl MockLlmClient {
    pub fn with_responses(responses: Vec<String>) -> Self {
        MockLlmClient {
            replies: Mutex::new(responses.into_iter().map(Ok).collect()),
            default_reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A client that always answers with one fixed reply once the script is
    /// exhausted. The dev-mode reply carries the union of the structured
    /// output keys, so every call site validates against it.
    pub fn with_default_reply(reply: impl Into<String>) -> Self {
        MockLlmClient {
            replies: Mutex::new(VecDeque::new()),
            default_reply: Some(reply.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, text: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(text.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Err(message.into()));
    }

    /// All prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => match &self.default_reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(anyhow::anyhow!("mock LLM script exhausted")),
            },
        }
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_and_records_prompts() {
        let llm = MockLlmClient::with_responses(vec!["one".to_string(), "two".to_string()]);
        let req = LlmRequest::structured("p1".to_string(), 128);

        assert_eq!(llm.complete(&req).await.unwrap(), "one");
        assert_eq!(llm.complete(&req).await.unwrap(), "two");
        assert!(llm.complete(&req).await.is_err());
        assert_eq!(llm.prompts().len(), 3);
    }

    #[tokio::test]
    async fn default_reply_answers_after_script_runs_out() {
        let llm = MockLlmClient::with_default_reply(r#"{"ok": true}"#);
        let req = LlmRequest::structured("p".to_string(), 128);
        assert_eq!(llm.complete(&req).await.unwrap(), r#"{"ok": true}"#);
        assert_eq!(llm.complete(&req).await.unwrap(), r#"{"ok": true}"#);
    }

    #[tokio::test]
    async fn scripted_failures_surface_as_errors() {
        let llm = MockLlmClient::default();
        llm.push_failure("connection reset");
        let req = LlmRequest::structured("p".to_string(), 128);
        let err = llm.complete(&req).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
