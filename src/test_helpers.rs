//! Test helper factories and mock state builders
//!
//! Convenience constructors for wiring an `AppState` over in-memory backends,
//! keeping handles to the concrete mocks for assertions.
#![allow(dead_code)]

use crate::audit::MemoryAuditSink;
use crate::embeddings::MockEmbeddingProvider;
use crate::llm::MockLlmClient;
use crate::neo4j::MockGraphStore;
use crate::{AppMode, AppState, Config, Policy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Handles to the mock backends behind a test `AppState`.
pub struct MockBackends {
    pub graph: Arc<MockGraphStore>,
    pub llm: Arc<MockLlmClient>,
    pub audit: Arc<MemoryAuditSink>,
}

/// A config wired for tests: read-only mode, in-memory everything.
pub fn test_config() -> Config {
    Config {
        neo4j_uri: "bolt://mock:7687".to_string(),
        neo4j_user: "neo4j".to_string(),
        neo4j_password: "mock".to_string(),
        llm_url: "http://mock/v1/chat/completions".to_string(),
        llm_model: "mock".to_string(),
        llm_api_key: None,
        embedding_url: "http://mock/v1/embeddings".to_string(),
        embedding_model: "mock".to_string(),
        embedding_api_key: None,
        server_port: 0,
        audit_path: "/tmp/test-audit.jsonl".to_string(),
        mode: AppMode::ReadOnly,
        allow_writes: false,
        admin_token: None,
        dev_mode: true,
        synonyms: BTreeMap::new(),
        policy: Policy::default(),
    }
}

/// Build an `AppState` over mocks, returning the backend handles.
pub async fn mock_app_state() -> (AppState, MockBackends) {
    mock_app_state_with(test_config(), MockLlmClient::default()).await
}

/// Build an `AppState` over mocks with a scripted LLM.
pub async fn mock_app_state_with(config: Config, llm: MockLlmClient) -> (AppState, MockBackends) {
    let graph = Arc::new(MockGraphStore::with_student_schema());
    let llm = Arc::new(llm);
    let audit = Arc::new(MemoryAuditSink::new());

    let state = AppState::with_backends(
        config,
        graph.clone(),
        llm.clone(),
        Arc::new(MockEmbeddingProvider::default()),
        audit.clone(),
    )
    .await
    .expect("mock state");

    (state, MockBackends { graph, llm, audit })
}
