//! Guarded query execution
//!
//! Runs validated candidates read-only with a timeout. Belt and braces with
//! the validator: the text is re-screened for mutation keywords here, so a
//! malformed candidate that somehow slipped through still cannot write.
//!
//! Execution options travel in [`ExecOptions`], never in the Cypher parameter
//! map — an inbound parameter literally named `timeout` is dropped before
//! dispatch rather than forwarded to the store.

use crate::error::{PipelineError, ReasonCode};
use crate::neo4j::{ExecOptions, GraphError, GraphStore};
use crate::pipeline::models::{CypherCandidate, ResultRow};
use crate::{AppMode, Policy};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static WRITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|SET|REMOVE|DROP|DETACH|FOREACH|LOAD\s+CSV)\b")
        .expect("write regex")
});

static STRING_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).expect("literal regex"));

/// Result of executing a candidate.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub rows: Vec<ResultRow>,
    pub truncated: bool,
}

/// Executes validated candidates against the graph store.
pub struct Executor {
    graph: Arc<dyn GraphStore>,
}

impl Executor {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Executor { graph }
    }

    /// Execute a candidate read-only.
    ///
    /// # Errors
    ///
    /// `WRITE_BLOCKED` if the text carries a mutation keyword and the process
    /// is not explicitly write-enabled; `QUERY_TIMEOUT` on deadline expiry;
    /// `UPSTREAM_UNAVAILABLE` when the store is unreachable.
    pub async fn execute(
        &self,
        candidate: &CypherCandidate,
        policy: &Policy,
        mode: AppMode,
        allow_writes: bool,
    ) -> Result<ExecutionOutcome, PipelineError> {
        let masked = STRING_LITERAL_RE.replace_all(&candidate.text, "''");
        if WRITE_RE.is_match(&masked) && !(mode == AppMode::Admin && allow_writes) {
            return Err(PipelineError::rejected(
                ReasonCode::WriteBlocked,
                "write keyword reached the executor",
            ));
        }

        // Invariant: options never travel in the parameter channel
        let mut params = candidate.params.clone();
        if params.remove("timeout").is_some() {
            tracing::warn!("dropped 'timeout' entry from query parameters");
        }

        let opts = ExecOptions::with_timeout(policy.query_timeout);
        let rows = self
            .graph
            .run_read(&candidate.text, &params, opts)
            .await
            .map_err(|e| match e {
                GraphError::Timeout(d) => PipelineError::rejected(
                    ReasonCode::QueryTimeout,
                    format!("query exceeded {:?}", d),
                ),
                GraphError::Unavailable(msg) => {
                    PipelineError::rejected(ReasonCode::UpstreamUnavailable, msg)
                }
                GraphError::Query(msg) => PipelineError::Transport(anyhow::anyhow!(msg)),
            })?;

        let cap = policy.max_cypher_results as usize;
        let truncated = rows.len() > cap;
        let mut rows = rows;
        if truncated {
            rows.truncate(cap);
            tracing::warn!(cap, "result set truncated at policy cap");
        }

        Ok(ExecutionOutcome { rows, truncated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neo4j::MockGraphStore;
    use crate::pipeline::models::{CandidateSource, ParamValue};
    use serde_json::json;

    fn candidate(text: &str, params: &[(&str, ParamValue)]) -> CypherCandidate {
        CypherCandidate {
            text: text.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            source: CandidateSource::Template,
        }
    }

    #[tokio::test]
    async fn executes_and_collects_rows() {
        let store = Arc::new(MockGraphStore::new());
        store.respond_with(
            "RETURN g.title",
            vec![json!({"primary_id": "s1", "goal": "Reading fluency", "status": "active"})],
        );
        let executor = Executor::new(store.clone());

        let outcome = executor
            .execute(
                &candidate(
                    "MATCH (g:Goal) RETURN g.title AS goal LIMIT $limit",
                    &[("limit", ParamValue::Int(20))],
                ),
                &Policy::default(),
                AppMode::ReadOnly,
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert!(!outcome.truncated);
        assert_eq!(outcome.rows[0].node_ids, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn write_keywords_are_blocked_even_if_validated() {
        let store = Arc::new(MockGraphStore::new());
        let executor = Executor::new(store.clone());

        let err = executor
            .execute(
                &candidate("MATCH (n) DETACH DELETE n", &[]),
                &Policy::default(),
                AppMode::ReadOnly,
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::WriteBlocked));
        assert!(store.read_log().is_empty(), "query must never reach the store");
    }

    #[tokio::test]
    async fn timeout_param_never_reaches_parameter_channel() {
        let store = Arc::new(MockGraphStore::new());
        let executor = Executor::new(store.clone());

        executor
            .execute(
                &candidate(
                    "MATCH (g:Goal) RETURN g.title AS goal LIMIT $limit",
                    &[
                        ("limit", ParamValue::Int(10)),
                        ("timeout", ParamValue::Int(9999)),
                    ],
                ),
                &Policy::default(),
                AppMode::ReadOnly,
                false,
            )
            .await
            .unwrap();

        let log = store.read_log();
        assert_eq!(log.len(), 1);
        assert!(
            !log[0].params.contains_key("timeout"),
            "timeout must not be a Cypher parameter"
        );
        // The policy timeout rides the option channel instead
        assert_eq!(log[0].timeout, Policy::default().query_timeout);
    }

    #[tokio::test]
    async fn store_timeout_maps_to_query_timeout() {
        let store = Arc::new(MockGraphStore::new());
        store.timeout_on("RETURN g.title");
        let executor = Executor::new(store);

        let err = executor
            .execute(
                &candidate("MATCH (g:Goal) RETURN g.title AS goal LIMIT 5", &[]),
                &Policy::default(),
                AppMode::ReadOnly,
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::QueryTimeout));
    }

    #[tokio::test]
    async fn rows_are_truncated_at_cap() {
        let store = Arc::new(MockGraphStore::new());
        let many: Vec<serde_json::Value> = (0..40).map(|i| json!({"n": i})).collect();
        store.respond_with("RETURN n", many);
        let executor = Executor::new(store);

        let mut policy = Policy::default();
        policy.max_cypher_results = 25;

        let outcome = executor
            .execute(
                &candidate("MATCH (g:Goal) RETURN n LIMIT $limit", &[("limit", ParamValue::Int(25))]),
                &policy,
                AppMode::ReadOnly,
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.rows.len(), 25);
        assert!(outcome.truncated);
    }

    #[tokio::test]
    async fn unavailable_store_is_classified() {
        let store = Arc::new(MockGraphStore::new());
        store.set_unavailable(true);
        let executor = Executor::new(store);

        let err = executor
            .execute(
                &candidate("MATCH (g:Goal) RETURN g.title AS goal LIMIT 5", &[]),
                &Policy::default(),
                AppMode::ReadOnly,
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::UpstreamUnavailable));
    }
}
