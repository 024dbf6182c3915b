//! In-memory mock graph store for tests
//!
//! Canned-response store: tests register rows keyed by a substring of the
//! Cypher text, and the mock records every query it receives so assertions can
//! inspect the parameter and option channels separately.

use super::models::{ExecOptions, GraphError, SchemaIntrospection};
use super::traits::GraphStore;
use crate::pipeline::models::{Params, ResultRow};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// A single recorded call to the mock store.
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub cypher: String,
    pub params: Params,
    pub timeout: Duration,
}

#[derive(Default)]
struct MockState {
    /// (cypher substring, rows) pairs checked in insertion order.
    responders: Vec<(String, Vec<serde_json::Value>)>,
    /// Substrings whose queries fail with the given error text.
    failures: Vec<(String, String)>,
    /// Substrings whose queries simulate a driver timeout.
    timeouts: Vec<String>,
    read_log: Vec<RecordedQuery>,
    admin_log: Vec<String>,
    introspection: SchemaIntrospection,
    index_dimensions: BTreeMap<String, usize>,
    unavailable: bool,
}

/// Mock implementation of [`GraphStore`] backed by canned responses.
pub struct MockGraphStore {
    state: Mutex<MockState>,
}

impl Default for MockGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGraphStore {
    pub fn new() -> Self {
        MockGraphStore {
            state: Mutex::new(MockState::default()),
        }
    }

    /// Create a mock pre-loaded with the student-support schema used across
    /// the test suite.
    pub fn with_student_schema() -> Self {
        let store = Self::new();
        store.set_introspection(SchemaIntrospection {
            labels: vec![
                "Student".to_string(),
                "Goal".to_string(),
                "Accommodation".to_string(),
                "CaseWorker".to_string(),
                "EvaluationReport".to_string(),
                "ConcernArea".to_string(),
                "Document".to_string(),
                "Chunk".to_string(),
            ],
            relationships: vec![
                "HAS_GOAL".to_string(),
                "HAS_ACCOMMODATION".to_string(),
                "ASSIGNED_TO".to_string(),
                "HAS_EVALUATION".to_string(),
                "HAS_CONCERN".to_string(),
                "HAS_CHUNK".to_string(),
                "PART_OF".to_string(),
            ],
            properties: BTreeMap::from([
                (
                    "Student".to_string(),
                    vec!["id".to_string(), "fullName".to_string()],
                ),
                (
                    "Goal".to_string(),
                    vec![
                        "id".to_string(),
                        "title".to_string(),
                        "status".to_string(),
                        "goalType".to_string(),
                    ],
                ),
            ]),
        });
        store
    }

    /// Register rows to return for any query whose text contains `needle`.
    pub fn respond_with(&self, needle: &str, rows: Vec<serde_json::Value>) {
        self.state
            .lock()
            .unwrap()
            .responders
            .push((needle.to_string(), rows));
    }

    /// Make queries containing `needle` fail with a query error.
    pub fn fail_with(&self, needle: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((needle.to_string(), message.to_string()));
    }

    /// Make queries containing `needle` time out.
    pub fn timeout_on(&self, needle: &str) {
        self.state.lock().unwrap().timeouts.push(needle.to_string());
    }

    /// Simulate the whole store being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn set_introspection(&self, introspection: SchemaIntrospection) {
        self.state.lock().unwrap().introspection = introspection;
    }

    pub fn set_index_dimension(&self, index_name: &str, dimension: Option<usize>) {
        let mut state = self.state.lock().unwrap();
        match dimension {
            Some(d) => {
                state.index_dimensions.insert(index_name.to_string(), d);
            }
            None => {
                state.index_dimensions.remove(index_name);
            }
        }
    }

    /// All read queries the store has seen, in order.
    pub fn read_log(&self) -> Vec<RecordedQuery> {
        self.state.lock().unwrap().read_log.clone()
    }

    /// All admin statements the store has seen, in order.
    pub fn admin_log(&self) -> Vec<String> {
        self.state.lock().unwrap().admin_log.clone()
    }
}

#[async_trait]
impl GraphStore for MockGraphStore {
    async fn run_read(
        &self,
        cypher: &str,
        params: &Params,
        opts: ExecOptions,
    ) -> Result<Vec<ResultRow>, GraphError> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(GraphError::Unavailable("mock store offline".to_string()));
        }
        state.read_log.push(RecordedQuery {
            cypher: cypher.to_string(),
            params: params.clone(),
            timeout: opts.timeout,
        });

        for needle in &state.timeouts {
            if cypher.contains(needle.as_str()) {
                return Err(GraphError::Timeout(opts.timeout));
            }
        }

        for (needle, message) in &state.failures {
            if cypher.contains(needle.as_str()) {
                return Err(GraphError::Query(message.clone()));
            }
        }

        for (needle, rows) in &state.responders {
            if cypher.contains(needle.as_str()) {
                let rows = rows
                    .iter()
                    .filter_map(|v| v.as_object().map(ResultRow::from_object))
                    .collect();
                return Ok(rows);
            }
        }
        Ok(Vec::new())
    }

    async fn run_admin(&self, cypher: &str, _params: &Params) -> Result<(), GraphError> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(GraphError::Unavailable("mock store offline".to_string()));
        }
        state.admin_log.push(cypher.to_string());

        // Keep the simulated index catalog in sync with DDL statements so
        // dimension-switch tests observe drop/create effects.
        if let Some(rest) = cypher.trim().strip_prefix("DROP INDEX ") {
            let name = rest
                .trim()
                .trim_matches('`')
                .split_whitespace()
                .next()
                .unwrap_or("")
                .trim_matches('`')
                .to_string();
            state.index_dimensions.remove(&name);
        } else if cypher.contains("CREATE VECTOR INDEX") {
            if let Some(name) = cypher
                .split("CREATE VECTOR INDEX")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next())
            {
                let name = name.trim_matches('`').to_string();
                let dimension = cypher
                    .split("`vector.dimensions`:")
                    .nth(1)
                    .and_then(|rest| rest.trim().split(|c: char| !c.is_ascii_digit()).next())
                    .and_then(|d| d.parse::<usize>().ok())
                    .unwrap_or(0);
                state.index_dimensions.insert(name, dimension);
            }
        }
        Ok(())
    }

    async fn introspect_schema(&self) -> Result<SchemaIntrospection, GraphError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(GraphError::Unavailable("mock store offline".to_string()));
        }
        Ok(state.introspection.clone())
    }

    async fn vector_index_dimension(&self, index_name: &str) -> Result<Option<usize>, GraphError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(GraphError::Unavailable("mock store offline".to_string()));
        }
        Ok(state.index_dimensions.get(index_name).copied())
    }
}
