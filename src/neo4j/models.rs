//! Graph store option and result models

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Execution options for a single graph query.
///
/// This is a separate channel from the Cypher parameter map: options like the
/// timeout are consumed by the driver layer and are never visible to the query
/// itself.
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    pub timeout: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            timeout: Duration::from_secs(10),
        }
    }
}

impl ExecOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        ExecOptions { timeout }
    }
}

/// Errors surfaced by the graph store layer.
///
/// The executor maps these onto pipeline reason codes; everything else in the
/// crate treats them as opaque.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Raw schema introspection result: labels, relationship types, and property
/// keys per label, exactly as reported by the store.
#[derive(Debug, Clone, Default)]
pub struct SchemaIntrospection {
    pub labels: Vec<String>,
    pub relationships: Vec<String>,
    pub properties: BTreeMap<String, Vec<String>>,
}
