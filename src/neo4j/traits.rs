//! GraphStore trait definition
//!
//! Abstract interface over the graph database, enabling testing with mock
//! implementations. The pipeline only ever needs four operations: read
//! queries, admin statements (index DDL and schema-term upserts), schema
//! introspection, and vector-index inspection.

use crate::neo4j::models::{ExecOptions, GraphError, SchemaIntrospection};
use crate::pipeline::models::{Params, ResultRow};
use async_trait::async_trait;

/// Abstract interface for graph database operations.
///
/// Implementations must be thread-safe (`Send + Sync`) for use behind
/// `Arc<dyn GraphStore>` across request tasks.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Run a parameterised Cypher query and materialise all rows.
    ///
    /// The parameter map and the execution options travel on separate
    /// channels; a timeout is never a Cypher parameter.
    async fn run_read(
        &self,
        cypher: &str,
        params: &Params,
        opts: ExecOptions,
    ) -> Result<Vec<ResultRow>, GraphError>;

    /// Run an admin statement (vector index DDL, schema-term upsert).
    ///
    /// Only the schema refresh path calls this; normal request handling is
    /// write-free.
    async fn run_admin(&self, cypher: &str, params: &Params) -> Result<(), GraphError>;

    /// Fetch labels, relationship types and per-label property keys.
    async fn introspect_schema(&self) -> Result<SchemaIntrospection, GraphError>;

    /// Declared dimension of an online vector index, or `None` if the index
    /// does not exist.
    async fn vector_index_dimension(&self, index_name: &str) -> Result<Option<usize>, GraphError>;
}
