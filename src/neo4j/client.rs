//! Neo4j client for the knowledge graph

use super::models::{ExecOptions, GraphError, SchemaIntrospection};
use super::traits::GraphStore;
use crate::pipeline::models::{ParamValue, Params, ResultRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{query, BoltType, Graph, Query};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// Client for Neo4j operations
pub struct Neo4jClient {
    graph: Arc<Graph>,
}

impl Neo4jClient {
    /// Create a new Neo4j client
    pub async fn new(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;

        Ok(Self {
            graph: Arc::new(graph),
        })
    }

    fn build_query(cypher: &str, params: &Params) -> Query {
        let mut q = query(cypher);
        for (key, value) in params {
            q = q.param(key, to_bolt(value));
        }
        q
    }

    async fn collect_rows(&self, q: Query) -> Result<Vec<ResultRow>, GraphError> {
        let mut result = self
            .graph
            .execute(q)
            .await
            .map_err(|e| classify_neo4rs_error(&e))?;

        let mut rows = Vec::new();
        loop {
            match result.next().await {
                Ok(Some(row)) => {
                    let value: serde_json::Value = row
                        .to()
                        .map_err(|e| GraphError::Query(format!("row decode failed: {}", e)))?;
                    if let serde_json::Value::Object(map) = value {
                        rows.push(ResultRow::from_object(&map));
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(classify_neo4rs_error(&e)),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl GraphStore for Neo4jClient {
    async fn run_read(
        &self,
        cypher: &str,
        params: &Params,
        opts: ExecOptions,
    ) -> Result<Vec<ResultRow>, GraphError> {
        let q = Self::build_query(cypher, params);
        match tokio::time::timeout(opts.timeout, self.collect_rows(q)).await {
            Ok(rows) => rows,
            Err(_) => Err(GraphError::Timeout(opts.timeout)),
        }
    }

    async fn run_admin(&self, cypher: &str, params: &Params) -> Result<(), GraphError> {
        let q = Self::build_query(cypher, params);
        self.graph
            .run(q)
            .await
            .map_err(|e| classify_neo4rs_error(&e))
    }

    async fn introspect_schema(&self) -> Result<SchemaIntrospection, GraphError> {
        let opts = ExecOptions::default();

        let label_rows = self
            .run_read(
                "CALL db.labels() YIELD label RETURN label",
                &Params::new(),
                opts,
            )
            .await?;
        let labels: Vec<String> = label_rows
            .iter()
            .filter_map(|r| r.get("label").and_then(|v| v.as_str()).map(String::from))
            .collect();

        let rel_rows = self
            .run_read(
                "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType",
                &Params::new(),
                opts,
            )
            .await?;
        let relationships: Vec<String> = rel_rows
            .iter()
            .filter_map(|r| {
                r.get("relationshipType")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .collect();

        let mut properties = BTreeMap::new();
        for label in &labels {
            // Labels come from the store itself, but only well-formed
            // identifiers are safe to splice between backticks.
            if !IDENTIFIER_RE.is_match(label) {
                tracing::warn!(label, "skipping label with non-identifier name");
                continue;
            }
            let cypher = format!(
                "MATCH (n:`{}`) UNWIND keys(n) AS key RETURN DISTINCT key",
                label
            );
            let prop_rows = self.run_read(&cypher, &Params::new(), opts).await?;
            let keys: Vec<String> = prop_rows
                .iter()
                .filter_map(|r| r.get("key").and_then(|v| v.as_str()).map(String::from))
                .collect();
            properties.insert(label.clone(), keys);
        }

        Ok(SchemaIntrospection {
            labels,
            relationships,
            properties,
        })
    }

    async fn vector_index_dimension(&self, index_name: &str) -> Result<Option<usize>, GraphError> {
        let rows = self
            .run_read(
                "SHOW INDEXES YIELD name, type, state, options \
                 RETURN name, type, state, options",
                &Params::new(),
                ExecOptions::default(),
            )
            .await?;

        for row in rows {
            let name = row.get("name").and_then(|v| v.as_str());
            let kind = row.get("type").and_then(|v| v.as_str());
            let state = row.get("state").and_then(|v| v.as_str());
            if name != Some(index_name) || kind != Some("VECTOR") || state != Some("ONLINE") {
                continue;
            }
            let dimension = row
                .get("options")
                .and_then(|o| o.get("indexConfig"))
                .and_then(|c| c.get("vector.dimensions"))
                .and_then(|d| d.as_u64());
            return Ok(dimension.map(|d| d as usize));
        }
        Ok(None)
    }
}

/// Convert a parameter value into the driver's wire type.
fn to_bolt(value: &ParamValue) -> BoltType {
    match value {
        ParamValue::Null => BoltType::Null(Default::default()),
        ParamValue::Bool(b) => BoltType::from(*b),
        ParamValue::Int(i) => BoltType::from(*i),
        ParamValue::Float(f) => BoltType::from(*f),
        ParamValue::String(s) => BoltType::from(s.as_str()),
        ParamValue::FloatList(v) => {
            BoltType::from(v.iter().map(|x| *x as f64).collect::<Vec<f64>>())
        }
        ParamValue::StringList(v) => BoltType::from(v.clone()),
    }
}

fn classify_neo4rs_error(e: &neo4rs::Error) -> GraphError {
    let text = e.to_string();
    if text.contains("ConnectionError") || text.contains("connection") || text.contains("refused") {
        GraphError::Unavailable(text)
    } else {
        GraphError::Query(text)
    }
}
