//! Core data types flowing through the question-answering pipeline
//!
//! Each stage consumes and produces owned records; nothing here is shared
//! mutably between requests. Parameter maps use [`ParamValue`], a closed sum
//! type, so arbitrary JSON never travels past the LLM boundary unvalidated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A query parameter value.
///
/// Candidate parameters produced by the generator are scalars; the list
/// variants exist for internal queries (vector search embeddings, id batches)
/// and are never accepted from LLM output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    FloatList(Vec<f32>),
    StringList(Vec<String>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert a JSON value into a parameter value. Objects and heterogeneous
    /// arrays are rejected; LLM output must stay scalar.
    pub fn from_json(value: &serde_json::Value) -> Option<ParamValue> {
        match value {
            serde_json::Value::Null => Some(ParamValue::Null),
            serde_json::Value::Bool(b) => Some(ParamValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(ParamValue::Int(i))
                } else {
                    n.as_f64().map(ParamValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(ParamValue::String(s.clone())),
            serde_json::Value::Array(items) => {
                let strings: Option<Vec<String>> = items
                    .iter()
                    .map(|v| v.as_str().map(|s| s.to_string()))
                    .collect();
                strings.map(ParamValue::StringList)
            }
            serde_json::Value::Object(_) => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

/// Parameter map keyed by `$name` (without the dollar sign).
pub type Params = BTreeMap<String, ParamValue>;

/// One entity mapping resolved by the semantic mapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMapping {
    pub user_term: String,
    pub schema_label: String,
    pub score: f32,
}

/// Output of the planner: intent, anchor entity and canonical parameters.
///
/// Parameter names here are canonical (`student_name`, `limit`, `from`, `to`);
/// translation to template-specific names happens in the generator, nowhere
/// else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub intent: String,
    pub anchor_entity: Option<String>,
    pub params: Params,
    pub confidence: f32,
    pub question: String,
    pub entity_mappings: Vec<EntityMapping>,
}

impl QueryPlan {
    /// Fallback plan used when planning fails entirely.
    pub fn fallback(question: &str) -> Self {
        QueryPlan {
            intent: "general_rag_query".to_string(),
            anchor_entity: None,
            params: Params::new(),
            confidence: 0.0,
            question: question.to_string(),
            entity_mappings: Vec::new(),
        }
    }
}

/// Where a candidate query came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Template,
    Llm,
}

/// A generated but not-yet-validated (query, params) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CypherCandidate {
    pub text: String,
    pub params: Params,
    pub source: CandidateSource,
}

/// One row returned by the executor.
///
/// `node_ids` holds stable node identifiers harvested from the `primary_id`
/// column contract; the augmentor uses them as traversal anchors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub columns: Vec<String>,
    pub values: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_ids: Vec<String>,
}

impl ResultRow {
    /// Build a row from a JSON object, preserving key order as column order.
    pub fn from_object(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let columns: Vec<String> = map.keys().cloned().collect();
        let values: Vec<serde_json::Value> = map.values().cloned().collect();
        let node_ids = map
            .get("primary_id")
            .and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .into_iter()
            .collect();
        ResultRow {
            columns,
            values,
            node_ids,
        }
    }

    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }
}

/// A text fragment retrieved by vector similarity.
///
/// `chunk_id` is the only identifier the summariser may cite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub source_doc_id: String,
    pub similarity: f32,
}

/// Graph context collected around result anchors: labels and ids only, no
/// property values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorNeighbor {
    pub id: String,
    pub labels: Vec<String>,
}

/// Citation verification result attached to every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationVerification {
    pub status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_citations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Failed,
}

impl CitationVerification {
    pub fn verified() -> Self {
        CitationVerification {
            status: VerificationStatus::Verified,
            unknown_citations: Vec::new(),
        }
    }
}

/// Requested output rendering for a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Text,
    Table,
    Graph,
}

/// The full response returned by the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub question: String,
    pub summary: String,
    pub cypher: String,
    pub params: Params,
    pub rows: Vec<ResultRow>,
    pub chunks: Vec<RetrievedChunk>,
    pub citations: Vec<String>,
    pub verification: CitationVerification,
    pub trace_id: String,
    pub audit_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TablePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphPayload>,
}

/// Deterministic table rendering: stable column order, one cell per column.
#[derive(Debug, Clone, Serialize)]
pub struct TablePayload {
    pub columns: Vec<String>,
    pub data: Vec<Vec<serde_json::Value>>,
}

/// Lightweight graph rendering: anchor nodes plus their collected neighbors.
#[derive(Debug, Clone, Serialize)]
pub struct GraphPayload {
    pub nodes: Vec<GraphNode>,
    pub edge_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub labels: Vec<String>,
}
