//! Result augmentation: chunk retrieval and graph context
//!
//! Three bounded lookups around an executed query:
//!
//! 1. vector-KNN over the chunk index for fragments similar to the question,
//! 2. parent/sibling hierarchy expansion around the hit chunks,
//! 3. one hop of neighbor labels+ids around anchor nodes (no property values).
//!
//! Everything here is fail-open: a missing chunk index or an embedding outage
//! degrades the response to rows-only, it never fails the request. The graph
//! is never mutated.

use crate::embeddings::EmbeddingProvider;
use crate::neo4j::{ExecOptions, GraphStore};
use crate::pipeline::models::{AnchorNeighbor, ParamValue, Params, RetrievedChunk};
use crate::Policy;
use std::sync::Arc;

/// Name of the chunk vector index.
pub const CHUNK_INDEX_NAME: &str = "chunk_embeddings";

/// Context gathered for the summariser.
#[derive(Debug, Clone, Default)]
pub struct Augmented {
    pub chunks: Vec<RetrievedChunk>,
    pub neighbors: Vec<AnchorNeighbor>,
    /// True when a lookup failed and the context is partial.
    pub degraded: bool,
}

/// Collects chunk and graph context around executed results.
pub struct Augmentor {
    graph: Arc<dyn GraphStore>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl Augmentor {
    pub fn new(graph: Arc<dyn GraphStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Augmentor { graph, provider }
    }

    /// Gather context for `question` around the given anchor node ids.
    pub async fn augment(&self, question: &str, anchors: &[String], policy: &Policy) -> Augmented {
        let mut out = Augmented::default();
        let opts = ExecOptions::with_timeout(policy.query_timeout);

        match self.similar_chunks(question, policy, opts).await {
            Ok(chunks) => {
                out.chunks = chunks;
            }
            Err(e) => {
                tracing::warn!(error = %e, "chunk retrieval unavailable, continuing without chunks");
                out.degraded = true;
            }
        }

        if !out.chunks.is_empty() {
            match self.expand_hierarchy(&out.chunks, policy, opts).await {
                Ok(extra) => {
                    for chunk in extra {
                        if out.chunks.len() >= policy.retriever_top_k * 2 {
                            break;
                        }
                        if !out.chunks.iter().any(|c| c.chunk_id == chunk.chunk_id) {
                            out.chunks.push(chunk);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "hierarchy expansion failed, keeping direct hits");
                    out.degraded = true;
                }
            }
        }

        if !anchors.is_empty() {
            match self.anchor_neighbors(anchors, policy, opts).await {
                Ok(neighbors) => {
                    out.neighbors = neighbors;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "anchor expansion failed, continuing without context");
                    out.degraded = true;
                }
            }
        }

        out
    }

    async fn similar_chunks(
        &self,
        question: &str,
        policy: &Policy,
        opts: ExecOptions,
    ) -> anyhow::Result<Vec<RetrievedChunk>> {
        let embedding = self.provider.embed_text(question).await?;

        let mut params = Params::new();
        params.insert(
            "top_k".to_string(),
            ParamValue::Int(policy.retriever_top_k as i64),
        );
        params.insert("embedding".to_string(), ParamValue::FloatList(embedding));

        let rows = self
            .graph
            .run_read(
                &format!(
                    "CALL db.index.vector.queryNodes('{}', $top_k, $embedding) \
                     YIELD node, score \
                     OPTIONAL MATCH (d:Document)-[:HAS_CHUNK]->(node) \
                     RETURN node.id AS chunk_id, node.text AS text, \
                            d.id AS source_doc_id, score \
                     ORDER BY score DESC",
                    CHUNK_INDEX_NAME
                ),
                &params,
                opts,
            )
            .await?;

        let chunks = rows
            .iter()
            .filter_map(|row| {
                let chunk_id = row.get("chunk_id")?.as_str()?.to_string();
                let text = row.get("text")?.as_str()?.to_string();
                let similarity = row.get("score")?.as_f64()? as f32;
                if similarity < policy.similarity_threshold {
                    return None;
                }
                let source_doc_id = row
                    .get("source_doc_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(RetrievedChunk {
                    chunk_id,
                    text,
                    source_doc_id,
                    similarity,
                })
            })
            .collect();
        Ok(chunks)
    }

    async fn expand_hierarchy(
        &self,
        chunks: &[RetrievedChunk],
        policy: &Policy,
        opts: ExecOptions,
    ) -> anyhow::Result<Vec<RetrievedChunk>> {
        let ids: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();

        let mut params = Params::new();
        params.insert("chunk_ids".to_string(), ParamValue::StringList(ids));
        params.insert(
            "max_chunks".to_string(),
            ParamValue::Int(policy.retriever_top_k as i64),
        );

        // The path quantifier cannot be a parameter; the bound is a policy
        // constant, not user input.
        let cypher = format!(
            "UNWIND $chunk_ids AS cid \
             MATCH (hit:Chunk {{id: cid}}) \
             MATCH (doc:Document)-[:HAS_CHUNK]->(hit) \
             MATCH (doc)-[:PART_OF*0..{}]->(parent:Document) \
             MATCH (parent)-[:HAS_CHUNK]->(related:Chunk) \
             RETURN DISTINCT related.id AS chunk_id, related.text AS text, \
                    parent.id AS source_doc_id \
             LIMIT $max_chunks",
            policy.max_traversal_depth
        );

        let rows = self.graph.run_read(&cypher, &params, opts).await?;
        let related = rows
            .iter()
            .filter_map(|row| {
                Some(RetrievedChunk {
                    chunk_id: row.get("chunk_id")?.as_str()?.to_string(),
                    text: row.get("text")?.as_str()?.to_string(),
                    source_doc_id: row
                        .get("source_doc_id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    similarity: 0.0,
                })
            })
            .collect();
        Ok(related)
    }

    async fn anchor_neighbors(
        &self,
        anchors: &[String],
        policy: &Policy,
        opts: ExecOptions,
    ) -> anyhow::Result<Vec<AnchorNeighbor>> {
        let mut params = Params::new();
        params.insert(
            "anchor_ids".to_string(),
            ParamValue::StringList(anchors.to_vec()),
        );
        params.insert(
            "max_neighbors".to_string(),
            ParamValue::Int((anchors.len() * policy.retriever_top_k) as i64),
        );

        let rows = self
            .graph
            .run_read(
                "UNWIND $anchor_ids AS aid \
                 MATCH (anchor {id: aid})-[]-(neighbor) \
                 RETURN DISTINCT neighbor.id AS id, labels(neighbor) AS labels \
                 LIMIT $max_neighbors",
                &params,
                opts,
            )
            .await?;

        let neighbors = rows
            .iter()
            .filter_map(|row| {
                let id = row.get("id")?.as_str()?.to_string();
                let labels = row
                    .get("labels")?
                    .as_array()?
                    .iter()
                    .filter_map(|l| l.as_str().map(String::from))
                    .collect();
                Some(AnchorNeighbor { id, labels })
            })
            .collect();
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::neo4j::MockGraphStore;
    use serde_json::json;

    fn augmentor(store: Arc<MockGraphStore>) -> Augmentor {
        Augmentor::new(store, Arc::new(MockEmbeddingProvider::new(8)))
    }

    #[tokio::test]
    async fn collects_chunks_and_neighbors() {
        let store = Arc::new(MockGraphStore::new());
        store.respond_with(
            "db.index.vector.queryNodes",
            vec![
                json!({"chunk_id": "chunk_1", "text": "Isabella works on reading goals.",
                       "source_doc_id": "doc_1", "score": 0.91}),
                json!({"chunk_id": "chunk_2", "text": "Progress review notes.",
                       "source_doc_id": "doc_1", "score": 0.74}),
            ],
        );
        store.respond_with(
            "PART_OF*0..2",
            vec![json!({"chunk_id": "chunk_3", "text": "Sibling section.", "source_doc_id": "doc_1"})],
        );
        store.respond_with(
            "UNWIND $anchor_ids",
            vec![json!({"id": "goal_1", "labels": ["Goal"]})],
        );

        let out = augmentor(store)
            .augment("goals for Isabella", &["s1".to_string()], &Policy::default())
            .await;
        assert_eq!(out.chunks.len(), 3);
        assert_eq!(out.chunks[0].chunk_id, "chunk_1");
        assert_eq!(out.neighbors.len(), 1);
        assert_eq!(out.neighbors[0].labels, vec!["Goal"]);
        assert!(!out.degraded);
    }

    #[tokio::test]
    async fn missing_chunk_index_fails_open() {
        let store = Arc::new(MockGraphStore::new());
        store.fail_with("db.index.vector.queryNodes", "no such vector index");

        let out = augmentor(store)
            .augment("anything", &[], &Policy::default())
            .await;
        assert!(out.chunks.is_empty());
        assert!(out.neighbors.is_empty());
        assert!(out.degraded);
    }

    #[tokio::test]
    async fn empty_index_returns_empty_context_without_degrading() {
        let store = Arc::new(MockGraphStore::new());
        // Responders absent: KNN query returns zero rows
        let out = augmentor(store)
            .augment("anything", &[], &Policy::default())
            .await;
        assert!(out.chunks.is_empty());
        assert!(!out.degraded);
    }

    #[tokio::test]
    async fn low_similarity_chunks_are_filtered() {
        let store = Arc::new(MockGraphStore::new());
        store.respond_with(
            "db.index.vector.queryNodes",
            vec![
                json!({"chunk_id": "chunk_1", "text": "relevant", "source_doc_id": "d", "score": 0.9}),
                json!({"chunk_id": "chunk_2", "text": "irrelevant", "source_doc_id": "d", "score": 0.1}),
            ],
        );

        let mut policy = Policy::default();
        policy.similarity_threshold = 0.5;

        let out = augmentor(store).augment("q", &[], &policy).await;
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].chunk_id, "chunk_1");
    }

    #[tokio::test]
    async fn expansion_failure_keeps_direct_hits() {
        let store = Arc::new(MockGraphStore::new());
        store.respond_with(
            "db.index.vector.queryNodes",
            vec![json!({"chunk_id": "chunk_1", "text": "hit", "source_doc_id": "d", "score": 0.8})],
        );
        store.fail_with("PART_OF*0..2", "boom");

        let out = augmentor(store).augment("q", &[], &Policy::default()).await;
        assert_eq!(out.chunks.len(), 1);
        assert!(out.degraded);
    }
}
