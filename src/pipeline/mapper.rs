//! Semantic mapping of user terms to schema terms
//!
//! Primary path: embedding nearest-neighbor over the schema-term vector index.
//! When the embedder or its index is unavailable the mapper degrades to a
//! case-insensitive substring scan over canonical terms and synonyms with a
//! flat score of 0.5 — good enough to keep planning alive offline.

use crate::schema::{SchemaEmbedder, SchemaSnapshot, TermKind};
use std::sync::Arc;

/// One mapping result: canonical schema id and its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct TermMapping {
    pub schema_id: String,
    pub score: f32,
}

/// Maps free-form user terms onto allow-list identifiers.
pub struct SemanticMapper {
    embedder: Arc<SchemaEmbedder>,
    top_k: usize,
}

impl SemanticMapper {
    pub fn new(embedder: Arc<SchemaEmbedder>, top_k: usize) -> Self {
        SemanticMapper { embedder, top_k }
    }

    /// Map `user_term` to schema terms of the given kind, best match first.
    pub async fn map(
        &self,
        snapshot: &SchemaSnapshot,
        user_term: &str,
        kind: TermKind,
    ) -> Vec<TermMapping> {
        let term = user_term.trim();
        if term.is_empty() {
            return Vec::new();
        }

        match self.embedder.nearest(term, self.top_k).await {
            Ok(matches) => {
                let mut out: Vec<TermMapping> = Vec::new();
                for m in matches.into_iter().filter(|m| m.kind == kind) {
                    // Several synonyms can resolve to one canonical id; keep
                    // the best-scoring hit per id.
                    if !out.iter().any(|existing| existing.schema_id == m.canonical_id) {
                        out.push(TermMapping {
                            schema_id: m.canonical_id,
                            score: m.score,
                        });
                    }
                }
                if out.is_empty() {
                    substring_fallback(snapshot, term, kind)
                } else {
                    out
                }
            }
            Err(e) => {
                tracing::warn!(
                    term,
                    error = %e,
                    "embedding mapper unavailable, using substring fallback"
                );
                substring_fallback(snapshot, term, kind)
            }
        }
    }
}

/// Case-insensitive substring matching over canonical terms and synonyms.
fn substring_fallback(snapshot: &SchemaSnapshot, term: &str, kind: TermKind) -> Vec<TermMapping> {
    let needle = term.to_lowercase();
    let allow = &snapshot.allow_list;

    let candidates: Vec<&String> = match kind {
        TermKind::Label => allow.labels.iter().collect(),
        TermKind::Relationship => allow.relationships.iter().collect(),
        TermKind::Property => {
            let mut props: Vec<&String> = allow.properties.values().flatten().collect();
            props.sort();
            props.dedup();
            props
        }
    };

    let mut out = Vec::new();
    for canonical in candidates {
        let canonical_lower = canonical.to_lowercase();
        let direct_hit =
            canonical_lower.contains(&needle) || needle.contains(&canonical_lower);
        let synonym_hit = snapshot
            .synonyms
            .get(canonical.as_str())
            .map(|syns| {
                syns.iter().any(|s| {
                    let s = s.to_lowercase();
                    s.contains(&needle) || needle.contains(&s)
                })
            })
            .unwrap_or(false);

        if direct_hit || synonym_hit {
            out.push(TermMapping {
                schema_id: canonical.clone(),
                score: 0.5,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::neo4j::MockGraphStore;
    use crate::schema::SchemaCatalog;
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn mapper_fixture(store: Arc<MockGraphStore>) -> (SemanticMapper, Arc<SchemaSnapshot>) {
        let synonyms = BTreeMap::from([("Student".to_string(), vec!["pupil".to_string()])]);
        let catalog = SchemaCatalog::new(store.clone(), synonyms);
        let snapshot = catalog.refresh().await.unwrap().snapshot;
        let embedder = Arc::new(SchemaEmbedder::new(
            store,
            Arc::new(MockEmbeddingProvider::new(8)),
        ));
        (SemanticMapper::new(embedder, 5), snapshot)
    }

    #[tokio::test]
    async fn embedding_matches_filter_by_kind_and_dedupe() {
        let store = Arc::new(MockGraphStore::with_student_schema());
        store.respond_with(
            "db.index.vector.queryNodes",
            vec![
                json!({"term": "Student", "kind": "label", "canonical_id": "Student", "score": 0.91}),
                json!({"term": "pupil", "kind": "label", "canonical_id": "Student", "score": 0.84}),
                json!({"term": "HAS_GOAL", "kind": "relationship", "canonical_id": "HAS_GOAL", "score": 0.8}),
            ],
        );
        let (mapper, snapshot) = mapper_fixture(store).await;

        let mappings = mapper.map(&snapshot, "pupils", TermKind::Label).await;
        assert_eq!(mappings.len(), 1, "one canonical id, relationship filtered");
        assert_eq!(mappings[0].schema_id, "Student");
        assert!((mappings[0].score - 0.91).abs() < 1e-6);
    }

    #[tokio::test]
    async fn unavailable_embedder_falls_back_to_substring() {
        let store = Arc::new(MockGraphStore::with_student_schema());
        store.fail_with("db.index.vector.queryNodes", "no such index");
        let (mapper, snapshot) = mapper_fixture(store).await;

        let mappings = mapper.map(&snapshot, "student", TermKind::Label).await;
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].schema_id, "Student");
        assert!((mappings[0].score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn substring_fallback_covers_synonyms() {
        let store = Arc::new(MockGraphStore::with_student_schema());
        store.fail_with("db.index.vector.queryNodes", "no such index");
        let (mapper, snapshot) = mapper_fixture(store).await;

        let mappings = mapper.map(&snapshot, "pupil", TermKind::Label).await;
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].schema_id, "Student");
    }

    #[tokio::test]
    async fn empty_term_maps_to_nothing() {
        let store = Arc::new(MockGraphStore::with_student_schema());
        let (mapper, snapshot) = mapper_fixture(store).await;
        assert!(mapper.map(&snapshot, "  ", TermKind::Label).await.is_empty());
    }
}
