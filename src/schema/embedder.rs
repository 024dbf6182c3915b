//! Schema-term embeddings and vector index lifecycle
//!
//! Every allow-list term (and its configured synonyms) becomes a
//! `(:SchemaTerm)` node carrying an embedding. The vector index over those
//! nodes is created with the *detected* runtime dimension — the length of the
//! first vector the active provider returns — and is dropped and recreated
//! whenever that dimension changes, so a provider switch (8-dim stub to 768-dim
//! production model) never leaves mixed-dimension vectors behind.

use crate::embeddings::EmbeddingProvider;
use crate::error::{PipelineError, ReasonCode};
use crate::neo4j::{ExecOptions, GraphError, GraphStore};
use crate::pipeline::models::{ParamValue, Params};
use crate::schema::catalog::SchemaSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the schema-term vector index.
pub const SCHEMA_INDEX_NAME: &str = "schema_terms";

/// Kind of schema term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermKind {
    Label,
    Relationship,
    Property,
}

impl TermKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TermKind::Label => "label",
            TermKind::Relationship => "relationship",
            TermKind::Property => "property",
        }
    }

    pub fn parse(s: &str) -> Option<TermKind> {
        match s {
            "label" => Some(TermKind::Label),
            "relationship" => Some(TermKind::Relationship),
            "property" => Some(TermKind::Property),
            _ => None,
        }
    }
}

/// One nearest-neighbor match from the term index.
#[derive(Debug, Clone)]
pub struct TermMatch {
    pub term: String,
    pub kind: TermKind,
    pub canonical_id: String,
    pub score: f32,
}

/// Result of a term-index rebuild.
pub struct RebuildOutcome {
    pub terms_indexed: usize,
    pub dimension: usize,
    pub index_recreated: bool,
}

struct SchemaTermRow {
    id: String,
    term: String,
    kind: TermKind,
    canonical_id: String,
}

/// Maintains SchemaTerm nodes and their vector index.
pub struct SchemaEmbedder {
    graph: Arc<dyn GraphStore>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl SchemaEmbedder {
    pub fn new(graph: Arc<dyn GraphStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        SchemaEmbedder { graph, provider }
    }

    /// Dimension the active provider produces, detected from a probe call.
    ///
    /// An empty response is a fatal refresh error: without a dimension there
    /// is nothing to build an index against.
    pub async fn probe_dimension(&self) -> Result<usize, PipelineError> {
        let vectors = self
            .provider
            .embed_batch(&["dimension probe".to_string()])
            .await
            .map_err(|e| {
                PipelineError::rejected(ReasonCode::UpstreamUnavailable, e.to_string())
            })?;
        match vectors.first() {
            Some(v) if !v.is_empty() => Ok(v.len()),
            _ => Err(PipelineError::rejected(
                ReasonCode::UpstreamUnavailable,
                "embedding provider returned an empty response",
            )),
        }
    }

    /// Declared dimension of the current index, if it exists.
    pub async fn index_dimension(&self) -> Result<Option<usize>, PipelineError> {
        self.graph
            .vector_index_dimension(SCHEMA_INDEX_NAME)
            .await
            .map_err(graph_to_pipeline)
    }

    /// Re-embed all terms of the snapshot and bring the index up to date.
    ///
    /// The index is only dropped and recreated when its declared dimension
    /// differs from the provider's; term upserts always run (explicit SET so
    /// stale vectors are overwritten even on match).
    pub async fn rebuild(&self, snapshot: &SchemaSnapshot) -> Result<RebuildOutcome, PipelineError> {
        let terms = collect_terms(snapshot);
        if terms.is_empty() {
            return Err(PipelineError::rejected(
                ReasonCode::SchemaUnavailable,
                "allow-list has no terms to embed",
            ));
        }

        let texts: Vec<String> = terms.iter().map(|t| t.term.clone()).collect();
        let embeddings = self.provider.embed_batch(&texts).await.map_err(|e| {
            PipelineError::rejected(ReasonCode::UpstreamUnavailable, e.to_string())
        })?;
        if embeddings.len() != terms.len() || embeddings.iter().any(|v| v.is_empty()) {
            return Err(PipelineError::rejected(
                ReasonCode::UpstreamUnavailable,
                format!(
                    "embedding provider returned {} vectors for {} terms",
                    embeddings.len(),
                    terms.len()
                ),
            ));
        }

        let dimension = embeddings[0].len();
        let existing = self.index_dimension().await?;
        let index_recreated = existing != Some(dimension);
        if index_recreated {
            self.recreate_index(dimension).await?;
        }

        for (term, embedding) in terms.iter().zip(embeddings) {
            let mut params = Params::new();
            params.insert("id".to_string(), ParamValue::String(term.id.clone()));
            params.insert("term".to_string(), ParamValue::String(term.term.clone()));
            params.insert(
                "kind".to_string(),
                ParamValue::String(term.kind.as_str().to_string()),
            );
            params.insert(
                "canonical_id".to_string(),
                ParamValue::String(term.canonical_id.clone()),
            );
            params.insert("embedding".to_string(), ParamValue::FloatList(embedding));

            self.graph
                .run_admin(
                    "MERGE (s:SchemaTerm {id: $id}) \
                     SET s.term = $term, s.kind = $kind, \
                         s.canonical_id = $canonical_id, s.embedding = $embedding",
                    &params,
                )
                .await
                .map_err(graph_to_pipeline)?;
        }

        tracing::info!(
            terms = terms.len(),
            dimension,
            index_recreated,
            "schema term index up to date"
        );

        Ok(RebuildOutcome {
            terms_indexed: terms.len(),
            dimension,
            index_recreated,
        })
    }

    async fn recreate_index(&self, dimension: usize) -> Result<(), PipelineError> {
        self.graph
            .run_admin(
                &format!("DROP INDEX `{}` IF EXISTS", SCHEMA_INDEX_NAME),
                &Params::new(),
            )
            .await
            .map_err(graph_to_pipeline)?;

        let create = format!(
            "CREATE VECTOR INDEX `{}` FOR (s:SchemaTerm) ON (s.embedding) \
             OPTIONS {{indexConfig: {{`vector.dimensions`: {}, \
             `vector.similarity_function`: 'cosine'}}}}",
            SCHEMA_INDEX_NAME, dimension
        );
        self.graph
            .run_admin(&create, &Params::new())
            .await
            .map_err(graph_to_pipeline)?;

        tracing::info!(dimension, "recreated schema term vector index");
        Ok(())
    }

    /// The k terms most similar to `term`, best first; ties broken by
    /// lexicographic canonical id.
    pub async fn nearest(&self, term: &str, k: usize) -> Result<Vec<TermMatch>, PipelineError> {
        let embedding = self
            .provider
            .embed_text(term)
            .await
            .map_err(|e| PipelineError::rejected(ReasonCode::UpstreamUnavailable, e.to_string()))?;

        let mut params = Params::new();
        params.insert("top_k".to_string(), ParamValue::Int(k as i64));
        params.insert("embedding".to_string(), ParamValue::FloatList(embedding));

        let rows = self
            .graph
            .run_read(
                &format!(
                    "CALL db.index.vector.queryNodes('{}', $top_k, $embedding) \
                     YIELD node, score \
                     RETURN node.term AS term, node.kind AS kind, \
                            node.canonical_id AS canonical_id, score \
                     ORDER BY score DESC, canonical_id ASC",
                    SCHEMA_INDEX_NAME
                ),
                &params,
                ExecOptions::default(),
            )
            .await
            .map_err(graph_to_pipeline)?;

        let matches = rows
            .iter()
            .filter_map(|row| {
                let term = row.get("term")?.as_str()?.to_string();
                let kind = TermKind::parse(row.get("kind")?.as_str()?)?;
                let canonical_id = row.get("canonical_id")?.as_str()?.to_string();
                let score = row.get("score")?.as_f64()? as f32;
                Some(TermMatch {
                    term,
                    kind,
                    canonical_id,
                    score: score.clamp(0.0, 1.0),
                })
            })
            .collect();
        Ok(matches)
    }
}

fn graph_to_pipeline(e: GraphError) -> PipelineError {
    match e {
        GraphError::Unavailable(msg) => {
            PipelineError::rejected(ReasonCode::UpstreamUnavailable, msg)
        }
        other => PipelineError::Transport(anyhow::anyhow!(other)),
    }
}

fn collect_terms(snapshot: &SchemaSnapshot) -> Vec<SchemaTermRow> {
    let mut terms = Vec::new();
    let allow = &snapshot.allow_list;

    let mut push = |term: &str, kind: TermKind, canonical: &str| {
        terms.push(SchemaTermRow {
            id: format!("{}:{}", kind.as_str(), term),
            term: term.to_string(),
            kind,
            canonical_id: canonical.to_string(),
        });
    };

    for label in &allow.labels {
        push(label, TermKind::Label, label);
    }
    for rel in &allow.relationships {
        push(rel, TermKind::Relationship, rel);
    }
    let mut seen_props = std::collections::BTreeSet::new();
    for props in allow.properties.values() {
        for prop in props {
            if seen_props.insert(prop.clone()) {
                push(prop, TermKind::Property, prop);
            }
        }
    }

    // Synonyms point at their canonical term and inherit its kind
    for (canonical, synonyms) in &snapshot.synonyms {
        let kind = if allow.labels.contains(canonical) {
            Some(TermKind::Label)
        } else if allow.relationships.contains(canonical) {
            Some(TermKind::Relationship)
        } else if seen_props.contains(canonical) {
            Some(TermKind::Property)
        } else {
            None
        };
        if let Some(kind) = kind {
            for synonym in synonyms {
                push(synonym, kind, canonical);
            }
        }
    }

    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::neo4j::MockGraphStore;
    use crate::schema::catalog::SchemaCatalog;
    use std::collections::BTreeMap;

    async fn snapshot_with_synonyms() -> (Arc<MockGraphStore>, Arc<SchemaSnapshot>) {
        let store = Arc::new(MockGraphStore::with_student_schema());
        let synonyms = BTreeMap::from([(
            "Student".to_string(),
            vec!["pupil".to_string(), "learner".to_string()],
        )]);
        let catalog = SchemaCatalog::new(store.clone(), synonyms);
        let refresh = catalog.refresh().await.unwrap();
        (store, refresh.snapshot)
    }

    #[tokio::test]
    async fn rebuild_creates_index_and_upserts_terms() {
        let (store, snapshot) = snapshot_with_synonyms().await;
        let embedder = SchemaEmbedder::new(store.clone(), Arc::new(MockEmbeddingProvider::new(8)));

        let outcome = embedder.rebuild(&snapshot).await.unwrap();
        assert!(outcome.index_recreated);
        assert_eq!(outcome.dimension, 8);
        // 8 labels + 7 relationships + unique properties + 2 synonyms
        assert!(outcome.terms_indexed > 17);

        let admin = store.admin_log();
        assert!(admin.iter().any(|s| s.contains("CREATE VECTOR INDEX")));
        assert!(admin.iter().any(|s| s.contains("MERGE (s:SchemaTerm")));
        assert_eq!(
            store
                .vector_index_dimension(SCHEMA_INDEX_NAME)
                .await
                .unwrap(),
            Some(8)
        );
    }

    #[tokio::test]
    async fn dimension_switch_recreates_index() {
        let (store, snapshot) = snapshot_with_synonyms().await;

        let embedder = SchemaEmbedder::new(store.clone(), Arc::new(MockEmbeddingProvider::new(8)));
        embedder.rebuild(&snapshot).await.unwrap();

        // Same graph, new provider with a different dimension
        let embedder =
            SchemaEmbedder::new(store.clone(), Arc::new(MockEmbeddingProvider::new(768)));
        let outcome = embedder.rebuild(&snapshot).await.unwrap();
        assert!(outcome.index_recreated);
        assert_eq!(outcome.dimension, 768);
        assert_eq!(
            store
                .vector_index_dimension(SCHEMA_INDEX_NAME)
                .await
                .unwrap(),
            Some(768)
        );
    }

    #[tokio::test]
    async fn matching_dimension_keeps_index() {
        let (store, snapshot) = snapshot_with_synonyms().await;
        let embedder = SchemaEmbedder::new(store.clone(), Arc::new(MockEmbeddingProvider::new(8)));

        embedder.rebuild(&snapshot).await.unwrap();
        let drops_before = store
            .admin_log()
            .iter()
            .filter(|s| s.starts_with("DROP INDEX"))
            .count();

        let outcome = embedder.rebuild(&snapshot).await.unwrap();
        assert!(!outcome.index_recreated);
        let drops_after = store
            .admin_log()
            .iter()
            .filter(|s| s.starts_with("DROP INDEX"))
            .count();
        assert_eq!(drops_before, drops_after, "index must not be dropped again");
    }

    #[tokio::test]
    async fn nearest_maps_rows_and_clamps_scores() {
        let (store, _snapshot) = snapshot_with_synonyms().await;
        store.respond_with(
            "db.index.vector.queryNodes",
            vec![
                serde_json::json!({"term": "Student", "kind": "label", "canonical_id": "Student", "score": 0.93}),
                serde_json::json!({"term": "pupil", "kind": "label", "canonical_id": "Student", "score": 0.88}),
            ],
        );
        let embedder = SchemaEmbedder::new(store.clone(), Arc::new(MockEmbeddingProvider::new(8)));

        let matches = embedder.nearest("pupils", 5).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].canonical_id, "Student");
        assert_eq!(matches[0].kind, TermKind::Label);
        assert!(matches[0].score >= matches[1].score);
    }
}
