//! Schema allow-list and term embeddings
//!
//! The catalog extracts the allow-list from the graph store and publishes it
//! as an immutable snapshot; the embedder maintains the schema-term vector
//! index whose dimension follows the active embedding provider. Both are only
//! written by the admin refresh path — request handling reads snapshots.

pub mod catalog;
pub mod embedder;

pub use catalog::{AllowList, SchemaCatalog, SchemaSnapshot};
pub use embedder::{SchemaEmbedder, TermKind, TermMatch, SCHEMA_INDEX_NAME};

use crate::error::PipelineError;

/// Outcome of a full admin schema refresh.
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub fingerprint: String,
    pub schema_changed: bool,
    pub terms_indexed: usize,
    pub index_dimension: Option<usize>,
    pub index_rebuilt: bool,
}

/// Run a complete schema refresh: re-extract the allow-list, and rebuild the
/// term embeddings and vector index when anything material changed.
///
/// Idempotence: when the schema fingerprint is unchanged *and* the index
/// dimension already matches the active provider, no downstream work runs and
/// the index is left untouched. A provider switch (different embedding
/// dimension) forces a rebuild even with an unchanged fingerprint.
pub async fn refresh_schema(
    catalog: &SchemaCatalog,
    embedder: &SchemaEmbedder,
) -> Result<RefreshReport, PipelineError> {
    let refresh = catalog.refresh().await?;
    let provider_dimension = embedder.probe_dimension().await?;
    let index_dimension = embedder.index_dimension().await?;

    if !refresh.changed && index_dimension == Some(provider_dimension) {
        tracing::info!(
            fingerprint = %refresh.snapshot.fingerprint_hex(),
            "schema unchanged, skipping term re-embedding"
        );
        return Ok(RefreshReport {
            fingerprint: refresh.snapshot.fingerprint_hex(),
            schema_changed: false,
            terms_indexed: 0,
            index_dimension,
            index_rebuilt: false,
        });
    }

    let rebuilt = embedder.rebuild(&refresh.snapshot).await?;
    Ok(RefreshReport {
        fingerprint: refresh.snapshot.fingerprint_hex(),
        schema_changed: refresh.changed,
        terms_indexed: rebuilt.terms_indexed,
        index_dimension: Some(rebuilt.dimension),
        index_rebuilt: rebuilt.index_recreated,
    })
}
