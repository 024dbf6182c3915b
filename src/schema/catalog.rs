//! Schema catalog: allow-list extraction, fingerprinting, snapshot publication
//!
//! The allow-list is the authoritative set of labels, relationship types and
//! per-label properties that generators and validators may use. It lives in an
//! immutable snapshot swapped atomically on refresh; readers hold their
//! `Arc<SchemaSnapshot>` for the life of a request and never observe a
//! half-updated view.

use crate::error::{PipelineError, ReasonCode};
use crate::neo4j::{GraphError, GraphStore, SchemaIntrospection};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// The authoritative set of schema identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllowList {
    pub labels: BTreeSet<String>,
    pub relationships: BTreeSet<String>,
    pub properties: BTreeMap<String, BTreeSet<String>>,
}

impl AllowList {
    /// Build from raw introspection, dropping anything that is not a
    /// well-formed identifier.
    pub fn from_introspection(intro: &SchemaIntrospection) -> Self {
        let valid = |s: &&String| IDENTIFIER_RE.is_match(s);
        let labels: BTreeSet<String> = intro.labels.iter().filter(valid).cloned().collect();
        let relationships: BTreeSet<String> =
            intro.relationships.iter().filter(valid).cloned().collect();
        let properties: BTreeMap<String, BTreeSet<String>> = intro
            .properties
            .iter()
            .filter(|(label, _)| IDENTIFIER_RE.is_match(label))
            .map(|(label, props)| {
                (
                    label.clone(),
                    props.iter().filter(valid).cloned().collect(),
                )
            })
            .collect();
        AllowList {
            labels,
            relationships,
            properties,
        }
    }

    /// Stable content hash over the sorted (kind, owner, name) triples.
    ///
    /// Equal fingerprints mean no schema change; the BTree ordering makes the
    /// hash independent of introspection order.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for label in &self.labels {
            hasher.update(b"label\x00\x00");
            hasher.update(label.as_bytes());
            hasher.update(b"\x00");
        }
        for rel in &self.relationships {
            hasher.update(b"relationship\x00\x00");
            hasher.update(rel.as_bytes());
            hasher.update(b"\x00");
        }
        for (label, props) in &self.properties {
            for prop in props {
                hasher.update(b"property\x00");
                hasher.update(label.as_bytes());
                hasher.update(b"\x00");
                hasher.update(prop.as_bytes());
                hasher.update(b"\x00");
            }
        }
        hasher.finalize().into()
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn contains_relationship(&self, rel: &str) -> bool {
        self.relationships.contains(rel)
    }

    pub fn contains_property(&self, label: &str, prop: &str) -> bool {
        self.properties
            .get(label)
            .map(|props| props.contains(prop))
            .unwrap_or(false)
    }
}

/// Immutable, versioned view of the allow-list used for a single request.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    pub allow_list: AllowList,
    pub fingerprint: [u8; 32],
    /// Canonical term → synonyms, configured out of band.
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl SchemaSnapshot {
    pub fn fingerprint_hex(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Result of a catalog refresh.
#[derive(Debug)]
pub struct CatalogRefresh {
    pub snapshot: Arc<SchemaSnapshot>,
    pub changed: bool,
}

/// Extracts and publishes allow-list snapshots.
///
/// `refresh()` is only reachable from the admin path; request handling calls
/// `current()` which never blocks on a refresh in progress (snapshot swap).
pub struct SchemaCatalog {
    graph: Arc<dyn GraphStore>,
    synonyms: BTreeMap<String, Vec<String>>,
    current: RwLock<Arc<SchemaSnapshot>>,
}

impl SchemaCatalog {
    pub fn new(graph: Arc<dyn GraphStore>, synonyms: BTreeMap<String, Vec<String>>) -> Self {
        SchemaCatalog {
            graph,
            synonyms,
            current: RwLock::new(Arc::new(SchemaSnapshot::default())),
        }
    }

    /// The published snapshot. Cheap; clone of an `Arc`.
    pub fn current(&self) -> Arc<SchemaSnapshot> {
        self.current.read().unwrap().clone()
    }

    /// Re-extract the allow-list from the store and publish it atomically.
    ///
    /// Idempotent: an unchanged fingerprint keeps the existing snapshot and
    /// reports `changed = false`. If the store is unreachable the previous
    /// snapshot stays published and `SCHEMA_UNAVAILABLE` is returned.
    pub async fn refresh(&self) -> Result<CatalogRefresh, PipelineError> {
        let intro = self.graph.introspect_schema().await.map_err(|e| match e {
            GraphError::Unavailable(msg) => {
                PipelineError::rejected(ReasonCode::SchemaUnavailable, msg)
            }
            other => PipelineError::Transport(anyhow::anyhow!(other)),
        })?;

        let allow_list = AllowList::from_introspection(&intro);
        let fingerprint = allow_list.fingerprint();

        let previous = self.current();
        if previous.fingerprint == fingerprint {
            tracing::debug!("allow-list fingerprint unchanged");
            return Ok(CatalogRefresh {
                snapshot: previous,
                changed: false,
            });
        }

        let snapshot = Arc::new(SchemaSnapshot {
            allow_list,
            fingerprint,
            synonyms: self.synonyms.clone(),
        });
        *self.current.write().unwrap() = snapshot.clone();

        tracing::info!(
            labels = snapshot.allow_list.labels.len(),
            relationships = snapshot.allow_list.relationships.len(),
            fingerprint = %snapshot.fingerprint_hex(),
            "published new allow-list snapshot"
        );

        Ok(CatalogRefresh {
            snapshot,
            changed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neo4j::MockGraphStore;

    fn intro(labels: &[&str], rels: &[&str]) -> SchemaIntrospection {
        SchemaIntrospection {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            relationships: rels.iter().map(|s| s.to_string()).collect(),
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = AllowList::from_introspection(&intro(&["Student", "Goal"], &["HAS_GOAL"]));
        let b = AllowList::from_introspection(&intro(&["Goal", "Student"], &["HAS_GOAL"]));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = AllowList::from_introspection(&intro(&["Student"], &["HAS_GOAL"]));
        let b = AllowList::from_introspection(&intro(&["Student", "Goal"], &["HAS_GOAL"]));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn non_identifiers_are_dropped() {
        let list = AllowList::from_introspection(&intro(
            &["Student", "bad label", "1Numeric"],
            &["HAS_GOAL", "HAS-DASH"],
        ));
        assert!(list.contains_label("Student"));
        assert!(!list.contains_label("bad label"));
        assert!(!list.contains_label("1Numeric"));
        assert!(!list.contains_relationship("HAS-DASH"));
    }

    #[tokio::test]
    async fn refresh_publishes_and_is_idempotent() {
        let store = Arc::new(MockGraphStore::with_student_schema());
        let catalog = SchemaCatalog::new(store, BTreeMap::new());

        let first = catalog.refresh().await.unwrap();
        assert!(first.changed);
        assert!(catalog.current().allow_list.contains_label("Student"));

        let second = catalog.refresh().await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.snapshot.fingerprint, first.snapshot.fingerprint);
    }

    #[tokio::test]
    async fn unreachable_store_keeps_previous_snapshot() {
        let store = Arc::new(MockGraphStore::with_student_schema());
        let catalog = SchemaCatalog::new(store.clone(), BTreeMap::new());
        catalog.refresh().await.unwrap();
        let before = catalog.current();

        store.set_unavailable(true);
        let err = catalog.refresh().await.unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::SchemaUnavailable));

        let after = catalog.current();
        assert_eq!(before.fingerprint, after.fingerprint);
        assert!(after.allow_list.contains_label("Student"));
    }
}
