//! Cypher candidate validation
//!
//! Conservative, regex-based safety gate between generation and execution.
//! Checks run in a fixed order and fail fast, each with a stable reason code:
//!
//! 1. write ban — mutation keywords and procedure calls, outside string literals
//! 2. parameterisation — user-data-shaped string literals must be `$params`
//! 3. allow-list — every label and relationship type must be known
//! 4. traversal depth — variable-length paths need a bounded, small upper bound
//! 5. result cap — a `LIMIT` within policy, auto-injected when absent
//! 6. parameter coverage — every `$name` in the text is bound after injection
//!
//! Regex extraction is conservative and may reject some valid Cypher; that is
//! the intended trade-off for a safety gate in front of an LLM.

use crate::error::{PipelineError, ReasonCode};
use crate::pipeline::generator::referenced_params;
use crate::pipeline::models::{CypherCandidate, ParamValue};
use crate::schema::SchemaSnapshot;
use crate::Policy;
use once_cell::sync::Lazy;
use regex::Regex;

static WRITE_PROC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(CREATE|MERGE|DELETE|SET|REMOVE|DROP|DETACH|FOREACH|LOAD\s+CSV|CALL)\b|\bapoc\.|\bdb\.",
    )
    .expect("write keyword regex")
});

static STRING_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).expect("literal regex"));

static LINE_COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"//[^\n]*").expect("comment regex"));

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(\s*(?:[A-Za-z_][A-Za-z0-9_]*)?\s*:\s*([A-Za-z_][A-Za-z0-9_]*)")
        .expect("label regex")
});

static REL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\s*(?:[A-Za-z_][A-Za-z0-9_]*)?\s*:\s*([A-Za-z_][A-Za-z0-9_]*)")
        .expect("relationship regex")
});

static BRACKET_SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]").expect("bracket regex"));

static QUANTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\s*(\d*)\s*(\.\.)?\s*(\d*)").expect("quantifier regex"));

static LIMIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bLIMIT\s+(\$[A-Za-z_][A-Za-z0-9_]*|\d+)").expect("limit regex")
});

static PROPERTY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\b").expect("property regex")
});

/// Full-name or capitalised-word literals look like user data that should have
/// been a parameter.
static NAME_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+$|^[A-Z][a-z]{3,}$").expect("name regex"));

/// Literal values that are legitimate inside generated Cypher.
const ALLOWED_LITERALS: &[&str] = &[
    "", "0", "1", "true", "false", "asc", "desc", "ascending", "descending",
];

/// Validate a candidate against the allow-list snapshot and policy.
///
/// On success returns the (possibly amended) candidate: a missing `LIMIT`
/// clause is appended and its parameter bound to `policy.max_cypher_results`.
pub fn validate(
    candidate: &CypherCandidate,
    snapshot: &SchemaSnapshot,
    policy: &Policy,
) -> Result<CypherCandidate, PipelineError> {
    let stripped = LINE_COMMENT_RE.replace_all(&candidate.text, " ").to_string();
    let masked = mask_string_literals(&stripped);

    // 1. Write ban
    if let Some(m) = WRITE_PROC_RE.find(&masked) {
        return Err(PipelineError::rejected(
            ReasonCode::ValidationWriteBanned,
            format!("blocked keyword: {}", m.as_str().trim().to_uppercase()),
        ));
    }

    // 2. Parameterisation
    if let Some(literal) = find_unparameterised_literal(&stripped) {
        return Err(PipelineError::rejected(
            ReasonCode::ValidationUnparameterised,
            format!("string literal should be a parameter: '{}'", literal),
        ));
    }

    // 3. Allow-list membership
    let allow = &snapshot.allow_list;
    for capture in LABEL_RE.captures_iter(&masked) {
        let label = capture.get(1).expect("capture").as_str();
        if !allow.contains_label(label) {
            return Err(PipelineError::rejected(
                ReasonCode::ValidationUnknownLabel,
                format!("unknown label: {}", label),
            ));
        }
    }
    for capture in REL_RE.captures_iter(&masked) {
        let rel = capture.get(1).expect("capture").as_str();
        if !allow.contains_relationship(rel) {
            return Err(PipelineError::rejected(
                ReasonCode::ValidationUnknownRel,
                format!("unknown relationship type: {}", rel),
            ));
        }
    }
    warn_unknown_properties(&masked, snapshot);

    // 4. Traversal depth
    check_traversal_depth(&masked, policy.max_traversal_depth)?;

    // 5. Result cap (may amend text and params)
    let mut amended = CypherCandidate {
        text: stripped.trim().trim_end_matches(';').trim().to_string(),
        params: candidate.params.clone(),
        source: candidate.source,
    };
    enforce_limit(&mut amended, policy)?;

    // 6. Parameter coverage
    let amended_masked = mask_string_literals(&amended.text);
    for name in referenced_params(&amended_masked) {
        if !amended.params.contains_key(&name) {
            return Err(PipelineError::rejected(
                ReasonCode::ValidationParamUnbound,
                format!("parameter ${} has no binding", name),
            ));
        }
    }

    Ok(amended)
}

/// Replace string literal contents with empty literals so keyword and schema
/// scans cannot be fooled by quoted text.
fn mask_string_literals(text: &str) -> String {
    STRING_LITERAL_RE.replace_all(text, "''").to_string()
}

fn find_unparameterised_literal(text: &str) -> Option<String> {
    for m in STRING_LITERAL_RE.find_iter(text) {
        let raw = m.as_str();
        let inner = &raw[1..raw.len() - 1];
        if ALLOWED_LITERALS.contains(&inner.to_lowercase().as_str()) {
            continue;
        }
        if inner.len() > 2 && !inner.chars().all(|c| c.is_ascii_digit())
            && NAME_LITERAL_RE.is_match(inner)
        {
            return Some(inner.to_string());
        }
    }
    None
}

fn warn_unknown_properties(masked: &str, snapshot: &SchemaSnapshot) {
    for capture in PROPERTY_RE.captures_iter(masked) {
        let alias = capture.get(1).expect("capture").as_str();
        let prop = capture.get(2).expect("capture").as_str();

        // Resolve the alias to its label, if the pattern declares one
        let alias_label_re =
            Regex::new(&format!(r"\(\s*{}\s*:\s*([A-Za-z_][A-Za-z0-9_]*)", regex::escape(alias)));
        let label = alias_label_re
            .ok()
            .and_then(|re| re.captures(masked))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        if let Some(label) = label {
            let known = snapshot.allow_list.properties.get(&label);
            // Schema-less properties exist; warn but never reject
            if let Some(props) = known {
                if !props.is_empty() && !props.contains(prop) {
                    tracing::warn!(label, property = prop, "property not in allow-list");
                }
            }
        }
    }
}

fn check_traversal_depth(masked: &str, max_depth: u32) -> Result<(), PipelineError> {
    for segment in BRACKET_SEGMENT_RE.find_iter(masked) {
        let segment_text = segment.as_str();
        if !segment_text.contains('*') {
            continue;
        }
        for capture in QUANTIFIER_RE.captures_iter(segment_text) {
            let lower = capture.get(1).map(|m| m.as_str()).unwrap_or("");
            let dots = capture.get(2).is_some();
            let upper = capture.get(3).map(|m| m.as_str()).unwrap_or("");

            if dots {
                if upper.is_empty() {
                    return Err(PipelineError::rejected(
                        ReasonCode::ValidationDepthExceeded,
                        format!("unbounded traversal: {}", segment_text),
                    ));
                }
                let bound: u32 = upper.parse().map_err(|_| {
                    PipelineError::rejected(
                        ReasonCode::ValidationDepthExceeded,
                        format!("invalid traversal bound: {}", segment_text),
                    )
                })?;
                if bound > max_depth {
                    return Err(PipelineError::rejected(
                        ReasonCode::ValidationDepthExceeded,
                        format!("traversal depth {} exceeds cap {}", bound, max_depth),
                    ));
                }
            } else if lower.is_empty() {
                // Bare `*` with no bound at all
                return Err(PipelineError::rejected(
                    ReasonCode::ValidationDepthExceeded,
                    format!("unbounded traversal: {}", segment_text),
                ));
            } else {
                let fixed: u32 = lower.parse().map_err(|_| {
                    PipelineError::rejected(
                        ReasonCode::ValidationDepthExceeded,
                        format!("invalid traversal length: {}", segment_text),
                    )
                })?;
                if fixed > max_depth {
                    return Err(PipelineError::rejected(
                        ReasonCode::ValidationDepthExceeded,
                        format!("traversal length {} exceeds cap {}", fixed, max_depth),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn enforce_limit(candidate: &mut CypherCandidate, policy: &Policy) -> Result<(), PipelineError> {
    let masked = mask_string_literals(&candidate.text);
    let max = policy.max_cypher_results;

    if let Some(capture) = LIMIT_RE.captures(&masked) {
        let value = capture.get(1).expect("capture").as_str();
        if let Some(param_name) = value.strip_prefix('$') {
            match candidate.params.get(param_name) {
                Some(ParamValue::Int(n)) if *n > max as i64 => {
                    return Err(PipelineError::rejected(
                        ReasonCode::ValidationLimitMissing,
                        format!("LIMIT ${} = {} exceeds cap {}", param_name, n, max),
                    ));
                }
                Some(_) => {}
                None => {
                    // The limit parameter is the one binding the executor is
                    // entitled to inject
                    candidate
                        .params
                        .insert(param_name.to_string(), ParamValue::Int(max as i64));
                }
            }
        } else {
            let literal: i64 = value.parse().map_err(|_| {
                PipelineError::rejected(
                    ReasonCode::ValidationLimitMissing,
                    format!("invalid LIMIT value: {}", value),
                )
            })?;
            if literal > max as i64 {
                return Err(PipelineError::rejected(
                    ReasonCode::ValidationLimitMissing,
                    format!("LIMIT {} exceeds cap {}", literal, max),
                ));
            }
        }
        return Ok(());
    }

    // No LIMIT clause: inject one
    candidate.text = format!("{} LIMIT $limit", candidate.text.trim_end());
    candidate
        .params
        .insert("limit".to_string(), ParamValue::Int(max as i64));
    tracing::debug!(max, "injected LIMIT clause into candidate");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neo4j::MockGraphStore;
    use crate::pipeline::models::CandidateSource;
    use crate::schema::SchemaCatalog;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    async fn snapshot() -> Arc<SchemaSnapshot> {
        let store = Arc::new(MockGraphStore::with_student_schema());
        let catalog = SchemaCatalog::new(store, BTreeMap::new());
        catalog.refresh().await.unwrap().snapshot
    }

    fn candidate(text: &str, params: &[(&str, ParamValue)]) -> CypherCandidate {
        CypherCandidate {
            text: text.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            source: CandidateSource::Llm,
        }
    }

    fn policy() -> Policy {
        Policy::default()
    }

    fn code_of(result: Result<CypherCandidate, PipelineError>) -> ReasonCode {
        result.unwrap_err().code().unwrap()
    }

    #[tokio::test]
    async fn valid_candidate_passes_unchanged() {
        let snap = snapshot().await;
        let c = candidate(
            "MATCH (s:Student {fullName: $student})-[:HAS_GOAL]->(g:Goal) \
             RETURN g.title AS goal LIMIT $limit",
            &[
                ("student", ParamValue::String("Isabella Thomas".to_string())),
                ("limit", ParamValue::Int(20)),
            ],
        );
        let out = validate(&c, &snap, &policy()).unwrap();
        assert_eq!(out.text, c.text);
        assert_eq!(out.params, c.params);
    }

    #[tokio::test]
    async fn write_keywords_are_banned() {
        let snap = snapshot().await;
        for text in [
            "CREATE (n:Student) RETURN n",
            "MATCH (n:Student) DELETE n",
            "MATCH (n:Student) SET n.x = 1 RETURN n",
            "MATCH (s:Student {fullName: 'x'; DETACH DELETE s}) RETURN s",
            "CALL db.labels() YIELD label RETURN label",
        ] {
            let result = validate(&candidate(text, &[]), &snap, &policy());
            assert_eq!(
                code_of(result),
                ReasonCode::ValidationWriteBanned,
                "text: {}",
                text
            );
        }
    }

    #[tokio::test]
    async fn comments_are_stripped_before_matching() {
        let snap = snapshot().await;
        // The keyword lives only in a comment; the executable text is clean
        let c = candidate(
            "MATCH (g:Goal) RETURN g.title AS goal LIMIT 5 // goals are never deleted here",
            &[],
        );
        assert!(validate(&c, &snap, &policy()).is_ok());
    }

    #[tokio::test]
    async fn keywords_inside_string_literals_are_ignored() {
        let snap = snapshot().await;
        let c = candidate(
            "MATCH (g:Goal) WHERE g.status = 'not deleted' RETURN g.title AS goal LIMIT 5",
            &[],
        );
        // 'not deleted' is masked; DELETE inside the literal must not trip the ban
        assert!(validate(&c, &snap, &policy()).is_ok());
    }

    #[tokio::test]
    async fn name_shaped_literals_require_parameters() {
        let snap = snapshot().await;
        let c = candidate(
            "MATCH (s:Student {fullName: 'Isabella Thomas'}) RETURN s.id AS primary_id LIMIT 5",
            &[],
        );
        assert_eq!(
            code_of(validate(&c, &snap, &policy())),
            ReasonCode::ValidationUnparameterised
        );

        // Single capitalised name
        let c = candidate(
            "MATCH (s:Student) WHERE s.fullName = 'Isabella' RETURN s.id AS primary_id LIMIT 5",
            &[],
        );
        assert_eq!(
            code_of(validate(&c, &snap, &policy())),
            ReasonCode::ValidationUnparameterised
        );
    }

    #[tokio::test]
    async fn lowercase_status_literals_are_allowed() {
        let snap = snapshot().await;
        let c = candidate(
            "MATCH (g:Goal) WHERE g.status = 'active' RETURN g.title AS goal LIMIT 5",
            &[],
        );
        assert!(validate(&c, &snap, &policy()).is_ok());
    }

    #[tokio::test]
    async fn unknown_labels_and_rels_are_rejected() {
        let snap = snapshot().await;
        let c = candidate("MATCH (x:Intruder) RETURN x.id AS primary_id LIMIT 5", &[]);
        assert_eq!(
            code_of(validate(&c, &snap, &policy())),
            ReasonCode::ValidationUnknownLabel
        );

        let c = candidate(
            "MATCH (s:Student)-[:SECRET_REL]->(g:Goal) RETURN g.title AS goal LIMIT 5",
            &[],
        );
        assert_eq!(
            code_of(validate(&c, &snap, &policy())),
            ReasonCode::ValidationUnknownRel
        );
    }

    #[tokio::test]
    async fn anonymous_node_labels_are_checked() {
        let snap = snapshot().await;
        let c = candidate("MATCH (:Mystery)-[:HAS_GOAL]->(g:Goal) RETURN g.title AS t LIMIT 5", &[]);
        assert_eq!(
            code_of(validate(&c, &snap, &policy())),
            ReasonCode::ValidationUnknownLabel
        );
    }

    #[tokio::test]
    async fn depth_boundaries_match_policy() {
        let snap = snapshot().await;
        // max_traversal_depth = 2: *1..2 passes, *1..3 and bare * are rejected
        let ok = candidate(
            "MATCH (s:Student)-[:HAS_GOAL*1..2]->(g:Goal) RETURN g.title AS goal LIMIT 5",
            &[],
        );
        assert!(validate(&ok, &snap, &policy()).is_ok());

        let too_deep = candidate(
            "MATCH (s:Student)-[:HAS_GOAL*1..3]->(g:Goal) RETURN g.title AS goal LIMIT 5",
            &[],
        );
        assert_eq!(
            code_of(validate(&too_deep, &snap, &policy())),
            ReasonCode::ValidationDepthExceeded
        );

        let bare = candidate(
            "MATCH (s:Student)-[:HAS_GOAL*]->(g:Goal) RETURN g.title AS goal LIMIT 5",
            &[],
        );
        assert_eq!(
            code_of(validate(&bare, &snap, &policy())),
            ReasonCode::ValidationDepthExceeded
        );

        let no_upper = candidate(
            "MATCH (s:Student)-[:HAS_GOAL*1..]->(g:Goal) RETURN g.title AS goal LIMIT 5",
            &[],
        );
        assert_eq!(
            code_of(validate(&no_upper, &snap, &policy())),
            ReasonCode::ValidationDepthExceeded
        );
    }

    #[tokio::test]
    async fn missing_limit_is_injected_with_policy_cap() {
        let snap = snapshot().await;
        let c = candidate("MATCH (g:Goal) RETURN g.title AS goal", &[]);
        let out = validate(&c, &snap, &policy()).unwrap();
        assert!(out.text.ends_with("LIMIT $limit"));
        assert_eq!(
            out.params.get("limit"),
            Some(&ParamValue::Int(policy().max_cypher_results as i64))
        );
    }

    #[tokio::test]
    async fn oversized_limit_literal_is_rejected() {
        let snap = snapshot().await;
        let c = candidate("MATCH (g:Goal) RETURN g.title AS goal LIMIT 1000", &[]);
        assert_eq!(
            code_of(validate(&c, &snap, &policy())),
            ReasonCode::ValidationLimitMissing
        );
    }

    #[tokio::test]
    async fn oversized_limit_param_is_rejected() {
        let snap = snapshot().await;
        let c = candidate(
            "MATCH (g:Goal) RETURN g.title AS goal LIMIT $limit",
            &[("limit", ParamValue::Int(5000))],
        );
        assert_eq!(
            code_of(validate(&c, &snap, &policy())),
            ReasonCode::ValidationLimitMissing
        );
    }

    #[tokio::test]
    async fn unbound_limit_param_is_bound_to_cap() {
        let snap = snapshot().await;
        let c = candidate("MATCH (g:Goal) RETURN g.title AS goal LIMIT $limit", &[]);
        let out = validate(&c, &snap, &policy()).unwrap();
        assert_eq!(
            out.params.get("limit"),
            Some(&ParamValue::Int(policy().max_cypher_results as i64))
        );
    }

    #[tokio::test]
    async fn unbound_params_are_rejected() {
        let snap = snapshot().await;
        let c = candidate(
            "MATCH (s:Student {fullName: $student}) RETURN s.id AS primary_id LIMIT 5",
            &[],
        );
        assert_eq!(
            code_of(validate(&c, &snap, &policy())),
            ReasonCode::ValidationParamUnbound
        );
    }

    #[tokio::test]
    async fn injection_attempt_is_rejected() {
        let snap = snapshot().await;
        let c = candidate(
            "MATCH (s:Student {fullName: 'John'; DETACH DELETE s}) RETURN s",
            &[],
        );
        assert_eq!(
            code_of(validate(&c, &snap, &policy())),
            ReasonCode::ValidationWriteBanned
        );
    }
}
