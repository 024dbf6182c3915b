//! Query planner: intent detection, entity extraction, parameter population
//!
//! Intent detection is keyword-driven and cheap; the LLM is only consulted for
//! entity extraction, through a closed `{names, date_ranges, topics}` schema.
//! Extracted person names are normalised (honorifics stripped, whitespace
//! collapsed, title-cased) and semantically mapped against the allow-list.
//! Planning never fails the request: when extraction is exhausted the planner
//! degrades to a zero-confidence `general_rag_query` plan.

use crate::llm::{call_structured, LlmClient, StructuredCall};
use crate::pipeline::mapper::SemanticMapper;
use crate::pipeline::models::{EntityMapping, ParamValue, QueryPlan};
use crate::ratelimit::RateLimiter;
use crate::schema::{SchemaSnapshot, TermKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

/// Default row cap populated into every plan.
const DEFAULT_LIMIT: i64 = 20;

/// Entity extraction attempts before falling back (1 initial + 1 retry).
const EXTRACTION_ATTEMPTS: u32 = 2;

#[derive(Debug, Default, Deserialize)]
struct ExtractedEntities {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    date_ranges: Vec<DateRange>,
    #[serde(default)]
    #[allow(dead_code)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DateRange {
    from: Option<String>,
    to: Option<String>,
}

/// Capitalised first-plus-last word pair, the shape of a person name.
static PROPER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b").expect("proper name regex"));

static HONORIFIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(mr|mrs|ms|miss|dr|prof|professor|rev|sir|madam|capt|captain|sgt|col|gen|lt)\.?\s+")
        .expect("honorific regex")
});

/// Normalise a person name: strip honorifics, collapse whitespace, title-case
/// each word.
///
/// `normalise_person_name("Dr. Jane  Doe ")` and
/// `normalise_person_name("jane doe")` both yield `"Jane Doe"`.
pub fn normalise_person_name(name: &str) -> String {
    let mut stripped = name.trim().to_string();
    loop {
        let next = HONORIFIC_RE.replace(&stripped, "").to_string();
        if next == stripped {
            break;
        }
        stripped = next;
    }

    stripped
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Detect a template intent from keyword patterns.
///
/// Template intents need a concrete person to parameterise, so they only fire
/// when the question also carries a proper name; everything else falls through
/// to `general_rag_query`.
pub fn detect_intent(question: &str) -> &'static str {
    let q = question.to_lowercase();
    let has_name = PROPER_NAME_RE.is_match(question);

    if has_name {
        if q.contains("goal") {
            return "goals_for_student";
        }
        if q.contains("accommodation") {
            return "accommodations_for_student";
        }
        if q.contains("case manager") || q.contains("case worker") || q.contains("caseworker") {
            return "case_manager_for_student";
        }
        if q.contains("evaluation") || q.contains("eval report") || q.contains("assessment") {
            return "eval_reports_for_student_in_range";
        }
        if q.contains("concern") {
            return "concern_areas_for_student";
        }
    }
    "general_rag_query"
}

/// Builds query plans from questions.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    limiter: Arc<RateLimiter>,
    mapper: Arc<SemanticMapper>,
    min_similarity: f32,
    max_tokens: u32,
}

impl Planner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        limiter: Arc<RateLimiter>,
        mapper: Arc<SemanticMapper>,
        min_similarity: f32,
        max_tokens: u32,
    ) -> Self {
        Planner {
            llm,
            limiter,
            mapper,
            min_similarity,
            max_tokens,
        }
    }

    /// Build a plan for `question` against the given allow-list snapshot.
    pub async fn plan(&self, question: &str, snapshot: &SchemaSnapshot) -> QueryPlan {
        let intent = detect_intent(question);

        let extracted = match self.extract_entities(question).await {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!(error = %e, "entity extraction failed, using fallback plan");
                return QueryPlan::fallback(question);
            }
        };

        let mut plan = QueryPlan {
            intent: intent.to_string(),
            anchor_entity: None,
            params: Default::default(),
            confidence: if intent == "general_rag_query" { 0.5 } else { 0.9 },
            question: question.to_string(),
            entity_mappings: Vec::new(),
        };

        for raw_name in &extracted.names {
            let name = normalise_person_name(raw_name);
            if name.is_empty() {
                continue;
            }
            if plan.anchor_entity.is_none() {
                plan.anchor_entity = Some(name.clone());
                plan.params
                    .insert("student_name".to_string(), ParamValue::String(name.clone()));
            }
            for mapping in self.mapper.map(snapshot, &name, TermKind::Label).await {
                if mapping.score >= self.min_similarity {
                    plan.entity_mappings.push(EntityMapping {
                        user_term: name.clone(),
                        schema_label: mapping.schema_id,
                        score: mapping.score,
                    });
                }
            }
        }

        if let Some(range) = extracted.date_ranges.first() {
            if let Some(from) = range.from.as_deref().filter(|s| !s.is_empty()) {
                plan.params
                    .insert("from".to_string(), ParamValue::String(from.to_string()));
            }
            if let Some(to) = range.to.as_deref().filter(|s| !s.is_empty()) {
                plan.params
                    .insert("to".to_string(), ParamValue::String(to.to_string()));
            }
        }

        plan.params
            .entry("limit".to_string())
            .or_insert(ParamValue::Int(DEFAULT_LIMIT));

        tracing::debug!(
            intent = %plan.intent,
            anchor = plan.anchor_entity.as_deref().unwrap_or("none"),
            mappings = plan.entity_mappings.len(),
            "plan built"
        );
        plan
    }

    async fn extract_entities(
        &self,
        question: &str,
    ) -> Result<ExtractedEntities, crate::error::PipelineError> {
        let prompt = format!(
            "Extract entities from this question about students and their support records.\n\n\
             Question: \"{}\"\n\n\
             Return a JSON object with exactly these keys:\n\
             - \"names\": person names mentioned (students, staff, case workers)\n\
             - \"date_ranges\": objects with \"from\" and \"to\" as ISO dates (YYYY-MM-DD), \
               empty list if no dates are mentioned\n\
             - \"topics\": subject areas mentioned (e.g. reading, behavior)\n\n\
             Return ONLY the JSON object.",
            question
        );

        call_structured::<ExtractedEntities>(
            self.llm.as_ref(),
            &self.limiter,
            &prompt,
            &StructuredCall {
                key: "plan",
                max_tokens: self.max_tokens,
                temperature: 0.0,
                attempts: EXTRACTION_ATTEMPTS,
                aliases: &[("entities", "names"), ("dates", "date_ranges")],
                expected_keys: &["names", "date_ranges", "topics"],
            },
        )
        .await
    }
}
