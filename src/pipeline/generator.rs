//! Cypher generation: template fast-path with LLM fallback
//!
//! Known intents resolve to pre-written, parameterised templates and never
//! touch the LLM. Everything else goes through a structured LLM call with a
//! strict `{cypher, params}` contract, field normalisation for the legacy
//! `query`/`parameters` spellings, and bounded retries.
//!
//! Canonical-to-template parameter translation happens here and only here:
//! plans speak `student_name`, templates may speak `$student`. Nothing
//! downstream ever sees both spellings.

use crate::error::{PipelineError, ReasonCode};
use crate::llm::{call_structured, LlmClient, StructuredCall, DEFAULT_ATTEMPTS};
use crate::pipeline::models::{
    CandidateSource, CypherCandidate, ParamValue, Params, QueryPlan,
};
use crate::ratelimit::RateLimiter;
use crate::schema::SchemaSnapshot;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

static PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("param regex"));

/// Aliases the LLM is known to emit instead of the canonical field names.
const CANDIDATE_ALIASES: &[(&str, &str)] = &[("query", "cypher"), ("parameters", "params")];

/// A registered template: intent, Cypher text, and the canonical plan
/// parameter backing each template parameter.
struct Template {
    intent: &'static str,
    cypher: &'static str,
}

/// Template registry. All texts are read-only, parameterised, and carry an
/// explicit `LIMIT $limit`.
static TEMPLATES: &[Template] = &[
    Template {
        intent: "goals_for_student",
        cypher: "MATCH (s:Student {fullName: $student})-[:HAS_GOAL]->(g:Goal) \
                 RETURN s.id AS primary_id, \
                        coalesce(g.title, g.name, g.description) AS goal, \
                        g.status AS status \
                 ORDER BY goal \
                 LIMIT $limit",
    },
    Template {
        intent: "accommodations_for_student",
        cypher: "MATCH (s:Student {fullName: $student})-[:HAS_ACCOMMODATION]->(a:Accommodation) \
                 RETURN s.id AS primary_id, \
                        coalesce(a.title, a.name, a.description) AS accommodation, \
                        a.category AS category \
                 ORDER BY accommodation \
                 LIMIT $limit",
    },
    Template {
        intent: "case_manager_for_student",
        cypher: "MATCH (s:Student {fullName: $student})-[:ASSIGNED_TO]->(c:CaseWorker) \
                 RETURN s.id AS primary_id, c.fullName AS case_manager, c.role AS role \
                 LIMIT $limit",
    },
    Template {
        intent: "eval_reports_for_student_in_range",
        cypher: "MATCH (s:Student {fullName: $student})-[:HAS_EVALUATION]->(e:EvaluationReport) \
                 WHERE e.reportDate >= $from AND e.reportDate <= $to \
                 RETURN s.id AS primary_id, \
                        coalesce(e.title, e.name) AS report, \
                        e.reportDate AS report_date \
                 ORDER BY report_date DESC \
                 LIMIT $limit",
    },
    Template {
        intent: "concern_areas_for_student",
        cypher: "MATCH (s:Student {fullName: $student})-[:HAS_CONCERN]->(c:ConcernArea) \
                 RETURN s.id AS primary_id, \
                        coalesce(c.title, c.name) AS concern, \
                        c.severity AS severity \
                 ORDER BY concern \
                 LIMIT $limit",
    },
];

/// How many allow-list entries the LLM prompt shows per category.
const SCHEMA_HINT_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
struct CypherGenerationOutput {
    cypher: String,
    #[serde(default)]
    params: serde_json::Map<String, serde_json::Value>,
}

/// Generates candidate queries from plans.
pub struct QueryGenerator {
    llm: Arc<dyn LlmClient>,
    limiter: Arc<RateLimiter>,
    max_tokens: u32,
}

impl QueryGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, limiter: Arc<RateLimiter>, max_tokens: u32) -> Self {
        QueryGenerator {
            llm,
            limiter,
            max_tokens,
        }
    }

    /// Produce a candidate for the plan: template fast-path when the intent is
    /// registered, LLM fallback otherwise.
    pub async fn generate(
        &self,
        plan: &QueryPlan,
        snapshot: &SchemaSnapshot,
    ) -> Result<CypherCandidate, PipelineError> {
        if let Some(template) = TEMPLATES.iter().find(|t| t.intent == plan.intent) {
            return build_from_template(template, plan);
        }
        self.generate_with_llm(plan, snapshot).await
    }

    async fn generate_with_llm(
        &self,
        plan: &QueryPlan,
        snapshot: &SchemaSnapshot,
    ) -> Result<CypherCandidate, PipelineError> {
        let prompt = build_generation_prompt(plan, snapshot);

        let output = call_structured::<CypherGenerationOutput>(
            self.llm.as_ref(),
            &self.limiter,
            &prompt,
            &StructuredCall {
                key: "generate",
                max_tokens: self.max_tokens,
                temperature: 0.0,
                attempts: DEFAULT_ATTEMPTS,
                aliases: CANDIDATE_ALIASES,
                expected_keys: &["cypher", "params"],
            },
        )
        .await?;

        let mut params = Params::new();
        for (key, value) in &output.params {
            match ParamValue::from_json(value) {
                Some(scalar) => {
                    params.insert(key.clone(), scalar);
                }
                None => {
                    tracing::warn!(param = %key, "dropping non-scalar LLM parameter");
                }
            }
        }

        Ok(CypherCandidate {
            text: output.cypher,
            params,
            source: CandidateSource::Llm,
        })
    }
}

/// Template parameters the generator can resolve, and the canonical plan
/// parameter each one reads from.
fn canonical_source(template_param: &str) -> &str {
    match template_param {
        "student" => "student_name",
        other => other,
    }
}

fn build_from_template(
    template: &Template,
    plan: &QueryPlan,
) -> Result<CypherCandidate, PipelineError> {
    let mut params = Params::new();

    for capture in PARAM_RE.captures_iter(template.cypher) {
        let template_param = capture.get(1).expect("capture group").as_str();
        if params.contains_key(template_param) {
            continue;
        }

        let canonical = canonical_source(template_param);
        let value = plan
            .params
            .get(canonical)
            .cloned()
            .or_else(|| default_param_value(template_param));

        match value {
            Some(value) => {
                params.insert(template_param.to_string(), value);
            }
            None => {
                return Err(PipelineError::rejected(
                    ReasonCode::TemplateParamMissing,
                    format!(
                        "template '{}' requires parameter '{}' (canonical '{}')",
                        template.intent, template_param, canonical
                    ),
                ));
            }
        }
    }

    Ok(CypherCandidate {
        text: template.cypher.to_string(),
        params,
        source: CandidateSource::Template,
    })
}

/// Defaults for parameters a plan may legitimately omit.
fn default_param_value(template_param: &str) -> Option<ParamValue> {
    match template_param {
        "limit" => Some(ParamValue::Int(20)),
        // Evaluation range defaults to the last six months
        "from" => Some(ParamValue::String(
            (Utc::now() - Duration::days(180)).format("%Y-%m-%d").to_string(),
        )),
        "to" => Some(ParamValue::String(Utc::now().format("%Y-%m-%d").to_string())),
        _ => None,
    }
}

fn build_generation_prompt(plan: &QueryPlan, snapshot: &SchemaSnapshot) -> String {
    let allow = &snapshot.allow_list;
    let labels: Vec<&str> = allow
        .labels
        .iter()
        .take(SCHEMA_HINT_LIMIT)
        .map(String::as_str)
        .collect();
    let relationships: Vec<&str> = allow
        .relationships
        .iter()
        .take(SCHEMA_HINT_LIMIT)
        .map(String::as_str)
        .collect();
    let properties: Vec<String> = allow
        .properties
        .iter()
        .take(SCHEMA_HINT_LIMIT)
        .map(|(label, props)| {
            format!(
                "{}: {}",
                label,
                props.iter().cloned().collect::<Vec<String>>().join(", ")
            )
        })
        .collect();

    format!(
        "You are a Cypher query expert for a Neo4j graph database.\n\n\
         User question: \"{question}\"\n\
         Query intent: {intent}\n\
         Anchor entity: {anchor}\n\
         Extracted parameters: {params}\n\n\
         Schema — use ONLY these identifiers:\n\
         Node labels: {labels}\n\
         Relationship types: {relationships}\n\
         Properties: {properties}\n\n\
         Rules:\n\
         1. Read-only MATCH/RETURN queries only; never CREATE, MERGE, DELETE, SET or CALL.\n\
         2. Every user-supplied value must be a $parameter, never an inline literal.\n\
         3. Include a LIMIT clause (typically 10-20 rows).\n\
         4. Return specific properties with aliases, not whole nodes.\n\
         5. When returning a node, include its id as 'AS primary_id'.\n\
         6. Variable-length paths must carry an explicit small upper bound, e.g. *1..2.\n\n\
         Return ONLY a JSON object with exactly two keys:\n\
         {{\"cypher\": \"<the query>\", \"params\": {{<parameter map>}}}}",
        question = plan.question,
        intent = plan.intent,
        anchor = plan.anchor_entity.as_deref().unwrap_or("none"),
        params = serde_json::to_string(&plan.params).unwrap_or_else(|_| "{}".to_string()),
        labels = labels.join(", "),
        relationships = relationships.join(", "),
        properties = properties.join("; "),
    )
}

/// Parameter names referenced by a Cypher text, in order of first occurrence.
pub fn referenced_params(cypher: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for capture in PARAM_RE.captures_iter(cypher) {
        let name = capture.get(1).expect("capture group").as_str().to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}
