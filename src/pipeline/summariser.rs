//! Answer summarisation with verified citations
//!
//! The LLM sees the executed rows as a compact table and the retrieved chunks
//! as an enumerated list keyed by chunk id, and must answer with a closed
//! `{summary, citations}` object. Every citation — in the list or written as
//! a `[chunk_id]` token inside the prose — is verified against the chunks that
//! were actually shown; unknown ids mark the verification failed but never
//! fail the request.

use crate::error::{PipelineError, ReasonCode};
use crate::llm::{call_structured, LlmClient, StructuredCall, DEFAULT_ATTEMPTS};
use crate::pipeline::models::{
    CitationVerification, ResultRow, RetrievedChunk, VerificationStatus,
};
use crate::ratelimit::RateLimiter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// How many rows the prompt shows before eliding the rest.
const MAX_PROMPT_ROWS: usize = 25;

/// Longest chunk excerpt shown in the prompt.
const MAX_CHUNK_EXCERPT: usize = 400;

static CITATION_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([A-Za-z0-9_.:-]+)\]").expect("citation regex"));

const SUMMARY_ALIASES: &[(&str, &str)] = &[
    ("answer", "summary"),
    ("text", "summary"),
    ("sources", "citations"),
    ("chunk_ids", "citations"),
];

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    summary: String,
    #[serde(default)]
    citations: Vec<String>,
}

/// Result of the summarisation stage.
#[derive(Debug, Clone)]
pub struct SummaryResult {
    pub summary: String,
    pub citations: Vec<String>,
    pub verification: CitationVerification,
}

/// Produces the final summary for a request.
pub struct Summariser {
    llm: Arc<dyn LlmClient>,
    limiter: Arc<RateLimiter>,
    max_tokens: u32,
}

impl Summariser {
    pub fn new(llm: Arc<dyn LlmClient>, limiter: Arc<RateLimiter>, max_tokens: u32) -> Self {
        Summariser {
            llm,
            limiter,
            max_tokens,
        }
    }

    /// Summarise rows and chunks into prose with citations.
    ///
    /// Structural LLM failure after retries degrades to a deterministic
    /// row-count summary rather than failing the request; a rate-limit denial
    /// propagates.
    pub async fn summarise(
        &self,
        question: &str,
        rows: &[ResultRow],
        chunks: &[RetrievedChunk],
    ) -> Result<SummaryResult, PipelineError> {
        let prompt = build_summary_prompt(question, rows, chunks);

        let output = match call_structured::<SummaryOutput>(
            self.llm.as_ref(),
            &self.limiter,
            &prompt,
            &StructuredCall {
                key: "summarise",
                max_tokens: self.max_tokens,
                temperature: 0.3,
                attempts: DEFAULT_ATTEMPTS,
                aliases: SUMMARY_ALIASES,
                expected_keys: &["summary", "citations"],
            },
        )
        .await
        {
            Ok(output) => output,
            Err(e) if e.code() == Some(ReasonCode::LlmStructuredFailure) => {
                tracing::warn!(error = %e, "summary generation failed, using row-count fallback");
                return Ok(fallback_summary(rows));
            }
            Err(e) => return Err(e),
        };

        let mut citations: Vec<String> = Vec::new();
        for citation in &output.citations {
            if !citations.contains(citation) {
                citations.push(citation.clone());
            }
        }

        let verification = verify_citations(&output.summary, &citations, chunks);
        Ok(SummaryResult {
            summary: output.summary,
            citations,
            verification,
        })
    }
}

/// Check every cited id against the chunks the LLM was shown.
pub fn verify_citations(
    summary: &str,
    citations: &[String],
    chunks: &[RetrievedChunk],
) -> CitationVerification {
    let known: BTreeSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();

    let mut cited: Vec<String> = citations.to_vec();
    for capture in CITATION_TOKEN_RE.captures_iter(summary) {
        let id = capture.get(1).expect("capture").as_str().to_string();
        if !cited.contains(&id) {
            cited.push(id);
        }
    }

    let unknown: Vec<String> = cited
        .into_iter()
        .filter(|id| !known.contains(id.as_str()))
        .collect();

    if unknown.is_empty() {
        CitationVerification::verified()
    } else {
        CitationVerification {
            status: VerificationStatus::Failed,
            unknown_citations: unknown,
        }
    }
}

fn fallback_summary(rows: &[ResultRow]) -> SummaryResult {
    let mut summary = format!("The query returned {} result(s).", rows.len());
    if let Some(first) = rows.first() {
        let cells: Vec<String> = first
            .columns
            .iter()
            .zip(&first.values)
            .filter(|(c, _)| c.as_str() != "primary_id")
            .map(|(c, v)| format!("{}: {}", c, render_value(v)))
            .collect();
        if !cells.is_empty() {
            summary.push_str(&format!(" First result — {}.", cells.join(", ")));
        }
    }
    SummaryResult {
        summary,
        citations: Vec::new(),
        verification: CitationVerification::verified(),
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_summary_prompt(
    question: &str,
    rows: &[ResultRow],
    chunks: &[RetrievedChunk],
) -> String {
    let table = if rows.is_empty() {
        "(no rows)".to_string()
    } else {
        let header = rows[0].columns.join(" | ");
        let mut lines = vec![header];
        for row in rows.iter().take(MAX_PROMPT_ROWS) {
            lines.push(
                row.values
                    .iter()
                    .map(render_value)
                    .collect::<Vec<String>>()
                    .join(" | "),
            );
        }
        if rows.len() > MAX_PROMPT_ROWS {
            lines.push(format!("... and {} more rows", rows.len() - MAX_PROMPT_ROWS));
        }
        lines.join("\n")
    };

    let chunk_list = if chunks.is_empty() {
        "(no supporting fragments)".to_string()
    } else {
        chunks
            .iter()
            .map(|c| {
                let excerpt: String = c.text.chars().take(MAX_CHUNK_EXCERPT).collect();
                format!("[{}] {}", c.chunk_id, excerpt)
            })
            .collect::<Vec<String>>()
            .join("\n")
    };

    format!(
        "Answer the user's question from the query results and supporting fragments below.\n\n\
         Question: \"{question}\"\n\n\
         Query results:\n{table}\n\n\
         Supporting fragments (cite by id):\n{chunk_list}\n\n\
         Rules:\n\
         1. Answer concisely in plain prose.\n\
         2. Cite supporting fragments inline as [chunk_id]; cite ONLY ids listed above.\n\
         3. If the results do not answer the question, say so.\n\n\
         Return ONLY a JSON object with exactly two keys:\n\
         {{\"summary\": \"<your answer>\", \"citations\": [\"<chunk_id>\", ...]}}"
    )
}
