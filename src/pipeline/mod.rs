//! The question-answering pipeline
//!
//! One request runs the stages strictly in order:
//! guardrail → plan → generate → validate → execute → augment → summarise.
//! Stages pass owned records forward; the allow-list snapshot is captured once
//! at entry and shared read-only by planner, generator and validator. Every
//! stage writes an audit record under the request's trace id, and every
//! terminal outcome writes exactly one terminal record.

pub mod augmentor;
pub mod executor;
pub mod generator;
pub mod guardrail;
pub mod mapper;
pub mod models;
pub mod planner;
pub mod summariser;
pub mod validator;

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::error::{PipelineError, ReasonCode};
use crate::pipeline::augmentor::Augmentor;
use crate::pipeline::executor::Executor;
use crate::pipeline::generator::QueryGenerator;
use crate::pipeline::guardrail::GuardrailDecision;
use crate::pipeline::models::{
    AskResponse, GraphNode, GraphPayload, ResponseFormat, TablePayload,
};
use crate::pipeline::planner::Planner;
use crate::pipeline::summariser::Summariser;
use crate::schema::SchemaCatalog;
use crate::{AppMode, Policy};
use std::sync::Arc;
use uuid::Uuid;

/// The assembled pipeline, shared across request tasks.
pub struct Pipeline {
    pub catalog: Arc<SchemaCatalog>,
    pub planner: Planner,
    pub generator: QueryGenerator,
    pub executor: Executor,
    pub augmentor: Augmentor,
    pub summariser: Summariser,
    pub audit: Arc<dyn AuditSink>,
    pub policy: Policy,
    pub mode: AppMode,
    pub allow_writes: bool,
}

impl Pipeline {
    /// Answer a question. Terminal rejections carry a reason code; the caller
    /// maps them to HTTP statuses.
    pub async fn ask(
        &self,
        question: &str,
        format: ResponseFormat,
    ) -> Result<AskResponse, PipelineError> {
        let trace_id = Uuid::new_v4().to_string();

        match tokio::time::timeout(
            self.policy.request_budget,
            self.run(question, format, &trace_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                self.audit.record(AuditEvent::new(
                    &trace_id,
                    "cancelled",
                    AuditOutcome::Error,
                    ReasonCode::QueryTimeout.as_str(),
                ));
                Err(PipelineError::rejected(
                    ReasonCode::QueryTimeout,
                    format!("request budget {:?} exhausted", self.policy.request_budget),
                ))
            }
        }
    }

    async fn run(
        &self,
        question: &str,
        format: ResponseFormat,
        trace_id: &str,
    ) -> Result<AskResponse, PipelineError> {
        let preview = guardrail::sanitize_text(question);
        tracing::info!(trace_id, question = %preview, "request received");

        // Guardrail
        match guardrail::check(question) {
            GuardrailDecision::Allow => {
                self.record(trace_id, "guardrail", AuditOutcome::Passed, "ok", &preview);
            }
            GuardrailDecision::Block { reason } => {
                self.record(
                    trace_id,
                    "guardrail",
                    AuditOutcome::Blocked,
                    ReasonCode::GuardrailBlocked.as_str(),
                    &preview,
                );
                return Err(PipelineError::rejected(ReasonCode::GuardrailBlocked, reason));
            }
        }

        // One snapshot for the whole request
        let snapshot = self.catalog.current();

        // Plan (degrades internally, never fails the request)
        let plan = self.planner.plan(question, &snapshot).await;
        self.record(
            trace_id,
            "plan",
            AuditOutcome::Passed,
            "ok",
            &format!("intent={} confidence={:.2}", plan.intent, plan.confidence),
        );

        // Generate
        let candidate = match self.generator.generate(&plan, &snapshot).await {
            Ok(candidate) => {
                self.record(
                    trace_id,
                    "generate",
                    AuditOutcome::Passed,
                    "ok",
                    &candidate.text,
                );
                candidate
            }
            Err(e) => return Err(self.terminal(trace_id, "generate", e, &preview)),
        };

        // Validate
        let candidate = match validator::validate(&candidate, &snapshot, &self.policy) {
            Ok(validated) => {
                self.record(
                    trace_id,
                    "validate",
                    AuditOutcome::Passed,
                    "ok",
                    &validated.text,
                );
                validated
            }
            Err(e) => return Err(self.terminal(trace_id, "validate", e, &candidate.text)),
        };

        // Execute
        let outcome = match self
            .executor
            .execute(&candidate, &self.policy, self.mode, self.allow_writes)
            .await
        {
            Ok(outcome) => {
                self.record(
                    trace_id,
                    "execute",
                    AuditOutcome::Passed,
                    "ok",
                    &format!("rows={} truncated={}", outcome.rows.len(), outcome.truncated),
                );
                outcome
            }
            Err(e) => return Err(self.terminal(trace_id, "execute", e, &candidate.text)),
        };

        // Augment (fail-open)
        let anchors: Vec<String> = {
            let mut ids: Vec<String> = outcome
                .rows
                .iter()
                .flat_map(|r| r.node_ids.iter().cloned())
                .collect();
            ids.sort();
            ids.dedup();
            ids
        };
        let augmented = self.augmentor.augment(question, &anchors, &self.policy).await;
        self.record(
            trace_id,
            "augment",
            AuditOutcome::Passed,
            if augmented.degraded { "degraded" } else { "ok" },
            &format!(
                "chunks={} neighbors={}",
                augmented.chunks.len(),
                augmented.neighbors.len()
            ),
        );

        // Summarise
        let summary = match self
            .summariser
            .summarise(question, &outcome.rows, &augmented.chunks)
            .await
        {
            Ok(summary) => summary,
            Err(e) => return Err(self.terminal(trace_id, "summarise", e, &preview)),
        };

        if summary.verification.status == models::VerificationStatus::Failed {
            self.record(
                trace_id,
                "summarise",
                AuditOutcome::Error,
                ReasonCode::CitationUnverified.as_str(),
                &summary.verification.unknown_citations.join(","),
            );
        } else {
            self.record(trace_id, "summarise", AuditOutcome::Passed, "ok", "");
        }

        // Build the response
        let table = (format == ResponseFormat::Table).then(|| build_table(&outcome.rows));
        let graph =
            (format == ResponseFormat::Graph).then(|| build_graph(&anchors, &augmented.neighbors));

        let response = AskResponse {
            question: question.to_string(),
            summary: summary.summary,
            cypher: candidate.text.clone(),
            params: candidate.params.clone(),
            rows: outcome.rows,
            chunks: augmented.chunks,
            citations: summary.citations,
            verification: summary.verification,
            trace_id: trace_id.to_string(),
            audit_id: Uuid::new_v4().to_string(),
            table,
            graph,
        };

        self.record(trace_id, "returned", AuditOutcome::Passed, "ok", "");
        Ok(response)
    }

    fn record(
        &self,
        trace_id: &str,
        stage: &str,
        outcome: AuditOutcome,
        reason: &str,
        preview: &str,
    ) {
        let mut event = AuditEvent::new(trace_id, stage, outcome, reason);
        if !preview.is_empty() {
            event = event.with_preview(preview);
        }
        self.audit.record(event);
    }

    /// Record the single terminal audit event for a failed stage.
    fn terminal(
        &self,
        trace_id: &str,
        stage: &str,
        error: PipelineError,
        preview: &str,
    ) -> PipelineError {
        let (outcome, reason) = match &error {
            PipelineError::Rejected { code, .. } => {
                let outcome = match code {
                    ReasonCode::GuardrailBlocked
                    | ReasonCode::TemplateParamMissing
                    | ReasonCode::WriteBlocked
                    | ReasonCode::LlmRateLimited => AuditOutcome::Blocked,
                    code if code.is_validation() => AuditOutcome::Blocked,
                    _ => AuditOutcome::Error,
                };
                (outcome, code.as_str())
            }
            PipelineError::Transport(_) => (AuditOutcome::Error, "INTERNAL"),
        };
        self.record(trace_id, stage, outcome, reason, preview);
        error
    }
}

fn build_table(rows: &[models::ResultRow]) -> TablePayload {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for column in &row.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }
    let data = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or(serde_json::Value::Null))
                .collect()
        })
        .collect();
    TablePayload { columns, data }
}

fn build_graph(anchors: &[String], neighbors: &[models::AnchorNeighbor]) -> GraphPayload {
    let mut nodes: Vec<GraphNode> = anchors
        .iter()
        .map(|id| GraphNode {
            id: id.clone(),
            labels: Vec::new(),
        })
        .collect();
    for neighbor in neighbors {
        if !nodes.iter().any(|n| n.id == neighbor.id) {
            nodes.push(GraphNode {
                id: neighbor.id.clone(),
                labels: neighbor.labels.clone(),
            });
        }
    }
    GraphPayload {
        nodes,
        edge_count: neighbors.len(),
    }
}
