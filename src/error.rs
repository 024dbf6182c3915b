//! Pipeline error taxonomy
//!
//! Every terminal outcome of the question-answering pipeline carries a reason
//! code from a closed set. Stages return `Result<T, PipelineError>`; only
//! transport faults escape as opaque errors, everything else is a normal
//! rejection with a stable code that maps to an HTTP status at the API edge.

use thiserror::Error;

/// Closed set of reason codes emitted by pipeline stages.
///
/// The wire form (audit log, API error bodies) is SCREAMING_SNAKE_CASE via
/// [`ReasonCode::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    GuardrailBlocked,
    PlanFailed,
    LlmStructuredFailure,
    LlmRateLimited,
    TemplateParamMissing,
    ValidationWriteBanned,
    ValidationUnknownLabel,
    ValidationUnknownRel,
    ValidationUnparameterised,
    ValidationDepthExceeded,
    ValidationLimitMissing,
    ValidationParamUnbound,
    QueryTimeout,
    WriteBlocked,
    UpstreamUnavailable,
    CitationUnverified,
    SchemaUnavailable,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::GuardrailBlocked => "GUARDRAIL_BLOCKED",
            ReasonCode::PlanFailed => "PLAN_FAILED",
            ReasonCode::LlmStructuredFailure => "LLM_STRUCTURED_FAILURE",
            ReasonCode::LlmRateLimited => "LLM_RATE_LIMITED",
            ReasonCode::TemplateParamMissing => "TEMPLATE_PARAM_MISSING",
            ReasonCode::ValidationWriteBanned => "VALIDATION_WRITE_BANNED",
            ReasonCode::ValidationUnknownLabel => "VALIDATION_UNKNOWN_LABEL",
            ReasonCode::ValidationUnknownRel => "VALIDATION_UNKNOWN_REL",
            ReasonCode::ValidationUnparameterised => "VALIDATION_UNPARAMETERISED",
            ReasonCode::ValidationDepthExceeded => "VALIDATION_DEPTH_EXCEEDED",
            ReasonCode::ValidationLimitMissing => "VALIDATION_LIMIT_MISSING",
            ReasonCode::ValidationParamUnbound => "VALIDATION_PARAM_UNBOUND",
            ReasonCode::QueryTimeout => "QUERY_TIMEOUT",
            ReasonCode::WriteBlocked => "WRITE_BLOCKED",
            ReasonCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ReasonCode::CitationUnverified => "CITATION_UNVERIFIED",
            ReasonCode::SchemaUnavailable => "SCHEMA_UNAVAILABLE",
        }
    }

    /// True for codes produced by the query validator (all map to HTTP 400).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ReasonCode::ValidationWriteBanned
                | ReasonCode::ValidationUnknownLabel
                | ReasonCode::ValidationUnknownRel
                | ReasonCode::ValidationUnparameterised
                | ReasonCode::ValidationDepthExceeded
                | ReasonCode::ValidationLimitMissing
                | ReasonCode::ValidationParamUnbound
        )
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for the question-answering pipeline.
///
/// `Rejected` is a normal terminal outcome with a reason code; `Transport`
/// wraps unexpected faults (driver failures, I/O) that have no stable code.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{code}: {detail}")]
    Rejected { code: ReasonCode, detail: String },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn rejected(code: ReasonCode, detail: impl Into<String>) -> Self {
        PipelineError::Rejected {
            code,
            detail: detail.into(),
        }
    }

    /// The reason code for this error, if it is a classified rejection.
    pub fn code(&self) -> Option<ReasonCode> {
        match self {
            PipelineError::Rejected { code, .. } => Some(*code),
            PipelineError::Transport(_) => None,
        }
    }
}
