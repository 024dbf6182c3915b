//! API request handlers

use crate::error::{PipelineError, ReasonCode};
use crate::pipeline::models::{AskResponse, ResponseFormat};
use crate::schema::{refresh_schema, RefreshReport};
use crate::{AppMode, AppState};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Health check
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check handler
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Ask
// ============================================================================

/// Question request body
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub format: ResponseFormat,
}

/// Answer a question through the full pipeline
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(AppError::BadRequest("question must not be empty".into()));
    }

    let response = state.pipeline.ask(&req.question, req.format).await?;
    Ok(Json(response))
}

// ============================================================================
// Admin: schema refresh
// ============================================================================

/// Schema refresh response
#[derive(Serialize)]
pub struct RefreshResponse {
    pub fingerprint: String,
    pub schema_changed: bool,
    pub terms_indexed: usize,
    pub index_dimension: Option<usize>,
    pub index_rebuilt: bool,
}

impl From<RefreshReport> for RefreshResponse {
    fn from(report: RefreshReport) -> Self {
        RefreshResponse {
            fingerprint: report.fingerprint,
            schema_changed: report.schema_changed,
            terms_indexed: report.terms_indexed,
            index_dimension: report.index_dimension,
            index_rebuilt: report.index_rebuilt,
        }
    }
}

/// Rebuild the allow-list and schema-term index.
///
/// The only write-mode operation: requires the admin process flags AND the
/// out-of-band bearer token.
pub async fn admin_schema_refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, AppError> {
    if state.config.mode != AppMode::Admin || !state.config.allow_writes {
        return Err(AppError::Forbidden(
            "schema refresh requires admin mode with writes enabled".into(),
        ));
    }

    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::Forbidden("no admin token configured".into()))?;
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if presented != expected {
        return Err(AppError::Forbidden("invalid admin token".into()));
    }

    let report = refresh_schema(&state.catalog, &state.embedder).await?;
    Ok(Json(report.into()))
}

// ============================================================================
// Error mapping
// ============================================================================

/// API error type: wraps pipeline outcomes and maps them onto HTTP statuses.
pub enum AppError {
    Pipeline(PipelineError),
    BadRequest(String),
    Forbidden(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, reason_code, message) = match self {
            AppError::Pipeline(PipelineError::Rejected { code, detail }) => {
                (status_for(code), Some(code.as_str()), detail)
            }
            AppError::Pipeline(PipelineError::Transport(e)) => {
                tracing::error!(error = %e, "unclassified pipeline fault");
                (StatusCode::INTERNAL_SERVER_ERROR, None, e.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, None, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, None, msg),
            AppError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, None, e.to_string()),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "reason_code": reason_code,
        }));

        (status, body).into_response()
    }
}

fn status_for(code: ReasonCode) -> StatusCode {
    match code {
        ReasonCode::GuardrailBlocked => StatusCode::FORBIDDEN,
        ReasonCode::LlmRateLimited => StatusCode::TOO_MANY_REQUESTS,
        ReasonCode::QueryTimeout => StatusCode::GATEWAY_TIMEOUT,
        ReasonCode::UpstreamUnavailable | ReasonCode::SchemaUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ReasonCode::LlmStructuredFailure | ReasonCode::PlanFailed => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ReasonCode::TemplateParamMissing | ReasonCode::WriteBlocked => StatusCode::BAD_REQUEST,
        ReasonCode::CitationUnverified => StatusCode::OK,
        code if code.is_validation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::Pipeline(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::test_helpers::{mock_app_state, mock_app_state_with, test_config};

    #[tokio::test]
    async fn empty_question_is_bad_request() {
        let (state, _backends) = mock_app_state().await;
        let result = ask(
            State(state),
            Json(AskRequest {
                question: "   ".to_string(),
                format: ResponseFormat::Text,
            }),
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn guardrail_block_maps_to_forbidden() {
        let (state, backends) = mock_app_state().await;
        let result = ask(
            State(state),
            Json(AskRequest {
                question: "DROP DATABASE neo4j;".to_string(),
                format: ResponseFormat::Text,
            }),
        )
        .await;
        match result {
            Err(AppError::Pipeline(PipelineError::Rejected { code, .. })) => {
                assert_eq!(code, ReasonCode::GuardrailBlocked);
                assert_eq!(status_for(code), StatusCode::FORBIDDEN);
            }
            _ => panic!("expected guardrail rejection"),
        }
        // No LLM call was made for a blocked question
        assert!(backends.llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn refresh_requires_admin_flags_and_token() {
        // Read-only state: refused regardless of token
        let (state, _backends) = mock_app_state().await;
        let result = admin_schema_refresh(State(state), HeaderMap::new()).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        // Admin mode + writes, but wrong token
        let mut config = test_config();
        config.mode = AppMode::Admin;
        config.allow_writes = true;
        config.admin_token = Some("secret".to_string());
        let (state, _backends) = mock_app_state_with(config, MockLlmClient::default()).await;

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer wrong".parse().unwrap());
        let result = admin_schema_refresh(State(state.clone()), headers).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        // Correct token succeeds
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        let result = admin_schema_refresh(State(state), headers).await;
        let report = result.unwrap_or_else(|_| panic!("refresh should succeed")).0;
        assert!(report.terms_indexed > 0);
        assert_eq!(report.index_dimension, Some(8));
    }

    #[tokio::test]
    async fn rejection_renders_with_mapped_status() {
        let err = AppError::Pipeline(PipelineError::rejected(
            ReasonCode::ValidationDepthExceeded,
            "traversal depth 3 exceeds cap 2",
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn status_mapping_matches_error_contract() {
        assert_eq!(
            status_for(ReasonCode::GuardrailBlocked),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(ReasonCode::ValidationWriteBanned),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(ReasonCode::ValidationDepthExceeded),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(ReasonCode::LlmRateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(ReasonCode::QueryTimeout),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(ReasonCode::UpstreamUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(ReasonCode::LlmStructuredFailure),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(ReasonCode::WriteBlocked), StatusCode::BAD_REQUEST);
    }
}
