//! JSON API for the agent.
//!
//! - `POST /api/v1/chat`      run one query through the pipeline
//! - `POST /api/v1/feedback`  rate an assistant reply (0 = bad, 1 = good)
//!
//! Both routes are scoped by the `x-company-id` header; requests without it
//! fall back to `server.default_company_id`. Chat requests may carry the
//! visitor's country in `x-country-code` and `x-country-name`, as set by the
//! edge proxy.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use ragdesk_agent::AgentRuntime;
use ragdesk_core::domain::conversation::{
    CompanyId, Feedback, FeedbackId, TurnId, VisitorOrigin,
};
use ragdesk_core::domain::query::Query;
use ragdesk_core::domain::response::{ChatRequest, ChatResponse};
use ragdesk_core::errors::InterfaceError;
use ragdesk_db::{FeedbackStore, RepositoryError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub const COMPANY_HEADER: &str = "x-company-id";
pub const COUNTRY_CODE_HEADER: &str = "x-country-code";
pub const COUNTRY_NAME_HEADER: &str = "x-country-name";

#[derive(Clone)]
pub struct ChatState {
    runtime: Arc<AgentRuntime>,
    feedback: Arc<dyn FeedbackStore>,
    default_company_id: String,
}

impl ChatState {
    pub fn new(
        runtime: Arc<AgentRuntime>,
        feedback: Arc<dyn FeedbackStore>,
        default_company_id: impl Into<String>,
    ) -> Self {
        Self { runtime, feedback, default_company_id: default_company_id.into() }
    }

    fn company_id(&self, headers: &HeaderMap) -> CompanyId {
        company_from_headers(headers, &self.default_company_id)
    }
}

pub(crate) fn company_from_headers(headers: &HeaderMap, default_company_id: &str) -> CompanyId {
    let company = header_text(headers, COMPANY_HEADER)
        .filter(|value| !value.is_empty())
        .unwrap_or(default_company_id);
    CompanyId(company.to_string())
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
}

/// Malformed country headers are ignored rather than rejected.
fn visitor_origin(headers: &HeaderMap) -> Option<VisitorOrigin> {
    VisitorOrigin::parse(
        header_text(headers, COUNTRY_CODE_HEADER)?,
        header_text(headers, COUNTRY_NAME_HEADER),
    )
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub turn_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackAccepted {
    pub feedback_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/feedback", post(feedback))
        .with_state(state)
}

async fn chat(
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(reject(InterfaceError::BadRequest {
            message: "message must not be empty".to_string(),
            correlation_id: Uuid::new_v4().to_string(),
        }));
    }

    let company_id = state.company_id(&headers);
    let mut query = Query::new(request.message);
    if let Some(session_id) = request.session_id {
        query = query.with_session(session_id);
    }
    if let Some(origin) = visitor_origin(&headers) {
        query = query.with_origin(origin);
    }
    Ok(Json(state.runtime.handle(&company_id, query).await))
}

async fn feedback(
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(request): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackAccepted>), ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    if request.rating > 1 {
        return Err(reject(InterfaceError::BadRequest {
            message: format!("rating must be 0 or 1, got {}", request.rating),
            correlation_id,
        }));
    }
    if request.turn_id.trim().is_empty() {
        return Err(reject(InterfaceError::BadRequest {
            message: "turn_id must not be empty".to_string(),
            correlation_id,
        }));
    }

    let company_id = state.company_id(&headers);
    let record = Feedback {
        id: FeedbackId::generate(),
        company_id: company_id.clone(),
        turn_id: TurnId(request.turn_id.trim().to_string()),
        rating: request.rating,
        comment: request.comment.map(|comment| comment.trim().to_string()).filter(|c| !c.is_empty()),
        created_at: Utc::now(),
    };
    let feedback_id = record.id.0.clone();

    match state.feedback.record_feedback(record).await {
        Ok(()) => {
            info!(
                event_name = "server.feedback.recorded",
                correlation_id = %correlation_id,
                company_id = %company_id.0,
                rating = request.rating,
                "feedback recorded"
            );
            Ok((StatusCode::CREATED, Json(FeedbackAccepted { feedback_id })))
        }
        Err(RepositoryError::NotFound(detail)) => {
            warn!(
                event_name = "server.feedback.unknown_turn",
                correlation_id = %correlation_id,
                company_id = %company_id.0,
                detail = %detail,
                "feedback rejected for unknown turn"
            );
            Err((
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: "The rated reply was not found.",
                    detail,
                    correlation_id,
                }),
            ))
        }
        Err(error) => Err(reject(InterfaceError::ServiceUnavailable {
            message: error.to_string(),
            correlation_id,
        })),
    }
}

pub(crate) fn reject(error: InterfaceError) -> ApiError {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "server.request.rejected",
        correlation_id = error.correlation_id(),
        status = status.as_u16(),
        error = %error,
        "request rejected"
    );
    (
        status,
        Json(ErrorBody {
            error: error.user_message(),
            detail: error.to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}
