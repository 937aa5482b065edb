//! Operator dashboard API.
//!
//! - `GET  /api/v1/analytics/overview`                   headline metrics
//! - `GET  /api/v1/analytics/flagged?limit=`             latest rated replies
//! - `GET  /api/v1/analytics/daily?start=&end=`          per-day activity
//! - `GET  /api/v1/analytics/countries?start=&end=`      visitors by country
//! - `GET  /api/v1/learning/status`                      scheduler and latest report
//! - `POST /api/v1/learning/run`                         analyze feedback now
//!
//! Every route is scoped by the `x-company-id` header, like the chat API.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use ragdesk_core::analytics::{
    country_stats, daily_stats, first_day_of_month, parse_date, trending_queries,
    AnalyticsError, AnalyticsOverview, CountryStat, DailyStat, DateRange, FlaggedQuery,
    DEFAULT_FLAGGED_LIMIT, DEFAULT_TRENDING_LIMIT, TRENDING_WINDOW_DAYS,
};
use ragdesk_core::domain::conversation::CompanyId;
use ragdesk_core::errors::InterfaceError;
use ragdesk_core::learning::LearningReport;
use ragdesk_db::{AnalyticsStore, RepositoryError};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::chat::{company_from_headers, reject, ApiError};
use crate::scheduler::{LearningScheduler, SchedulerStatus};

const MAX_FLAGGED_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AnalyticsState {
    analytics: Arc<dyn AnalyticsStore>,
    scheduler: Arc<LearningScheduler>,
    default_company_id: String,
}

impl AnalyticsState {
    pub fn new(
        analytics: Arc<dyn AnalyticsStore>,
        scheduler: Arc<LearningScheduler>,
        default_company_id: impl Into<String>,
    ) -> Self {
        Self { analytics, scheduler, default_company_id: default_company_id.into() }
    }

    fn company_id(&self, headers: &HeaderMap) -> CompanyId {
        company_from_headers(headers, &self.default_company_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct FlaggedParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LearningStatus {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub latest_report: Option<LearningReport>,
}

pub fn router(state: AnalyticsState) -> Router {
    Router::new()
        .route("/api/v1/analytics/overview", get(overview))
        .route("/api/v1/analytics/flagged", get(flagged))
        .route("/api/v1/analytics/daily", get(daily))
        .route("/api/v1/analytics/countries", get(countries))
        .route("/api/v1/learning/status", get(learning_status))
        .route("/api/v1/learning/run", post(run_learning))
        .with_state(state)
}

async fn overview(
    State(state): State<AnalyticsState>,
    headers: HeaderMap,
) -> Result<Json<AnalyticsOverview>, ApiError> {
    let company_id = state.company_id(&headers);
    let correlation_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let today = now.date_naive();
    let store = &state.analytics;

    let conversation_metrics = store
        .conversation_metrics(&company_id, today)
        .await
        .map_err(|error| unavailable(error, &correlation_id))?;
    let satisfaction_metrics = store
        .satisfaction_metrics(&company_id)
        .await
        .map_err(|error| unavailable(error, &correlation_id))?;
    let recent = store
        .user_messages_since(&company_id, now - Duration::days(TRENDING_WINDOW_DAYS))
        .await
        .map_err(|error| unavailable(error, &correlation_id))?;
    let knowledge_base_metrics = store
        .knowledge_base_metrics(&company_id, first_day_of_month(today))
        .await
        .map_err(|error| unavailable(error, &correlation_id))?;

    info!(
        event_name = "server.analytics.overview",
        correlation_id = %correlation_id,
        company_id = %company_id.0,
        conversations = conversation_metrics.total_conversations,
        "analytics overview served"
    );
    Ok(Json(AnalyticsOverview {
        conversation_metrics,
        satisfaction_metrics,
        trending_queries: trending_queries(recent, DEFAULT_TRENDING_LIMIT),
        knowledge_base_metrics,
        last_updated: now,
    }))
}

async fn flagged(
    State(state): State<AnalyticsState>,
    headers: HeaderMap,
    Query(params): Query<FlaggedParams>,
) -> Result<Json<Vec<FlaggedQuery>>, ApiError> {
    let company_id = state.company_id(&headers);
    let correlation_id = Uuid::new_v4().to_string();
    let limit = params.limit.unwrap_or(DEFAULT_FLAGGED_LIMIT).clamp(1, MAX_FLAGGED_LIMIT);

    state
        .analytics
        .flagged_queries(&company_id, limit)
        .await
        .map(Json)
        .map_err(|error| unavailable(error, &correlation_id))
}

async fn daily(
    State(state): State<AnalyticsState>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<DailyStat>>, ApiError> {
    let company_id = state.company_id(&headers);
    let correlation_id = Uuid::new_v4().to_string();
    let (Some(start), Some(end)) = (params.start.as_deref(), params.end.as_deref()) else {
        return Err(reject(InterfaceError::BadRequest {
            message: "start and end dates are required".to_string(),
            correlation_id,
        }));
    };
    let range = parse_date(start)
        .and_then(|start| parse_date(end).and_then(|end| DateRange::new(start, end)))
        .map_err(|error| bad_range(error, &correlation_id))?;

    let counts = state
        .analytics
        .daily_counts(&company_id, &range)
        .await
        .map_err(|error| unavailable(error, &correlation_id))?;
    Ok(Json(daily_stats(&range, &counts)))
}

async fn countries(
    State(state): State<AnalyticsState>,
    headers: HeaderMap,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<CountryStat>>, ApiError> {
    let company_id = state.company_id(&headers);
    let correlation_id = Uuid::new_v4().to_string();
    let start = optional_date(params.start.as_deref(), &correlation_id)?;
    let end = optional_date(params.end.as_deref(), &correlation_id)?;
    if let (Some(start), Some(end)) = (start, end) {
        DateRange::new(start, end).map_err(|error| bad_range(error, &correlation_id))?;
    }

    let rows = state
        .analytics
        .country_counts(&company_id, start, end)
        .await
        .map_err(|error| unavailable(error, &correlation_id))?;
    Ok(Json(country_stats(rows)))
}

async fn learning_status(
    State(state): State<AnalyticsState>,
    headers: HeaderMap,
) -> Result<Json<LearningStatus>, ApiError> {
    let company_id = state.company_id(&headers);
    let correlation_id = Uuid::new_v4().to_string();
    let latest_report =
        state.scheduler.job().latest_report(&company_id).await.map_err(|error| {
            reject(InterfaceError::ServiceUnavailable { message: error.to_string(), correlation_id })
        })?;

    Ok(Json(LearningStatus { scheduler: state.scheduler.status(), latest_report }))
}

async fn run_learning(
    State(state): State<AnalyticsState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<LearningReport>), ApiError> {
    let company_id = state.company_id(&headers);
    let correlation_id = Uuid::new_v4().to_string();

    match state.scheduler.run_now(&company_id).await {
        Ok(report) => Ok((StatusCode::CREATED, Json(report))),
        Err(error) => Err(reject(InterfaceError::ServiceUnavailable {
            message: error.to_string(),
            correlation_id,
        })),
    }
}

fn optional_date(value: Option<&str>, correlation_id: &str) -> Result<Option<NaiveDate>, ApiError> {
    value
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_date(value).map_err(|error| bad_range(error, correlation_id)))
        .transpose()
}

fn bad_range(error: AnalyticsError, correlation_id: &str) -> ApiError {
    reject(InterfaceError::BadRequest {
        message: error.to_string(),
        correlation_id: correlation_id.to_string(),
    })
}

fn unavailable(error: RepositoryError, correlation_id: &str) -> ApiError {
    reject(InterfaceError::ServiceUnavailable {
        message: error.to_string(),
        correlation_id: correlation_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{Duration, Utc};
    use ragdesk_agent::prompts::PromptLibrary;
    use ragdesk_agent::{CompletionRequest, LearningJob, LlmClient};
    use ragdesk_core::config::AppConfig;
    use ragdesk_core::domain::conversation::{
        CompanyId, ConversationTurn, Feedback, FeedbackId, TurnMetadata, VisitorOrigin,
    };
    use ragdesk_core::errors::ProviderError;
    use ragdesk_core::learning::TuningBaseline;
    use ragdesk_db::migrations::run_pending;
    use ragdesk_db::{
        connect_with_settings, ConversationStore, DbPool, FeedbackStore, SqlAnalyticsStore,
        SqlConversationStore, SqlFeedbackStore,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::{router, AnalyticsState};
    use crate::chat::COMPANY_HEADER;
    use crate::scheduler::LearningScheduler;

    struct OfflineLlm;

    #[async_trait]
    impl LlmClient for OfflineLlm {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, ProviderError> {
            Err(ProviderError::Transport("offline".to_string()))
        }
    }

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        pool
    }

    fn app(pool: DbPool) -> Router {
        let config = AppConfig::default();
        let job = LearningJob::new(
            Arc::new(SqlFeedbackStore::new(pool.clone())),
            Arc::new(OfflineLlm),
            Arc::new(PromptLibrary::new().expect("prompts")),
            TuningBaseline::from_config(&config),
            config.learning.clone(),
        );
        router(AnalyticsState::new(
            Arc::new(SqlAnalyticsStore::new(pool)),
            LearningScheduler::new(Arc::new(job)),
            config.server.default_company_id,
        ))
    }

    /// One acme conversation from Kenya with a thumbs-down on its only reply.
    async fn seed(pool: &DbPool) {
        let conversations = SqlConversationStore::new(pool.clone());
        let acme = CompanyId("acme".to_string());
        let conversation = conversations.resolve(&acme, "s-1").await.expect("resolve");
        let origin = VisitorOrigin::parse("KE", Some("Kenya")).expect("origin");
        conversations.record_origin(&acme, &conversation, &origin).await.expect("origin");

        let user = ConversationTurn::user(conversation.clone(), "How do refunds work here?");
        let reply = ConversationTurn::assistant(
            conversation.clone(),
            "Refunds take a week.",
            None,
            TurnMetadata::default(),
        );
        let turn_id = reply.id.clone();
        conversations.save_exchange(&acme, user, reply).await.expect("exchange");
        SqlFeedbackStore::new(pool.clone())
            .record_feedback(Feedback {
                id: FeedbackId::generate(),
                company_id: acme,
                turn_id,
                rating: 0,
                comment: Some("too vague".to_string()),
                created_at: Utc::now(),
            })
            .await
            .expect("feedback");
    }

    async fn send(app: Router, method: &str, uri: &str, company: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(COMPANY_HEADER, company)
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("router responds");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn overview_counts_only_the_callers_company() {
        let pool = pool().await;
        seed(&pool).await;

        let (status, body) = send(app(pool.clone()), "GET", "/api/v1/analytics/overview", "acme").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversation_metrics"]["total_conversations"], 1);
        assert_eq!(body["conversation_metrics"]["total_messages"], 2);
        assert_eq!(body["satisfaction_metrics"]["negative_feedback"], 1);
        assert_eq!(body["trending_queries"][0]["query"], "how do refunds work here?");

        let (_, other) = send(app(pool), "GET", "/api/v1/analytics/overview", "globex").await;
        assert_eq!(other["conversation_metrics"]["total_conversations"], 0);
        assert_eq!(other["trending_queries"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn flagged_queries_pair_the_question_with_the_rated_reply() {
        let pool = pool().await;
        seed(&pool).await;

        let (status, body) =
            send(app(pool), "GET", "/api/v1/analytics/flagged?limit=5", "acme").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["query"], "How do refunds work here?");
        assert_eq!(body[0]["response"], "Refunds take a week.");
        assert_eq!(body[0]["rating"], 0);
        assert_eq!(body[0]["comment"], "too vague");
    }

    #[tokio::test]
    async fn daily_stats_fill_every_day_and_reject_bad_ranges() {
        let pool = pool().await;
        seed(&pool).await;
        let today = Utc::now().date_naive();
        let start = today - Duration::days(2);

        let uri = format!("/api/v1/analytics/daily?start={start}&end={today}");
        let (status, body) = send(app(pool.clone()), "GET", &uri, "acme").await;
        assert_eq!(status, StatusCode::OK);
        let days = body.as_array().expect("days");
        assert_eq!(days.len(), 3);
        assert_eq!(days[0]["conversations"], 0);
        assert_eq!(days[2]["conversations"], 1);
        assert_eq!(days[2]["messages"], 2);

        let inverted = format!("/api/v1/analytics/daily?start={today}&end={start}");
        let (status, _) = send(app(pool.clone()), "GET", &inverted, "acme").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(app(pool.clone()), "GET", "/api/v1/analytics/daily?start=yesterday&end=2026-01-01", "acme")
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app(pool), "GET", "/api/v1/analytics/daily", "acme").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn country_stats_report_share_of_visitors() {
        let pool = pool().await;
        seed(&pool).await;
        SqlConversationStore::new(pool.clone())
            .resolve(&CompanyId("acme".to_string()), "s-2")
            .await
            .expect("resolve");

        let (status, body) = send(app(pool), "GET", "/api/v1/analytics/countries", "acme").await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().expect("rows");
        assert_eq!(rows.len(), 2);
        let kenya = rows.iter().find(|row| row["country_code"] == "KE").expect("kenya row");
        assert_eq!(kenya["country_name"], "Kenya");
        assert_eq!(kenya["visitors"], 1);
        assert_eq!(kenya["percentage"], 50.0);
        assert!(rows.iter().any(|row| row["country_code"] == "UNKNOWN"));
    }

    #[tokio::test]
    async fn manual_learning_run_shows_up_in_the_status() {
        let pool = pool().await;

        let (status, before) = send(app(pool.clone()), "GET", "/api/v1/learning/status", "acme").await;
        assert_eq!(status, StatusCode::OK);
        assert!(before["latest_report"].is_null());
        assert!(before["last_run"].is_null());
        assert_eq!(before["interval_hours"], 168);

        let router = app(pool.clone());
        let (status, report) = send(router.clone(), "POST", "/api/v1/learning/run", "acme").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(report["company_id"], "acme");

        let (_, after) = send(router, "GET", "/api/v1/learning/status", "acme").await;
        assert_eq!(after["latest_report"]["id"], report["id"]);
        assert_eq!(after["last_run"]["trigger"], "manual");

        let (_, foreign) = send(app(pool), "GET", "/api/v1/learning/status", "globex").await;
        assert!(foreign["latest_report"].is_null());
    }

    #[tokio::test]
    async fn failed_manual_run_is_unavailable() {
        let pool = pool().await;
        seed(&pool).await;

        let (status, body) = send(app(pool), "POST", "/api/v1/learning/run", "acme").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["correlation_id"].is_string());
    }
}
