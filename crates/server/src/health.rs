use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use ragdesk_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub status: Readiness,
    pub knowledge_chunks: Option<i64>,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: Readiness,
    pub version: &'static str,
    pub store: StoreStatus,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

/// Ready once the migrated schema answers; an empty knowledge base is still
/// ready, it only yields no-context replies.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let store = store_status(&state.db_pool).await;
    let status_code = match store.status {
        Readiness::Ready => StatusCode::OK,
        Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };

    let payload = HealthResponse {
        status: store.status,
        version: env!("CARGO_PKG_VERSION"),
        store,
        checked_at: Utc::now().to_rfc3339(),
    };
    (status_code, Json(payload))
}

async fn store_status(pool: &DbPool) -> StoreStatus {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM knowledge_chunks").fetch_one(pool).await
    {
        Ok(count) => StoreStatus {
            status: Readiness::Ready,
            knowledge_chunks: Some(count),
            detail: "schema reachable".to_string(),
        },
        Err(error) => StoreStatus {
            status: Readiness::Degraded,
            knowledge_chunks: None,
            detail: format!("store query failed: {error}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use ragdesk_db::{connect_with_settings, migrations};

    use crate::health::{health, HealthState, Readiness};

    #[tokio::test]
    async fn migrated_store_reports_ready_with_chunk_count() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, Readiness::Ready);
        assert_eq!(payload.store.knowledge_chunks, Some(0));

        pool.close().await;
    }

    #[tokio::test]
    async fn unmigrated_store_is_degraded() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, Readiness::Degraded);
        assert!(payload.store.knowledge_chunks.is_none());

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_pool_is_degraded() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.store.status, Readiness::Degraded);
    }
}
