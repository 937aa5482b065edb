use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use ragdesk_core::domain::conversation::{CompanyId, Feedback, RatedExchange};
use ragdesk_core::learning::LearningReport;

use super::{FeedbackStore, RepositoryError};
use crate::DbPool;

pub struct SqlFeedbackStore {
    pool: DbPool,
}

impl SqlFeedbackStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedbackStore for SqlFeedbackStore {
    async fn record_feedback(&self, feedback: Feedback) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO feedback (id, company_id, turn_id, rating, comment, created_at)
             SELECT ?, ?, t.id, ?, ?, ?
             FROM turns t
             JOIN conversations c ON c.id = t.conversation_id
             WHERE t.id = ? AND t.role = 'assistant' AND c.company_id = ?",
        )
        .bind(&feedback.id.0)
        .bind(&feedback.company_id.0)
        .bind(i64::from(feedback.rating))
        .bind(&feedback.comment)
        .bind(feedback.created_at.to_rfc3339())
        .bind(&feedback.turn_id.0)
        .bind(&feedback.company_id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "assistant turn {} for company {}",
                feedback.turn_id.0, feedback.company_id.0
            )));
        }
        Ok(())
    }

    async fn low_rated_exchanges(
        &self,
        company_id: &CompanyId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RatedExchange>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT f.comment, a.content AS response, a.context_used_json,
                    (SELECT u.content FROM turns u
                     WHERE u.conversation_id = a.conversation_id
                       AND u.role = 'user'
                       AND u.rowid < a.rowid
                     ORDER BY u.rowid DESC
                     LIMIT 1) AS query
             FROM feedback f
             JOIN turns a ON a.id = f.turn_id
             JOIN conversations c ON c.id = a.conversation_id
             WHERE f.company_id = ? AND c.company_id = ? AND f.rating = 0 AND f.created_at >= ?
             ORDER BY f.created_at ASC, f.rowid ASC",
        )
        .bind(&company_id.0)
        .bind(&company_id.0)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut exchanges = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(exchange) = exchange_from_row(row)? {
                exchanges.push(exchange);
            }
        }
        Ok(exchanges)
    }

    async fn companies_with_feedback(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompanyId>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT DISTINCT company_id FROM feedback WHERE created_at >= ? ORDER BY company_id",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.try_get("company_id").map(CompanyId).map_err(RepositoryError::from))
            .collect()
    }

    async fn save_report(&self, report: LearningReport) -> Result<(), RepositoryError> {
        let analyzed = i64::try_from(report.analysis.analyzed)
            .map_err(|_| RepositoryError::Encode("analyzed count too large".to_string()))?;
        sqlx::query(
            "INSERT INTO learning_reports (
                id, company_id, window_days, analyzed_count, confidence, report_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&report.id.0)
        .bind(&report.company_id.0)
        .bind(i64::from(report.window_days))
        .bind(analyzed)
        .bind(report.analysis.confidence)
        .bind(serde_json::to_string(&report)?)
        .bind(report.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_report(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<LearningReport>, RepositoryError> {
        let row = sqlx::query(
            "SELECT report_json FROM learning_reports
             WHERE company_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(&company_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let json: String = row.try_get("report_json")?;
            serde_json::from_str::<LearningReport>(&json)
                .map_err(|error| RepositoryError::Decode(format!("invalid report_json: {error}")))
        })
        .transpose()
    }
}

/// Rated replies with no earlier user turn carry no question to analyze.
fn exchange_from_row(row: SqliteRow) -> Result<Option<RatedExchange>, RepositoryError> {
    let Some(query) = row.try_get::<Option<String>, _>("query")? else {
        return Ok(None);
    };
    let context_used = row
        .try_get::<Option<String>, _>("context_used_json")?
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("invalid context_used_json: {error}")))?;

    Ok(Some(RatedExchange {
        query,
        response: row.try_get("response")?,
        context_used,
        comment: row.try_get("comment")?,
    }))
}
