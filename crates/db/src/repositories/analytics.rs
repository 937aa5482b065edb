use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use ragdesk_core::analytics::{
    ConversationMetrics, DailyCounts, DateRange, FlaggedQuery, KnowledgeBaseMetrics,
    SatisfactionMetrics,
};
use ragdesk_core::domain::conversation::CompanyId;

use super::{parse_timestamp, AnalyticsStore, RepositoryError};
use crate::DbPool;

/// Timestamps are stored as UTC RFC3339 text, so the first ten characters
/// are the calendar day.
const DAY: &str = "substr(created_at, 1, 10)";

pub struct SqlAnalyticsStore {
    pool: DbPool,
}

impl SqlAnalyticsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn count(&self, sql: &str, company_id: &CompanyId) -> Result<i64, RepositoryError> {
        let row = sqlx::query(sql).bind(&company_id.0).fetch_one(&self.pool).await?;
        Ok(row.try_get::<Option<i64>, _>(0)?.unwrap_or(0))
    }

    async fn per_day(
        &self,
        sql: &str,
        company_id: &CompanyId,
        range: &DateRange,
    ) -> Result<Vec<SqliteRow>, RepositoryError> {
        let rows = sqlx::query(sql)
            .bind(&company_id.0)
            .bind(range.start().to_string())
            .bind(range.end().to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AnalyticsStore for SqlAnalyticsStore {
    async fn conversation_metrics(
        &self,
        company_id: &CompanyId,
        today: NaiveDate,
    ) -> Result<ConversationMetrics, RepositoryError> {
        let conversations =
            self.count("SELECT COUNT(*) FROM conversations WHERE company_id = ?", company_id).await?;
        let messages = self
            .count(
                "SELECT COUNT(*) FROM turns t
                 JOIN conversations c ON c.id = t.conversation_id
                 WHERE c.company_id = ?",
                company_id,
            )
            .await?;
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) FROM conversations WHERE company_id = ? AND {DAY} = ?"
        ))
        .bind(&company_id.0)
        .bind(today.to_string())
        .fetch_one(&self.pool)
        .await?;
        let today_count: i64 = row.try_get(0)?;

        Ok(ConversationMetrics::new(conversations, messages, today_count))
    }

    async fn satisfaction_metrics(
        &self,
        company_id: &CompanyId,
    ) -> Result<SatisfactionMetrics, RepositoryError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(CASE WHEN rating = 1 THEN 1 ELSE 0 END), 0) AS positive,
                    COALESCE(SUM(CASE WHEN rating = 0 THEN 1 ELSE 0 END), 0) AS negative
             FROM feedback WHERE company_id = ?",
        )
        .bind(&company_id.0)
        .fetch_one(&self.pool)
        .await?;
        let assistant_messages = self
            .count(
                "SELECT COUNT(*) FROM turns t
                 JOIN conversations c ON c.id = t.conversation_id
                 WHERE c.company_id = ? AND t.role = 'assistant'",
                company_id,
            )
            .await?;

        Ok(SatisfactionMetrics::from_counts(
            row.try_get("positive")?,
            row.try_get("negative")?,
            assistant_messages,
        ))
    }

    async fn user_messages_since(
        &self,
        company_id: &CompanyId,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT t.content FROM turns t
             JOIN conversations c ON c.id = t.conversation_id
             WHERE c.company_id = ? AND t.role = 'user' AND t.created_at >= ?
             ORDER BY t.rowid ASC",
        )
        .bind(&company_id.0)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.try_get("content").map_err(RepositoryError::from))
            .collect()
    }

    async fn knowledge_base_metrics(
        &self,
        company_id: &CompanyId,
        month_start: NaiveDate,
    ) -> Result<KnowledgeBaseMetrics, RepositoryError> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT document_id) AS documents, COUNT(*) AS chunks
             FROM knowledge_chunks WHERE company_id = ?",
        )
        .bind(&company_id.0)
        .fetch_one(&self.pool)
        .await?;
        let added = sqlx::query(
            "SELECT COUNT(*) FROM (
                SELECT document_id FROM knowledge_chunks
                WHERE company_id = ?
                GROUP BY document_id
                HAVING MIN(created_at) >= ?
            )",
        )
        .bind(&company_id.0)
        .bind(month_start.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(KnowledgeBaseMetrics {
            total_documents: row.try_get("documents")?,
            total_chunks: row.try_get("chunks")?,
            documents_added_this_month: added.try_get(0)?,
        })
    }

    async fn flagged_queries(
        &self,
        company_id: &CompanyId,
        limit: usize,
    ) -> Result<Vec<FlaggedQuery>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT a.id AS turn_id, a.conversation_id, a.content AS response,
                    f.rating, f.comment, f.created_at,
                    (SELECT u.content FROM turns u
                     WHERE u.conversation_id = a.conversation_id
                       AND u.role = 'user'
                       AND u.rowid < a.rowid
                     ORDER BY u.rowid DESC
                     LIMIT 1) AS query
             FROM feedback f
             JOIN turns a ON a.id = f.turn_id
             JOIN conversations c ON c.id = a.conversation_id
             WHERE f.company_id = ? AND c.company_id = ?
             ORDER BY f.created_at DESC, f.rowid DESC
             LIMIT ?",
        )
        .bind(&company_id.0)
        .bind(&company_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(flagged_from_row).collect()
    }

    async fn daily_counts(
        &self,
        company_id: &CompanyId,
        range: &DateRange,
    ) -> Result<DailyCounts, RepositoryError> {
        let conversations = self
            .per_day(
                &format!(
                    "SELECT {DAY} AS day, COUNT(*) AS total FROM conversations
                     WHERE company_id = ? AND {DAY} BETWEEN ? AND ?
                     GROUP BY day"
                ),
                company_id,
                range,
            )
            .await?;
        let messages = self
            .per_day(
                "SELECT substr(t.created_at, 1, 10) AS day, COUNT(*) AS total FROM turns t
                 JOIN conversations c ON c.id = t.conversation_id
                 WHERE c.company_id = ? AND substr(t.created_at, 1, 10) BETWEEN ? AND ?
                 GROUP BY day",
                company_id,
                range,
            )
            .await?;
        let ratings = self
            .per_day(
                &format!(
                    "SELECT {DAY} AS day, COUNT(*) AS total, SUM(rating) AS positive
                     FROM feedback
                     WHERE company_id = ? AND {DAY} BETWEEN ? AND ?
                     GROUP BY day"
                ),
                company_id,
                range,
            )
            .await?;

        let mut counts = DailyCounts {
            conversations: totals_by_day(conversations)?,
            messages: totals_by_day(messages)?,
            ratings: BTreeMap::new(),
        };
        for row in ratings {
            let day = parse_day(row.try_get("day")?)?;
            counts.ratings.insert(day, (row.try_get("total")?, row.try_get("positive")?));
        }
        Ok(counts)
    }

    async fn country_counts(
        &self,
        company_id: &CompanyId,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<(Option<String>, Option<String>, i64)>, RepositoryError> {
        let start = start.map(|date| date.to_string());
        let end = end.map(|date| date.to_string());
        let rows = sqlx::query(&format!(
            "SELECT country_code, country_name, COUNT(*) AS visitors
             FROM conversations
             WHERE company_id = ?
               AND (? IS NULL OR {DAY} >= ?)
               AND (? IS NULL OR {DAY} <= ?)
             GROUP BY country_code, country_name"
        ))
        .bind(&company_id.0)
        .bind(&start)
        .bind(&start)
        .bind(&end)
        .bind(&end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<_, RepositoryError> {
                Ok((
                    row.try_get("country_code")?,
                    row.try_get("country_name")?,
                    row.try_get("visitors")?,
                ))
            })
            .collect()
    }
}

fn totals_by_day(rows: Vec<SqliteRow>) -> Result<BTreeMap<NaiveDate, i64>, RepositoryError> {
    rows.into_iter()
        .map(|row| -> Result<_, RepositoryError> {
            Ok((parse_day(row.try_get("day")?)?, row.try_get("total")?))
        })
        .collect()
}

fn parse_day(value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("invalid day `{value}`: {error}")))
}

fn flagged_from_row(row: SqliteRow) -> Result<FlaggedQuery, RepositoryError> {
    let rating: i64 = row.try_get("rating")?;
    let rating = u8::try_from(rating)
        .map_err(|_| RepositoryError::Decode(format!("rating out of range: {rating}")))?;

    Ok(FlaggedQuery {
        turn_id: row.try_get("turn_id")?,
        conversation_id: row.try_get("conversation_id")?,
        query: row.try_get::<Option<String>, _>("query")?.unwrap_or_default(),
        response: row.try_get("response")?,
        rating,
        comment: row.try_get("comment")?,
        created_at: parse_timestamp("feedback.created_at", row.try_get("created_at")?)?,
    })
}
