use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use ragdesk_core::domain::conversation::{
    CompanyId, ConversationId, ConversationTurn, Role, TurnId, TurnMetadata, VisitorOrigin,
};
use ragdesk_core::domain::intent::Intent;

use super::{parse_timestamp, parse_u64, ConversationStore, RepositoryError};
use crate::DbPool;

pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for SqlConversationStore {
    async fn find_by_session(
        &self,
        company_id: &CompanyId,
        session_id: &str,
    ) -> Result<Option<ConversationId>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id FROM conversations WHERE company_id = ? AND session_id = ?",
        )
        .bind(&company_id.0)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.try_get("id").map(ConversationId))
            .transpose()
            .map_err(RepositoryError::from)
    }

    async fn resolve(
        &self,
        company_id: &CompanyId,
        session_id: &str,
    ) -> Result<ConversationId, RepositoryError> {
        sqlx::query(
            "INSERT INTO conversations (id, company_id, session_id, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(company_id, session_id) DO NOTHING",
        )
        .bind(ConversationId::generate().0)
        .bind(&company_id.0)
        .bind(session_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_by_session(company_id, session_id).await?.ok_or_else(|| {
            RepositoryError::NotFound(format!(
                "conversation for session {session_id} of company {}",
                company_id.0
            ))
        })
    }

    async fn get_history(
        &self,
        company_id: &CompanyId,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT * FROM (
                SELECT t.rowid AS seq, t.id, t.conversation_id, t.role, t.content,
                       t.context_used_json, t.intent, t.confidence, t.response_time_ms,
                       t.created_at
                FROM turns t
                JOIN conversations c ON c.id = t.conversation_id
                WHERE t.conversation_id = ? AND c.company_id = ?
                ORDER BY t.rowid DESC
                LIMIT ?
            ) ORDER BY seq ASC",
        )
        .bind(&conversation_id.0)
        .bind(&company_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(turn_from_row).collect()
    }

    async fn record_origin(
        &self,
        company_id: &CompanyId,
        conversation_id: &ConversationId,
        origin: &VisitorOrigin,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        require_owner(&mut tx, company_id, conversation_id).await?;
        sqlx::query(
            "UPDATE conversations SET country_code = ?, country_name = ?
             WHERE id = ? AND company_id = ? AND country_code IS NULL",
        )
        .bind(&origin.country_code)
        .bind(&origin.country_name)
        .bind(&conversation_id.0)
        .bind(&company_id.0)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_exchange(
        &self,
        company_id: &CompanyId,
        user_turn: ConversationTurn,
        assistant_turn: ConversationTurn,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        require_owner(&mut tx, company_id, &user_turn.conversation_id).await?;
        require_owner(&mut tx, company_id, &assistant_turn.conversation_id).await?;
        insert_turn(&mut tx, &user_turn).await?;
        insert_turn(&mut tx, &assistant_turn).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn require_owner(
    conn: &mut SqliteConnection,
    company_id: &CompanyId,
    conversation_id: &ConversationId,
) -> Result<(), RepositoryError> {
    let owned = sqlx::query("SELECT 1 FROM conversations WHERE id = ? AND company_id = ?")
        .bind(&conversation_id.0)
        .bind(&company_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    match owned {
        Some(_) => Ok(()),
        None => Err(RepositoryError::NotFound(format!(
            "conversation {} for company {}",
            conversation_id.0, company_id.0
        ))),
    }
}

async fn insert_turn(
    conn: &mut SqliteConnection,
    turn: &ConversationTurn,
) -> Result<(), RepositoryError> {
    let context_used = turn.context_used.as_ref().map(serde_json::to_string).transpose()?;
    let response_time_ms = turn
        .metadata
        .response_time_ms
        .map(|value| {
            i64::try_from(value)
                .map_err(|_| RepositoryError::Encode(format!("response time {value} too large")))
        })
        .transpose()?;

    sqlx::query(
        "INSERT INTO turns (
            id, conversation_id, role, content, context_used_json, intent, confidence,
            response_time_ms, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&turn.id.0)
    .bind(&turn.conversation_id.0)
    .bind(turn.role.as_str())
    .bind(&turn.content)
    .bind(context_used)
    .bind(turn.metadata.intent.map(|intent| intent.as_str()))
    .bind(turn.metadata.confidence)
    .bind(response_time_ms)
    .bind(turn.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) fn turn_from_row(row: SqliteRow) -> Result<ConversationTurn, RepositoryError> {
    let role: String = row.try_get("role")?;
    let role = Role::parse(&role)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown turn role `{role}`")))?;
    let context_used = row
        .try_get::<Option<String>, _>("context_used_json")?
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|error| RepositoryError::Decode(format!("invalid context_used_json: {error}")))?;
    let intent = row
        .try_get::<Option<String>, _>("intent")?
        .map(|value| {
            Intent::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown intent `{value}`")))
        })
        .transpose()?;
    let response_time_ms = row
        .try_get::<Option<i64>, _>("response_time_ms")?
        .map(|value| parse_u64("response_time_ms", value))
        .transpose()?;

    Ok(ConversationTurn {
        id: TurnId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        role,
        content: row.try_get("content")?,
        context_used,
        metadata: TurnMetadata {
            intent,
            confidence: row.try_get("confidence")?,
            response_time_ms,
        },
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
