use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use ragdesk_core::domain::memory::{FactCategory, MemoryFact, MemoryScope, RecalledFact};

use super::{MemoryFactStore, RepositoryError};
use crate::vectors::{blob_to_embedding, embedding_to_blob, rank};
use crate::DbPool;

pub struct SqlMemoryFactStore {
    pool: DbPool,
}

impl SqlMemoryFactStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryFactStore for SqlMemoryFactStore {
    async fn save_fact(&self, fact: MemoryFact) -> Result<(), RepositoryError> {
        let dimensions = i64::try_from(fact.embedding.len())
            .map_err(|_| RepositoryError::Encode("embedding too large".to_string()))?;
        sqlx::query(
            "INSERT INTO memory_facts (
                id, company_id, conversation_id, text, category, confidence, embedding,
                dimensions, source_turn_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&fact.id.0)
        .bind(&fact.scope.company_id.0)
        .bind(&fact.scope.conversation_id.0)
        .bind(&fact.text)
        .bind(fact.category.as_str())
        .bind(fact.confidence)
        .bind(embedding_to_blob(&fact.embedding))
        .bind(dimensions)
        .bind(fact.source_turn_id.as_ref().map(|turn_id| turn_id.0.as_str()))
        .bind(fact.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search_facts(
        &self,
        scope: &MemoryScope,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RecalledFact>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT text, category, embedding
             FROM memory_facts
             WHERE company_id = ? AND conversation_id = ?",
        )
        .bind(&scope.company_id.0)
        .bind(&scope.conversation_id.0)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows.into_iter().map(fact_candidate).collect::<Result<Vec<_>, _>>()?;

        Ok(rank(embedding, candidates, threshold, limit)
            .into_iter()
            .map(|((text, category), similarity)| RecalledFact { text, category, similarity })
            .collect())
    }
}

fn fact_candidate(row: SqliteRow) -> Result<((String, FactCategory), Vec<f32>), RepositoryError> {
    let category: String = row.try_get("category")?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok(((row.try_get("text")?, FactCategory::parse(&category)), blob_to_embedding(&blob)?))
}
