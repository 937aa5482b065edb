use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use ragdesk_core::domain::conversation::CompanyId;
use ragdesk_core::domain::knowledge::{ChunkId, DocumentId, KnowledgeChunk, RetrievedChunk};

use super::{RepositoryError, VectorStore};
use crate::vectors::{blob_to_embedding, embedding_to_blob, rank};
use crate::DbPool;

pub struct SqlVectorStore {
    pool: DbPool,
}

impl SqlVectorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

struct ChunkRow {
    id: ChunkId,
    document_id: DocumentId,
    content: String,
}

#[async_trait]
impl VectorStore for SqlVectorStore {
    async fn search(
        &self,
        company_id: &CompanyId,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, RepositoryError> {
        let dimensions = i64::try_from(embedding.len())
            .map_err(|_| RepositoryError::Encode("embedding too large".to_string()))?;
        let rows = sqlx::query(
            "SELECT id, document_id, content, embedding
             FROM knowledge_chunks
             WHERE company_id = ? AND dimensions = ?",
        )
        .bind(&company_id.0)
        .bind(dimensions)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows.into_iter().map(chunk_candidate).collect::<Result<Vec<_>, _>>()?;

        Ok(rank(embedding, candidates, threshold, limit)
            .into_iter()
            .map(|(row, similarity)| RetrievedChunk {
                id: row.id,
                document_id: row.document_id,
                content: row.content,
                similarity,
            })
            .collect())
    }

    async fn upsert(&self, chunk: KnowledgeChunk) -> Result<(), RepositoryError> {
        let dimensions = i64::try_from(chunk.embedding.len())
            .map_err(|_| RepositoryError::Encode("embedding too large".to_string()))?;
        let result = sqlx::query(
            "INSERT INTO knowledge_chunks (
                id, company_id, document_id, content, embedding, dimensions, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                content = excluded.content,
                embedding = excluded.embedding,
                dimensions = excluded.dimensions
            WHERE knowledge_chunks.company_id = excluded.company_id",
        )
        .bind(&chunk.id.0)
        .bind(&chunk.company_id.0)
        .bind(&chunk.document_id.0)
        .bind(&chunk.content)
        .bind(embedding_to_blob(&chunk.embedding))
        .bind(dimensions)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!(
                "chunk {} belongs to another company",
                chunk.id.0
            )));
        }
        Ok(())
    }
}

fn chunk_candidate(row: SqliteRow) -> Result<(ChunkRow, Vec<f32>), RepositoryError> {
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok((
        ChunkRow {
            id: ChunkId(row.try_get("id")?),
            document_id: DocumentId(row.try_get("document_id")?),
            content: row.try_get("content")?,
        },
        blob_to_embedding(&blob)?,
    ))
}
