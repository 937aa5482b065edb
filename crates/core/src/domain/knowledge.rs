use serde::{Deserialize, Serialize};

use crate::domain::conversation::CompanyId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

pub const SOURCE_PREVIEW_CHARS: usize = 200;

/// A knowledge-base chunk with its embedding, as produced by ingestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: ChunkId,
    pub company_id: CompanyId,
    pub document_id: DocumentId,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Search hit scoped to a single retrieval call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub content: String,
    pub similarity: f64,
}

/// What a caller sees of a chunk that grounded an answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub content: String,
    pub similarity: f64,
}

impl SourceRef {
    pub fn from_chunk(chunk: &RetrievedChunk) -> Self {
        Self {
            id: chunk.id.0.clone(),
            content: preview(&chunk.content, SOURCE_PREVIEW_CHARS),
            similarity: chunk.similarity,
        }
    }
}

/// Truncates on a char boundary and marks the cut with an ellipsis.
pub fn preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let truncated: String = content.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::{preview, ChunkId, DocumentId, RetrievedChunk, SourceRef};

    #[test]
    fn short_content_is_not_truncated() {
        assert_eq!(preview("Email: info@example.com", 200), "Email: info@example.com");
    }

    #[test]
    fn long_content_is_cut_at_limit_with_ellipsis() {
        let chunk = RetrievedChunk {
            id: ChunkId("c-1".to_string()),
            document_id: DocumentId("d-1".to_string()),
            content: "é".repeat(250),
            similarity: 0.42,
        };
        let source = SourceRef::from_chunk(&chunk);
        assert_eq!(source.content.chars().count(), 203);
        assert!(source.content.ends_with("..."));
        assert_eq!(source.id, "c-1");
    }
}
