use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::{CompanyId, ConversationId, TurnId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactId(pub String);

impl FactId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Preference,
    Request,
    Context,
    Followup,
    Problem,
    Other,
}

impl FactCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Request => "request",
            Self::Context => "context",
            Self::Followup => "followup",
            Self::Problem => "problem",
            Self::Other => "other",
        }
    }

    /// Unknown labels land in `Other` rather than dropping the fact.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "").as_str() {
            "preference" => Self::Preference,
            "request" => Self::Request,
            "context" => Self::Context,
            "followup" => Self::Followup,
            "problem" => Self::Problem,
            _ => Self::Other,
        }
    }
}

/// Company and conversation a memory read or write is confined to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    pub company_id: CompanyId,
    pub conversation_id: ConversationId,
}

/// A salient statement extracted from a finished turn. Facts are append-only:
/// newer information is stored as a new fact, never merged into an old one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: FactId,
    pub scope: MemoryScope,
    pub text: String,
    pub category: FactCategory,
    pub confidence: f64,
    pub embedding: Vec<f32>,
    pub source_turn_id: Option<TurnId>,
    pub created_at: DateTime<Utc>,
}

/// A recalled fact with its similarity to the current query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecalledFact {
    pub text: String,
    pub category: FactCategory,
    pub similarity: f64,
}
