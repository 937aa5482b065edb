use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::intent::Intent;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompanyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedbackId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl TurnId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl FeedbackId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Country a conversation was started from, as reported by the edge proxy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorOrigin {
    pub country_code: String,
    pub country_name: Option<String>,
}

impl VisitorOrigin {
    /// Accepts two-letter codes only; anything else is treated as unknown.
    pub fn parse(country_code: &str, country_name: Option<&str>) -> Option<Self> {
        let code = country_code.trim();
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        Some(Self {
            country_code: code.to_ascii_uppercase(),
            country_name: country_name
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Observability metadata recorded alongside an assistant turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub intent: Option<Intent>,
    pub confidence: Option<f64>,
    pub response_time_ms: Option<u64>,
}

/// One entry of a conversation's append-only log. Turns are never edited
/// after they are stored; feedback lives in its own record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub context_used: Option<serde_json::Value>,
    pub metadata: TurnMetadata,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: TurnId::generate(),
            conversation_id,
            role: Role::User,
            content: content.into(),
            context_used: None,
            metadata: TurnMetadata::default(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        conversation_id: ConversationId,
        content: impl Into<String>,
        context_used: Option<serde_json::Value>,
        metadata: TurnMetadata,
    ) -> Self {
        Self {
            id: TurnId::generate(),
            conversation_id,
            role: Role::Assistant,
            content: content.into(),
            context_used,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Thumbs-up (1) or thumbs-down (0) rating on an assistant turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: FeedbackId,
    pub company_id: CompanyId,
    pub turn_id: TurnId,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A low-rated assistant reply joined with the user message that prompted it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatedExchange {
    pub query: String,
    pub response: String,
    pub context_used: Option<serde_json::Value>,
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{Role, VisitorOrigin};

    #[test]
    fn role_parse_accepts_stored_spelling() {
        assert_eq!(Role::parse(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::parse(" Assistant "), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn visitor_origin_requires_a_two_letter_code() {
        let origin = VisitorOrigin::parse(" de ", Some(" Germany ")).expect("valid code");
        assert_eq!(origin.country_code, "DE");
        assert_eq!(origin.country_name.as_deref(), Some("Germany"));
        assert_eq!(VisitorOrigin::parse("GB", Some("  ")).and_then(|o| o.country_name), None);
        assert!(VisitorOrigin::parse("XXX", None).is_none());
        assert!(VisitorOrigin::parse("1A", None).is_none());
    }
}
