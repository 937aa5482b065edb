use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use ragdesk_core::analytics::{
    ConversationMetrics, DailyCounts, DateRange, FlaggedQuery, KnowledgeBaseMetrics,
    SatisfactionMetrics,
};
use ragdesk_core::domain::conversation::{
    CompanyId, ConversationId, ConversationTurn, Feedback, RatedExchange, VisitorOrigin,
};
use ragdesk_core::domain::knowledge::{KnowledgeChunk, RetrievedChunk};
use ragdesk_core::domain::memory::{MemoryFact, MemoryScope, RecalledFact};
use ragdesk_core::learning::LearningReport;

pub mod analytics;
pub mod conversation;
pub mod facts;
pub mod feedback;
pub mod knowledge;
pub mod memory;

pub use analytics::SqlAnalyticsStore;
pub use conversation::SqlConversationStore;
pub use facts::SqlMemoryFactStore;
pub use feedback::SqlFeedbackStore;
pub use knowledge::SqlVectorStore;
pub use memory::{InMemoryConversationStore, InMemoryMemoryFactStore, InMemoryVectorStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(error: serde_json::Error) -> Self {
        Self::Encode(error.to_string())
    }
}

/// Company-scoped similarity search over knowledge chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns chunks of `company_id` scoring at or above `threshold`,
    /// best first, at most `limit` of them.
    async fn search(
        &self,
        company_id: &CompanyId,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, RepositoryError>;

    async fn upsert(&self, chunk: KnowledgeChunk) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_by_session(
        &self,
        company_id: &CompanyId,
        session_id: &str,
    ) -> Result<Option<ConversationId>, RepositoryError>;

    /// Returns the conversation for `(company_id, session_id)`, creating it
    /// on first use.
    async fn resolve(
        &self,
        company_id: &CompanyId,
        session_id: &str,
    ) -> Result<ConversationId, RepositoryError>;

    /// Last `limit` turns in chronological order. A conversation owned by a
    /// different company yields no turns.
    async fn get_history(
        &self,
        company_id: &CompanyId,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError>;

    /// Tags the conversation with the visitor's country. The first recorded
    /// origin sticks.
    async fn record_origin(
        &self,
        company_id: &CompanyId,
        conversation_id: &ConversationId,
        origin: &VisitorOrigin,
    ) -> Result<(), RepositoryError>;

    /// Stores a user turn and its assistant reply together or not at all.
    async fn save_exchange(
        &self,
        company_id: &CompanyId,
        user_turn: ConversationTurn,
        assistant_turn: ConversationTurn,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MemoryFactStore: Send + Sync {
    async fn save_fact(&self, fact: MemoryFact) -> Result<(), RepositoryError>;

    async fn search_facts(
        &self,
        scope: &MemoryScope,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RecalledFact>, RepositoryError>;
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Fails with `NotFound` unless the turn is an assistant turn in a
    /// conversation owned by the feedback's company.
    async fn record_feedback(&self, feedback: Feedback) -> Result<(), RepositoryError>;

    /// Zero-rated exchanges since `since`, oldest first, paired with the
    /// user message that preceded each rated reply.
    async fn low_rated_exchanges(
        &self,
        company_id: &CompanyId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RatedExchange>, RepositoryError>;

    async fn companies_with_feedback(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompanyId>, RepositoryError>;

    async fn save_report(&self, report: LearningReport) -> Result<(), RepositoryError>;

    async fn latest_report(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<LearningReport>, RepositoryError>;
}

/// Per-company read model behind the analytics dashboard.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn conversation_metrics(
        &self,
        company_id: &CompanyId,
        today: NaiveDate,
    ) -> Result<ConversationMetrics, RepositoryError>;

    async fn satisfaction_metrics(
        &self,
        company_id: &CompanyId,
    ) -> Result<SatisfactionMetrics, RepositoryError>;

    /// User messages sent since `since`, oldest first.
    async fn user_messages_since(
        &self,
        company_id: &CompanyId,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, RepositoryError>;

    async fn knowledge_base_metrics(
        &self,
        company_id: &CompanyId,
        month_start: NaiveDate,
    ) -> Result<KnowledgeBaseMetrics, RepositoryError>;

    /// Most recent ratings of either polarity, newest first.
    async fn flagged_queries(
        &self,
        company_id: &CompanyId,
        limit: usize,
    ) -> Result<Vec<FlaggedQuery>, RepositoryError>;

    async fn daily_counts(
        &self,
        company_id: &CompanyId,
        range: &DateRange,
    ) -> Result<DailyCounts, RepositoryError>;

    /// `(country_code, country_name, conversations)` per recorded origin,
    /// optionally bounded by conversation start date.
    async fn country_counts(
        &self,
        company_id: &CompanyId,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<(Option<String>, Option<String>, i64)>, RepositoryError>;
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|value| value.with_timezone(&Utc)).map_err(|error| {
        RepositoryError::Decode(format!("invalid {column} timestamp `{value}`: {error}"))
    })
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column} must be non-negative, got {value}")))
}
