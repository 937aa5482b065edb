pub mod analytics;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod intent;
pub mod learning;
pub mod preprocess;
pub mod quality;
pub mod replies;
pub mod retrieval;
pub mod routing;

pub use domain::conversation::{
    CompanyId, ConversationId, ConversationTurn, Feedback, FeedbackId, RatedExchange, Role,
    TurnId, TurnMetadata, VisitorOrigin,
};
pub use domain::intent::{Classification, ClassificationTier, Intent};
pub use domain::knowledge::{ChunkId, DocumentId, KnowledgeChunk, RetrievedChunk, SourceRef};
pub use domain::memory::{FactCategory, FactId, MemoryFact, MemoryScope, RecalledFact};
pub use domain::plan::{
    Action, ActionPlan, ActionResult, ActionType, Complexity, ExecutionContext,
};
pub use domain::query::{ProcessedQuery, Query};
pub use domain::response::{ChatRequest, ChatResponse};
pub use domain::validation::{AdjustmentDirective, ValidationSummary, ValidationVerdict};
pub use errors::{ApplicationError, DomainError, EmbeddingError, InterfaceError, ProviderError};
pub use learning::{FeedbackAnalysis, LearningReport, LearningReportId, TuningProposal};
pub use preprocess::{BrandAlias, QueryPreprocessor};
pub use retrieval::{RetrievalPlan, RetrievalPolicy};
pub use routing::{needs_planning, route, Route};
