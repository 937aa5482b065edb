pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod vectors;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use repositories::{
    AnalyticsStore, ConversationStore, FeedbackStore, InMemoryConversationStore,
    InMemoryMemoryFactStore, InMemoryVectorStore, MemoryFactStore, RepositoryError,
    SqlAnalyticsStore, SqlConversationStore, SqlFeedbackStore, SqlMemoryFactStore,
    SqlVectorStore, VectorStore,
};
