use std::sync::Arc;

use ragdesk_agent::prompts::{PromptError, PromptLibrary};
use ragdesk_agent::{
    AgentDeps, AgentRuntime, HashingEmbedder, HttpLlmClient, LearningJob, RuntimeError,
    ToolError, ToolRegistry,
};
use ragdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use ragdesk_core::errors::ProviderError;
use ragdesk_core::learning::TuningBaseline;
use ragdesk_db::{
    connect_with_config, migrations, AnalyticsStore, DbPool, FeedbackStore, SqlAnalyticsStore,
    SqlConversationStore, SqlFeedbackStore, SqlMemoryFactStore, SqlVectorStore,
};
use thiserror::Error;
use tracing::info;

use crate::scheduler::LearningScheduler;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
    pub scheduler: Arc<LearningScheduler>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(#[source] ProviderError),
    #[error("tool registry setup failed: {0}")]
    Tools(#[from] ToolError),
    #[error("prompt templates failed to load: {0}")]
    Prompts(#[from] PromptError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm = HttpLlmClient::with_timeout(&config.llm).map_err(BootstrapError::Llm)?;
    let tools = ToolRegistry::from_config(&config.tools)?;
    info!(
        event_name = "system.bootstrap.tools_registered",
        correlation_id = "bootstrap",
        tools = tools.len(),
        provider = ?config.llm.provider,
        "agent collaborators configured"
    );

    let feedback: Arc<dyn FeedbackStore> = Arc::new(SqlFeedbackStore::new(db_pool.clone()));
    let runtime = AgentRuntime::new(
        &config,
        AgentDeps {
            llm: llm.clone(),
            embedder: Arc::new(HashingEmbedder::new(config.embedding.dimensions)),
            vector_store: Arc::new(SqlVectorStore::new(db_pool.clone())),
            conversations: Arc::new(SqlConversationStore::new(db_pool.clone())),
            facts: Arc::new(SqlMemoryFactStore::new(db_pool.clone())),
            tools,
        },
    )?;
    let learning = LearningJob::new(
        feedback.clone(),
        llm,
        Arc::new(PromptLibrary::new()?),
        TuningBaseline::from_config(&config),
        config.learning.clone(),
    );

    let analytics: Arc<dyn AnalyticsStore> = Arc::new(SqlAnalyticsStore::new(db_pool.clone()));

    Ok(Application {
        config,
        db_pool,
        runtime: Arc::new(runtime),
        feedback,
        analytics,
        scheduler: LearningScheduler::new(Arc::new(learning)),
    })
}
