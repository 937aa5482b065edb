use std::sync::Arc;

use ragdesk_agent::{AgentDeps, AgentRuntime, HashingEmbedder, HttpLlmClient, ToolRegistry};
use ragdesk_core::config::AppConfig;
use ragdesk_core::domain::conversation::CompanyId;
use ragdesk_core::domain::query::Query;
use ragdesk_db::{DbPool, SqlConversationStore, SqlMemoryFactStore, SqlVectorStore};

use crate::commands::{async_runtime, load_config, open_database, CommandResult, Failure, EXIT_ASK};

#[derive(Clone, Debug, Default)]
pub struct AskArgs {
    pub message: String,
    pub company: Option<String>,
    pub session: Option<String>,
}

/// Runs one query through the full pipeline against the configured store.
pub fn run(args: AskArgs) -> CommandResult {
    if args.message.trim().is_empty() {
        return CommandResult::failure("ask", "ask_input", "message must not be empty", EXIT_ASK);
    }
    let config = match load_config("ask") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("ask") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let company_id =
        CompanyId(args.company.unwrap_or_else(|| config.server.default_company_id.clone()));

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let agent = agent_runtime(&config, &pool)?;

        let mut query = Query::new(args.message);
        if let Some(session) = args.session {
            query = query.with_session(session);
        }
        let response = agent.handle(&company_id, query).await;
        pool.close().await;
        Ok::<_, Failure>(response)
    });

    match result {
        Ok(response) => {
            let message = response.response.clone();
            CommandResult::success_with("ask", message, serde_json::to_value(&response).ok())
        }
        Err(failure) => CommandResult::from_failure("ask", failure),
    }
}

fn agent_runtime(config: &AppConfig, pool: &DbPool) -> Result<AgentRuntime, Failure> {
    let llm = HttpLlmClient::with_timeout(&config.llm)
        .map_err(|error| ("llm_setup", error.to_string(), EXIT_ASK))?;
    let tools = ToolRegistry::from_config(&config.tools)
        .map_err(|error| ("tool_setup", error.to_string(), EXIT_ASK))?;

    AgentRuntime::new(
        config,
        AgentDeps {
            llm,
            embedder: Arc::new(HashingEmbedder::new(config.embedding.dimensions)),
            vector_store: Arc::new(SqlVectorStore::new(pool.clone())),
            conversations: Arc::new(SqlConversationStore::new(pool.clone())),
            facts: Arc::new(SqlMemoryFactStore::new(pool.clone())),
            tools,
        },
    )
    .map_err(|error| ("agent_setup", error.to_string(), EXIT_ASK))
}
