use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ragdesk_core::config::MemoryConfig;
use ragdesk_core::domain::conversation::{ConversationTurn, TurnId};
use ragdesk_core::domain::memory::{FactCategory, FactId, MemoryFact, MemoryScope, RecalledFact};
use ragdesk_core::errors::{EmbeddingError, ProviderError};
use ragdesk_db::repositories::{MemoryFactStore, RepositoryError};

use crate::embedder::Embedder;
use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::{PromptError, PromptLibrary};

const EXTRACT_MAX_TOKENS: u32 = 300;
const EXTRACT_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// A fact line as the extraction prompt asks for it.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedFact {
    pub category: FactCategory,
    pub confidence: f64,
    pub text: String,
}

/// Parses `FACT: <category> | <confidence> | <text>` lines; anything else
/// is ignored.
pub fn parse_facts(text: &str) -> Vec<ExtractedFact> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*']).trim();
            let (label, rest) = line.split_once(':')?;
            if !label.trim().eq_ignore_ascii_case("fact") {
                return None;
            }
            let mut parts = rest.splitn(3, '|').map(str::trim);
            let category = FactCategory::parse(parts.next()?);
            let confidence = parts.next()?.parse::<f64>().ok()?.clamp(0.0, 1.0);
            let text = parts.next().filter(|text| !text.is_empty())?;
            Some(ExtractedFact { category, confidence, text: text.to_string() })
        })
        .collect()
}

pub struct SemanticMemory {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn MemoryFactStore>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    config: MemoryConfig,
}

impl SemanticMemory {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn MemoryFactStore>,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptLibrary>,
        config: MemoryConfig,
    ) -> Self {
        Self { embedder, store, llm, prompts, config }
    }

    /// Facts from this conversation similar to the query. Failures read as
    /// "nothing remembered".
    pub async fn recall(
        &self,
        scope: &MemoryScope,
        embedding: &[f32],
        correlation_id: &str,
    ) -> Vec<RecalledFact> {
        if !self.config.enabled {
            return Vec::new();
        }
        match self
            .store
            .search_facts(scope, embedding, self.config.threshold, self.config.top_k)
            .await
        {
            Ok(facts) => {
                debug!(
                    event_name = "agent.memory.recalled",
                    correlation_id,
                    conversation_id = %scope.conversation_id.0,
                    facts = facts.len(),
                    "memory facts recalled"
                );
                facts
            }
            Err(error) => {
                warn!(
                    event_name = "agent.memory.recall_failed",
                    correlation_id,
                    error = %error,
                    "memory recall failed"
                );
                Vec::new()
            }
        }
    }

    /// Extracts facts from `turns` and stores each one as a new row.
    /// Returns how many were stored.
    pub async fn extract_and_store(
        &self,
        scope: &MemoryScope,
        turns: &[ConversationTurn],
        source_turn_id: Option<TurnId>,
        correlation_id: &str,
    ) -> Result<usize, MemoryError> {
        let prompt = self.prompts.extract_facts(turns)?;
        let request = CompletionRequest::new(prompt, EXTRACT_MAX_TOKENS, EXTRACT_TEMPERATURE);
        let text = self.llm.complete(&request).await?;

        let mut stored = 0;
        for fact in parse_facts(&text) {
            if fact.confidence < self.config.min_fact_confidence {
                debug!(
                    event_name = "agent.memory.fact_dropped",
                    correlation_id,
                    confidence = fact.confidence,
                    "fact below confidence floor"
                );
                continue;
            }
            let embedding = self.embedder.embed(&fact.text).await?;
            self.store
                .save_fact(MemoryFact {
                    id: FactId::generate(),
                    scope: scope.clone(),
                    text: fact.text,
                    category: fact.category,
                    confidence: fact.confidence,
                    embedding,
                    source_turn_id: source_turn_id.clone(),
                    created_at: Utc::now(),
                })
                .await?;
            stored += 1;
        }

        info!(
            event_name = "agent.memory.extracted",
            correlation_id,
            conversation_id = %scope.conversation_id.0,
            stored,
            "memory facts stored"
        );
        Ok(stored)
    }

    /// Runs extraction off the request path. `None` when extraction is
    /// disabled.
    pub fn spawn_extraction(
        self: &Arc<Self>,
        scope: MemoryScope,
        turns: Vec<ConversationTurn>,
        source_turn_id: Option<TurnId>,
        correlation_id: String,
    ) -> Option<JoinHandle<()>> {
        if !self.config.enabled || !self.config.extraction_enabled {
            return None;
        }
        let memory = Arc::clone(self);
        Some(tokio::spawn(async move {
            if let Err(error) = memory
                .extract_and_store(&scope, &turns, source_turn_id, &correlation_id)
                .await
            {
                warn!(
                    event_name = "agent.memory.extraction_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "memory extraction failed"
                );
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ragdesk_core::config::{AppConfig, MemoryConfig};
    use ragdesk_core::domain::conversation::{
        CompanyId, ConversationId, ConversationTurn, TurnMetadata,
    };
    use ragdesk_core::domain::memory::{FactCategory, MemoryScope};
    use ragdesk_db::repositories::InMemoryMemoryFactStore;

    use super::{parse_facts, SemanticMemory};
    use crate::embedder::{Embedder, HashingEmbedder};
    use crate::prompts::PromptLibrary;
    use crate::test_support::ScriptedLlm;

    fn scope(company: &str) -> MemoryScope {
        MemoryScope {
            company_id: CompanyId(company.to_string()),
            conversation_id: ConversationId("conv-1".to_string()),
        }
    }

    fn memory(llm: Arc<ScriptedLlm>, config: MemoryConfig) -> (Arc<SemanticMemory>, Arc<HashingEmbedder>) {
        let embedder = Arc::new(HashingEmbedder::new(256));
        let memory = SemanticMemory::new(
            embedder.clone(),
            Arc::new(InMemoryMemoryFactStore::default()),
            llm,
            Arc::new(PromptLibrary::new().expect("prompts")),
            config,
        );
        (Arc::new(memory), embedder)
    }

    #[test]
    fn fact_lines_are_parsed_and_noise_ignored() {
        let facts = parse_facts(
            "FACT: preference | 0.9 | Prefers email over phone\n\
             - FACT: follow-up | 0.6 | Expects a quote by Friday\n\
             NONE\n\
             FACT: problem | high | Invoice was wrong",
        );
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].category, FactCategory::Preference);
        assert_eq!(facts[0].text, "Prefers email over phone");
        assert_eq!(facts[1].category, FactCategory::Followup);
    }

    #[tokio::test]
    async fn extracted_facts_are_recalled_only_in_their_scope() {
        let llm = ScriptedLlm::new([
            "FACT: preference | 0.9 | prefers email contact\nFACT: context | 0.2 | might be moving offices",
        ]);
        let (memory, embedder) = memory(llm.clone(), AppConfig::default().memory);
        let conversation = ConversationId("conv-1".to_string());
        let turns = vec![
            ConversationTurn::user(conversation.clone(), "Please reach me by email"),
            ConversationTurn::assistant(conversation, "Noted!", None, TurnMetadata::default()),
        ];

        let stored =
            memory.extract_and_store(&scope("acme"), &turns, None, "test").await.expect("extract");
        assert_eq!(stored, 1);

        let query = embedder.embed("prefers email contact").await.expect("embed");
        let recalled = memory.recall(&scope("acme"), &query, "test").await;
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].text, "prefers email contact");

        assert!(memory.recall(&scope("globex"), &query, "test").await.is_empty());
    }

    #[tokio::test]
    async fn disabled_memory_neither_recalls_nor_spawns() {
        let config = MemoryConfig { enabled: false, ..AppConfig::default().memory };
        let (memory, embedder) = memory(ScriptedLlm::silent(), config);
        let query = embedder.embed("anything").await.expect("embed");

        assert!(memory.recall(&scope("acme"), &query, "test").await.is_empty());
        assert!(memory.spawn_extraction(scope("acme"), Vec::new(), None, "test".to_string()).is_none());
    }

    #[tokio::test]
    async fn spawned_extraction_completes_in_background() {
        let llm = ScriptedLlm::new(["FACT: request | 0.8 | wants a callback tomorrow"]);
        let (memory, embedder) = memory(llm, AppConfig::default().memory);

        let handle = memory
            .spawn_extraction(scope("acme"), Vec::new(), None, "test".to_string())
            .expect("extraction enabled");
        handle.await.expect("task joins");

        let query = embedder.embed("wants a callback tomorrow").await.expect("embed");
        assert_eq!(memory.recall(&scope("acme"), &query, "test").await.len(), 1);
    }
}
