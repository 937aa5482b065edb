use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use ragdesk_core::domain::conversation::{
    CompanyId, ConversationId, ConversationTurn, Feedback, RatedExchange, Role, VisitorOrigin,
};
use ragdesk_core::domain::knowledge::{KnowledgeChunk, RetrievedChunk};
use ragdesk_core::domain::memory::{MemoryFact, MemoryScope, RecalledFact};
use ragdesk_core::learning::LearningReport;

use super::{
    ConversationStore, FeedbackStore, MemoryFactStore, RepositoryError, VectorStore,
};
use crate::vectors::rank;

#[derive(Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<HashMap<String, KnowledgeChunk>>,
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        company_id: &CompanyId,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, RepositoryError> {
        let chunks = self.chunks.read().await;
        let candidates = chunks
            .values()
            .filter(|chunk| &chunk.company_id == company_id)
            .map(|chunk| (chunk, chunk.embedding.clone()));

        Ok(rank(embedding, candidates, threshold, limit)
            .into_iter()
            .map(|(chunk, similarity)| RetrievedChunk {
                id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                content: chunk.content.clone(),
                similarity,
            })
            .collect())
    }

    async fn upsert(&self, chunk: KnowledgeChunk) -> Result<(), RepositoryError> {
        let mut chunks = self.chunks.write().await;
        if let Some(existing) = chunks.get(&chunk.id.0) {
            if existing.company_id != chunk.company_id {
                return Err(RepositoryError::NotFound(format!(
                    "chunk {} belongs to another company",
                    chunk.id.0
                )));
            }
        }
        chunks.insert(chunk.id.0.clone(), chunk);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMemoryFactStore {
    facts: RwLock<Vec<MemoryFact>>,
}

#[async_trait]
impl MemoryFactStore for InMemoryMemoryFactStore {
    async fn save_fact(&self, fact: MemoryFact) -> Result<(), RepositoryError> {
        self.facts.write().await.push(fact);
        Ok(())
    }

    async fn search_facts(
        &self,
        scope: &MemoryScope,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RecalledFact>, RepositoryError> {
        let facts = self.facts.read().await;
        let candidates = facts
            .iter()
            .filter(|fact| &fact.scope == scope)
            .map(|fact| (fact, fact.embedding.clone()));

        Ok(rank(embedding, candidates, threshold, limit)
            .into_iter()
            .map(|(fact, similarity)| RecalledFact {
                text: fact.text.clone(),
                category: fact.category,
                similarity,
            })
            .collect())
    }
}

#[derive(Default)]
struct ConversationState {
    sessions: HashMap<(CompanyId, String), ConversationId>,
    owners: HashMap<ConversationId, CompanyId>,
    turns: HashMap<ConversationId, Vec<ConversationTurn>>,
    origins: HashMap<ConversationId, VisitorOrigin>,
    feedback: Vec<Feedback>,
    reports: Vec<LearningReport>,
}

impl ConversationState {
    fn owned_by(&self, company_id: &CompanyId, conversation_id: &ConversationId) -> bool {
        self.owners.get(conversation_id) == Some(company_id)
    }

    fn require_owner(
        &self,
        company_id: &CompanyId,
        conversation_id: &ConversationId,
    ) -> Result<(), RepositoryError> {
        if self.owned_by(company_id, conversation_id) {
            Ok(())
        } else {
            Err(RepositoryError::NotFound(format!(
                "conversation {} for company {}",
                conversation_id.0, company_id.0
            )))
        }
    }

    /// Finds an assistant turn within `company_id` and the user turn before it.
    fn exchange_for(
        &self,
        company_id: &CompanyId,
        turn_id: &str,
    ) -> Option<(Option<&ConversationTurn>, &ConversationTurn)> {
        self.turns.iter().filter(|(id, _)| self.owned_by(company_id, id)).find_map(|(_, turns)| {
            let position = turns.iter().position(|turn| turn.id.0 == turn_id)?;
            let reply = &turns[position];
            if reply.role != Role::Assistant {
                return None;
            }
            let query = turns[..position].iter().rev().find(|turn| turn.role == Role::User);
            Some((query, reply))
        })
    }
}

/// Conversations, turns, feedback and learning reports behind one lock, so
/// feedback can be checked against the turn it rates.
#[derive(Default)]
pub struct InMemoryConversationStore {
    state: RwLock<ConversationState>,
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn find_by_session(
        &self,
        company_id: &CompanyId,
        session_id: &str,
    ) -> Result<Option<ConversationId>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.sessions.get(&(company_id.clone(), session_id.to_string())).cloned())
    }

    async fn resolve(
        &self,
        company_id: &CompanyId,
        session_id: &str,
    ) -> Result<ConversationId, RepositoryError> {
        let mut state = self.state.write().await;
        let key = (company_id.clone(), session_id.to_string());
        if let Some(existing) = state.sessions.get(&key) {
            return Ok(existing.clone());
        }

        let conversation_id = ConversationId::generate();
        state.sessions.insert(key, conversation_id.clone());
        state.owners.insert(conversation_id.clone(), company_id.clone());
        Ok(conversation_id)
    }

    async fn get_history(
        &self,
        company_id: &CompanyId,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, RepositoryError> {
        let state = self.state.read().await;
        if !state.owned_by(company_id, conversation_id) {
            return Ok(Vec::new());
        }
        let turns = state.turns.get(conversation_id).map(Vec::as_slice).unwrap_or_default();
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }

    async fn record_origin(
        &self,
        company_id: &CompanyId,
        conversation_id: &ConversationId,
        origin: &VisitorOrigin,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.require_owner(company_id, conversation_id)?;
        state.origins.entry(conversation_id.clone()).or_insert_with(|| origin.clone());
        Ok(())
    }

    async fn save_exchange(
        &self,
        company_id: &CompanyId,
        user_turn: ConversationTurn,
        assistant_turn: ConversationTurn,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.require_owner(company_id, &user_turn.conversation_id)?;
        state.require_owner(company_id, &assistant_turn.conversation_id)?;
        state.turns.entry(user_turn.conversation_id.clone()).or_default().push(user_turn);
        state.turns.entry(assistant_turn.conversation_id.clone()).or_default().push(assistant_turn);
        Ok(())
    }
}

impl InMemoryConversationStore {
    pub async fn origin_of(&self, conversation_id: &ConversationId) -> Option<VisitorOrigin> {
        self.state.read().await.origins.get(conversation_id).cloned()
    }
}

#[async_trait]
impl FeedbackStore for InMemoryConversationStore {
    async fn record_feedback(&self, feedback: Feedback) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.exchange_for(&feedback.company_id, &feedback.turn_id.0).is_none() {
            return Err(RepositoryError::NotFound(format!(
                "assistant turn {} for company {}",
                feedback.turn_id.0, feedback.company_id.0
            )));
        }
        state.feedback.push(feedback);
        Ok(())
    }

    async fn low_rated_exchanges(
        &self,
        company_id: &CompanyId,
        since: DateTime<Utc>,
    ) -> Result<Vec<RatedExchange>, RepositoryError> {
        let state = self.state.read().await;
        let mut rated = state
            .feedback
            .iter()
            .filter(|item| {
                &item.company_id == company_id && item.rating == 0 && item.created_at >= since
            })
            .collect::<Vec<_>>();
        rated.sort_by_key(|item| item.created_at);

        Ok(rated
            .into_iter()
            .filter_map(|item| {
                let (query, reply) = state.exchange_for(company_id, &item.turn_id.0)?;
                Some(RatedExchange {
                    query: query?.content.clone(),
                    response: reply.content.clone(),
                    context_used: reply.context_used.clone(),
                    comment: item.comment.clone(),
                })
            })
            .collect())
    }

    async fn companies_with_feedback(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<CompanyId>, RepositoryError> {
        let state = self.state.read().await;
        let mut companies = state
            .feedback
            .iter()
            .filter(|item| item.created_at >= since)
            .map(|item| item.company_id.clone())
            .collect::<Vec<_>>();
        companies.sort();
        companies.dedup();
        Ok(companies)
    }

    async fn save_report(&self, report: LearningReport) -> Result<(), RepositoryError> {
        self.state.write().await.reports.push(report);
        Ok(())
    }

    async fn latest_report(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<LearningReport>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .reports
            .iter()
            .filter(|report| &report.company_id == company_id)
            .max_by_key(|report| report.created_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use ragdesk_core::domain::conversation::{
        CompanyId, ConversationTurn, Feedback, FeedbackId, TurnMetadata, VisitorOrigin,
    };
    use ragdesk_core::domain::knowledge::{ChunkId, DocumentId, KnowledgeChunk};
    use ragdesk_core::domain::memory::{FactCategory, FactId, MemoryFact, MemoryScope};

    use super::{InMemoryConversationStore, InMemoryMemoryFactStore, InMemoryVectorStore};
    use crate::repositories::{
        ConversationStore, FeedbackStore, MemoryFactStore, RepositoryError, VectorStore,
    };

    fn company(id: &str) -> CompanyId {
        CompanyId(id.to_string())
    }

    fn chunk(id: &str, company_id: &str, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: ChunkId(id.to_string()),
            company_id: company(company_id),
            document_id: DocumentId("doc".to_string()),
            content: format!("content of {id}"),
            embedding,
        }
    }

    #[tokio::test]
    async fn vector_search_never_crosses_companies() {
        let store = InMemoryVectorStore::default();
        store.upsert(chunk("a-1", "acme", vec![1.0, 0.0])).await.expect("upsert");
        store.upsert(chunk("b-1", "globex", vec![1.0, 0.0])).await.expect("upsert");

        let hits = store.search(&company("acme"), &[1.0, 0.0], 0.0, 10).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.0, "a-1");

        let none = store.search(&company("initech"), &[1.0, 0.0], 0.0, 10).await.expect("search");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn upsert_cannot_move_a_chunk_between_companies() {
        let store = InMemoryVectorStore::default();
        store.upsert(chunk("shared", "acme", vec![1.0])).await.expect("upsert");
        let moved = store.upsert(chunk("shared", "globex", vec![1.0])).await;
        assert!(matches!(moved, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn history_is_chronological_limited_and_scoped() {
        let store = InMemoryConversationStore::default();
        let acme = company("acme");
        let conversation = store.resolve(&acme, "session-1").await.expect("resolve");
        assert_eq!(store.resolve(&acme, "session-1").await.expect("resolve"), conversation);

        for index in 0..4 {
            store
                .save_exchange(
                    &acme,
                    ConversationTurn::user(conversation.clone(), format!("question {index}")),
                    ConversationTurn::assistant(
                        conversation.clone(),
                        format!("answer {index}"),
                        None,
                        TurnMetadata::default(),
                    ),
                )
                .await
                .expect("save exchange");
        }

        let history = store.get_history(&acme, &conversation, 3).await.expect("history");
        let contents = history.iter().map(|turn| turn.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["answer 2", "question 3", "answer 3"]);

        let foreign =
            store.get_history(&company("globex"), &conversation, 10).await.expect("history");
        assert!(foreign.is_empty());

        let other_session = store.resolve(&company("globex"), "session-1").await.expect("resolve");
        assert_ne!(other_session, conversation);
    }

    #[tokio::test]
    async fn first_recorded_origin_sticks_and_is_company_scoped() {
        let store = InMemoryConversationStore::default();
        let acme = company("acme");
        let conversation = store.resolve(&acme, "s").await.expect("resolve");
        let germany = VisitorOrigin::parse("DE", Some("Germany")).expect("origin");
        let france = VisitorOrigin::parse("FR", None).expect("origin");

        store.record_origin(&acme, &conversation, &germany).await.expect("record");
        store.record_origin(&acme, &conversation, &france).await.expect("record");
        assert_eq!(store.origin_of(&conversation).await, Some(germany));

        let foreign = store.record_origin(&company("globex"), &conversation, &france).await;
        assert!(matches!(foreign, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn exchange_for_foreign_conversation_is_rejected_whole() {
        let store = InMemoryConversationStore::default();
        let conversation = store.resolve(&company("acme"), "s").await.expect("resolve");
        let result = store
            .save_exchange(
                &company("globex"),
                ConversationTurn::user(conversation.clone(), "hi"),
                ConversationTurn::assistant(
                    conversation.clone(),
                    "hello",
                    None,
                    TurnMetadata::default(),
                ),
            )
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
        let history = store.get_history(&company("acme"), &conversation, 10).await.expect("history");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn low_rated_exchanges_pair_reply_with_preceding_question() {
        let store = InMemoryConversationStore::default();
        let acme = company("acme");
        let conversation = store.resolve(&acme, "s").await.expect("resolve");
        let reply = ConversationTurn::assistant(
            conversation.clone(),
            "We are open 9-5.",
            Some(serde_json::json!({ "sources": [] })),
            TurnMetadata::default(),
        );
        let reply_id = reply.id.clone();
        store
            .save_exchange(&acme, ConversationTurn::user(conversation.clone(), "opening hours?"), reply)
            .await
            .expect("save");

        let feedback = |company_id: CompanyId, rating: u8| Feedback {
            id: FeedbackId::generate(),
            company_id,
            turn_id: reply_id.clone(),
            rating,
            comment: Some("wrong hours".to_string()),
            created_at: Utc::now(),
        };

        let foreign = store.record_feedback(feedback(company("globex"), 0)).await;
        assert!(matches!(foreign, Err(RepositoryError::NotFound(_))));

        store.record_feedback(feedback(acme.clone(), 0)).await.expect("record");
        store.record_feedback(feedback(acme.clone(), 1)).await.expect("record");

        let since = Utc::now() - Duration::days(7);
        let exchanges = store.low_rated_exchanges(&acme, since).await.expect("exchanges");
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].query, "opening hours?");
        assert_eq!(exchanges[0].response, "We are open 9-5.");
        assert_eq!(exchanges[0].comment.as_deref(), Some("wrong hours"));

        assert_eq!(store.companies_with_feedback(since).await.expect("companies"), vec![acme]);
    }

    #[tokio::test]
    async fn fact_search_is_scoped_to_company_and_conversation() {
        let store = InMemoryMemoryFactStore::default();
        let conversation = InMemoryConversationStore::default()
            .resolve(&company("acme"), "s")
            .await
            .expect("resolve");
        let scope = MemoryScope { company_id: company("acme"), conversation_id: conversation };
        let other_scope = MemoryScope { company_id: company("globex"), ..scope.clone() };

        for (fact_scope, text) in [(&scope, "prefers email"), (&other_scope, "foreign fact")] {
            store
                .save_fact(MemoryFact {
                    id: FactId::generate(),
                    scope: fact_scope.clone(),
                    text: text.to_string(),
                    category: FactCategory::Preference,
                    confidence: 0.9,
                    embedding: vec![0.0, 1.0],
                    source_turn_id: None,
                    created_at: Utc::now(),
                })
                .await
                .expect("save fact");
        }

        let recalled = store.search_facts(&scope, &[0.0, 1.0], 0.5, 3).await.expect("search");
        assert_eq!(recalled.len(), 1);
        assert_eq!(recalled[0].text, "prefers email");
    }
}
