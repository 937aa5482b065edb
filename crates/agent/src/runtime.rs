//! Request pipeline: preprocess, classify, route, answer, persist.
//!
//! `AgentRuntime::handle` never fails. Every collaborator failure is
//! absorbed at its component boundary and the caller always receives a
//! well-formed [`ChatResponse`].

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use ragdesk_core::config::{AppConfig, ValidationConfig};
use ragdesk_core::domain::conversation::{
    CompanyId, ConversationId, ConversationTurn, TurnMetadata, VisitorOrigin,
};
use ragdesk_core::domain::intent::{Classification, Intent};
use ragdesk_core::domain::memory::MemoryScope;
use ragdesk_core::domain::query::{ProcessedQuery, Query};
use ragdesk_core::domain::response::ChatResponse;
use ragdesk_core::domain::validation::ValidationSummary;
use ragdesk_core::flows::{FlowContext, FlowEngine, FlowEvent, PlannedAnswerFlow};
use ragdesk_core::preprocess::{PreprocessError, QueryPreprocessor};
use ragdesk_core::quality::evaluate_query_quality;
use ragdesk_core::replies::NO_CONTEXT_RESPONSE;
use ragdesk_core::retrieval::RetrievalPolicy;
use ragdesk_core::routing::{route, Route};
use ragdesk_db::repositories::{ConversationStore, MemoryFactStore, VectorStore};

use crate::classifier::IntentClassifier;
use crate::embedder::Embedder;
use crate::executor::{ContactPatterns, PlanExecutor, PlanOutcome};
use crate::llm::LlmClient;
use crate::memory::SemanticMemory;
use crate::planner::Planner;
use crate::prompts::{PromptError, PromptLibrary};
use crate::rag::{RagPipeline, RagRequest, RagResponder};
use crate::responder::ConversationalResponder;
use crate::retriever::Retriever;
use crate::tools::ToolRegistry;
use crate::validator::ResponseValidator;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("contact patterns failed to compile: {0}")]
    Patterns(#[from] regex::Error),
}

/// Collaborators the runtime is wired with.
pub struct AgentDeps {
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn Embedder>,
    pub vector_store: Arc<dyn VectorStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub facts: Arc<dyn MemoryFactStore>,
    pub tools: ToolRegistry,
}

pub struct AgentRuntime {
    preprocessor: QueryPreprocessor,
    classifier: IntentClassifier,
    responder: ConversationalResponder,
    retriever: Arc<Retriever>,
    rag: RagPipeline,
    planner: Planner,
    executor: PlanExecutor,
    validator: Arc<ResponseValidator>,
    planned_flow: FlowEngine<PlannedAnswerFlow>,
    memory: Arc<SemanticMemory>,
    conversations: Arc<dyn ConversationStore>,
    validation: ValidationConfig,
    history_limit: usize,
}

impl AgentRuntime {
    pub fn new(config: &AppConfig, deps: AgentDeps) -> Result<Self, RuntimeError> {
        let prompts = Arc::new(PromptLibrary::new()?);
        Self::assemble(config, deps, prompts, ConversationalResponder::new)
    }

    /// Same wiring with a seeded template generator.
    pub fn with_seed(config: &AppConfig, deps: AgentDeps, seed: u64) -> Result<Self, RuntimeError> {
        let prompts = Arc::new(PromptLibrary::new()?);
        Self::assemble(config, deps, prompts, |llm, prompts| {
            ConversationalResponder::with_seed(llm, prompts, seed)
        })
    }

    fn assemble(
        config: &AppConfig,
        deps: AgentDeps,
        prompts: Arc<PromptLibrary>,
        responder: impl FnOnce(Arc<dyn LlmClient>, Arc<PromptLibrary>) -> ConversationalResponder,
    ) -> Result<Self, RuntimeError> {
        let AgentDeps { llm, embedder, vector_store, conversations, facts, tools } = deps;

        let retriever = Arc::new(Retriever::new(
            embedder.clone(),
            vector_store,
            RetrievalPolicy::new(config.retrieval.clone()),
        ));
        let validator = Arc::new(ResponseValidator::new(
            llm.clone(),
            prompts.clone(),
            config.validation.min_confidence,
        ));
        let rag = RagPipeline::new(
            retriever.clone(),
            RagResponder::new(
                llm.clone(),
                prompts.clone(),
                config.llm.max_tokens,
                config.llm.temperature,
            ),
            validator.clone(),
            config.validation.clone(),
        );
        let executor = PlanExecutor::new(
            retriever.clone(),
            Arc::new(tools),
            llm.clone(),
            prompts.clone(),
            ContactPatterns::new()?,
            config.retrieval.top_k,
        );
        let memory = Arc::new(SemanticMemory::new(
            embedder,
            facts,
            llm.clone(),
            prompts.clone(),
            config.memory.clone(),
        ));

        Ok(Self {
            preprocessor: QueryPreprocessor::new(&config.knowledge_base.brand_aliases)?,
            classifier: IntentClassifier::new(llm.clone(), prompts.clone()),
            responder: responder(llm.clone(), prompts.clone()),
            retriever,
            rag,
            planner: Planner::new(llm, prompts),
            executor,
            validator,
            planned_flow: FlowEngine::new(PlannedAnswerFlow),
            memory,
            conversations,
            validation: config.validation.clone(),
            history_limit: config.conversation.history_limit,
        })
    }

    pub async fn handle(&self, company_id: &CompanyId, query: Query) -> ChatResponse {
        let correlation_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let quality = evaluate_query_quality(&query.raw);
        info!(
            event_name = "agent.request.received",
            correlation_id = %correlation_id,
            company_id = %company_id.0,
            quality_score = quality.score,
            is_clear = quality.is_clear,
            word_count = quality.word_count,
            "chat request received"
        );

        let processed = self.preprocessor.preprocess(&query.raw);
        let session_id = query
            .session_id
            .clone()
            .filter(|session| !session.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (conversation_id, persistent) =
            self.conversation(company_id, &session_id, &correlation_id).await;
        let scope =
            MemoryScope { company_id: company_id.clone(), conversation_id: conversation_id.clone() };
        let history = if persistent {
            if let Some(origin) = &query.origin {
                self.record_origin(&scope, origin, &correlation_id).await;
            }
            self.history(company_id, &conversation_id, &correlation_id).await
        } else {
            Vec::new()
        };

        let classification = self.classifier.classify(&processed, &correlation_id).await;
        let path = route(classification.intent, &processed.text);
        info!(
            event_name = "agent.request.routed",
            correlation_id = %correlation_id,
            intent = classification.intent.as_str(),
            confidence = classification.confidence,
            tier = ?classification.tier,
            route = path.as_str(),
            "query routed"
        );

        let mut response = match path {
            Route::FastPath => {
                self.responder
                    .respond(classification.intent, &processed.text, &history, &correlation_id)
                    .await
            }
            Route::PlanningPath => {
                self.planned_answer(&scope, &processed, &classification, &history, &correlation_id)
                    .await
            }
            Route::RagPath => {
                self.rag_answer(&scope, &processed, &classification, &history, &correlation_id)
                    .await
            }
        };
        response.session_id = Some(session_id);

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if persistent {
            self.persist(&scope, &query, &classification, &mut response, elapsed_ms, &correlation_id)
                .await;
        }

        info!(
            event_name = "agent.request.completed",
            correlation_id = %correlation_id,
            company_id = %company_id.0,
            route = path.as_str(),
            context_found = response.context_found,
            planned = response.planned,
            sources = response.sources.len(),
            elapsed_ms,
            "chat request completed"
        );
        response
    }

    async fn conversation(
        &self,
        company_id: &CompanyId,
        session_id: &str,
        correlation_id: &str,
    ) -> (ConversationId, bool) {
        match self.conversations.resolve(company_id, session_id).await {
            Ok(conversation_id) => (conversation_id, true),
            Err(error) => {
                warn!(
                    event_name = "agent.store.resolve_failed",
                    correlation_id,
                    error = %error,
                    "conversation could not be resolved, answering without history"
                );
                (ConversationId::generate(), false)
            }
        }
    }

    async fn history(
        &self,
        company_id: &CompanyId,
        conversation_id: &ConversationId,
        correlation_id: &str,
    ) -> Vec<ConversationTurn> {
        match self.conversations.get_history(company_id, conversation_id, self.history_limit).await
        {
            Ok(history) => history,
            Err(error) => {
                warn!(
                    event_name = "agent.store.history_failed",
                    correlation_id,
                    error = %error,
                    "conversation history could not be loaded"
                );
                Vec::new()
            }
        }
    }

    async fn record_origin(
        &self,
        scope: &MemoryScope,
        origin: &VisitorOrigin,
        correlation_id: &str,
    ) {
        if let Err(error) = self
            .conversations
            .record_origin(&scope.company_id, &scope.conversation_id, origin)
            .await
        {
            warn!(
                event_name = "agent.store.origin_failed",
                correlation_id,
                country_code = %origin.country_code,
                error = %error,
                "visitor origin could not be recorded"
            );
        }
    }

    /// The query is embedded once and the vector serves both memory recall
    /// and knowledge retrieval.
    async fn rag_answer(
        &self,
        scope: &MemoryScope,
        processed: &ProcessedQuery,
        classification: &Classification,
        history: &[ConversationTurn],
        correlation_id: &str,
    ) -> ChatResponse {
        let embedding = match self.retriever.embed(&processed.text).await {
            Ok(embedding) => embedding,
            Err(error) => {
                warn!(
                    event_name = "agent.memory.embed_failed",
                    correlation_id,
                    error = %error,
                    "query could not be embedded, answering without memory or context"
                );
                return ChatResponse::degraded(Some(classification.intent), NO_CONTEXT_RESPONSE);
            }
        };
        let facts = self.memory.recall(scope, &embedding, correlation_id).await;
        self.rag
            .answer(RagRequest {
                company_id: &scope.company_id,
                query: &processed.text,
                intent: Some(classification.intent),
                history,
                facts: &facts,
                embedding: Some(&embedding),
                correlation_id,
            })
            .await
    }

    async fn planned_answer(
        &self,
        scope: &MemoryScope,
        processed: &ProcessedQuery,
        classification: &Classification,
        history: &[ConversationTurn],
        correlation_id: &str,
    ) -> ChatResponse {
        let plan = match self.planner.create_plan(&processed.text, correlation_id).await {
            Ok(plan) => plan,
            Err(error) => {
                warn!(
                    event_name = "agent.plan.fallback_to_rag",
                    correlation_id,
                    error_kind = error.kind(),
                    error = %error,
                    "plan creation failed, answering through retrieval"
                );
                return self
                    .rag_answer(scope, processed, classification, history, correlation_id)
                    .await;
            }
        };

        let outcome =
            self.executor.execute(&plan, &scope.company_id, &processed.text, correlation_id).await;
        let validation = self.validate_planned(&processed.text, &outcome, correlation_id).await;

        ChatResponse {
            response: outcome.response,
            context_found: !outcome.sources.is_empty(),
            sources: outcome.sources,
            intent: Some(classification.intent),
            conversational: false,
            planned: true,
            plan: Some(plan),
            validation,
            session_id: None,
            turn_id: None,
        }
    }

    /// Planned replies get one validation pass and are never regenerated.
    async fn validate_planned(
        &self,
        query: &str,
        outcome: &PlanOutcome,
        correlation_id: &str,
    ) -> Option<ValidationSummary> {
        let context = FlowContext::new(0);
        let drafted = self.planned_flow.initial_state();
        if !self.validation.enabled {
            if let Err(error) = self.planned_flow.apply_logged(
                &drafted,
                &FlowEvent::ValidationSkipped,
                &context,
                correlation_id,
            ) {
                warn!(
                    event_name = "agent.plan.flow_error",
                    correlation_id,
                    error = %error,
                    "validation skip was rejected"
                );
            }
            return None;
        }

        let validating = match self.planned_flow.apply_logged(
            &drafted,
            &FlowEvent::DraftSubmitted,
            &context,
            correlation_id,
        ) {
            Ok(outcome) => outcome.to,
            Err(error) => {
                warn!(
                    event_name = "agent.plan.flow_error",
                    correlation_id,
                    error = %error,
                    "planned draft could not enter validation"
                );
                return None;
            }
        };
        let sources = outcome
            .results
            .iter()
            .filter(|result| result.success)
            .map(|result| format!("{}: {}", result.action_type.as_str(), result.payload))
            .collect::<Vec<_>>();
        let verdict =
            self.validator.validate(query, &outcome.response, &sources, correlation_id).await;
        let event = if verdict.is_valid {
            FlowEvent::VerdictAccepted
        } else {
            FlowEvent::VerdictRejected { retry_recommended: verdict.retry_recommended }
        };
        if let Err(error) =
            self.planned_flow.apply_logged(&validating, &event, &context, correlation_id)
        {
            warn!(
                event_name = "agent.plan.flow_error",
                correlation_id,
                error = %error,
                "validation verdict was rejected"
            );
            return None;
        }

        Some(ValidationSummary::from_verdict(&verdict, 0))
    }

    async fn persist(
        &self,
        scope: &MemoryScope,
        query: &Query,
        classification: &Classification,
        response: &mut ChatResponse,
        elapsed_ms: u64,
        correlation_id: &str,
    ) {
        let user_turn = ConversationTurn::user(scope.conversation_id.clone(), query.raw.clone());
        let context_used = if response.sources.is_empty() {
            None
        } else {
            serde_json::to_value(&response.sources).ok()
        };
        let assistant_turn = ConversationTurn::assistant(
            scope.conversation_id.clone(),
            response.response.clone(),
            context_used,
            TurnMetadata {
                intent: Some(classification.intent),
                confidence: Some(classification.confidence),
                response_time_ms: Some(elapsed_ms),
            },
        );
        let assistant_id = assistant_turn.id.clone();
        let turns = vec![user_turn.clone(), assistant_turn.clone()];

        match self.conversations.save_exchange(&scope.company_id, user_turn, assistant_turn).await {
            Ok(()) => response.turn_id = Some(assistant_id.0.clone()),
            Err(error) => {
                warn!(
                    event_name = "agent.store.save_failed",
                    correlation_id,
                    error = %error,
                    "exchange could not be stored"
                );
                return;
            }
        }

        if !response.conversational && classification.intent != Intent::Unclear {
            self.memory.spawn_extraction(
                scope.clone(),
                turns,
                Some(assistant_id),
                correlation_id.to_string(),
            );
        }
    }
}
