//! Retrieval-augmented answering with a bounded validate-and-retry loop.
//!
//! The loop is driven by [`FlowEngine<RagAnswerFlow>`]: every step is a
//! transition, so a misbehaving validator can never push the request past
//! `1 + max_retries` generations.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use ragdesk_core::config::ValidationConfig;
use ragdesk_core::domain::conversation::{CompanyId, ConversationTurn};
use ragdesk_core::domain::intent::Intent;
use ragdesk_core::domain::knowledge::{RetrievedChunk, SourceRef};
use ragdesk_core::domain::memory::RecalledFact;
use ragdesk_core::domain::response::ChatResponse;
use ragdesk_core::domain::validation::{AdjustmentDirective, ValidationSummary, ValidationVerdict};
use ragdesk_core::errors::ProviderError;
use ragdesk_core::flows::{FlowContext, FlowEngine, FlowEvent, FlowState, RagAnswerFlow};
use ragdesk_core::replies::{GENERATION_FAILED_RESPONSE, NO_CONTEXT_RESPONSE};
use ragdesk_core::retrieval::RetrievalPlan;

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::{PromptError, PromptLibrary};
use crate::retriever::Retriever;
use crate::validator::ResponseValidator;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Draft {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

pub struct RagResponder {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    max_tokens: u32,
    temperature: f32,
}

impl RagResponder {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptLibrary>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self { llm, prompts, max_tokens, temperature }
    }

    /// One completion over the numbered sources, recent history and recalled
    /// facts. Callers never pass an empty chunk list.
    pub async fn generate(
        &self,
        query: &str,
        history: &[ConversationTurn],
        chunks: &[RetrievedChunk],
        facts: &[RecalledFact],
    ) -> Result<Draft, GenerationError> {
        let prompt = self.prompts.rag_answer(query, chunks, history, facts)?;
        let request = CompletionRequest::new(prompt, self.max_tokens, self.temperature);
        let text = self.llm.complete(&request).await?;
        Ok(Draft {
            text: text.trim().to_string(),
            sources: chunks.iter().map(SourceRef::from_chunk).collect(),
        })
    }
}

/// Inputs of one RAG answer.
#[derive(Clone, Copy, Debug)]
pub struct RagRequest<'a> {
    pub company_id: &'a CompanyId,
    pub query: &'a str,
    pub intent: Option<Intent>,
    pub history: &'a [ConversationTurn],
    pub facts: &'a [RecalledFact],
    /// Query embedding computed upstream; the pipeline embeds when absent.
    pub embedding: Option<&'a [f32]>,
    pub correlation_id: &'a str,
}

pub struct RagPipeline {
    retriever: Arc<Retriever>,
    responder: RagResponder,
    validator: Arc<ResponseValidator>,
    validation: ValidationConfig,
    engine: FlowEngine<RagAnswerFlow>,
}

impl RagPipeline {
    pub fn new(
        retriever: Arc<Retriever>,
        responder: RagResponder,
        validator: Arc<ResponseValidator>,
        validation: ValidationConfig,
    ) -> Self {
        Self { retriever, responder, validator, validation, engine: FlowEngine::default() }
    }

    pub async fn answer(&self, request: RagRequest<'_>) -> ChatResponse {
        let correlation_id = request.correlation_id;
        let embedded;
        let embedding = match request.embedding {
            Some(embedding) => embedding,
            None => match self.retriever.embed(request.query).await {
                Ok(embedding) => {
                    embedded = embedding;
                    embedded.as_slice()
                }
                Err(error) => {
                    warn!(
                        event_name = "agent.rag.embedding_failed",
                        correlation_id,
                        error = %error,
                        "query could not be embedded, answering without context"
                    );
                    return ChatResponse::degraded(request.intent, NO_CONTEXT_RESPONSE);
                }
            },
        };

        let mut plan = self.retriever.plan(request.query);
        let mut chunks = self.search(&request, embedding, &plan).await;
        if chunks.is_empty() {
            info!(
                event_name = "agent.rag.no_context",
                correlation_id,
                threshold = plan.threshold,
                "no chunk cleared the similarity threshold"
            );
            return ChatResponse::degraded(request.intent, NO_CONTEXT_RESPONSE);
        }

        let mut draft = match self
            .responder
            .generate(request.query, request.history, &chunks, request.facts)
            .await
        {
            Ok(draft) => draft,
            Err(error) => return generation_failed(&request, &error),
        };
        log_attempt(correlation_id, 0, &draft);

        if !self.validation.enabled {
            let context = FlowContext::new(0);
            let state = self.engine.initial_state();
            if let Err(error) = self.engine.apply_logged(
                &state,
                &FlowEvent::ValidationSkipped,
                &context,
                correlation_id,
            ) {
                warn!(
                    event_name = "agent.rag.flow_error",
                    correlation_id,
                    error = %error,
                    "validation skip was rejected"
                );
            }
            return grounded(&request, draft, None);
        }

        let mut context = FlowContext::new(self.validation.max_retries);
        let limit = self.engine.transition_limit(&context);
        let mut state = self.engine.initial_state();
        let mut verdict: Option<ValidationVerdict> = None;
        let mut transitions = 0u32;

        while !state.is_terminal() {
            if transitions >= limit {
                warn!(
                    event_name = "agent.rag.transition_limit",
                    correlation_id,
                    limit,
                    "answer flow hit its transition limit"
                );
                break;
            }
            transitions += 1;

            let event = match state {
                FlowState::Drafted => FlowEvent::DraftSubmitted,
                FlowState::Validating => {
                    let sources =
                        chunks.iter().map(|chunk| chunk.content.clone()).collect::<Vec<_>>();
                    let current = self
                        .validator
                        .validate(request.query, &draft.text, &sources, correlation_id)
                        .await;
                    let event = if current.is_valid {
                        FlowEvent::VerdictAccepted
                    } else {
                        FlowEvent::VerdictRejected { retry_recommended: current.retry_recommended }
                    };
                    verdict = Some(current);
                    event
                }
                FlowState::Retrying => FlowEvent::Regenerated,
                FlowState::Accepted | FlowState::Exhausted => break,
            };

            let outcome = match self.engine.apply_logged(&state, &event, &context, correlation_id)
            {
                Ok(outcome) => outcome,
                Err(_) => break,
            };

            if event == FlowEvent::Regenerated {
                let directive = verdict
                    .as_ref()
                    .map(|verdict| verdict.suggested_adjustment)
                    .unwrap_or(AdjustmentDirective::None);
                plan = self.retriever.adjust(&plan, directive);
                let refreshed = self.search(&request, embedding, &plan).await;
                if !refreshed.is_empty() {
                    chunks = refreshed;
                }

                // Retries regenerate without history so a stale exchange
                // cannot steer the new draft.
                match self.responder.generate(request.query, &[], &chunks, request.facts).await {
                    Ok(next) => draft = next,
                    Err(error) => {
                        warn!(
                            event_name = "agent.rag.retry_generation_failed",
                            correlation_id,
                            error = %error,
                            "regeneration failed, keeping previous draft"
                        );
                        break;
                    }
                }
                context.retries_used += 1;
                log_attempt(correlation_id, context.retries_used, &draft);
            }
            state = outcome.to;
        }

        let summary = verdict
            .as_ref()
            .map(|verdict| ValidationSummary::from_verdict(verdict, context.retries_used));
        info!(
            event_name = "agent.rag.flow_finished",
            correlation_id,
            final_state = ?state,
            retries_used = context.retries_used,
            is_valid = summary.as_ref().map(|summary| summary.is_valid),
            "answer flow finished"
        );
        grounded(&request, draft, summary)
    }

    async fn search(
        &self,
        request: &RagRequest<'_>,
        embedding: &[f32],
        plan: &RetrievalPlan,
    ) -> Vec<RetrievedChunk> {
        match self
            .retriever
            .search(request.company_id, embedding, plan, request.correlation_id)
            .await
        {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(
                    event_name = "agent.rag.retrieval_failed",
                    correlation_id = request.correlation_id,
                    error = %error,
                    "knowledge search failed, treating as no context"
                );
                Vec::new()
            }
        }
    }
}

fn grounded(
    request: &RagRequest<'_>,
    draft: Draft,
    validation: Option<ValidationSummary>,
) -> ChatResponse {
    ChatResponse {
        response: draft.text,
        sources: draft.sources,
        context_found: true,
        intent: request.intent,
        conversational: false,
        planned: false,
        plan: None,
        validation,
        session_id: None,
        turn_id: None,
    }
}

fn generation_failed(request: &RagRequest<'_>, error: &GenerationError) -> ChatResponse {
    warn!(
        event_name = "agent.rag.generation_failed",
        correlation_id = request.correlation_id,
        error = %error,
        "answer generation failed"
    );
    ChatResponse::degraded(request.intent, GENERATION_FAILED_RESPONSE)
}

fn log_attempt(correlation_id: &str, attempt: u32, draft: &Draft) {
    info!(
        event_name = "agent.rag.draft_generated",
        correlation_id,
        attempt,
        sources = draft.sources.len(),
        "answer draft generated"
    );
}
