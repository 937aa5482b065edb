use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use ragdesk_core::domain::conversation::CompanyId;
use ragdesk_core::domain::knowledge::RetrievedChunk;
use ragdesk_core::domain::validation::AdjustmentDirective;
use ragdesk_core::errors::EmbeddingError;
use ragdesk_core::retrieval::{RetrievalPlan, RetrievalPolicy};
use ragdesk_db::repositories::{RepositoryError, VectorStore};

use crate::embedder::Embedder;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    policy: RetrievalPolicy,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        policy: RetrievalPolicy,
    ) -> Self {
        Self { embedder, store, policy }
    }

    pub fn plan(&self, query_text: &str) -> RetrievalPlan {
        self.policy.plan(query_text)
    }

    pub fn plan_with_top_k(&self, query_text: &str, top_k: usize) -> RetrievalPlan {
        self.policy.plan_with_top_k(query_text, top_k)
    }

    pub fn adjust(&self, plan: &RetrievalPlan, directive: AdjustmentDirective) -> RetrievalPlan {
        self.policy.adjust(plan, directive)
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embedder.embed(text).await
    }

    /// Fetches `fan_out` candidates for the company, then re-ranks and
    /// truncates them to the plan's `top_k`.
    pub async fn search(
        &self,
        company_id: &CompanyId,
        embedding: &[f32],
        plan: &RetrievalPlan,
        correlation_id: &str,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let candidates =
            self.store.search(company_id, embedding, plan.threshold, plan.fan_out).await?;
        let candidate_count = candidates.len();
        let chunks = self.policy.rerank(candidates, plan);

        info!(
            event_name = "agent.retrieval.completed",
            correlation_id,
            company_id = %company_id.0,
            threshold = plan.threshold,
            fan_out = plan.fan_out,
            top_k = plan.top_k,
            factual = plan.cues.factual,
            candidates = candidate_count,
            returned = chunks.len(),
            "knowledge retrieval completed"
        );
        Ok(chunks)
    }

    /// Embeds `text` and searches with the adaptive plan for it.
    pub async fn retrieve(
        &self,
        company_id: &CompanyId,
        text: &str,
        top_k: usize,
        correlation_id: &str,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let embedding = self.embed(text).await?;
        let plan = self.plan_with_top_k(text, top_k);
        self.search(company_id, &embedding, &plan, correlation_id).await
    }
}
