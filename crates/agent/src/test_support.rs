use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ragdesk_core::domain::conversation::CompanyId;
use ragdesk_core::domain::knowledge::{KnowledgeChunk, RetrievedChunk};
use ragdesk_core::errors::ProviderError;
use ragdesk_db::repositories::{InMemoryVectorStore, RepositoryError, VectorStore};

use crate::llm::{CompletionRequest, LlmClient};

/// Replies from a fixed script in call order; an exhausted script fails
/// with a transport error.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|reply| Ok(reply.into())).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn with_results(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies.into()), requests: Mutex::new(Vec::new()) })
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Transport("script exhausted".to_string())))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchCall {
    pub company_id: CompanyId,
    pub threshold: f64,
    pub limit: usize,
}

/// In-memory vector store that records the parameters of every search.
#[derive(Default)]
pub struct CapturingVectorStore {
    inner: InMemoryVectorStore,
    calls: Mutex<Vec<SearchCall>>,
}

impl CapturingVectorStore {
    pub fn calls(&self) -> Vec<SearchCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl VectorStore for CapturingVectorStore {
    async fn search(
        &self,
        company_id: &CompanyId,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, RepositoryError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(SearchCall {
            company_id: company_id.clone(),
            threshold,
            limit,
        });
        self.inner.search(company_id, embedding, threshold, limit).await
    }

    async fn upsert(&self, chunk: KnowledgeChunk) -> Result<(), RepositoryError> {
        self.inner.upsert(chunk).await
    }
}
