//! Agent runtime: the query pipeline around the LLM.
//!
//! `AgentRuntime::handle` takes one company-scoped query through
//! preprocessing, intent classification and routing, then answers it on
//! one of three paths:
//!
//! - **fast path** (`responder`): templates, at most one continuity call
//! - **RAG path** (`rag`): adaptive retrieval, one generation, validation
//!   with a bounded retry loop
//! - **planning path** (`planner`, `executor`): an LLM-built action plan run
//!   step by step over knowledge search and external tools
//!
//! Collaborators (`LlmClient`, `Embedder`, the stores, `Tool`) are trait
//! objects so tests can script them.
//!
//! The LLM never decides tenant scope, retry budgets or which path a query
//! takes. Those are deterministic decisions made in `ragdesk-core`.

pub mod classifier;
pub mod embedder;
pub mod executor;
pub mod learning;
pub mod llm;
pub mod memory;
pub mod planner;
pub mod prompts;
pub mod rag;
pub mod responder;
pub mod retriever;
pub mod runtime;
pub mod tools;
pub mod validator;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use embedder::{Embedder, HashingEmbedder};
pub use learning::{LearningError, LearningJob, LearningRun};
pub use llm::{CompletionRequest, HttpLlmClient, LlmClient, TimeoutLlm};
pub use runtime::{AgentDeps, AgentRuntime, RuntimeError};
pub use tools::{Tool, ToolError, ToolRegistry, WebhookTool};
