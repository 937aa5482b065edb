use std::sync::Arc;

use tracing::{info, warn};

use ragdesk_core::domain::validation::{ValidationVerdict, ISSUE_UNAVAILABLE, ISSUE_UNPARSEABLE};

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::PromptLibrary;

const VALIDATE_MAX_TOKENS: u32 = 200;
const VALIDATE_TEMPERATURE: f32 = 0.1;

/// Judges a draft against its sources with one LLM call. Never fails: an
/// unusable judgement becomes an invalid verdict that does not ask for a
/// retry.
pub struct ResponseValidator {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    min_confidence: f64,
}

impl ResponseValidator {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptLibrary>, min_confidence: f64) -> Self {
        Self { llm, prompts, min_confidence }
    }

    pub async fn validate(
        &self,
        query: &str,
        answer: &str,
        sources: &[String],
        correlation_id: &str,
    ) -> ValidationVerdict {
        let prompt = match self.prompts.validate(query, answer, sources) {
            Ok(prompt) => prompt,
            Err(error) => {
                warn!(
                    event_name = "agent.validation.prompt_failed",
                    correlation_id,
                    error = %error,
                    "validation prompt failed to render"
                );
                return ValidationVerdict::conservative(ISSUE_UNAVAILABLE);
            }
        };

        let request = CompletionRequest::new(prompt, VALIDATE_MAX_TOKENS, VALIDATE_TEMPERATURE);
        let verdict = match self.llm.complete(&request).await {
            Ok(text) => ValidationVerdict::parse(&text, self.min_confidence).unwrap_or_else(|| {
                warn!(
                    event_name = "agent.validation.unparseable",
                    correlation_id,
                    "validator output had no recognised fields"
                );
                ValidationVerdict::conservative(ISSUE_UNPARSEABLE)
            }),
            Err(error) => {
                warn!(
                    event_name = "agent.validation.unavailable",
                    correlation_id,
                    error_kind = error.kind(),
                    "validator call failed"
                );
                ValidationVerdict::conservative(ISSUE_UNAVAILABLE)
            }
        };

        info!(
            event_name = "agent.validation.verdict",
            correlation_id,
            is_valid = verdict.is_valid,
            confidence = verdict.confidence,
            retry_recommended = verdict.retry_recommended,
            adjustment = verdict.suggested_adjustment.as_str(),
            issues = ?verdict.issues,
            "draft validated"
        );
        verdict
    }
}
