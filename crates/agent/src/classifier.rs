use std::sync::Arc;

use tracing::{debug, warn};

use ragdesk_core::domain::intent::{Classification, ClassificationTier, Intent};
use ragdesk_core::domain::query::ProcessedQuery;
use ragdesk_core::intent::{classify_patterns, parse_llm_classification, LLM_TIER_THRESHOLD};

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::PromptLibrary;

const CLASSIFY_MAX_TOKENS: u32 = 20;
const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// Pattern tier first; the LLM is only consulted below the tier threshold.
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptLibrary>) -> Self {
        Self { llm, prompts }
    }

    pub async fn classify(&self, query: &ProcessedQuery, correlation_id: &str) -> Classification {
        let pattern = classify_patterns(query);
        if pattern.confidence >= LLM_TIER_THRESHOLD {
            debug!(
                event_name = "agent.classify.pattern_hit",
                correlation_id,
                intent = pattern.intent.as_str(),
                confidence = pattern.confidence,
                "intent resolved by pattern tier"
            );
            return pattern;
        }

        let prompt = match self.prompts.classify(&query.text) {
            Ok(prompt) => prompt,
            Err(error) => {
                warn!(
                    event_name = "agent.classify.prompt_failed",
                    correlation_id,
                    error = %error,
                    "classification prompt failed to render"
                );
                return fallback(pattern);
            }
        };

        let request = CompletionRequest::new(prompt, CLASSIFY_MAX_TOKENS, CLASSIFY_TEMPERATURE);
        match self.llm.complete(&request).await {
            Ok(text) => match parse_llm_classification(&text) {
                Some(classification) => {
                    debug!(
                        event_name = "agent.classify.llm_hit",
                        correlation_id,
                        intent = classification.intent.as_str(),
                        confidence = classification.confidence,
                        "intent resolved by llm tier"
                    );
                    classification
                }
                None => {
                    warn!(
                        event_name = "agent.classify.llm_malformed",
                        correlation_id,
                        "llm classification output was malformed"
                    );
                    Classification::unknown(ClassificationTier::Llm)
                }
            },
            Err(error) => {
                warn!(
                    event_name = "agent.classify.llm_failed",
                    correlation_id,
                    error_kind = error.kind(),
                    "llm classification failed, keeping pattern tier result"
                );
                fallback(pattern)
            }
        }
    }
}

fn fallback(pattern: Classification) -> Classification {
    if pattern.intent == Intent::Question {
        pattern
    } else {
        Classification::unknown(ClassificationTier::Pattern)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ragdesk_core::domain::intent::{ClassificationTier, Intent};
    use ragdesk_core::domain::query::ProcessedQuery;
    use ragdesk_core::errors::ProviderError;
    use ragdesk_core::intent::PATTERN_SETS;

    use super::IntentClassifier;
    use crate::prompts::PromptLibrary;
    use crate::test_support::ScriptedLlm;

    fn query(text: &str) -> ProcessedQuery {
        ProcessedQuery { original: text.to_string(), text: text.to_string() }
    }

    fn classifier(llm: Arc<ScriptedLlm>) -> IntentClassifier {
        IntentClassifier::new(llm, Arc::new(PromptLibrary::new().expect("prompts")))
    }

    #[tokio::test]
    async fn curated_phrases_never_reach_the_llm() {
        let llm = ScriptedLlm::silent();
        let classifier = classifier(llm.clone());

        for set in PATTERN_SETS.iter() {
            for phrase in set.exact.iter().chain(set.contains.iter()) {
                let classification = classifier.classify(&query(phrase), "test").await;
                assert_eq!(classification.intent, set.intent, "phrase `{phrase}`");
                assert!(classification.confidence >= 0.85, "phrase `{phrase}`");
            }
        }
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn low_confidence_queries_use_one_llm_call() {
        let llm = ScriptedLlm::new(["INTENT: UNCLEAR\nCONFIDENCE: 0.6"]);
        let classification = classifier(llm.clone()).classify(&query("pricing"), "test").await;

        assert_eq!(classification.intent, Intent::Unclear);
        assert_eq!(classification.tier, ClassificationTier::Llm);
        assert_eq!(llm.calls(), 1);
        let request = &llm.requests()[0];
        assert_eq!(request.max_tokens, 20);
        assert!((request.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn malformed_llm_output_is_unknown_with_zero_confidence() {
        let llm = ScriptedLlm::new(["I think this is a question about pricing"]);
        let classification = classifier(llm).classify(&query("pricing"), "test").await;
        assert_eq!(classification.intent, Intent::Unknown);
        assert_eq!(classification.confidence, 0.0);
    }

    #[tokio::test]
    async fn provider_failure_keeps_pattern_question() {
        let llm = ScriptedLlm::with_results(vec![Err(ProviderError::Timeout { after_secs: 30 })]);
        let classification =
            classifier(llm).classify(&query("what do you charge for audits?"), "test").await;
        assert_eq!(classification.intent, Intent::Question);
        assert_eq!(classification.confidence, 0.7);
        assert_eq!(classification.tier, ClassificationTier::Pattern);
    }

    #[tokio::test]
    async fn provider_failure_without_pattern_signal_is_unknown() {
        let llm = ScriptedLlm::with_results(vec![Err(ProviderError::Quota("limit".to_string()))]);
        let classification = classifier(llm).classify(&query("pricing"), "test").await;
        assert_eq!(classification.intent, Intent::Unknown);
        assert_eq!(classification.confidence, 0.0);
    }
}
