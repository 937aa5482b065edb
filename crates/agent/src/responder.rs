use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use ragdesk_core::domain::conversation::ConversationTurn;
use ragdesk_core::domain::intent::Intent;
use ragdesk_core::domain::response::ChatResponse;
use ragdesk_core::replies::{
    intent_replies, pick, ChitChatTopic, ClarificationCategory, CHIT_CHAT_DEFAULT_REPLIES,
};

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::PromptLibrary;

const CONTINUITY_HISTORY_TURNS: usize = 3;
const CONTINUITY_MAX_TOKENS: u32 = 100;
const CONTINUITY_TEMPERATURE: f32 = 0.7;

/// Fast-path replies. Template selection draws from an injected generator
/// so tests can seed it.
pub struct ConversationalResponder {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    rng: Mutex<StdRng>,
}

impl ConversationalResponder {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptLibrary>) -> Self {
        Self { llm, prompts, rng: Mutex::new(StdRng::from_entropy()) }
    }

    pub fn with_seed(llm: Arc<dyn LlmClient>, prompts: Arc<PromptLibrary>, seed: u64) -> Self {
        Self { llm, prompts, rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    pub async fn respond(
        &self,
        intent: Intent,
        query_text: &str,
        history: &[ConversationTurn],
        correlation_id: &str,
    ) -> ChatResponse {
        let text = match intent {
            Intent::Unclear => self.pick(ClarificationCategory::detect(query_text).replies()),
            Intent::ChitChat => self.chit_chat(query_text, history, correlation_id).await,
            other => self.pick(intent_replies(other)),
        };
        ChatResponse::conversational(intent, text)
    }

    async fn chit_chat(
        &self,
        query_text: &str,
        history: &[ConversationTurn],
        correlation_id: &str,
    ) -> String {
        let topic = ChitChatTopic::detect(query_text);
        if topic != ChitChatTopic::Acknowledgement || history.is_empty() {
            return self.pick(topic.replies());
        }

        let recent = &history[history.len().saturating_sub(CONTINUITY_HISTORY_TURNS)..];
        let prompt = match self.prompts.continuity(query_text, recent) {
            Ok(prompt) => prompt,
            Err(error) => {
                warn!(
                    event_name = "agent.fast_path.prompt_failed",
                    correlation_id,
                    error = %error,
                    "continuity prompt failed to render"
                );
                return self.pick(CHIT_CHAT_DEFAULT_REPLIES);
            }
        };

        let request = CompletionRequest::new(prompt, CONTINUITY_MAX_TOKENS, CONTINUITY_TEMPERATURE);
        match self.llm.complete(&request).await {
            Ok(text) if !text.trim().is_empty() => {
                debug!(
                    event_name = "agent.fast_path.continuity_reply",
                    correlation_id,
                    history_turns = recent.len(),
                    "acknowledgement answered with continuity reply"
                );
                text.trim().to_string()
            }
            Ok(_) => self.pick(CHIT_CHAT_DEFAULT_REPLIES),
            Err(error) => {
                warn!(
                    event_name = "agent.fast_path.continuity_failed",
                    correlation_id,
                    error_kind = error.kind(),
                    "continuity reply failed, using default"
                );
                self.pick(CHIT_CHAT_DEFAULT_REPLIES)
            }
        }
    }

    fn pick(&self, templates: &'static [&'static str]) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        pick(templates, &mut *rng).to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ragdesk_core::domain::conversation::{ConversationId, ConversationTurn, TurnMetadata};
    use ragdesk_core::domain::intent::Intent;
    use ragdesk_core::errors::ProviderError;
    use ragdesk_core::replies::{
        ClarificationCategory, CHIT_CHAT_DEFAULT_REPLIES, GREETING_REPLIES, HOW_ARE_YOU_REPLIES,
    };

    use super::ConversationalResponder;
    use crate::prompts::PromptLibrary;
    use crate::test_support::ScriptedLlm;

    fn responder(llm: Arc<ScriptedLlm>) -> ConversationalResponder {
        ConversationalResponder::with_seed(llm, Arc::new(PromptLibrary::new().expect("prompts")), 7)
    }

    fn history() -> Vec<ConversationTurn> {
        let conversation = ConversationId("conv-1".to_string());
        vec![
            ConversationTurn::user(conversation.clone(), "Do you run audits?"),
            ConversationTurn::assistant(
                conversation.clone(),
                "Yes, we run operational audits. Want details on pricing?",
                None,
                TurnMetadata::default(),
            ),
            ConversationTurn::user(conversation.clone(), "What do they cover?"),
            ConversationTurn::assistant(
                conversation,
                "Process, tooling and reporting. Shall I send a summary?",
                None,
                TurnMetadata::default(),
            ),
        ]
    }

    #[tokio::test]
    async fn template_intents_make_no_llm_call() {
        let llm = ScriptedLlm::silent();
        let responder = responder(llm.clone());

        let response = responder.respond(Intent::Greeting, "hello", &[], "test").await;
        assert!(GREETING_REPLIES.contains(&response.response.as_str()));
        assert!(response.sources.is_empty());
        assert!(!response.context_found);
        assert!(response.conversational);

        let response = responder.respond(Intent::ChitChat, "how are you?", &history(), "test").await;
        assert!(HOW_ARE_YOU_REPLIES.contains(&response.response.as_str()));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn unclear_queries_get_category_clarification() {
        let response =
            responder(ScriptedLlm::silent()).respond(Intent::Unclear, "price?", &[], "test").await;
        assert!(ClarificationCategory::Pricing.replies().contains(&response.response.as_str()));
    }

    #[tokio::test]
    async fn acknowledgement_with_history_makes_one_continuity_call() {
        let llm = ScriptedLlm::new(["Great, I'll put that summary together for you."]);
        let response = responder(llm.clone()).respond(Intent::ChitChat, "yes", &history(), "test").await;

        assert_eq!(response.response, "Great, I'll put that summary together for you.");
        assert_eq!(llm.calls(), 1);
        let request = &llm.requests()[0];
        assert_eq!(request.max_tokens, 100);
        assert!(request.prompt.contains("Shall I send a summary?"));
        assert!(!request.prompt.contains("Do you run audits?"));
    }

    #[tokio::test]
    async fn acknowledgement_without_history_invites_a_question() {
        let llm = ScriptedLlm::silent();
        let response = responder(llm.clone()).respond(Intent::ChitChat, "okay", &[], "test").await;
        assert!(CHIT_CHAT_DEFAULT_REPLIES.contains(&response.response.as_str()));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn continuity_failure_falls_back_to_default_reply() {
        let llm = ScriptedLlm::with_results(vec![Err(ProviderError::Timeout { after_secs: 30 })]);
        let response = responder(llm).respond(Intent::ChitChat, "sure", &history(), "test").await;
        assert!(CHIT_CHAT_DEFAULT_REPLIES.contains(&response.response.as_str()));
    }
}
