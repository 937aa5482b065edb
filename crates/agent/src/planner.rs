use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use ragdesk_core::domain::plan::{Action, ActionPlan, ActionType};
use ragdesk_core::errors::ProviderError;

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::{PromptError, PromptLibrary};

const PLAN_MAX_TOKENS: u32 = 500;
const PLAN_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("plan was not valid JSON: {0}")]
    Malformed(String),
    #[error("plan contained no actions")]
    Empty,
}

impl PlanError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prompt(_) => "prompt",
            Self::Provider(_) => "provider",
            Self::Malformed(_) => "malformed",
            Self::Empty => "empty",
        }
    }
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptLibrary>) -> Self {
        Self { llm, prompts }
    }

    pub async fn create_plan(
        &self,
        query: &str,
        correlation_id: &str,
    ) -> Result<ActionPlan, PlanError> {
        let prompt = self.prompts.plan(query)?;
        let request = CompletionRequest::new(prompt, PLAN_MAX_TOKENS, PLAN_TEMPERATURE);
        let text = self.llm.complete(&request).await?;
        let plan = normalize_plan(parse_plan(&text)?, correlation_id)?;

        info!(
            event_name = "agent.plan.created",
            correlation_id,
            goal = %plan.goal,
            steps = plan.actions.len(),
            complexity = ?plan.complexity,
            "action plan created"
        );
        Ok(plan)
    }
}

/// Reads the JSON object between the first `{` and the last `}` so prose
/// or code fences around it are tolerated. Anything else is malformed.
pub fn parse_plan(text: &str) -> Result<ActionPlan, PlanError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(PlanError::Malformed("no JSON object in completion".to_string()));
    };
    if end < start {
        return Err(PlanError::Malformed("no JSON object in completion".to_string()));
    }
    serde_json::from_str(&text[start..=end]).map_err(|error| PlanError::Malformed(error.to_string()))
}

/// Keeps exactly one FORMAT_RESPONSE, as the final step.
fn normalize_plan(mut plan: ActionPlan, correlation_id: &str) -> Result<ActionPlan, PlanError> {
    if plan.actions.is_empty() {
        return Err(PlanError::Empty);
    }

    let last = plan.actions.len() - 1;
    let mut actions = Vec::with_capacity(plan.actions.len() + 1);
    for (index, action) in plan.actions.into_iter().enumerate() {
        if action.action_type == ActionType::FormatResponse && index != last {
            warn!(
                event_name = "agent.plan.early_format_dropped",
                correlation_id,
                position = index,
                "dropping FORMAT_RESPONSE that was not the final step"
            );
            continue;
        }
        actions.push(action);
    }

    if actions.last().map(|action| action.action_type) != Some(ActionType::FormatResponse) {
        actions.push(Action::new(ActionType::FormatResponse, "Write the final reply"));
    }

    plan.estimated_steps = u32::try_from(actions.len()).unwrap_or(u32::MAX);
    plan.actions = actions;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ragdesk_core::domain::plan::{ActionType, Complexity};

    use super::{parse_plan, PlanError, Planner};
    use crate::prompts::PromptLibrary;
    use crate::test_support::ScriptedLlm;

    fn planner(llm: Arc<ScriptedLlm>) -> Planner {
        Planner::new(llm, Arc::new(PromptLibrary::new().expect("prompts")))
    }

    #[tokio::test]
    async fn plan_json_is_parsed_from_surrounding_prose() {
        let llm = ScriptedLlm::new([r#"Here is the plan:
```json
{"goal": "Share hours and confirm by email",
 "actions": [
   {"type": "SEARCH_KNOWLEDGE", "params": {"query": "opening hours"}, "description": "find hours"},
   {"type": "SEND_EMAIL", "params": {"to": "sam@example.com", "subject": "Our hours"}, "description": "email"},
   {"type": "FORMAT_RESPONSE", "params": {}, "description": "reply"}
 ],
 "estimated_steps": 3,
 "complexity": "medium"}
```"#]);
        let plan = planner(llm.clone()).create_plan("hours? also email me", "test").await.expect("plan");

        let types = plan.actions.iter().map(|action| action.action_type).collect::<Vec<_>>();
        assert_eq!(
            types,
            vec![ActionType::SearchKnowledge, ActionType::SendEmail, ActionType::FormatResponse]
        );
        assert_eq!(plan.complexity, Complexity::Moderate);
        assert_eq!(plan.actions[1].param_str("to"), Some("sam@example.com"));

        let request = &llm.requests()[0];
        assert_eq!(request.max_tokens, 500);
        assert!(request.prompt.contains("CHECK_CALENDAR"));
    }

    #[tokio::test]
    async fn format_response_is_moved_to_the_end() {
        let llm = ScriptedLlm::new([r#"{"goal": "g", "actions": [
            {"type": "FORMAT_RESPONSE"},
            {"type": "GET_CONTACT_INFO", "params": {"info_type": "email"}}
        ], "estimated_steps": 2, "complexity": "simple"}"#]);
        let plan = planner(llm).create_plan("q", "test").await.expect("plan");

        let types = plan.actions.iter().map(|action| action.action_type).collect::<Vec<_>>();
        assert_eq!(types, vec![ActionType::GetContactInfo, ActionType::FormatResponse]);
        assert_eq!(plan.estimated_steps, 2);
    }

    #[tokio::test]
    async fn invalid_json_is_a_plan_failure() {
        let error = planner(ScriptedLlm::new(["I would search the knowledge base first."]))
            .create_plan("q", "test")
            .await
            .expect_err("no json");
        assert!(matches!(error, PlanError::Malformed(_)));

        let error = planner(ScriptedLlm::new([r#"{"goal": "g", "actions": [], "estimated_steps": 0, "complexity": "simple"}"#]))
            .create_plan("q", "test")
            .await
            .expect_err("empty");
        assert!(matches!(error, PlanError::Empty));
    }

    #[test]
    fn unknown_action_types_are_malformed() {
        let result = parse_plan(
            r#"{"goal": "g", "actions": [{"type": "BOOK_FLIGHT"}], "estimated_steps": 1, "complexity": "simple"}"#,
        );
        assert!(matches!(result, Err(PlanError::Malformed(_))));
    }
}
