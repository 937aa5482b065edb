//! Sequential plan execution.
//!
//! Each step sees the [`ExecutionContext`] produced by the steps before it
//! and returns one [`ActionResult`]. A failed step is recorded and the plan
//! keeps going; only the formatting step turns results into a reply.

use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use ragdesk_core::domain::conversation::CompanyId;
use ragdesk_core::domain::knowledge::{RetrievedChunk, SourceRef};
use ragdesk_core::domain::plan::{Action, ActionPlan, ActionResult, ActionType, ExecutionContext};
use ragdesk_core::retrieval::contact_query;

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::{PromptLibrary, ResultLine};
use crate::retriever::{RetrievalError, Retriever};
use crate::tools::ToolRegistry;

const FORMAT_MAX_TOKENS: u32 = 500;
const FORMAT_TEMPERATURE: f32 = 0.7;
const DETAIL_CHARS: usize = 400;
const DEFAULT_CLARIFICATION: &str = "Could you tell me a little more about what you need?";
const FALLBACK_PREFIX: &str = "Here is what I found:";
const FALLBACK_EMPTY: &str =
    "I'm sorry, I couldn't complete that request. Please try again or contact us directly.";

/// Email and phone patterns used for contact extraction and validation.
#[derive(Clone, Debug)]
pub struct ContactPatterns {
    email: Regex,
    phone: Regex,
}

impl ContactPatterns {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
            phone: Regex::new(r"\+?\d[\d\s().-]{6,}\d")?,
        })
    }

    pub fn emails(&self, text: &str) -> Vec<String> {
        dedup(self.email.find_iter(text).map(|found| found.as_str().to_string()))
    }

    pub fn phones(&self, text: &str) -> Vec<String> {
        dedup(self.phone.find_iter(text).map(|found| found.as_str().trim().to_string()))
    }

    pub fn is_email(&self, value: &str) -> bool {
        self.email.find(value).is_some_and(|found| found.as_str() == value.trim())
    }

    pub fn is_phone(&self, value: &str) -> bool {
        let digits = value.chars().filter(char::is_ascii_digit).count();
        (7..=15).contains(&digits)
            && self.phone.find(value).is_some_and(|found| found.as_str() == value.trim())
    }
}

fn dedup(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

/// Result of running a whole plan.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanOutcome {
    pub response: String,
    pub success: bool,
    pub results: Vec<ActionResult>,
    pub sources: Vec<SourceRef>,
}

pub struct PlanExecutor {
    retriever: Arc<Retriever>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    patterns: ContactPatterns,
    top_k: usize,
}

struct StepInput<'a> {
    company_id: &'a CompanyId,
    query: &'a str,
    goal: &'a str,
    correlation_id: &'a str,
}

impl PlanExecutor {
    pub fn new(
        retriever: Arc<Retriever>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptLibrary>,
        patterns: ContactPatterns,
        top_k: usize,
    ) -> Self {
        Self { retriever, tools, llm, prompts, patterns, top_k }
    }

    pub async fn execute(
        &self,
        plan: &ActionPlan,
        company_id: &CompanyId,
        query: &str,
        correlation_id: &str,
    ) -> PlanOutcome {
        let input = StepInput { company_id, query, goal: &plan.goal, correlation_id };
        let mut context = ExecutionContext::default();
        let mut results: Vec<ActionResult> = Vec::with_capacity(plan.actions.len());
        let mut sources: Vec<SourceRef> = Vec::new();

        for (step, action) in plan.actions.iter().enumerate() {
            let (result, found) = self.run(action, &context, &results, &input).await;
            for chunk in &found {
                if !sources.iter().any(|source| source.id == chunk.id.0) {
                    sources.push(SourceRef::from_chunk(chunk));
                }
            }

            if result.success {
                info!(
                    event_name = "agent.plan.step_succeeded",
                    correlation_id,
                    step,
                    action = action.action_type.as_str(),
                    "plan step succeeded"
                );
            } else {
                warn!(
                    event_name = "agent.plan.step_failed",
                    correlation_id,
                    step,
                    action = action.action_type.as_str(),
                    error = result.error.as_deref().unwrap_or_default(),
                    "plan step failed, continuing"
                );
            }
            context = context.with_result(&result);
            results.push(result);
        }

        let success = results.iter().all(|result| result.success);
        let response = context
            .get(ActionType::FormatResponse)
            .and_then(|payload| payload.get("response"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| synthesize_fallback(&results));

        info!(
            event_name = "agent.plan.executed",
            correlation_id,
            steps = results.len(),
            success,
            "plan execution finished"
        );
        PlanOutcome { response, success, results, sources }
    }

    async fn run(
        &self,
        action: &Action,
        context: &ExecutionContext,
        previous: &[ActionResult],
        input: &StepInput<'_>,
    ) -> (ActionResult, Vec<RetrievedChunk>) {
        let action_type = action.action_type;
        match action_type {
            ActionType::SearchKnowledge => {
                let search = action.param_str("query").unwrap_or(input.query);
                match self.search(input, search).await {
                    Ok(chunks) => {
                        let payload = json!({
                            "query": search,
                            "found": !chunks.is_empty(),
                            "results": chunks
                                .iter()
                                .map(|chunk| json!({
                                    "id": chunk.id.0,
                                    "content": chunk.content,
                                    "similarity": chunk.similarity,
                                }))
                                .collect::<Vec<_>>(),
                        });
                        (ActionResult::succeeded(action_type, payload), chunks)
                    }
                    Err(error) => (ActionResult::failed(action_type, error.to_string()), Vec::new()),
                }
            }
            ActionType::GetContactInfo => {
                let info_type = action.param_str("info_type");
                let search = contact_query(info_type);
                match self.search(input, search).await {
                    Ok(chunks) => {
                        let snippets =
                            chunks.iter().map(|chunk| chunk.content.as_str()).collect::<Vec<_>>();
                        let text = snippets.join("\n");
                        let payload = json!({
                            "info_type": info_type.unwrap_or("all"),
                            "emails": self.patterns.emails(&text),
                            "phones": self.patterns.phones(&text),
                            "snippets": snippets,
                        });
                        (ActionResult::succeeded(action_type, payload), chunks)
                    }
                    Err(error) => (ActionResult::failed(action_type, error.to_string()), Vec::new()),
                }
            }
            ActionType::ValidateData => (self.validate_data(action, context), Vec::new()),
            ActionType::AskClarification => {
                let question = action.param_str("question").unwrap_or(DEFAULT_CLARIFICATION);
                (ActionResult::succeeded(action_type, json!({ "question": question })), Vec::new())
            }
            ActionType::SendEmail
            | ActionType::CheckCalendar
            | ActionType::QueryCrm
            | ActionType::CallApi => (self.call_tool(action, context).await, Vec::new()),
            ActionType::FormatResponse => (self.format(previous, input).await, Vec::new()),
        }
    }

    async fn search(
        &self,
        input: &StepInput<'_>,
        text: &str,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        self.retriever.retrieve(input.company_id, text, self.top_k, input.correlation_id).await
    }

    fn validate_data(&self, action: &Action, context: &ExecutionContext) -> ActionResult {
        let mut emails = strings_at(context.get(ActionType::GetContactInfo), "emails");
        let mut phones = strings_at(context.get(ActionType::GetContactInfo), "phones");
        if let Some(email) = action.param_str("email") {
            emails.push(email.to_string());
        }
        if let Some(phone) = action.param_str("phone") {
            phones.push(phone.to_string());
        }

        let checked = emails
            .iter()
            .map(|email| {
                json!({ "kind": "email", "value": email, "valid": self.patterns.is_email(email) })
            })
            .chain(phones.iter().map(|phone| {
                json!({ "kind": "phone", "value": phone, "valid": self.patterns.is_phone(phone) })
            }))
            .collect::<Vec<_>>();
        let valid = checked.iter().all(|entry| entry["valid"].as_bool().unwrap_or(false));

        ActionResult::succeeded(
            ActionType::ValidateData,
            json!({ "valid": valid, "checked": checked }),
        )
    }

    async fn call_tool(&self, action: &Action, context: &ExecutionContext) -> ActionResult {
        let action_type = action.action_type;
        let Some(tool_name) = action_type.tool_name() else {
            return ActionResult::failed(action_type, "action has no backing tool");
        };

        let mut params = action.params.clone();
        if action_type == ActionType::SendEmail && action.param_str("body").is_none() {
            params.insert("body".to_string(), Value::String(compose_email_body(context)));
        }

        match self.tools.execute_tool(tool_name, Value::Object(params)).await {
            Ok(payload) => ActionResult::succeeded(action_type, payload),
            Err(error) => ActionResult::failed(action_type, error.to_string()),
        }
    }

    async fn format(&self, previous: &[ActionResult], input: &StepInput<'_>) -> ActionResult {
        let lines = previous
            .iter()
            .map(|result| ResultLine {
                action: result.action_type.as_str(),
                success: result.success,
                detail: describe(result),
            })
            .collect::<Vec<_>>();

        let prompt = match self.prompts.format_response(input.query, input.goal, &lines) {
            Ok(prompt) => prompt,
            Err(error) => {
                return ActionResult::failed(ActionType::FormatResponse, error.to_string())
            }
        };
        let request = CompletionRequest::new(prompt, FORMAT_MAX_TOKENS, FORMAT_TEMPERATURE);
        match self.llm.complete(&request).await {
            Ok(text) if !text.trim().is_empty() => ActionResult::succeeded(
                ActionType::FormatResponse,
                json!({ "response": text.trim() }),
            ),
            Ok(_) => ActionResult::failed(ActionType::FormatResponse, "empty completion"),
            Err(error) => ActionResult::failed(ActionType::FormatResponse, error.to_string()),
        }
    }
}

fn strings_at(payload: Option<&Value>, key: &str) -> Vec<String> {
    payload
        .and_then(|payload| payload.get(key))
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn knowledge_snippets(context: &ExecutionContext) -> Vec<String> {
    context
        .get(ActionType::SearchKnowledge)
        .and_then(|payload| payload.get("results"))
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|result| result.get("content").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn compose_email_body(context: &ExecutionContext) -> String {
    let snippets = knowledge_snippets(context);
    if snippets.is_empty() {
        return "Thank you for reaching out. Our team will follow up with the details you asked for."
            .to_string();
    }
    let mut body = String::from("Here is the information you asked for:\n\n");
    for snippet in snippets {
        body.push_str("- ");
        body.push_str(&snippet);
        body.push('\n');
    }
    body
}

fn describe(result: &ActionResult) -> String {
    if let Some(error) = &result.error {
        return error.clone();
    }
    let detail = match result.action_type {
        ActionType::SearchKnowledge => {
            let snippets = result.payload["results"]
                .as_array()
                .map(|results| {
                    results
                        .iter()
                        .filter_map(|entry| entry["content"].as_str())
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .unwrap_or_default();
            if snippets.is_empty() { "nothing relevant found".to_string() } else { snippets }
        }
        ActionType::AskClarification => {
            result.payload["question"].as_str().unwrap_or(DEFAULT_CLARIFICATION).to_string()
        }
        _ => result.payload.to_string(),
    };
    truncate(&detail, DETAIL_CHARS)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

/// Used when the formatting step itself failed: lists what the successful
/// steps produced.
fn synthesize_fallback(results: &[ActionResult]) -> String {
    let lines = results
        .iter()
        .filter(|result| result.success && result.action_type != ActionType::FormatResponse)
        .map(|result| format!("- {}: {}", result.action_type.as_str(), describe(result)))
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return FALLBACK_EMPTY.to_string();
    }
    format!("{FALLBACK_PREFIX}\n{}", lines.join("\n"))
}
