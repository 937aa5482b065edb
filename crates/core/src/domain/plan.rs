use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixed catalogue of plan steps the executor knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    SearchKnowledge,
    GetContactInfo,
    ValidateData,
    FormatResponse,
    AskClarification,
    SendEmail,
    CheckCalendar,
    QueryCrm,
    CallApi,
}

impl ActionType {
    pub const ALL: [ActionType; 9] = [
        ActionType::SearchKnowledge,
        ActionType::GetContactInfo,
        ActionType::ValidateData,
        ActionType::FormatResponse,
        ActionType::AskClarification,
        ActionType::SendEmail,
        ActionType::CheckCalendar,
        ActionType::QueryCrm,
        ActionType::CallApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchKnowledge => "SEARCH_KNOWLEDGE",
            Self::GetContactInfo => "GET_CONTACT_INFO",
            Self::ValidateData => "VALIDATE_DATA",
            Self::FormatResponse => "FORMAT_RESPONSE",
            Self::AskClarification => "ASK_CLARIFICATION",
            Self::SendEmail => "SEND_EMAIL",
            Self::CheckCalendar => "CHECK_CALENDAR",
            Self::QueryCrm => "QUERY_CRM",
            Self::CallApi => "CALL_API",
        }
    }

    /// Registry name of the external tool backing this action, if any.
    pub fn tool_name(&self) -> Option<&'static str> {
        match self {
            Self::SendEmail => Some("send_email"),
            Self::CheckCalendar => Some("check_calendar"),
            Self::QueryCrm => Some("query_crm"),
            Self::CallApi => Some("web_search"),
            Self::SearchKnowledge
            | Self::GetContactInfo
            | Self::ValidateData
            | Self::FormatResponse
            | Self::AskClarification => None,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::SearchKnowledge => "search the company knowledge base (params: query)",
            Self::GetContactInfo => {
                "look up contact details (params: info_type = email|phone|address|all)"
            }
            Self::ValidateData => "check gathered emails and phone numbers are well formed",
            Self::FormatResponse => "write the final reply from all gathered results",
            Self::AskClarification => "ask the user a follow-up question (params: question)",
            Self::SendEmail => "send an email (params: to, subject, body)",
            Self::CheckCalendar => "check availability (params: date, duration_minutes)",
            Self::QueryCrm => "look up a customer record (params: email or name)",
            Self::CallApi => "search the web (params: query)",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[serde(alias = "medium")]
    Moderate,
    Complex,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub description: String,
}

impl Action {
    pub fn new(action_type: ActionType, description: impl Into<String>) -> Self {
        Self { action_type, params: Map::new(), description: description.into() }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str).map(str::trim).filter(|v| !v.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub goal: String,
    pub actions: Vec<Action>,
    pub estimated_steps: u32,
    pub complexity: Complexity,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_type: ActionType,
    pub success: bool,
    pub payload: Value,
    pub error: Option<String>,
}

impl ActionResult {
    pub fn succeeded(action_type: ActionType, payload: Value) -> Self {
        Self { action_type, success: true, payload, error: None }
    }

    pub fn failed(action_type: ActionType, error: impl Into<String>) -> Self {
        Self { action_type, success: false, payload: Value::Null, error: Some(error.into()) }
    }
}

/// Results visible to later plan steps, keyed by the action type that
/// produced them. Each step derives a new context instead of mutating the
/// previous one, so the data flow between steps stays auditable.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionContext {
    entries: BTreeMap<ActionType, Value>,
}

impl ExecutionContext {
    pub fn get(&self, action_type: ActionType) -> Option<&Value> {
        self.entries.get(&action_type)
    }

    pub fn with_result(&self, result: &ActionResult) -> Self {
        if !result.success {
            return self.clone();
        }
        let mut entries = self.entries.clone();
        entries.insert(result.action_type, result.payload.clone());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
