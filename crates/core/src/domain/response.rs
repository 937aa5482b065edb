use serde::{Deserialize, Serialize};

use crate::domain::intent::Intent;
use crate::domain::knowledge::SourceRef;
use crate::domain::plan::ActionPlan;
use crate::domain::validation::ValidationSummary;

/// Inbound body of the chat endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// What the pipeline hands back for one query. Degraded answers always carry
/// `context_found: false` or an invalid validation so callers can tell them
/// apart from confident ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<SourceRef>,
    pub context_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub conversational: bool,
    #[serde(default)]
    pub planned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ActionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

impl ChatResponse {
    pub fn conversational(intent: Intent, response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            sources: Vec::new(),
            context_found: false,
            intent: Some(intent),
            conversational: true,
            planned: false,
            plan: None,
            validation: None,
            session_id: None,
            turn_id: None,
        }
    }

    pub fn degraded(intent: Option<Intent>, response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            sources: Vec::new(),
            context_found: false,
            intent,
            conversational: false,
            planned: false,
            plan: None,
            validation: None,
            session_id: None,
            turn_id: None,
        }
    }
}
