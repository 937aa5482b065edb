use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    RagAnswer,
    PlannedAnswer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    Drafted,
    Validating,
    Retrying,
    Accepted,
    Exhausted,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Exhausted)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    DraftSubmitted,
    ValidationSkipped,
    VerdictAccepted,
    VerdictRejected { retry_recommended: bool },
    Regenerated,
}

/// Retry budget as seen by a transition. `retries_used` counts regenerations
/// already performed for this request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub retries_used: u32,
    pub max_retries: u32,
}

impl FlowContext {
    pub fn new(max_retries: u32) -> Self {
        Self { retries_used: 0, max_retries }
    }

    pub fn has_budget(&self) -> bool {
        self.retries_used < self.max_retries
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    ValidateDraft,
    AdjustRetrieval,
    RegenerateDraft,
    ReturnDraft,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
