use thiserror::Error;
use tracing::{debug, warn};

use crate::flows::states::{
    FlowAction, FlowContext, FlowEvent, FlowState, FlowType, TransitionOutcome,
};

pub trait FlowDefinition {
    fn flow_type(&self) -> FlowType;
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Draft, validate, and regenerate with adjusted retrieval while the
/// validator asks for it and budget remains.
#[derive(Clone, Debug, Default)]
pub struct RagAnswerFlow;

impl FlowDefinition for RagAnswerFlow {
    fn flow_type(&self) -> FlowType {
        FlowType::RagAnswer
    }

    fn initial_state(&self) -> FlowState {
        FlowState::Drafted
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_answer(current, event, context, true)
    }
}

/// A planned reply is validated once and never regenerated.
#[derive(Clone, Debug, Default)]
pub struct PlannedAnswerFlow;

impl FlowDefinition for PlannedAnswerFlow {
    fn flow_type(&self) -> FlowType {
        FlowType::PlannedAnswer
    }

    fn initial_state(&self) -> FlowState {
        FlowState::Drafted
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_answer(current, event, context, false)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    /// Upper bound on transitions for one request: two per attempt plus the
    /// regeneration step between attempts.
    pub fn transition_limit(&self, context: &FlowContext) -> u32 {
        3 * context.max_retries + 2
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_logged(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
        correlation_id: &str,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => debug!(
                event_name = "core.flow.transition_applied",
                correlation_id,
                flow = ?self.flow_type(),
                from = ?outcome.from,
                to = ?outcome.to,
                trigger = ?outcome.event,
                retries_used = context.retries_used,
                "answer flow transition applied"
            ),
            Err(error) => warn!(
                event_name = "core.flow.transition_rejected",
                correlation_id,
                flow = ?self.flow_type(),
                error = %error,
                "answer flow transition rejected"
            ),
        }
        result
    }
}

impl Default for FlowEngine<RagAnswerFlow> {
    fn default() -> Self {
        Self::new(RagAnswerFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("retry budget exhausted after {retries_used} of {max_retries} retries")]
    RetryBudgetExhausted { retries_used: u32, max_retries: u32 },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition_answer(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
    retries_allowed: bool,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{AdjustRetrieval, RegenerateDraft, ReturnDraft, ValidateDraft};
    use FlowEvent::{
        DraftSubmitted, Regenerated, ValidationSkipped, VerdictAccepted, VerdictRejected,
    };
    use FlowState::{Accepted, Drafted, Exhausted, Retrying, Validating};

    let (to, actions) = match (current, event) {
        (Drafted, DraftSubmitted) => (Validating, vec![ValidateDraft]),
        (Drafted, ValidationSkipped) => (Accepted, vec![ReturnDraft]),
        (Validating, VerdictAccepted) => (Accepted, vec![ReturnDraft]),
        (Validating, VerdictRejected { retry_recommended }) => {
            if *retry_recommended && retries_allowed && context.has_budget() {
                (Retrying, vec![AdjustRetrieval, RegenerateDraft])
            } else {
                (Exhausted, vec![ReturnDraft])
            }
        }
        (Retrying, Regenerated) => {
            if !context.has_budget() {
                return Err(FlowTransitionError::RetryBudgetExhausted {
                    retries_used: context.retries_used,
                    max_retries: context.max_retries,
                });
            }
            (Drafted, Vec::new())
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}
