pub mod engine;
pub mod states;

pub use engine::{
    FlowDefinition, FlowEngine, FlowTransitionError, PlannedAnswerFlow, RagAnswerFlow,
};
pub use states::{FlowAction, FlowContext, FlowEvent, FlowState, FlowType, TransitionOutcome};
