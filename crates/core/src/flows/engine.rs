use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{TurnAction, TurnEvent, TurnOutcome, TurnState};

pub trait TurnDefinition {
    fn initial_state(&self) -> TurnState;
    fn transition(
        &self,
        current: &TurnState,
        event: &TurnEvent,
    ) -> Result<TurnOutcome, TurnTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct DialogueTurnFlow;

impl TurnDefinition for DialogueTurnFlow {
    fn initial_state(&self) -> TurnState {
        TurnState::Idle
    }

    fn transition(
        &self,
        current: &TurnState,
        event: &TurnEvent,
    ) -> Result<TurnOutcome, TurnTransitionError> {
        transition_dialogue_turn(current, event)
    }
}

pub struct TurnEngine<F> {
    flow: F,
}

impl<F> TurnEngine<F>
where
    F: TurnDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> TurnState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &TurnState,
        event: &TurnEvent,
    ) -> Result<TurnOutcome, TurnTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &TurnState,
        event: &TurnEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, TurnTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "dialogue.turn_transition_applied",
                        AuditCategory::Dialogue,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.correlation_id.clone(),
                        "dialogue.turn_transition_rejected",
                        AuditCategory::Dialogue,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for TurnEngine<DialogueTurnFlow> {
    fn default() -> Self {
        Self::new(DialogueTurnFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnTransitionError {
    #[error("invalid turn transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TurnState, event: TurnEvent },
}

fn transition_dialogue_turn(
    current: &TurnState,
    event: &TurnEvent,
) -> Result<TurnOutcome, TurnTransitionError> {
    use TurnAction::{SignalRead, SignalTyping};
    use TurnEvent::{MessageReceived, PacingCancelled, ReadAcknowledged, ReplyDelivered, TypingStarted};
    use TurnState::{Idle, ReadAck, Responding, Thinking};

    let (to, actions) = match (current, event) {
        (Idle, MessageReceived) => (ReadAck, Vec::new()),
        (ReadAck, ReadAcknowledged) => (Thinking, vec![SignalRead]),
        (Thinking, TypingStarted) => (Responding, vec![SignalTyping]),
        (ReadAck, PacingCancelled) | (Thinking, PacingCancelled) => (Responding, Vec::new()),
        (Responding, ReplyDelivered) => (Idle, Vec::new()),
        _ => {
            return Err(TurnTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TurnOutcome { from: *current, to, event: *event, actions })
}
