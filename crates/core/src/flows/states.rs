use serde::{Deserialize, Serialize};

/// Per-session turn lifecycle. A session is `Idle` between turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    ReadAck,
    Thinking,
    Responding,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    MessageReceived,
    ReadAcknowledged,
    TypingStarted,
    PacingCancelled,
    ReplyDelivered,
}

/// Presence signal the caller sends once a transition has been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    SignalRead,
    SignalTyping,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub from: TurnState,
    pub to: TurnState,
    pub event: TurnEvent,
    pub actions: Vec<TurnAction>,
}
