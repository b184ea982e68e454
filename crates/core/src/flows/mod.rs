pub mod engine;
pub mod states;

pub use engine::{DialogueTurnFlow, TurnDefinition, TurnEngine, TurnTransitionError};
pub use states::{TurnAction, TurnEvent, TurnOutcome, TurnState};
