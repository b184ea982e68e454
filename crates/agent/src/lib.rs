//! Conversational side of the reservation assistant.
//!
//! A guest message flows through the [`runtime::AgentRuntime`], which drives
//! the per-turn state machine and decides who answers:
//! 1. **Action bridge** (`bridge`) - external interpreter/executor, with a
//!    token handshake for sensitive actions
//! 2. **Local booking flow** (`conversation`, `booking`) - rule-based slot
//!    extraction feeding the reservation engine
//! 3. **Text generator** (`llm`, `prompt`) - free conversation, whose protocol
//!    blocks (`markup`) may book, look up, or show a form
//!
//! # Safety Principle
//!
//! The generator only proposes. Availability, table choice, and anything
//! written to storage are decided by the reservation engine, and bridge
//! actions run only after guardrails allow them.

pub mod booking;
pub mod bridge;
pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod markup;
pub mod pacing;
pub mod prompt;
pub mod runtime;
pub mod session;

pub use runtime::{AgentRuntime, AgentServices, RuntimeError, RuntimeSettings, TurnReply};
