//! Deterministic reservation rules: the service time grid, request validation
//! and table availability ranking. Storage-agnostic; the agent's booking engine
//! feeds these with repository data.

pub mod availability;
pub mod slots;
pub mod validation;

pub use availability::{
    alternative_candidates, conflicts, find_available, ALTERNATIVE_CANDIDATE_TIMES,
    CONFLICT_WINDOW_MINUTES,
};
pub use slots::{parse_clock, ServiceWindow, SlotError, TimeSlotGrid, SLOT_STEP_MINUTES};
pub use validation::{
    is_mobile_number, normalize_phone, FieldError, ReservationValidator, ValidationReport,
    MAX_PARTY_SIZE, MIN_PARTY_SIZE,
};
