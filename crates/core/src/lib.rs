pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod reservation;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::action::{
    ActionArgumentError, ActionArguments, ActionKind, ActionTrigger, BridgeAction, ConfirmationToken,
    PendingAction,
};
pub use domain::conversation::{ConversationHistory, ConversationTurn, Role, SessionId};
pub use domain::reservation::{
    ReservationDraft, ReservationField, ReservationId, ReservationRecord, ReservationRequest,
    ReservationStatus, RestaurantId,
};
pub use domain::table::{TableId, TableResource, TableStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use reservation::{ReservationValidator, TimeSlotGrid, ValidationReport};
