use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type ActionArguments = BTreeMap<String, Value>;

/// Candidate action produced by the markup extractor or the external
/// interpreter. Consumed once by the action bridge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionTrigger {
    pub action: String,
    pub arguments: ActionArguments,
    pub confidence: f32,
    pub raw_text: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateReservation,
    ListSlots,
    AssignTable,
    CreateOrder,
    AddItem,
    CloseOrder,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        Self::CreateReservation,
        Self::ListSlots,
        Self::AssignTable,
        Self::CreateOrder,
        Self::AddItem,
        Self::CloseOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateReservation => "create_reservation",
            Self::ListSlots => "list_slots",
            Self::AssignTable => "assign_table",
            Self::CreateOrder => "create_order",
            Self::AddItem => "add_item",
            Self::CloseOrder => "close_order",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value.trim())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionArgumentError {
    #[error("action `{0}` is not in the supported action set")]
    UnknownAction(String),
    #[error("action `{action}` is missing required arguments: {missing:?}")]
    MissingArguments { action: &'static str, missing: Vec<&'static str> },
    #[error("action `{action}` argument `{argument}` must be {expected}")]
    InvalidArgument { action: &'static str, argument: &'static str, expected: &'static str },
}

/// Typed form of every whitelisted action. Arguments are checked once at the
/// boundary so the rest of the system never handles a loose map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "arguments", rename_all = "snake_case")]
pub enum BridgeAction {
    CreateReservation {
        customer_name: String,
        customer_phone: String,
        party_size: u32,
        reservation_date: String,
        reservation_time: String,
        special_requests: Option<String>,
    },
    ListSlots {
        date: String,
        party_size: Option<u32>,
    },
    AssignTable {
        reservation_id: String,
        table_id: String,
    },
    CreateOrder {
        table_id: String,
        guest_count: Option<u32>,
    },
    AddItem {
        order_id: String,
        item: String,
        quantity: u32,
    },
    CloseOrder {
        order_id: String,
    },
}

impl BridgeAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::CreateReservation { .. } => ActionKind::CreateReservation,
            Self::ListSlots { .. } => ActionKind::ListSlots,
            Self::AssignTable { .. } => ActionKind::AssignTable,
            Self::CreateOrder { .. } => ActionKind::CreateOrder,
            Self::AddItem { .. } => ActionKind::AddItem,
            Self::CloseOrder { .. } => ActionKind::CloseOrder,
        }
    }

    pub fn from_parts(action: &str, arguments: &ActionArguments) -> Result<Self, ActionArgumentError> {
        let kind = ActionKind::parse(action)
            .ok_or_else(|| ActionArgumentError::UnknownAction(action.to_string()))?;
        let reader = ArgumentReader { action: kind.as_str(), arguments };

        match kind {
            ActionKind::CreateReservation => {
                reader.require(&[
                    "customer_name",
                    "customer_phone",
                    "party_size",
                    "reservation_date",
                    "reservation_time",
                ])?;
                Ok(Self::CreateReservation {
                    customer_name: reader.string("customer_name")?,
                    customer_phone: reader.string("customer_phone")?,
                    party_size: reader.count("party_size")?,
                    reservation_date: reader.string("reservation_date")?,
                    reservation_time: reader.string("reservation_time")?,
                    special_requests: reader.optional_string("special_requests"),
                })
            }
            ActionKind::ListSlots => {
                reader.require(&["date"])?;
                Ok(Self::ListSlots {
                    date: reader.string("date")?,
                    party_size: reader.optional_count("party_size")?,
                })
            }
            ActionKind::AssignTable => {
                reader.require(&["reservation_id", "table_id"])?;
                Ok(Self::AssignTable {
                    reservation_id: reader.string("reservation_id")?,
                    table_id: reader.string("table_id")?,
                })
            }
            ActionKind::CreateOrder => {
                reader.require(&["table_id"])?;
                Ok(Self::CreateOrder {
                    table_id: reader.string("table_id")?,
                    guest_count: reader.optional_count("guest_count")?,
                })
            }
            ActionKind::AddItem => {
                reader.require(&["order_id", "item"])?;
                Ok(Self::AddItem {
                    order_id: reader.string("order_id")?,
                    item: reader.string("item")?,
                    quantity: reader.optional_count("quantity")?.unwrap_or(1),
                })
            }
            ActionKind::CloseOrder => {
                reader.require(&["order_id"])?;
                Ok(Self::CloseOrder { order_id: reader.string("order_id")? })
            }
        }
    }

    /// Wire form of the arguments, as sent to the executor.
    pub fn arguments(&self) -> ActionArguments {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut object)) => match object.remove("arguments") {
                Some(Value::Object(arguments)) => arguments
                    .into_iter()
                    .filter(|(_, value)| !value.is_null())
                    .collect(),
                _ => ActionArguments::new(),
            },
            _ => ActionArguments::new(),
        }
    }
}

struct ArgumentReader<'a> {
    action: &'static str,
    arguments: &'a ActionArguments,
}

impl ArgumentReader<'_> {
    fn require(&self, keys: &[&'static str]) -> Result<(), ActionArgumentError> {
        let missing = keys
            .iter()
            .copied()
            .filter(|key| self.optional_string(key).is_none())
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ActionArgumentError::MissingArguments { action: self.action, missing })
        }
    }

    fn optional_string(&self, key: &str) -> Option<String> {
        match self.arguments.get(key)? {
            Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    fn string(&self, key: &'static str) -> Result<String, ActionArgumentError> {
        self.optional_string(key).ok_or(ActionArgumentError::MissingArguments {
            action: self.action,
            missing: vec![key],
        })
    }

    fn optional_count(&self, key: &'static str) -> Result<Option<u32>, ActionArgumentError> {
        let Some(raw) = self.optional_string(key) else {
            return Ok(None);
        };
        raw.parse::<u32>().map(Some).map_err(|_| ActionArgumentError::InvalidArgument {
            action: self.action,
            argument: key,
            expected: "a whole number",
        })
    }

    fn count(&self, key: &'static str) -> Result<u32, ActionArgumentError> {
        self.optional_count(key)?.ok_or(ActionArgumentError::MissingArguments {
            action: self.action,
            missing: vec![key],
        })
    }
}

/// One-time string a guest must echo back to authorize a sensitive action.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmationToken(pub String);

impl ConfirmationToken {
    pub const PREFIX: &'static str = "CONFIRM-";
    pub const CODE_LEN: usize = 6;

    /// True when `input` has the exact token shape: `CONFIRM-` followed by six
    /// uppercase ASCII letters or digits, surrounding whitespace ignored.
    pub fn matches_grammar(input: &str) -> bool {
        let Some(code) = input.trim().strip_prefix(Self::PREFIX) else {
            return false;
        };
        code.len() == Self::CODE_LEN
            && code.chars().all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
    }

    pub fn parse(input: &str) -> Option<Self> {
        Self::matches_grammar(input).then(|| Self(input.trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action: BridgeAction,
    pub expected_token: ConfirmationToken,
    pub created_at: DateTime<Utc>,
}
