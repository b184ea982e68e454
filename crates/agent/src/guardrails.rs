use std::collections::BTreeSet;

use maitre_core::domain::action::{ActionKind, BridgeAction};

/// Orders above this many units of one item need an explicit confirmation.
pub const BULK_QUANTITY_THRESHOLD: u32 = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    RequireConfirmation { reason_code: &'static str },
    Deny { reason_code: &'static str, fallback_path: &'static str },
}

/// What the executor service currently advertises.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdvertisedActions {
    pub actions: BTreeSet<String>,
    pub confirmation_required: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub confirmation_actions: BTreeSet<ActionKind>,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            confirmation_actions: [ActionKind::AssignTable, ActionKind::CloseOrder].into(),
        }
    }
}

impl GuardrailPolicy {
    /// Policy from configured action names. Unknown names are skipped; the
    /// config layer already rejects them.
    pub fn from_action_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            confirmation_actions: names
                .iter()
                .filter_map(|name| ActionKind::parse(name.as_ref()))
                .collect(),
        }
    }

    /// Decides how `action` may run. `service_flagged` is the interpreter's
    /// own confirmation hint.
    pub fn evaluate(
        &self,
        action: &BridgeAction,
        service_flagged: bool,
        advertised: Option<&AdvertisedActions>,
    ) -> GuardrailDecision {
        let kind = action.kind();

        if let Some(advertised) = advertised.filter(|advertised| !advertised.actions.is_empty()) {
            if !advertised.actions.contains(kind.as_str()) {
                return GuardrailDecision::Deny {
                    reason_code: "action_not_advertised",
                    fallback_path: "local_flow",
                };
            }
            if advertised.confirmation_required.contains(kind.as_str()) {
                return GuardrailDecision::RequireConfirmation {
                    reason_code: "service_confirmation_required",
                };
            }
        }

        if self.confirmation_actions.contains(&kind) {
            return GuardrailDecision::RequireConfirmation {
                reason_code: "configured_sensitive_action",
            };
        }
        if service_flagged {
            return GuardrailDecision::RequireConfirmation { reason_code: "interpreter_flagged" };
        }
        match action {
            BridgeAction::AddItem { quantity, .. } if *quantity > BULK_QUANTITY_THRESHOLD => {
                GuardrailDecision::RequireConfirmation { reason_code: "bulk_quantity" }
            }
            _ => GuardrailDecision::Allow,
        }
    }
}
