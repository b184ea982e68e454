//! Bridge to the external interpreter/executor service.
//!
//! Free text goes to the interpreter, which proposes one whitelisted action.
//! Safe actions run immediately. Sensitive ones are parked per session until
//! the guest echoes a one-time `CONFIRM-XXXXXX` token on a later turn.

pub mod client;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use maitre_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use maitre_core::config::BridgeConfig;
use maitre_core::domain::action::{
    ActionArgumentError, ActionKind, BridgeAction, ConfirmationToken, PendingAction,
};
use maitre_core::domain::conversation::SessionId;
use maitre_core::errors::ApplicationError;

use crate::guardrails::{AdvertisedActions, GuardrailDecision, GuardrailPolicy};

pub use client::{ActionCatalog, ActionService, ExecutionOutcome, HttpActionService, Interpretation};

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("action bridge is not configured: {0}")]
    NotConfigured(String),
    #[error("action service unreachable: {0}")]
    Unreachable(String),
    #[error("action service returned status {status}")]
    Status { status: u16 },
    #[error("action service protocol violation: {0}")]
    Protocol(String),
}

impl From<&BridgeError> for ApplicationError {
    fn from(error: &BridgeError) -> Self {
        match error {
            BridgeError::NotConfigured(_) => Self::Configuration(error.to_string()),
            BridgeError::Unreachable(_) | BridgeError::Status { .. } | BridgeError::Protocol(_) => {
                Self::Integration(error.to_string())
            }
        }
    }
}

/// What the bridge did with a turn.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeOutcome {
    Executed { action: ActionKind, data: Value, message: String },
    ConfirmationRequested { action: ActionKind, token: ConfirmationToken, message: String },
    ConfirmationRejected { message: String },
    ConfirmationFailed { message: String },
    Clarification { message: String },
    NotHandled,
}

impl BridgeOutcome {
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Executed { message, .. }
            | Self::ConfirmationRequested { message, .. }
            | Self::ConfirmationRejected { message }
            | Self::ConfirmationFailed { message }
            | Self::Clarification { message } => Some(message),
            Self::NotHandled => None,
        }
    }
}

struct CachedCatalog {
    advertised: AdvertisedActions,
    fetched_at: Instant,
}

pub struct ActionBridge {
    service: Arc<dyn ActionService>,
    guardrails: GuardrailPolicy,
    metadata_ttl: Duration,
    pending: Mutex<HashMap<SessionId, PendingAction>>,
    catalog: RwLock<Option<CachedCatalog>>,
    audit: Arc<dyn AuditSink>,
}

impl ActionBridge {
    pub fn new(
        service: Arc<dyn ActionService>,
        guardrails: GuardrailPolicy,
        metadata_ttl: Duration,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            service,
            guardrails,
            metadata_ttl,
            pending: Mutex::new(HashMap::new()),
            catalog: RwLock::new(None),
            audit,
        }
    }

    pub fn from_config(
        config: &BridgeConfig,
        service: Arc<dyn ActionService>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self::new(
            service,
            GuardrailPolicy::from_action_names(&config.confirmation_actions),
            Duration::from_secs(config.metadata_ttl_secs),
            audit,
        )
    }

    pub async fn pending_for(&self, session_id: &SessionId) -> Option<PendingAction> {
        self.pending.lock().await.get(session_id).cloned()
    }

    /// Drops whatever the session had parked.
    pub async fn forget(&self, session_id: &SessionId) {
        self.pending.lock().await.remove(session_id);
    }

    /// Handles `input` as a confirmation attempt. `None` unless the input has
    /// the exact token shape and the session has a parked action.
    pub async fn confirm(
        &self,
        session_id: &SessionId,
        input: &str,
        audit: &AuditContext,
    ) -> Option<BridgeOutcome> {
        let offered = ConfirmationToken::parse(input)?;

        let pending = {
            let mut parked = self.pending.lock().await;
            let expected = &parked.get(session_id)?.expected_token;
            if expected != &offered {
                self.emit(audit, "bridge.confirmation_mismatch", AuditOutcome::Rejected, None);
                return Some(BridgeOutcome::ConfirmationRejected {
                    message: "確認碼不正確，操作尚未執行。請重新輸入正確的確認碼。".to_string(),
                });
            }
            parked.remove(session_id)?
        };

        let kind = pending.action.kind();
        match self.service.execute(&pending.action, Some(&pending.expected_token)).await {
            Ok(ExecutionOutcome::Completed { data, .. }) => {
                self.emit(audit, "bridge.action_executed", AuditOutcome::Success, Some(kind));
                Some(BridgeOutcome::Executed { action: kind, message: executed_message(kind), data })
            }
            Ok(ExecutionOutcome::ConfirmationRequired { token }) => {
                Some(self.park(session_id, pending.action, token, audit).await)
            }
            Err(error) => {
                warn!(
                    event_name = "bridge.confirmed_execution_failed",
                    session_id = %session_id.0,
                    action = kind.as_str(),
                    error = %error,
                    "confirmed action could not be executed"
                );
                self.emit(audit, "bridge.action_failed", AuditOutcome::Failed, Some(kind));
                Some(BridgeOutcome::ConfirmationFailed {
                    message: "抱歉，目前無法完成這個操作，請稍後再試。".to_string(),
                })
            }
        }
    }

    /// Interprets `text` and runs or parks the proposed action. Errors mean
    /// the service could not be used; callers fall back to the local flow.
    pub async fn handle(
        &self,
        session_id: &SessionId,
        text: &str,
        audit: &AuditContext,
    ) -> Result<BridgeOutcome, BridgeError> {
        let (action_name, arguments, service_flagged) =
            match self.service.interpret(session_id, text).await? {
                Interpretation::Unknown => return Ok(BridgeOutcome::NotHandled),
                Interpretation::Clarify { question } => {
                    return Ok(BridgeOutcome::Clarification { message: question });
                }
                Interpretation::Action { action, arguments, requires_confirmation, .. } => {
                    (action, arguments, requires_confirmation)
                }
            };

        let action = match BridgeAction::from_parts(&action_name, &arguments) {
            Ok(action) => action,
            Err(ActionArgumentError::UnknownAction(name)) => {
                info!(
                    event_name = "bridge.action_not_whitelisted",
                    session_id = %session_id.0,
                    action = %name,
                    "interpreter proposed an action outside the whitelist"
                );
                return Ok(BridgeOutcome::NotHandled);
            }
            Err(error) => return Ok(BridgeOutcome::Clarification { message: clarification(&error) }),
        };

        let advertised = self.advertised().await;
        match self.guardrails.evaluate(&action, service_flagged, advertised.as_ref()) {
            GuardrailDecision::Deny { reason_code, fallback_path } => {
                info!(
                    event_name = "bridge.action_denied",
                    session_id = %session_id.0,
                    action = action.kind().as_str(),
                    reason_code,
                    fallback_path,
                    "guardrails denied direct execution"
                );
                Ok(BridgeOutcome::NotHandled)
            }
            GuardrailDecision::RequireConfirmation { .. } => {
                Ok(self.park(session_id, action, generate_token(), audit).await)
            }
            GuardrailDecision::Allow => {
                let kind = action.kind();
                match self.service.execute(&action, None).await? {
                    ExecutionOutcome::Completed { data, .. } => {
                        self.emit(audit, "bridge.action_executed", AuditOutcome::Success, Some(kind));
                        Ok(BridgeOutcome::Executed { action: kind, message: executed_message(kind), data })
                    }
                    ExecutionOutcome::ConfirmationRequired { token } => {
                        Ok(self.park(session_id, action, token, audit).await)
                    }
                }
            }
        }
    }

    /// Stores `action` for the session, replacing anything parked before.
    async fn park(
        &self,
        session_id: &SessionId,
        action: BridgeAction,
        token: ConfirmationToken,
        audit: &AuditContext,
    ) -> BridgeOutcome {
        let kind = action.kind();
        let message = format!(
            "這個操作（{}）需要您確認。請回覆確認碼 {} 以繼續。",
            kind.as_str(),
            token.as_str()
        );
        self.pending.lock().await.insert(
            session_id.clone(),
            PendingAction { action, expected_token: token.clone(), created_at: Utc::now() },
        );
        self.emit(audit, "bridge.confirmation_requested", AuditOutcome::Success, Some(kind));
        BridgeOutcome::ConfirmationRequested { action: kind, token, message }
    }

    /// Catalog from the service, cached for the metadata TTL. A failed
    /// refresh keeps serving the stale copy.
    async fn advertised(&self) -> Option<AdvertisedActions> {
        if let Some(cached) = self.catalog.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.metadata_ttl {
                return Some(cached.advertised.clone());
            }
        }

        // No lock is held across the fetch; concurrent refreshes may race and
        // the last writer wins.
        match self.service.catalog().await {
            Ok(catalog) => {
                let advertised = AdvertisedActions {
                    actions: catalog.actions.into_iter().collect(),
                    confirmation_required: catalog.confirmation_required.into_iter().collect(),
                };
                *self.catalog.write().await =
                    Some(CachedCatalog { advertised: advertised.clone(), fetched_at: Instant::now() });
                Some(advertised)
            }
            Err(error) => {
                warn!(
                    event_name = "bridge.catalog_refresh_failed",
                    error = %error,
                    "action catalog unavailable"
                );
                self.catalog.read().await.as_ref().map(|cached| cached.advertised.clone())
            }
        }
    }

    fn emit(
        &self,
        audit: &AuditContext,
        event_type: &str,
        outcome: AuditOutcome,
        action: Option<ActionKind>,
    ) {
        let mut event = AuditEvent::new(
            audit.session_id.clone(),
            audit.correlation_id.clone(),
            event_type,
            AuditCategory::Bridge,
            audit.actor.clone(),
            outcome,
        );
        if let Some(action) = action {
            event = event.with_metadata("action", action.as_str());
        }
        self.audit.emit(event);
    }
}

fn generate_token() -> ConfirmationToken {
    let mut rng = rand::thread_rng();
    let code = (0..ConfirmationToken::CODE_LEN)
        .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
        .collect::<String>();
    ConfirmationToken(format!("{}{code}", ConfirmationToken::PREFIX))
}

fn executed_message(kind: ActionKind) -> String {
    match kind {
        ActionKind::CreateReservation => "已為您建立訂位。".to_string(),
        ActionKind::ListSlots => "已查詢可訂位時段。".to_string(),
        ActionKind::AssignTable => "已完成桌位安排。".to_string(),
        ActionKind::CreateOrder => "已為您開立點餐單。".to_string(),
        ActionKind::AddItem => "已將餐點加入訂單。".to_string(),
        ActionKind::CloseOrder => "已完成結帳。".to_string(),
    }
}

fn clarification(error: &ActionArgumentError) -> String {
    match error {
        ActionArgumentError::MissingArguments { missing, .. } => {
            format!("還需要以下資訊才能繼續：{}", missing.join("、"))
        }
        ActionArgumentError::InvalidArgument { argument, .. } => {
            format!("{argument} 的格式不正確，請再提供一次。")
        }
        ActionArgumentError::UnknownAction(_) => "抱歉，我不確定您想進行哪個操作。".to_string(),
    }
}
