//! Per-turn dialogue orchestration.
//!
//! Every turn walks `Idle → ReadAck → Thinking → Responding → Idle`. The
//! response is chosen in a fixed order: a pending confirmation token, the
//! action bridge, the local booking flow, and finally the text generator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use maitre_core::audit::{AuditContext, AuditSink};
use maitre_core::config::AppConfig;
use maitre_core::domain::action::ActionArguments;
use maitre_core::domain::conversation::{ConversationTurn, SessionId};
use maitre_core::domain::reservation::ReservationDraft;
use maitre_core::errors::ApplicationError;
use maitre_core::flows::{DialogueTurnFlow, TurnAction, TurnEngine, TurnEvent, TurnState};

use crate::booking::{BookingAttempt, BookingError, ReservationEngine};
use crate::bridge::{ActionBridge, BridgeOutcome};
use crate::conversation::{detect_intent, parse_number, ContextExtractor, ExtractorError, TurnIntent};
use crate::llm::TextGenerator;
use crate::markup::{BlockTag, MarkupExtractor, ReservationFormCard};
use crate::pacing::{PaceOutcome, Pacer, PresenceSink};
use crate::prompt::PromptBuilder;
use crate::session::{SessionRegistry, SessionState};

const APOLOGY: &str = "抱歉，我暫時無法回覆，請稍後再試。";
const ASK_PHONE_FOR_LOOKUP: &str = "請提供訂位時留下的電話號碼，我幫您查詢。";
const ACTOR: &str = "guest";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error("prompt templates failed to load: {0}")]
    Template(#[from] tera::Error),
}

/// What the guest sees for one turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnReply {
    pub response_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<ReservationFormCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side_effect_summary: Option<String>,
}

impl TurnReply {
    fn text(response_text: impl Into<String>) -> Self {
        Self { response_text: response_text.into(), ..Self::default() }
    }
}

/// Collaborators built once at startup.
pub struct AgentServices {
    pub engine: Arc<ReservationEngine>,
    pub generator: Arc<dyn TextGenerator>,
    pub bridge: Option<Arc<ActionBridge>>,
    pub presence: Arc<dyn PresenceSink>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub restaurant_name: String,
    pub utc_offset: FixedOffset,
    pub max_history_turns: usize,
    pub pacer: Pacer,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            restaurant_name: config.reservation.restaurant_name.clone(),
            utc_offset: config.reservation.utc_offset(),
            max_history_turns: config.dialogue.max_history_turns,
            pacer: Pacer::from_config(&config.dialogue),
        }
    }
}

pub struct AgentRuntime {
    services: AgentServices,
    settings: RuntimeSettings,
    extractor: ContextExtractor,
    markup: MarkupExtractor,
    prompts: PromptBuilder,
    turns: TurnEngine<DialogueTurnFlow>,
    sessions: SessionRegistry,
}

impl AgentRuntime {
    pub fn new(services: AgentServices, settings: RuntimeSettings) -> Result<Self, RuntimeError> {
        Ok(Self {
            extractor: ContextExtractor::new()?,
            markup: MarkupExtractor::new(),
            prompts: PromptBuilder::new(settings.restaurant_name.clone())?,
            turns: TurnEngine::default(),
            sessions: SessionRegistry::new(settings.max_history_turns),
            services,
            settings,
        })
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.settings.utc_offset).date_naive()
    }

    /// Runs one guest message through the turn state machine. Never fails;
    /// every error is turned into guest-facing text.
    pub async fn process_turn(&self, session_id: &SessionId, user_text: &str) -> TurnReply {
        let audit =
            AuditContext::new(Some(session_id.clone()), Uuid::new_v4().to_string(), ACTOR);
        let handle = self.sessions.handle(session_id).await;
        let pacing = handle.begin_pacing();
        let mut session = handle.lock().await;

        if session.turn_state != TurnState::Idle {
            warn!(
                event_name = "dialogue.turn_state_reset",
                session_id = %session_id.0,
                state = ?session.turn_state,
                "previous turn did not finish cleanly"
            );
            session.turn_state = TurnState::Idle;
        }
        let chars = user_text.chars().count();
        self.advance(session_id, &mut session, TurnEvent::MessageReceived, chars, &audit).await;

        let pacer = &self.settings.pacer;
        let mut cancelled = pacer.wait(pacer.read_ack_delay(), &pacing).await
            == PaceOutcome::Cancelled;
        if !cancelled {
            self.advance(session_id, &mut session, TurnEvent::ReadAcknowledged, chars, &audit)
                .await;
            cancelled = pacer.wait(pacer.thinking_delay(chars), &pacing).await
                == PaceOutcome::Cancelled;
        }
        let next = if cancelled { TurnEvent::PacingCancelled } else { TurnEvent::TypingStarted };
        self.advance(session_id, &mut session, next, chars, &audit).await;

        let reply = self.respond(session_id, user_text, &mut session, &audit).await;

        session.history.push(ConversationTurn::user(user_text));
        session.history.push(ConversationTurn::assistant(reply.response_text.clone()));
        self.advance(session_id, &mut session, TurnEvent::ReplyDelivered, chars, &audit).await;

        info!(
            event_name = "dialogue.turn_completed",
            session_id = %session_id.0,
            correlation_id = %audit.correlation_id,
            pacing_cancelled = cancelled,
            has_card = reply.card.is_some(),
            side_effect = reply.side_effect_summary.as_deref().unwrap_or(""),
            "turn completed"
        );
        reply
    }

    /// Cancels pacing and drops the session with any parked action. Returns
    /// whether the session existed.
    pub async fn end_session(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.remove(session_id).await;
        if let Some(handle) = &removed {
            handle.cancel_pacing();
        }
        if let Some(bridge) = &self.services.bridge {
            bridge.forget(session_id).await;
        }
        removed.is_some()
    }

    /// Drops sessions idle for at least `max_idle`, with their parked actions.
    /// Returns how many were dropped.
    pub async fn evict_idle_sessions(&self, max_idle: Duration) -> usize {
        let evicted = self.sessions.evict_idle(max_idle).await;
        for (session_id, handle) in &evicted {
            handle.cancel_pacing();
            if let Some(bridge) = &self.services.bridge {
                bridge.forget(session_id).await;
            }
        }
        if !evicted.is_empty() {
            info!(
                event_name = "dialogue.sessions_evicted",
                evicted = evicted.len(),
                idle_secs = max_idle.as_secs(),
                "idle sessions dropped"
            );
        }
        evicted.len()
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.len().await
    }

    /// Applies `event` and sends the presence signals the transition asks for.
    async fn advance(
        &self,
        session_id: &SessionId,
        session: &mut SessionState,
        event: TurnEvent,
        chars: usize,
        audit: &AuditContext,
    ) {
        let outcome = match self.turns.apply_with_audit(
            &session.turn_state,
            &event,
            self.services.audit.as_ref(),
            audit,
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "dialogue.turn_transition_rejected",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "illegal turn transition ignored"
                );
                return;
            }
        };
        session.turn_state = outcome.to;

        for action in outcome.actions {
            match action {
                TurnAction::SignalRead => self.services.presence.read(session_id).await,
                TurnAction::SignalTyping => {
                    let estimate = self.settings.pacer.typing_estimate(chars);
                    self.services.presence.typing(session_id, estimate).await;
                }
            }
        }
    }

    async fn respond(
        &self,
        session_id: &SessionId,
        text: &str,
        session: &mut SessionState,
        audit: &AuditContext,
    ) -> TurnReply {
        if let Some(bridge) = &self.services.bridge {
            if let Some(outcome) = bridge.confirm(session_id, text, audit).await {
                return bridge_reply(outcome);
            }
            match bridge.handle(session_id, text, audit).await {
                Ok(BridgeOutcome::NotHandled) => {}
                Ok(outcome) => return bridge_reply(outcome),
                Err(error) => warn!(
                    event_name = "bridge.fallback_to_local_flow",
                    session_id = %session_id.0,
                    correlation_id = %audit.correlation_id,
                    error_class = ApplicationError::from(&error).class(),
                    error = %error,
                    "action bridge unavailable"
                ),
            }
        }

        let today = self.today();
        match detect_intent(text) {
            TurnIntent::ViewReservation => {
                return self.view_reservations(text, session, today, audit).await;
            }
            TurnIntent::Reservation => {
                return self.continue_booking(text, session, today, audit).await;
            }
            TurnIntent::Other if session.booking_active || !session.draft.is_empty() => {
                return self.continue_booking(text, session, today, audit).await;
            }
            TurnIntent::Other => {}
        }

        self.converse(text, session, today, audit).await
    }

    async fn view_reservations(
        &self,
        text: &str,
        session: &SessionState,
        today: NaiveDate,
        audit: &AuditContext,
    ) -> TurnReply {
        let phone = self
            .extractor
            .scan(text, today)
            .customer_phone
            .or_else(|| session.draft.customer_phone.clone());
        match phone {
            Some(phone) => TurnReply::text(self.phone_summary(&phone, audit).await),
            None => TurnReply::text(ASK_PHONE_FOR_LOOKUP),
        }
    }

    async fn continue_booking(
        &self,
        text: &str,
        session: &mut SessionState,
        today: NaiveDate,
        audit: &AuditContext,
    ) -> TurnReply {
        // Slots already in the session draft are kept; the turn only fills gaps.
        let draft = if session.draft.is_empty() {
            self.extractor.extract(text, &session.history, today)
        } else {
            let mut draft = session.draft.clone();
            draft.fill_missing(&self.extractor.scan(text, today));
            draft
        };
        self.book(draft, session, today, audit).await
    }

    async fn book(
        &self,
        mut draft: ReservationDraft,
        session: &mut SessionState,
        today: NaiveDate,
        audit: &AuditContext,
    ) -> TurnReply {
        let attempt = self.services.engine.attempt(&draft, today, audit).await;
        let mut reply = match &attempt {
            BookingAttempt::Failed(error) => TurnReply::text(self.failure_reply(error, audit)),
            attempt => TurnReply::text(attempt.reply()),
        };

        match &attempt {
            BookingAttempt::Booked(confirmation) => {
                reply.side_effect_summary =
                    Some(format!("reservation {} created", confirmation.record.id.0));
                session.draft = ReservationDraft::default();
                session.booking_active = false;
            }
            BookingAttempt::Unavailable { .. } => {
                draft.reservation_time = None;
                session.draft = draft;
                session.booking_active = true;
            }
            BookingAttempt::Incomplete(report) => {
                for error in &report.format_errors {
                    draft.clear(error.field);
                }
                session.draft = draft;
                session.booking_active = true;
            }
            BookingAttempt::Failed(_) => {
                session.draft = draft;
                session.booking_active = true;
            }
        }
        reply
    }

    async fn converse(
        &self,
        text: &str,
        session: &mut SessionState,
        today: NaiveDate,
        audit: &AuditContext,
    ) -> TurnReply {
        let snapshot = match self.services.engine.summary_snapshot(today).await {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                warn!(
                    event_name = "dialogue.snapshot_failed",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "floor snapshot unavailable"
                );
                None
            }
        };
        let instruction = match self.prompts.instruction(today, snapshot.as_ref(), &session.draft) {
            Ok(instruction) => instruction,
            Err(error) => {
                warn!(
                    event_name = "dialogue.prompt_render_failed",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "system instruction could not be rendered"
                );
                return TurnReply::text(APOLOGY);
            }
        };
        session.history.set_system(instruction.clone());

        let mut turns = session.history.turns().to_vec();
        turns.push(ConversationTurn::user(text));
        let raw = match self.services.generator.generate(&instruction, &turns).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(
                    event_name = "dialogue.generator_failed",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "text generator unavailable"
                );
                return TurnReply::text(APOLOGY);
            }
        };

        let mut reply = TurnReply {
            response_text: self.markup.strip(&raw),
            card: self.markup.extract_card(&raw),
            side_effect_summary: None,
        };

        let mut follow_ups = Vec::new();
        if let Some(payload) = self.markup.extract(BlockTag::CreateReservation, &raw) {
            let trigger = self.markup.trigger(&payload);
            let mut draft = session.draft.clone();
            draft.fill_missing(&draft_from_arguments(&trigger.arguments));
            let booked = self.book(draft, session, today, audit).await;
            follow_ups.push(booked.response_text);
            reply.side_effect_summary = booked.side_effect_summary;
        }
        if let Some(payload) = self.markup.extract(BlockTag::CheckReservation, &raw) {
            let phone = payload
                .field("customer_phone")
                .or_else(|| payload.field("phone"))
                .map(str::to_string)
                .or_else(|| session.draft.customer_phone.clone());
            follow_ups.push(match phone {
                Some(phone) => self.phone_summary(&phone, audit).await,
                None => ASK_PHONE_FOR_LOOKUP.to_string(),
            });
        }

        for follow_up in follow_ups.into_iter().filter(|text| !text.is_empty()) {
            if reply.response_text.is_empty() {
                reply.response_text = follow_up;
            } else {
                reply.response_text = format!("{}\n\n{follow_up}", reply.response_text);
            }
        }
        reply
    }

    async fn phone_summary(&self, phone: &str, audit: &AuditContext) -> String {
        match self.services.engine.summary_for_phone(phone).await {
            Ok(summary) => summary,
            Err(error) => self.failure_reply(&error, audit),
        }
    }

    /// Rule rejections keep the engine's wording; storage and template
    /// failures get the generic interface message.
    fn failure_reply(&self, error: &BookingError, audit: &AuditContext) -> String {
        let application = ApplicationError::from(error);
        warn!(
            event_name = "reservation.operation_failed",
            correlation_id = %audit.correlation_id,
            error_class = application.class(),
            error = %error,
            "reservation engine call failed"
        );
        match application {
            ApplicationError::Domain(_) => error.user_message(),
            other => other.into_interface(audit.correlation_id.clone()).user_message().to_string(),
        }
    }
}

fn bridge_reply(outcome: BridgeOutcome) -> TurnReply {
    let side_effect_summary = match &outcome {
        BridgeOutcome::Executed { action, .. } => Some(format!("{} executed", action.as_str())),
        BridgeOutcome::ConfirmationRequested { action, .. } => {
            Some(format!("{} awaiting confirmation", action.as_str()))
        }
        _ => None,
    };
    TurnReply {
        response_text: outcome.message().unwrap_or(APOLOGY).to_string(),
        card: None,
        side_effect_summary,
    }
}

/// Draft from a `[CREATE_RESERVATION]` block. Short keys are accepted as
/// aliases.
fn draft_from_arguments(arguments: &ActionArguments) -> ReservationDraft {
    let text = |keys: &[&str]| {
        keys.iter().find_map(|key| match arguments.get(*key)? {
            Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        })
    };

    ReservationDraft {
        customer_name: text(&["customer_name", "name"]),
        customer_phone: text(&["customer_phone", "phone"]),
        customer_email: text(&["customer_email", "email"]),
        party_size: text(&["party_size", "people"]).and_then(|raw| parse_number(&raw)),
        reservation_date: text(&["reservation_date", "date"]),
        reservation_time: text(&["reservation_time", "time"]),
        special_requests: text(&["special_requests", "notes"]),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{Days, FixedOffset, NaiveDate, Utc};
    use serde_json::json;

    use maitre_core::audit::InMemoryAuditSink;
    use maitre_core::domain::action::{BridgeAction, ConfirmationToken};
    use maitre_core::domain::conversation::{ConversationTurn, SessionId};
    use maitre_core::domain::reservation::{ReservationStatus, RestaurantId};
    use maitre_core::domain::table::{TableId, TableResource, TableStatus};
    use maitre_core::flows::TurnState;
    use maitre_core::reservation::ReservationValidator;
    use maitre_db::{
        connect, migrations, InMemoryReservationRepository, InMemoryTableRepository,
        ReservationRepository, SqlReservationRepository, SqlTableRepository, TableRepository,
    };

    use super::{draft_from_arguments, AgentRuntime, AgentServices, RuntimeSettings, APOLOGY};
    use crate::booking::{ConfirmationRenderer, ReservationEngine};
    use crate::bridge::{
        ActionBridge, ActionCatalog, ActionService, BridgeError, ExecutionOutcome, Interpretation,
    };
    use crate::guardrails::GuardrailPolicy;
    use crate::llm::{GeneratorError, TextGenerator, UnconfiguredGenerator};
    use crate::pacing::{Pacer, PresenceSink, TracingPresence};

    const OFFSET_HOURS: i32 = 8;

    #[derive(Default)]
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<String>>,
        instructions: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn replying(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|reply| reply.to_string()).collect()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.instructions.lock().expect("instructions lock").len()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            instruction: &str,
            _history: &[ConversationTurn],
        ) -> Result<String, GeneratorError> {
            self.instructions.lock().expect("instructions lock").push(instruction.to_string());
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .ok_or_else(|| GeneratorError::Transport("script exhausted".to_string()))
        }
    }

    struct UnreachableService;

    #[async_trait]
    impl ActionService for UnreachableService {
        async fn interpret(
            &self,
            _session_id: &SessionId,
            _text: &str,
        ) -> Result<Interpretation, BridgeError> {
            Err(BridgeError::Unreachable("connection refused (os error 111)".to_string()))
        }

        async fn execute(
            &self,
            _action: &BridgeAction,
            _token: Option<&ConfirmationToken>,
        ) -> Result<ExecutionOutcome, BridgeError> {
            Err(BridgeError::Unreachable("connection refused (os error 111)".to_string()))
        }

        async fn catalog(&self) -> Result<ActionCatalog, BridgeError> {
            Err(BridgeError::Unreachable("connection refused (os error 111)".to_string()))
        }
    }

    #[derive(Default)]
    struct CheckoutService {
        executed: Mutex<Vec<Option<ConfirmationToken>>>,
    }

    #[async_trait]
    impl ActionService for CheckoutService {
        async fn interpret(
            &self,
            _session_id: &SessionId,
            text: &str,
        ) -> Result<Interpretation, BridgeError> {
            if !text.contains("結帳") {
                return Ok(Interpretation::Unknown);
            }
            Ok(Interpretation::Action {
                action: "close_order".to_string(),
                arguments: [("order_id".to_string(), json!("O-7"))].into_iter().collect(),
                reason: None,
                requires_confirmation: false,
            })
        }

        async fn execute(
            &self,
            action: &BridgeAction,
            token: Option<&ConfirmationToken>,
        ) -> Result<ExecutionOutcome, BridgeError> {
            self.executed.lock().expect("executed lock").push(token.cloned());
            Ok(ExecutionOutcome::Completed {
                action: action.kind().as_str().to_string(),
                data: json!({ "status": "closed" }),
            })
        }

        async fn catalog(&self) -> Result<ActionCatalog, BridgeError> {
            Ok(ActionCatalog::default())
        }
    }

    struct Harness {
        runtime: AgentRuntime,
        tables: Arc<InMemoryTableRepository>,
        reservations: Arc<InMemoryReservationRepository>,
        audit: InMemoryAuditSink,
    }

    fn table(id: &str, capacity: u32) -> TableResource {
        TableResource {
            id: TableId(id.to_string()),
            restaurant_id: RestaurantId("main".to_string()),
            name: format!("{id} 桌"),
            capacity,
            status: TableStatus::Available,
            location: "main hall".to_string(),
            features: Vec::new(),
        }
    }

    #[derive(Default)]
    struct RecordingPresence {
        signals: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl PresenceSink for RecordingPresence {
        async fn read(&self, _session_id: &SessionId) {
            self.signals.lock().expect("signals lock").push("read");
        }

        async fn typing(&self, _session_id: &SessionId, _estimate: Duration) {
            self.signals.lock().expect("signals lock").push("typing");
        }
    }

    fn harness(
        generator: Arc<dyn TextGenerator>,
        service: Option<Arc<dyn ActionService>>,
    ) -> Harness {
        harness_with_presence(generator, service, Arc::new(TracingPresence))
    }

    fn harness_with_presence(
        generator: Arc<dyn TextGenerator>,
        service: Option<Arc<dyn ActionService>>,
        presence: Arc<dyn PresenceSink>,
    ) -> Harness {
        let tables = Arc::new(InMemoryTableRepository::with_tables([
            table("T01", 2),
            table("T02", 4),
        ]));
        let reservations = Arc::new(InMemoryReservationRepository::default());
        let audit = InMemoryAuditSink::default();
        let engine = ReservationEngine::new(
            reservations.clone(),
            tables.clone(),
            ReservationValidator::default(),
            ConfirmationRenderer::new("Maitre Bistro").expect("templates"),
            RestaurantId("main".to_string()),
            Arc::new(audit.clone()),
        );
        let bridge = service.map(|service| {
            Arc::new(ActionBridge::new(
                service,
                GuardrailPolicy::default(),
                Duration::from_secs(60),
                Arc::new(audit.clone()),
            ))
        });
        let services = AgentServices {
            engine: Arc::new(engine),
            generator,
            bridge,
            presence,
            audit: Arc::new(audit.clone()),
        };
        let runtime = AgentRuntime::new(services, settings()).expect("runtime");
        Harness { runtime, tables, reservations, audit }
    }

    fn settings() -> RuntimeSettings {
        RuntimeSettings {
            restaurant_name: "Maitre Bistro".to_string(),
            utc_offset: offset(),
            max_history_turns: 20,
            pacer: Pacer::disabled(),
        }
    }

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(OFFSET_HOURS * 3_600).expect("offset")
    }

    fn tomorrow() -> NaiveDate {
        Utc::now()
            .with_timezone(&offset())
            .date_naive()
            .checked_add_days(Days::new(1))
            .expect("tomorrow")
    }

    fn session() -> SessionId {
        SessionId("web-1".to_string())
    }

    #[tokio::test]
    async fn scenario_utterance_books_a_table_locally() {
        let generator = Arc::new(ScriptedGenerator::default());
        let harness = harness(generator.clone(), None);

        let first = harness.runtime.process_turn(&session(), "我想訂位").await;
        assert!(first.response_text.starts_with("請提供："), "{}", first.response_text);

        let reply = harness
            .runtime
            .process_turn(&session(), "我是王小明，電話0912345678，明天晚上7點，4個人")
            .await;
        assert!(reply.response_text.contains("訂位成功"), "{}", reply.response_text);
        assert!(reply.side_effect_summary.is_some());
        assert_eq!(generator.calls(), 0);

        let booked = harness
            .reservations
            .find_by_phone("0912345678")
            .await
            .expect("lookup");
        assert_eq!(booked.len(), 1);
        assert_eq!(booked[0].customer_name, "王小明");
        assert_eq!(booked[0].party_size, 4);
        assert_eq!(booked[0].reservation_date, tomorrow());
        assert_eq!(booked[0].reservation_time.format("%H:%M").to_string(), "19:00");
        assert_eq!(booked[0].status, ReservationStatus::Confirmed);
        assert_eq!(booked[0].table_id, TableId("T02".to_string()));

        let table = harness
            .tables
            .find_by_id(&TableId("T02".to_string()))
            .await
            .expect("table lookup")
            .expect("table");
        assert_eq!(table.status, TableStatus::Reserved);
        assert_eq!(harness.audit.events_of_type("reservation.created").len(), 1);
    }

    #[tokio::test]
    async fn later_turns_only_fill_empty_slots() {
        let harness = harness(Arc::new(ScriptedGenerator::default()), None);

        harness.runtime.process_turn(&session(), "我想訂位，我是王小明，4個人").await;
        harness.runtime.process_turn(&session(), "我是陳大文，兩位").await;

        let handle = harness.runtime.sessions.handle(&session()).await;
        let state = handle.lock().await;
        assert_eq!(state.draft.customer_name.as_deref(), Some("王小明"));
        assert_eq!(state.draft.party_size, Some(4));
    }

    #[tokio::test]
    async fn rejected_slot_is_asked_again_and_refilled() {
        let harness = harness(Arc::new(ScriptedGenerator::default()), None);

        let rejected = harness
            .runtime
            .process_turn(&session(), "我想訂位，我是王小明，電話0912345678，2020-01-01 晚上7點，2個人")
            .await;
        assert!(
            rejected.response_text.contains("訂位日期不能早於今天"),
            "{}",
            rejected.response_text
        );
        {
            let handle = harness.runtime.sessions.handle(&session()).await;
            let state = handle.lock().await;
            assert_eq!(state.draft.reservation_date, None);
            assert_eq!(state.draft.customer_name.as_deref(), Some("王小明"));
        }

        let booked = harness.runtime.process_turn(&session(), "那改明天").await;
        assert!(booked.response_text.contains("訂位成功"), "{}", booked.response_text);
        let records = harness.reservations.find_by_phone("0912345678").await.expect("lookup");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reservation_date, tomorrow());
    }

    #[tokio::test]
    async fn paced_turn_sends_read_then_typing() {
        let presence = Arc::new(RecordingPresence::default());
        let harness = harness_with_presence(
            Arc::new(ScriptedGenerator::default()),
            None,
            presence.clone(),
        );

        harness.runtime.process_turn(&session(), "我想訂位").await;

        assert_eq!(*presence.signals.lock().expect("signals lock"), vec!["read", "typing"]);
        assert_eq!(harness.audit.events_of_type("dialogue.turn_transition_applied").len(), 4);
    }

    #[tokio::test]
    async fn unreachable_bridge_falls_back_without_leaking_errors() {
        let harness =
            harness(Arc::new(ScriptedGenerator::default()), Some(Arc::new(UnreachableService)));

        let reply = harness.runtime.process_turn(&session(), "我想訂位").await;
        assert!(reply.response_text.contains("請提供："), "{}", reply.response_text);
        assert!(!reply.response_text.contains("os error"));
        assert!(!reply.response_text.contains("unreachable"));
    }

    #[tokio::test]
    async fn sensitive_bridge_action_needs_the_token_on_a_later_turn() {
        let service = Arc::new(CheckoutService::default());
        let harness = harness(Arc::new(ScriptedGenerator::default()), Some(service.clone()));

        let asked = harness.runtime.process_turn(&session(), "幫我結帳").await;
        let token = asked
            .response_text
            .split_whitespace()
            .find(|word| ConfirmationToken::matches_grammar(word))
            .expect("token in reply")
            .to_string();
        assert!(service.executed.lock().expect("executed lock").is_empty());

        let done = harness.runtime.process_turn(&session(), &token).await;
        assert_eq!(done.response_text, "已完成結帳。");
        assert_eq!(done.side_effect_summary.as_deref(), Some("close_order executed"));

        let executed = service.executed.lock().expect("executed lock").clone();
        assert_eq!(executed, vec![Some(ConfirmationToken(token))]);
    }

    #[tokio::test]
    async fn generator_create_block_books_and_is_stripped() {
        let date = tomorrow().format("%Y-%m-%d").to_string();
        let script = format!(
            "好的，馬上為您處理。\n[CREATE_RESERVATION]\naction: create_reservation\ncustomer_name: 李大華\ncustomer_phone: 0987654321\nparty_size: 2\nreservation_date: {date}\nreservation_time: 18:00\n[/CREATE_RESERVATION]"
        );
        let generator = Arc::new(ScriptedGenerator::replying(&[script.as_str()]));
        let harness = harness(generator.clone(), None);

        let reply = harness.runtime.process_turn(&session(), "你好").await;
        assert!(!reply.response_text.contains("[CREATE_RESERVATION]"));
        assert!(reply.response_text.starts_with("好的，馬上為您處理。"));
        assert!(reply.response_text.contains("訂位成功"), "{}", reply.response_text);
        assert!(reply.side_effect_summary.is_some());
        assert_eq!(generator.calls(), 1);

        let instruction = generator.instructions.lock().expect("instructions lock")[0].clone();
        assert!(instruction.contains("共 2 張桌"));
    }

    #[tokio::test]
    async fn form_block_becomes_a_card() {
        let script = "請填寫表單。\n[RESERVATION_FORM]\naction: show_reservation_form\ntitle: 線上訂位\nrequired_fields: [customer_name, customer_phone]\n[/RESERVATION_FORM]";
        let harness = harness(Arc::new(ScriptedGenerator::replying(&[script])), None);

        let reply = harness.runtime.process_turn(&session(), "哈囉").await;
        assert_eq!(reply.response_text, "請填寫表單。");
        let card = reply.card.expect("card");
        assert_eq!(card.title.as_deref(), Some("線上訂位"));
        assert_eq!(card.required_fields, vec!["customer_name", "customer_phone"]);
    }

    #[tokio::test]
    async fn generator_failure_is_an_apology_and_history_is_kept() {
        let harness = harness(Arc::new(UnconfiguredGenerator::new("no provider")), None);

        let reply = harness.runtime.process_turn(&session(), "你們幾點開門？").await;
        assert_eq!(reply.response_text, APOLOGY);

        let handle = harness.runtime.sessions.handle(&session()).await;
        let state = handle.lock().await;
        assert_eq!(state.turn_state, TurnState::Idle);
        let contents =
            state.history.turns().iter().map(|turn| turn.content.as_str()).collect::<Vec<_>>();
        assert!(contents.contains(&"你們幾點開門？"));
        assert!(contents.contains(&APOLOGY));
    }

    #[tokio::test]
    async fn storage_outage_gets_the_generic_apology() {
        let pool = connect("sqlite::memory:").await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        let engine = ReservationEngine::new(
            Arc::new(SqlReservationRepository::new(pool.clone())),
            Arc::new(SqlTableRepository::new(pool.clone())),
            ReservationValidator::default(),
            ConfirmationRenderer::new("Maitre Bistro").expect("templates"),
            RestaurantId("main".to_string()),
            Arc::new(InMemoryAuditSink::default()),
        );
        pool.close().await;
        let services = AgentServices {
            engine: Arc::new(engine),
            generator: Arc::new(ScriptedGenerator::default()),
            bridge: None,
            presence: Arc::new(TracingPresence),
            audit: Arc::new(InMemoryAuditSink::default()),
        };
        let runtime = AgentRuntime::new(services, settings()).expect("runtime");

        let reply = runtime.process_turn(&session(), "查詢訂位，電話0912345678").await;
        assert_eq!(reply.response_text, "抱歉，系統暫時忙碌中，請稍後再試。");
    }

    #[tokio::test]
    async fn view_intent_renders_the_summary() {
        let harness = harness(Arc::new(ScriptedGenerator::default()), None);

        let missing = harness.runtime.process_turn(&session(), "我要查詢訂位").await;
        assert_eq!(missing.response_text, super::ASK_PHONE_FOR_LOOKUP);

        let empty = harness
            .runtime
            .process_turn(&session(), "查詢訂位，電話0912345678")
            .await;
        assert_eq!(empty.response_text, "查無此電話的訂位紀錄。");
    }

    #[tokio::test]
    async fn end_session_forgets_state() {
        let harness = harness(Arc::new(ScriptedGenerator::default()), None);
        harness.runtime.process_turn(&session(), "我想訂位").await;
        assert_eq!(harness.runtime.active_sessions().await, 1);

        assert!(harness.runtime.end_session(&session()).await);
        assert!(!harness.runtime.end_session(&session()).await);
        assert_eq!(harness.runtime.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn idle_sweep_drops_sessions_and_parked_actions() {
        let harness = harness(
            Arc::new(ScriptedGenerator::default()),
            Some(Arc::new(CheckoutService::default())),
        );
        harness.runtime.process_turn(&session(), "幫我結帳").await;
        let bridge = harness.runtime.services.bridge.clone().expect("bridge");
        assert!(bridge.pending_for(&session()).await.is_some());

        assert_eq!(harness.runtime.evict_idle_sessions(Duration::from_secs(3_600)).await, 0);
        assert_eq!(harness.runtime.active_sessions().await, 1);

        assert_eq!(harness.runtime.evict_idle_sessions(Duration::ZERO).await, 1);
        assert_eq!(harness.runtime.active_sessions().await, 0);
        assert!(bridge.pending_for(&session()).await.is_none());
    }

    #[test]
    fn block_arguments_accept_short_aliases() {
        let arguments = [
            ("name".to_string(), json!("王小明")),
            ("phone".to_string(), json!("0912345678")),
            ("people".to_string(), json!("四")),
            ("time".to_string(), json!("19:00")),
        ]
        .into_iter()
        .collect();

        let draft = draft_from_arguments(&arguments);
        assert_eq!(draft.customer_name.as_deref(), Some("王小明"));
        assert_eq!(draft.party_size, Some(4));
        assert_eq!(draft.reservation_time.as_deref(), Some("19:00"));
        assert!(draft.reservation_date.is_none());
    }
}
