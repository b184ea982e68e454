//! Reservation engine: validation, availability, booking and status changes
//! over the repository traits.

pub mod render;

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use maitre_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use maitre_core::domain::reservation::{
    ReservationDraft, ReservationId, ReservationRecord, ReservationRequest, ReservationStatus,
    RestaurantId,
};
use maitre_core::domain::table::{TableResource, TableStatus};
use maitre_core::errors::{ApplicationError, DomainError};
use maitre_core::reservation::{
    alternative_candidates, find_available, normalize_phone, ReservationValidator,
    ValidationReport,
};
use maitre_db::{RepositoryError, ReservationRepository, TableRepository};

pub use render::ConfirmationRenderer;

pub const MAX_ALTERNATIVES: usize = 3;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("no table seats {party_size} guests on {date} at {time}")]
    NoTableAvailable { date: NaiveDate, time: NaiveTime, party_size: u32 },
    #[error("reservation `{0}` does not exist")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("reservation storage failed: {0}")]
    Repository(#[from] RepositoryError),
    #[error("confirmation rendering failed: {0}")]
    Render(#[from] tera::Error),
}

impl BookingError {
    /// Guest-facing wording. Storage and template details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoTableAvailable { date, time, party_size } => format!(
                "抱歉，{} {} 已沒有可容納 {party_size} 位的桌位。",
                date.format("%Y-%m-%d"),
                time.format("%H:%M")
            ),
            Self::NotFound(_) => "找不到這筆訂位紀錄。".to_string(),
            Self::Domain(_) => "這筆訂位目前的狀態無法進行此操作。".to_string(),
            Self::Repository(_) | Self::Render(_) => {
                "抱歉，訂位系統暫時無法使用，請稍後再試。".to_string()
            }
        }
    }
}

impl From<&BookingError> for ApplicationError {
    fn from(error: &BookingError) -> Self {
        match error {
            BookingError::NoTableAvailable { .. } | BookingError::NotFound(_) => {
                Self::Domain(DomainError::Rejected(error.to_string()))
            }
            BookingError::Domain(domain) => Self::Domain(domain.clone()),
            BookingError::Repository(source) => Self::Persistence(source.to_string()),
            BookingError::Render(source) => Self::Configuration(source.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingConfirmation {
    pub record: ReservationRecord,
    pub table: TableResource,
    pub message: String,
}

/// Result of running a draft through validation and booking.
#[derive(Debug)]
pub enum BookingAttempt {
    Incomplete(ValidationReport),
    Booked(BookingConfirmation),
    Unavailable { reason: String, alternatives: Vec<NaiveTime> },
    Failed(BookingError),
}

impl BookingAttempt {
    /// Text to show the guest for this outcome.
    pub fn reply(&self) -> String {
        match self {
            Self::Incomplete(report) => report.follow_up_prompt().unwrap_or_default(),
            Self::Booked(confirmation) => confirmation.message.clone(),
            Self::Unavailable { reason, alternatives } if alternatives.is_empty() => {
                format!("{reason}當天其他時段也已客滿，請換個日期試試。")
            }
            Self::Unavailable { reason, alternatives } => {
                let slots = alternatives
                    .iter()
                    .map(|time| time.format("%H:%M").to_string())
                    .collect::<Vec<_>>();
                format!("{reason}以下時段還有空位：{}，請問要改訂哪個時段？", slots.join("、"))
            }
            Self::Failed(error) => error.user_message(),
        }
    }
}

/// Table and reservation counts fed into the system instruction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorSnapshot {
    pub date: String,
    pub total_tables: usize,
    pub available_tables: usize,
    pub active_reservations: usize,
}

pub struct ReservationEngine {
    reservations: Arc<dyn ReservationRepository>,
    tables: Arc<dyn TableRepository>,
    validator: ReservationValidator,
    renderer: ConfirmationRenderer,
    restaurant_id: RestaurantId,
    audit: Arc<dyn AuditSink>,
}

impl ReservationEngine {
    pub fn new(
        reservations: Arc<dyn ReservationRepository>,
        tables: Arc<dyn TableRepository>,
        validator: ReservationValidator,
        renderer: ConfirmationRenderer,
        restaurant_id: RestaurantId,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { reservations, tables, validator, renderer, restaurant_id, audit }
    }

    pub fn restaurant_id(&self) -> &RestaurantId {
        &self.restaurant_id
    }

    pub fn validate(&self, draft: &ReservationDraft, today: NaiveDate) -> ValidationReport {
        self.validator.validate(draft, today, &self.restaurant_id)
    }

    /// Open tables for the party, closest fit first.
    pub async fn find_available(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u32,
        restaurant_id: &RestaurantId,
    ) -> Result<Vec<TableResource>, BookingError> {
        let tables = self.tables.list_for_restaurant(restaurant_id).await?;
        let reservations = self.reservations.list_for_date(restaurant_id, date).await?;
        Ok(find_available(&tables, &reservations, date, time, party_size))
    }

    /// Books the closest-fitting table and marks it reserved.
    ///
    /// Availability is checked and then acted on without a lock, so two
    /// concurrent bookings can race for the same table.
    pub async fn create(
        &self,
        request: ReservationRequest,
        audit: &AuditContext,
    ) -> Result<BookingConfirmation, BookingError> {
        let open = self
            .find_available(
                request.reservation_date,
                request.reservation_time,
                request.party_size,
                &request.restaurant_id,
            )
            .await?;

        let Some(table) = open.into_iter().next() else {
            self.audit.emit(
                AuditEvent::new(
                    audit.session_id.clone(),
                    audit.correlation_id.clone(),
                    "reservation.unavailable",
                    AuditCategory::Reservation,
                    audit.actor.clone(),
                    AuditOutcome::Rejected,
                )
                .with_metadata("date", request.reservation_date.to_string())
                .with_metadata("time", request.reservation_time.format("%H:%M").to_string())
                .with_metadata("party_size", request.party_size.to_string()),
            );
            return Err(BookingError::NoTableAvailable {
                date: request.reservation_date,
                time: request.reservation_time,
                party_size: request.party_size,
            });
        };

        let id = reservation_id(request.reservation_date);
        let record = ReservationRecord::from_request(id, table.id.clone(), request, Utc::now());
        self.reservations.save(record.clone()).await?;
        if !self.tables.update_status(&table.id, TableStatus::Reserved).await? {
            warn!(
                event_name = "reservation.table_missing",
                table_id = %table.id.0,
                reservation_id = %record.id.0,
                "booked table disappeared before it could be marked reserved"
            );
        }

        info!(
            event_name = "reservation.created",
            correlation_id = %audit.correlation_id,
            reservation_id = %record.id.0,
            table_id = %table.id.0,
            party_size = record.party_size,
            "reservation created"
        );
        self.audit.emit(
            AuditEvent::new(
                audit.session_id.clone(),
                audit.correlation_id.clone(),
                "reservation.created",
                AuditCategory::Reservation,
                audit.actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("reservation_id", record.id.0.clone())
            .with_metadata("table_id", table.id.0.clone()),
        );

        let message = self.renderer.confirmation(&record, &table.name)?;
        let table = TableResource { status: TableStatus::Reserved, ..table };
        Ok(BookingConfirmation { record, table, message })
    }

    /// Up to three candidate times on `date` that still have a table,
    /// skipping `exclude_time`.
    pub async fn alternatives(
        &self,
        date: NaiveDate,
        party_size: u32,
        exclude_time: Option<NaiveTime>,
    ) -> Result<Vec<NaiveTime>, BookingError> {
        let tables = self.tables.list_for_restaurant(&self.restaurant_id).await?;
        let reservations = self.reservations.list_for_date(&self.restaurant_id, date).await?;

        Ok(alternative_candidates()
            .filter(|time| Some(*time) != exclude_time)
            .filter(|time| !find_available(&tables, &reservations, date, *time, party_size).is_empty())
            .take(MAX_ALTERNATIVES)
            .collect())
    }

    /// Validates the draft and books it when complete. Never returns an
    /// error; failures become [`BookingAttempt::Failed`].
    pub async fn attempt(
        &self,
        draft: &ReservationDraft,
        today: NaiveDate,
        audit: &AuditContext,
    ) -> BookingAttempt {
        let report = self.validate(draft, today);
        let Some(request) = report.request.clone().filter(|_| report.is_valid) else {
            return BookingAttempt::Incomplete(report);
        };

        let (date, time, party_size) =
            (request.reservation_date, request.reservation_time, request.party_size);
        match self.create(request, audit).await {
            Ok(confirmation) => BookingAttempt::Booked(confirmation),
            Err(error @ BookingError::NoTableAvailable { .. }) => {
                let alternatives = match self.alternatives(date, party_size, Some(time)).await {
                    Ok(alternatives) => alternatives,
                    Err(lookup_error) => {
                        warn!(
                            event_name = "reservation.alternatives_failed",
                            error = %lookup_error,
                            "could not compute alternative slots"
                        );
                        Vec::new()
                    }
                };
                BookingAttempt::Unavailable { reason: error.user_message(), alternatives }
            }
            Err(error) => {
                warn!(
                    event_name = "reservation.create_failed",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "reservation could not be created"
                );
                BookingAttempt::Failed(error)
            }
        }
    }

    /// Moves a reservation along its lifecycle. Cancelling or completing
    /// hands the table back.
    pub async fn transition(
        &self,
        id: &ReservationId,
        next: ReservationStatus,
        audit: &AuditContext,
    ) -> Result<ReservationRecord, BookingError> {
        let mut record = self
            .reservations
            .find_by_id(id)
            .await?
            .ok_or_else(|| BookingError::NotFound(id.0.clone()))?;
        let previous = record.status;

        if let Err(error) = record.transition_to(next) {
            self.audit.emit(
                AuditEvent::new(
                    audit.session_id.clone(),
                    audit.correlation_id.clone(),
                    "reservation.transition_rejected",
                    AuditCategory::Reservation,
                    audit.actor.clone(),
                    AuditOutcome::Rejected,
                )
                .with_metadata("reservation_id", id.0.clone())
                .with_metadata("error", error.to_string()),
            );
            return Err(error.into());
        }

        self.reservations.update_status(id, next).await?;
        if next.releases_table() {
            self.tables.update_status(&record.table_id, TableStatus::Available).await?;
        }

        self.audit.emit(
            AuditEvent::new(
                audit.session_id.clone(),
                audit.correlation_id.clone(),
                "reservation.status_changed",
                AuditCategory::Reservation,
                audit.actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("reservation_id", id.0.clone())
            .with_metadata("from", previous.as_str())
            .with_metadata("to", next.as_str()),
        );
        Ok(record)
    }

    pub async fn lookup_by_phone(&self, phone: &str) -> Result<Vec<ReservationRecord>, BookingError> {
        Ok(self.reservations.find_by_phone(&normalize_phone(phone)).await?)
    }

    /// Rendered summary of the reservations under `phone`, newest first.
    pub async fn summary_for_phone(&self, phone: &str) -> Result<String, BookingError> {
        let records = self.lookup_by_phone(phone).await?;
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let table_name = self
                .tables
                .find_by_id(&record.table_id)
                .await?
                .map(|table| table.name)
                .unwrap_or_else(|| record.table_id.0.clone());
            rows.push((record, table_name));
        }
        Ok(self.renderer.summary(&rows)?)
    }

    pub async fn summary_snapshot(&self, date: NaiveDate) -> Result<FloorSnapshot, BookingError> {
        let tables = self.tables.list_for_restaurant(&self.restaurant_id).await?;
        let reservations = self.reservations.list_for_date(&self.restaurant_id, date).await?;

        Ok(FloorSnapshot {
            date: date.format("%Y-%m-%d").to_string(),
            total_tables: tables.len(),
            available_tables: tables
                .iter()
                .filter(|table| table.status == TableStatus::Available)
                .count(),
            active_reservations: reservations
                .iter()
                .filter(|reservation| reservation.status.occupies_table())
                .count(),
        })
    }
}

/// `RES-YYYYMMDD-XXXXXXXX`, dated by the reservation day.
fn reservation_id(date: NaiveDate) -> ReservationId {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    ReservationId(format!("RES-{}-{suffix}", date.format("%Y%m%d")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveTime};

    use maitre_core::audit::{AuditContext, InMemoryAuditSink};
    use maitre_core::domain::conversation::SessionId;
    use maitre_core::domain::reservation::{
        ReservationDraft, ReservationId, ReservationStatus, RestaurantId,
    };
    use maitre_core::domain::table::{TableId, TableResource, TableStatus};
    use maitre_core::reservation::ReservationValidator;
    use maitre_db::{
        InMemoryReservationRepository, InMemoryTableRepository, ReservationRepository,
        TableRepository,
    };

    use maitre_core::errors::{ApplicationError, DomainError};
    use maitre_db::RepositoryError;

    use super::{BookingAttempt, BookingError, ConfirmationRenderer, ReservationEngine};

    struct Harness {
        engine: ReservationEngine,
        tables: Arc<InMemoryTableRepository>,
        reservations: Arc<InMemoryReservationRepository>,
        audit: InMemoryAuditSink,
    }

    fn table(id: &str, name: &str, capacity: u32) -> TableResource {
        TableResource {
            id: TableId(id.to_string()),
            restaurant_id: RestaurantId("main".to_string()),
            name: name.to_string(),
            capacity,
            status: TableStatus::Available,
            location: "main hall".to_string(),
            features: Vec::new(),
        }
    }

    fn harness(tables: Vec<TableResource>) -> Harness {
        let tables = Arc::new(InMemoryTableRepository::with_tables(tables));
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
        Harness { engine, tables, reservations, audit }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).expect("date")
    }

    fn context() -> AuditContext {
        AuditContext::new(Some(SessionId("s-1".to_string())), "turn-1", "test")
    }

    fn draft(name: &str, time: &str, party_size: u32) -> ReservationDraft {
        ReservationDraft {
            customer_name: Some(name.to_string()),
            customer_phone: Some("0912-345-678".to_string()),
            customer_email: None,
            party_size: Some(party_size),
            reservation_date: Some("2026-10-19".to_string()),
            reservation_time: Some(time.to_string()),
            special_requests: None,
        }
    }

    #[tokio::test]
    async fn validate_create_reserves_the_closest_fit() {
        let harness = harness(vec![table("T6", "大廳 2", 6), table("T4", "窗邊 2", 4)]);

        let attempt = harness.engine.attempt(&draft("王小明", "19:00", 4), today(), &context()).await;
        let BookingAttempt::Booked(confirmation) = attempt else {
            panic!("expected a booking, got {attempt:?}");
        };

        assert_eq!(confirmation.table.id.0, "T4");
        assert!(confirmation.record.id.0.starts_with("RES-20261019-"));
        assert_eq!(confirmation.record.id.0.len(), "RES-20261019-".len() + 8);
        assert_eq!(confirmation.record.customer_phone, "0912345678");
        assert_eq!(confirmation.record.status, ReservationStatus::Confirmed);
        assert!(confirmation.message.contains("窗邊 2"));

        let stored = harness
            .reservations
            .find_by_id(&confirmation.record.id)
            .await
            .expect("lookup");
        assert_eq!(stored.as_ref(), Some(&confirmation.record));
        let table = harness.tables.find_by_id(&TableId("T4".to_string())).await.expect("table");
        assert_eq!(table.map(|table| table.status), Some(TableStatus::Reserved));
        assert_eq!(harness.audit.events_of_type("reservation.created").len(), 1);
    }

    #[tokio::test]
    async fn single_table_cannot_be_double_booked() {
        let harness = harness(vec![table("T4", "窗邊 2", 4)]);

        let first = harness.engine.attempt(&draft("王小明", "19:00", 4), today(), &context()).await;
        assert!(matches!(first, BookingAttempt::Booked(_)));

        let second = harness.engine.attempt(&draft("陳大文", "19:30", 4), today(), &context()).await;
        let BookingAttempt::Unavailable { reason, alternatives } = &second else {
            panic!("expected unavailability, got {second:?}");
        };
        assert!(reason.contains("4 位"));
        assert!(alternatives.is_empty());
        assert!(second.reply().contains("其他時段也已客滿"));
        assert_eq!(harness.audit.events_of_type("reservation.unavailable").len(), 1);
    }

    #[tokio::test]
    async fn alternatives_skip_conflicting_candidates() {
        let harness = harness(vec![table("T4", "窗邊 2", 4), table("T2", "吧台 1", 2)]);
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).expect("date");
        let seven = NaiveTime::from_hms_opt(19, 0, 0).expect("time");

        let alternatives =
            harness.engine.alternatives(date, 4, Some(seven)).await.expect("alternatives");
        let labels = alternatives.iter().map(|time| time.format("%H:%M").to_string()).collect::<Vec<_>>();
        assert_eq!(labels, vec!["11:30", "12:00", "12:30"]);

        let too_big = harness.engine.alternatives(date, 8, None).await.expect("alternatives");
        assert!(too_big.is_empty());
    }

    #[tokio::test]
    async fn incomplete_draft_asks_for_exactly_the_missing_fields() {
        let harness = harness(vec![table("T4", "窗邊 2", 4)]);
        let partial = ReservationDraft {
            party_size: Some(4),
            reservation_date: Some("2026-10-19".to_string()),
            reservation_time: Some("19:00".to_string()),
            ..ReservationDraft::default()
        };

        let attempt = harness.engine.attempt(&partial, today(), &context()).await;
        assert!(matches!(attempt, BookingAttempt::Incomplete(_)));
        assert_eq!(attempt.reply(), "請提供：姓名、電話");
    }

    #[tokio::test]
    async fn cancelling_releases_the_table() {
        let harness = harness(vec![table("T4", "窗邊 2", 4)]);
        let BookingAttempt::Booked(confirmation) =
            harness.engine.attempt(&draft("王小明", "19:00", 4), today(), &context()).await
        else {
            panic!("expected a booking");
        };

        let cancelled = harness
            .engine
            .transition(&confirmation.record.id, ReservationStatus::Cancelled, &context())
            .await
            .expect("cancel");
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        let table = harness.tables.find_by_id(&TableId("T4".to_string())).await.expect("table");
        assert_eq!(table.map(|table| table.status), Some(TableStatus::Available));

        let error = harness
            .engine
            .transition(&confirmation.record.id, ReservationStatus::Seated, &context())
            .await
            .expect_err("cancelled reservations cannot be seated");
        assert!(matches!(error, BookingError::Domain(_)));

        let missing = harness
            .engine
            .transition(&ReservationId("RES-404".to_string()), ReservationStatus::Seated, &context())
            .await
            .expect_err("unknown id");
        assert!(matches!(missing, BookingError::NotFound(_)));
        assert_eq!(harness.audit.events_of_type("reservation.status_changed").len(), 1);
        assert_eq!(harness.audit.events_of_type("reservation.transition_rejected").len(), 1);
    }

    #[tokio::test]
    async fn phone_lookup_renders_a_summary() {
        let harness = harness(vec![table("T4", "窗邊 2", 4)]);
        harness.engine.attempt(&draft("王小明", "19:00", 4), today(), &context()).await;

        let summary = harness.engine.summary_for_phone("0912 345 678").await.expect("summary");
        assert!(summary.contains("王小明"));
        assert!(summary.contains("窗邊 2"));

        let none = harness.engine.summary_for_phone("0900000000").await.expect("summary");
        assert_eq!(none, "查無此電話的訂位紀錄。");
    }

    #[tokio::test]
    async fn snapshot_counts_tables_and_active_reservations() {
        let harness = harness(vec![table("T4", "窗邊 2", 4), table("T2", "吧台 1", 2)]);
        harness.engine.attempt(&draft("王小明", "19:00", 4), today(), &context()).await;

        let snapshot = harness
            .engine
            .summary_snapshot(NaiveDate::from_ymd_opt(2026, 10, 19).expect("date"))
            .await
            .expect("snapshot");
        assert_eq!(snapshot.total_tables, 2);
        assert_eq!(snapshot.available_tables, 1);
        assert_eq!(snapshot.active_reservations, 1);
    }

    #[test]
    fn engine_failures_map_onto_application_classes() {
        let full = BookingError::NoTableAvailable {
            date: NaiveDate::from_ymd_opt(2030, 1, 1).expect("date"),
            time: NaiveTime::from_hms_opt(19, 0, 0).expect("time"),
            party_size: 4,
        };
        assert!(matches!(
            ApplicationError::from(&full),
            ApplicationError::Domain(DomainError::Rejected(_))
        ));

        let storage = BookingError::Repository(RepositoryError::Decode("bad status".to_string()));
        assert_eq!(ApplicationError::from(&storage).class(), "persistence");
    }
}
