use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::table::TableId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RestaurantId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Seated,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Seated => "seated",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "seated" => Some(Self::Seated),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Statuses that hold a table and therefore take part in conflict checks.
    pub fn occupies_table(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Seated)
    }

    /// Terminal statuses hand the table back to the floor.
    pub fn releases_table(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Reservation fields the dialogue can ask the guest for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationField {
    CustomerName,
    CustomerPhone,
    PartySize,
    ReservationDate,
    ReservationTime,
}

impl ReservationField {
    pub const REQUIRED: [ReservationField; 5] = [
        Self::CustomerName,
        Self::CustomerPhone,
        Self::PartySize,
        Self::ReservationDate,
        Self::ReservationTime,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::CustomerName => "customer_name",
            Self::CustomerPhone => "customer_phone",
            Self::PartySize => "party_size",
            Self::ReservationDate => "reservation_date",
            Self::ReservationTime => "reservation_time",
        }
    }

    /// Label shown to guests when the field has to be requested.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CustomerName => "姓名",
            Self::CustomerPhone => "電話",
            Self::PartySize => "人數",
            Self::ReservationDate => "日期",
            Self::ReservationTime => "時間",
        }
    }
}

/// A reservation under construction. Date and time stay textual until
/// validation so that malformed values can be reported back to the guest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub party_size: Option<u32>,
    pub reservation_date: Option<String>,
    pub reservation_time: Option<String>,
    pub special_requests: Option<String>,
}

impl ReservationDraft {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Copies every slot from `other` that is still empty here. Filled slots are
    /// never overwritten.
    pub fn fill_missing(&mut self, other: &ReservationDraft) {
        fill(&mut self.customer_name, &other.customer_name);
        fill(&mut self.customer_phone, &other.customer_phone);
        fill(&mut self.customer_email, &other.customer_email);
        if self.party_size.is_none() {
            self.party_size = other.party_size;
        }
        fill(&mut self.reservation_date, &other.reservation_date);
        fill(&mut self.reservation_time, &other.reservation_time);
        fill(&mut self.special_requests, &other.special_requests);
    }

    /// Empties one slot so that the guest's next answer can fill it.
    pub fn clear(&mut self, field: ReservationField) {
        match field {
            ReservationField::CustomerName => self.customer_name = None,
            ReservationField::CustomerPhone => self.customer_phone = None,
            ReservationField::PartySize => self.party_size = None,
            ReservationField::ReservationDate => self.reservation_date = None,
            ReservationField::ReservationTime => self.reservation_time = None,
        }
    }

    pub fn missing_fields(&self) -> Vec<ReservationField> {
        ReservationField::REQUIRED
            .into_iter()
            .filter(|field| match field {
                ReservationField::CustomerName => blank(&self.customer_name),
                ReservationField::CustomerPhone => blank(&self.customer_phone),
                ReservationField::PartySize => self.party_size.is_none(),
                ReservationField::ReservationDate => blank(&self.reservation_date),
                ReservationField::ReservationTime => blank(&self.reservation_time),
            })
            .collect()
    }
}

fn fill(target: &mut Option<String>, source: &Option<String>) {
    if blank(target) {
        if let Some(value) = source.as_ref().filter(|value| !value.trim().is_empty()) {
            *target = Some(value.clone());
        }
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub party_size: u32,
    pub reservation_date: NaiveDate,
    pub reservation_time: NaiveTime,
    pub special_requests: Option<String>,
    pub restaurant_id: RestaurantId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: ReservationId,
    pub restaurant_id: RestaurantId,
    pub table_id: TableId,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub party_size: u32,
    pub reservation_date: NaiveDate,
    pub reservation_time: NaiveTime,
    pub special_requests: Option<String>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl ReservationRecord {
    pub fn from_request(
        id: ReservationId,
        table_id: TableId,
        request: ReservationRequest,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            restaurant_id: request.restaurant_id,
            table_id,
            customer_name: request.customer_name,
            customer_phone: request.customer_phone,
            customer_email: request.customer_email,
            party_size: request.party_size,
            reservation_date: request.reservation_date,
            reservation_time: request.reservation_time,
            special_requests: request.special_requests,
            status: ReservationStatus::Confirmed,
            created_at,
        }
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self.status, next),
            (ReservationStatus::Pending, ReservationStatus::Confirmed)
                | (ReservationStatus::Confirmed, ReservationStatus::Seated)
                | (ReservationStatus::Seated, ReservationStatus::Completed)
                | (ReservationStatus::Pending, ReservationStatus::Cancelled)
                | (ReservationStatus::Confirmed, ReservationStatus::Cancelled)
        )
    }

    pub fn transition_to(&mut self, next: ReservationStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidReservationTransition { from: self.status, to: next })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, Utc};

    use crate::domain::table::TableId;

    use super::{
        ReservationDraft, ReservationField, ReservationId, ReservationRecord, ReservationStatus,
        RestaurantId,
    };

    fn record(status: ReservationStatus) -> ReservationRecord {
        ReservationRecord {
            id: ReservationId("RES-1".to_string()),
            restaurant_id: RestaurantId("main".to_string()),
            table_id: TableId("T1".to_string()),
            customer_name: "王小明".to_string(),
            customer_phone: "0912345678".to_string(),
            customer_email: None,
            party_size: 4,
            reservation_date: NaiveDate::from_ymd_opt(2026, 10, 19).expect("date"),
            reservation_time: NaiveTime::from_hms_opt(19, 0, 0).expect("time"),
            special_requests: None,
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn confirmed_reservation_moves_through_service_lifecycle() {
        let mut reservation = record(ReservationStatus::Confirmed);
        reservation.transition_to(ReservationStatus::Seated).expect("confirmed -> seated");
        reservation.transition_to(ReservationStatus::Completed).expect("seated -> completed");
        assert_eq!(reservation.status, ReservationStatus::Completed);
    }

    #[test]
    fn seated_reservation_cannot_be_cancelled() {
        let mut reservation = record(ReservationStatus::Seated);
        let error = reservation
            .transition_to(ReservationStatus::Cancelled)
            .expect_err("seated -> cancelled should fail");
        assert!(matches!(error, crate::errors::DomainError::InvalidReservationTransition { .. }));
    }

    #[test]
    fn fill_missing_keeps_existing_slots() {
        let mut draft = ReservationDraft {
            customer_name: Some("王小明".to_string()),
            party_size: Some(2),
            ..ReservationDraft::default()
        };
        draft.fill_missing(&ReservationDraft {
            customer_name: Some("李大華".to_string()),
            customer_phone: Some("0922333444".to_string()),
            party_size: Some(6),
            ..ReservationDraft::default()
        });

        assert_eq!(draft.customer_name.as_deref(), Some("王小明"));
        assert_eq!(draft.customer_phone.as_deref(), Some("0922333444"));
        assert_eq!(draft.party_size, Some(2));
    }

    #[test]
    fn cleared_slot_can_be_filled_again() {
        let mut draft = ReservationDraft {
            customer_name: Some("王小明".to_string()),
            reservation_date: Some("2020-01-01".to_string()),
            ..ReservationDraft::default()
        };
        draft.clear(ReservationField::ReservationDate);
        draft.fill_missing(&ReservationDraft {
            customer_name: Some("李大華".to_string()),
            reservation_date: Some("2030-01-01".to_string()),
            ..ReservationDraft::default()
        });

        assert_eq!(draft.customer_name.as_deref(), Some("王小明"));
        assert_eq!(draft.reservation_date.as_deref(), Some("2030-01-01"));
    }

    #[test]
    fn missing_fields_are_reported_in_prompt_order() {
        let draft = ReservationDraft {
            customer_phone: Some("0912345678".to_string()),
            reservation_time: Some("  ".to_string()),
            ..ReservationDraft::default()
        };
        assert_eq!(
            draft.missing_fields(),
            vec![
                ReservationField::CustomerName,
                ReservationField::PartySize,
                ReservationField::ReservationDate,
                ReservationField::ReservationTime,
            ]
        );
    }

    #[test]
    fn status_round_trips_from_storage_encoding() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Confirmed,
            ReservationStatus::Seated,
            ReservationStatus::Completed,
            ReservationStatus::Cancelled,
        ] {
            assert_eq!(ReservationStatus::parse(status.as_str()), Some(status));
        }
    }
}
