use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::domain::reservation::{
    ReservationDraft, ReservationField, ReservationRequest, RestaurantId,
};
use crate::reservation::slots::{parse_clock, TimeSlotGrid};

pub const MIN_PARTY_SIZE: u32 = 1;
pub const MAX_PARTY_SIZE: u32 = 12;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: ReservationField,
    pub message: String,
}

impl FieldError {
    fn new(field: ReservationField, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub missing_fields: Vec<ReservationField>,
    pub format_errors: Vec<FieldError>,
    /// Present only when `is_valid` holds.
    pub request: Option<ReservationRequest>,
}

impl ValidationReport {
    /// Follow-up prompt for the guest, e.g. `請提供：姓名、電話`.
    pub fn follow_up_prompt(&self) -> Option<String> {
        if self.is_valid {
            return None;
        }

        let mut lines = Vec::new();
        if !self.missing_fields.is_empty() {
            let labels =
                self.missing_fields.iter().map(ReservationField::label).collect::<Vec<_>>();
            lines.push(format!("請提供：{}", labels.join("、")));
        }
        lines.extend(self.format_errors.iter().map(|error| error.message.clone()));
        Some(lines.join("\n"))
    }
}

/// Stateless checks over a [`ReservationDraft`]. Every failure is collected.
#[derive(Clone, Debug, Default)]
pub struct ReservationValidator {
    grid: TimeSlotGrid,
}

impl ReservationValidator {
    pub fn new(grid: TimeSlotGrid) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &TimeSlotGrid {
        &self.grid
    }

    pub fn validate(
        &self,
        draft: &ReservationDraft,
        today: NaiveDate,
        restaurant_id: &RestaurantId,
    ) -> ValidationReport {
        let missing_fields = draft.missing_fields();
        let mut format_errors = Vec::new();

        let phone = present(&draft.customer_phone).and_then(|raw| {
            let normalized = normalize_phone(raw);
            if is_mobile_number(&normalized) {
                Some(normalized)
            } else {
                format_errors.push(FieldError::new(
                    ReservationField::CustomerPhone,
                    "電話格式不正確，請提供 09 開頭的 10 位手機號碼",
                ));
                None
            }
        });

        let party_size = draft.party_size.and_then(|size| {
            if (MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&size) {
                Some(size)
            } else {
                format_errors.push(FieldError::new(
                    ReservationField::PartySize,
                    format!("人數需介於 {MIN_PARTY_SIZE} 到 {MAX_PARTY_SIZE} 位之間"),
                ));
                None
            }
        });

        let date = present(&draft.reservation_date).and_then(|raw| {
            match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(date) if date >= today => Some(date),
                Ok(_) => {
                    format_errors.push(FieldError::new(
                        ReservationField::ReservationDate,
                        "訂位日期不能早於今天",
                    ));
                    None
                }
                Err(_) => {
                    format_errors.push(FieldError::new(
                        ReservationField::ReservationDate,
                        "日期格式不正確，請使用 YYYY-MM-DD",
                    ));
                    None
                }
            }
        });

        let time = present(&draft.reservation_time).and_then(|raw| match parse_clock(raw) {
            Some(time) if self.grid.contains(time) => Some(time),
            Some(_) => {
                format_errors.push(FieldError::new(
                    ReservationField::ReservationTime,
                    format!("可訂位時段為 {}，每 30 分鐘一個時段", self.grid.describe()),
                ));
                None
            }
            None => {
                format_errors.push(FieldError::new(
                    ReservationField::ReservationTime,
                    "時間格式不正確，請使用 HH:MM",
                ));
                None
            }
        });

        let is_valid = missing_fields.is_empty() && format_errors.is_empty();
        let request = if is_valid {
            build_request(draft, phone, party_size, date, time, restaurant_id)
        } else {
            None
        };

        ValidationReport { is_valid: request.is_some(), missing_fields, format_errors, request }
    }
}

fn build_request(
    draft: &ReservationDraft,
    phone: Option<String>,
    party_size: Option<u32>,
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
    restaurant_id: &RestaurantId,
) -> Option<ReservationRequest> {
    Some(ReservationRequest {
        customer_name: present(&draft.customer_name)?.trim().to_string(),
        customer_phone: phone?,
        customer_email: present(&draft.customer_email).map(|email| email.trim().to_string()),
        party_size: party_size?,
        reservation_date: date?,
        reservation_time: time?,
        special_requests: present(&draft.special_requests).map(|text| text.trim().to_string()),
        restaurant_id: restaurant_id.clone(),
    })
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.trim().is_empty())
}

/// Strips the `-` and space separators guests type between digit groups.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|ch| !matches!(ch, '-' | ' ')).collect()
}

/// Local mobile shape: `09` followed by eight digits.
pub fn is_mobile_number(value: &str) -> bool {
    value.len() == 10 && value.starts_with("09") && value.chars().all(|ch| ch.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use crate::domain::reservation::{ReservationDraft, ReservationField, RestaurantId};

    use super::{is_mobile_number, normalize_phone, ReservationValidator};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).expect("date")
    }

    fn complete_draft() -> ReservationDraft {
        ReservationDraft {
            customer_name: Some("王小明".to_string()),
            customer_phone: Some("0912-345-678".to_string()),
            party_size: Some(4),
            reservation_date: Some("2026-10-19".to_string()),
            reservation_time: Some("19:00".to_string()),
            ..ReservationDraft::default()
        }
    }

    #[test]
    fn complete_draft_becomes_typed_request() {
        let report = ReservationValidator::default().validate(
            &complete_draft(),
            today(),
            &RestaurantId("main".to_string()),
        );

        assert!(report.is_valid);
        assert!(report.follow_up_prompt().is_none());
        let request = report.request.expect("request");
        assert_eq!(request.customer_phone, "0912345678");
        assert_eq!(request.reservation_time, NaiveTime::from_hms_opt(19, 0, 0).expect("time"));
    }

    #[test]
    fn missing_fields_produce_single_follow_up_line() {
        let draft = ReservationDraft {
            party_size: Some(2),
            reservation_date: Some("2026-10-19".to_string()),
            reservation_time: Some("12:00".to_string()),
            ..ReservationDraft::default()
        };
        let report =
            ReservationValidator::default().validate(&draft, today(), &RestaurantId("main".into()));

        assert!(!report.is_valid);
        assert_eq!(
            report.missing_fields,
            vec![ReservationField::CustomerName, ReservationField::CustomerPhone]
        );
        assert_eq!(report.follow_up_prompt().as_deref(), Some("請提供：姓名、電話"));
    }

    #[test]
    fn every_format_failure_is_collected() {
        let draft = ReservationDraft {
            customer_name: Some("王小明".to_string()),
            customer_phone: Some("12345".to_string()),
            party_size: Some(13),
            reservation_date: Some("2026-10-01".to_string()),
            reservation_time: Some("15:00".to_string()),
            ..ReservationDraft::default()
        };
        let report =
            ReservationValidator::default().validate(&draft, today(), &RestaurantId("main".into()));

        assert!(!report.is_valid);
        assert!(report.missing_fields.is_empty());
        let fields = report.format_errors.iter().map(|error| error.field).collect::<Vec<_>>();
        assert_eq!(
            fields,
            vec![
                ReservationField::CustomerPhone,
                ReservationField::PartySize,
                ReservationField::ReservationDate,
                ReservationField::ReservationTime,
            ]
        );
        assert!(report.request.is_none());
    }

    #[test]
    fn unparseable_date_and_time_are_format_errors() {
        let mut draft = complete_draft();
        draft.reservation_date = Some("明天".to_string());
        draft.reservation_time = Some("晚上".to_string());
        let report =
            ReservationValidator::default().validate(&draft, today(), &RestaurantId("main".into()));

        assert_eq!(report.format_errors.len(), 2);
        assert!(report.follow_up_prompt().expect("prompt").contains("YYYY-MM-DD"));
    }

    #[test]
    fn phone_shape_accepts_only_local_mobile_numbers() {
        assert!(is_mobile_number(&normalize_phone("0912 345 678")));
        assert!(!is_mobile_number("0812345678"));
        assert!(!is_mobile_number("091234567"));
        assert!(!is_mobile_number("09123456ab"));
    }
}
