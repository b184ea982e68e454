use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::domain::reservation::ReservationRecord;
use crate::domain::table::{TableResource, TableStatus};

/// Two bookings on one table clash when their start times are closer than this.
pub const CONFLICT_WINDOW_MINUTES: i64 = 120;

/// Slots offered when the requested time is full.
pub const ALTERNATIVE_CANDIDATE_TIMES: [(u32, u32); 10] = [
    (11, 30),
    (12, 0),
    (12, 30),
    (13, 0),
    (17, 30),
    (18, 0),
    (18, 30),
    (19, 0),
    (19, 30),
    (20, 0),
];

pub fn alternative_candidates() -> impl Iterator<Item = NaiveTime> {
    ALTERNATIVE_CANDIDATE_TIMES
        .into_iter()
        .filter_map(|(hour, minute)| NaiveTime::from_hms_opt(hour, minute, 0))
}

pub fn conflicts(left: NaiveTime, right: NaiveTime) -> bool {
    let minutes = |time: NaiveTime| i64::from(time.num_seconds_from_midnight()) / 60;
    (minutes(left) - minutes(right)).abs() < CONFLICT_WINDOW_MINUTES
}

/// Tables that can seat the party at `date`/`time`, closest fit first.
///
/// `reservations` may contain any records; only table-holding ones on the
/// same date are considered.
pub fn find_available(
    tables: &[TableResource],
    reservations: &[ReservationRecord],
    date: NaiveDate,
    time: NaiveTime,
    party_size: u32,
) -> Vec<TableResource> {
    let mut open = tables
        .iter()
        .filter(|table| table.status == TableStatus::Available && table.fits(party_size))
        .filter(|table| {
            !reservations.iter().any(|reservation| {
                reservation.table_id == table.id
                    && reservation.reservation_date == date
                    && reservation.status.occupies_table()
                    && conflicts(reservation.reservation_time, time)
            })
        })
        .cloned()
        .collect::<Vec<_>>();

    open.sort_by(|left, right| {
        left.surplus(party_size)
            .cmp(&right.surplus(party_size))
            .then_with(|| left.name.cmp(&right.name))
            .then_with(|| left.id.cmp(&right.id))
    });
    open
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, Utc};

    use crate::domain::reservation::{
        ReservationId, ReservationRecord, ReservationStatus, RestaurantId,
    };
    use crate::domain::table::{TableId, TableResource, TableStatus};

    use super::{alternative_candidates, conflicts, find_available};

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("clock")
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).expect("date")
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

    fn booking(table_id: &str, time: NaiveTime, status: ReservationStatus) -> ReservationRecord {
        ReservationRecord {
            id: ReservationId(format!("RES-{table_id}")),
            restaurant_id: RestaurantId("main".to_string()),
            table_id: TableId(table_id.to_string()),
            customer_name: "王小明".to_string(),
            customer_phone: "0912345678".to_string(),
            customer_email: None,
            party_size: 2,
            reservation_date: date(),
            reservation_time: time,
            special_requests: None,
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn conflict_window_is_strict() {
        assert!(conflicts(at(19, 0), at(20, 59)));
        assert!(conflicts(at(19, 0), at(17, 30)));
        assert!(!conflicts(at(19, 0), at(21, 0)));
        assert!(!conflicts(at(19, 0), at(17, 0)));
    }

    #[test]
    fn closest_fit_wins_and_ties_break_on_name() {
        let tables = vec![table("T6", "Booth", 6), table("T4b", "Window 2", 4), table("T4a", "Window 1", 4)];
        let ranked = find_available(&tables, &[], date(), at(19, 0), 3);
        let names = ranked.iter().map(|table| table.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Window 1", "Window 2", "Booth"]);
    }

    #[test]
    fn undersized_and_unavailable_tables_are_skipped() {
        let mut maintenance = table("T8", "Garden", 8);
        maintenance.status = TableStatus::Maintenance;
        let tables = vec![table("T2", "Bar", 2), maintenance];
        assert!(find_available(&tables, &[], date(), at(12, 0), 4).is_empty());
    }

    #[test]
    fn only_active_bookings_block_the_window() {
        let tables = vec![table("T4", "Window", 4)];
        let active = vec![booking("T4", at(18, 0), ReservationStatus::Confirmed)];
        assert!(find_available(&tables, &active, date(), at(19, 0), 4).is_empty());
        assert_eq!(find_available(&tables, &active, date(), at(20, 0), 4).len(), 1);

        let released = vec![booking("T4", at(19, 0), ReservationStatus::Cancelled)];
        assert_eq!(find_available(&tables, &released, date(), at(19, 0), 4).len(), 1);
    }

    #[test]
    fn alternative_candidates_cover_lunch_and_dinner() {
        let candidates = alternative_candidates().collect::<Vec<_>>();
        assert_eq!(candidates.len(), 10);
        assert_eq!(candidates.first(), Some(&at(11, 30)));
        assert_eq!(candidates.last(), Some(&at(20, 0)));
    }
}
