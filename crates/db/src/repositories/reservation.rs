use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use maitre_core::domain::reservation::{
    ReservationId, ReservationRecord, ReservationStatus, RestaurantId,
};
use maitre_core::domain::table::TableId;

use super::{RepositoryError, ReservationRepository};
use crate::DbPool;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M";

const SELECT_COLUMNS: &str = "SELECT
    id,
    restaurant_id,
    table_id,
    customer_name,
    customer_phone,
    customer_email,
    party_size,
    reservation_date,
    reservation_time,
    special_requests,
    status,
    created_at
 FROM reservation";

pub struct SqlReservationRepository {
    pool: DbPool,
}

impl SqlReservationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReservationRepository for SqlReservationRepository {
    async fn find_by_id(
        &self,
        id: &ReservationId,
    ) -> Result<Option<ReservationRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(reservation_from_row).transpose()
    }

    async fn save(&self, reservation: ReservationRecord) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO reservation (
                id,
                restaurant_id,
                table_id,
                customer_name,
                customer_phone,
                customer_email,
                party_size,
                reservation_date,
                reservation_time,
                special_requests,
                status,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                restaurant_id = excluded.restaurant_id,
                table_id = excluded.table_id,
                customer_name = excluded.customer_name,
                customer_phone = excluded.customer_phone,
                customer_email = excluded.customer_email,
                party_size = excluded.party_size,
                reservation_date = excluded.reservation_date,
                reservation_time = excluded.reservation_time,
                special_requests = excluded.special_requests,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )
        .bind(&reservation.id.0)
        .bind(&reservation.restaurant_id.0)
        .bind(&reservation.table_id.0)
        .bind(&reservation.customer_name)
        .bind(&reservation.customer_phone)
        .bind(reservation.customer_email.as_deref())
        .bind(i64::from(reservation.party_size))
        .bind(reservation.reservation_date.format(DATE_FORMAT).to_string())
        .bind(reservation.reservation_time.format(TIME_FORMAT).to_string())
        .bind(reservation.special_requests.as_deref())
        .bind(reservation.status.as_str())
        .bind(reservation.created_at.to_rfc3339())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_date(
        &self,
        restaurant_id: &RestaurantId,
        date: NaiveDate,
    ) -> Result<Vec<ReservationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE restaurant_id = ? AND reservation_date = ?
             ORDER BY reservation_time ASC, id ASC"
        ))
        .bind(&restaurant_id.0)
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(reservation_from_row).collect()
    }

    async fn list_by_status(
        &self,
        restaurant_id: &RestaurantId,
        status: ReservationStatus,
    ) -> Result<Vec<ReservationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE restaurant_id = ? AND status = ?
             ORDER BY reservation_date ASC, reservation_time ASC, id ASC"
        ))
        .bind(&restaurant_id.0)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(reservation_from_row).collect()
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Vec<ReservationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE customer_phone = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(phone)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(reservation_from_row).collect()
    }

    async fn update_status(
        &self,
        id: &ReservationId,
        status: ReservationStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE reservation SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn reservation_from_row(row: SqliteRow) -> Result<ReservationRecord, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ReservationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown reservation status `{status_raw}`"))
    })?;

    Ok(ReservationRecord {
        id: ReservationId(row.try_get("id")?),
        restaurant_id: RestaurantId(row.try_get("restaurant_id")?),
        table_id: TableId(row.try_get("table_id")?),
        customer_name: row.try_get("customer_name")?,
        customer_phone: row.try_get("customer_phone")?,
        customer_email: row.try_get("customer_email")?,
        party_size: parse_u32("party_size", row.try_get("party_size")?)?,
        reservation_date: parse_date("reservation_date", row.try_get("reservation_date")?)?,
        reservation_time: parse_time("reservation_time", row.try_get("reservation_time")?)?,
        special_requests: row.try_get("special_requests")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, DATE_FORMAT).map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

fn parse_time(column: &str, value: String) -> Result<NaiveTime, RepositoryError> {
    NaiveTime::parse_from_str(&value, TIME_FORMAT).map_err(|error| {
        RepositoryError::Decode(format!("invalid time in `{column}`: `{value}` ({error})"))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
