use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use maitre_core::domain::reservation::RestaurantId;
use maitre_core::domain::table::{TableId, TableResource, TableStatus};

use super::reservation::parse_u32;
use super::{RepositoryError, TableRepository};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT
    id,
    restaurant_id,
    name,
    capacity,
    status,
    location,
    features_json
 FROM dining_table";

pub struct SqlTableRepository {
    pool: DbPool,
}

impl SqlTableRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TableRepository for SqlTableRepository {
    async fn find_by_id(&self, id: &TableId) -> Result<Option<TableResource>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(table_from_row).transpose()
    }

    async fn save(&self, table: TableResource) -> Result<(), RepositoryError> {
        let features_json = serde_json::to_string(&table.features).map_err(|error| {
            RepositoryError::Decode(format!("could not encode table features: {error}"))
        })?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO dining_table (
                id,
                restaurant_id,
                name,
                capacity,
                status,
                location,
                features_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                restaurant_id = excluded.restaurant_id,
                name = excluded.name,
                capacity = excluded.capacity,
                status = excluded.status,
                location = excluded.location,
                features_json = excluded.features_json,
                updated_at = excluded.updated_at",
        )
        .bind(&table.id.0)
        .bind(&table.restaurant_id.0)
        .bind(&table.name)
        .bind(i64::from(table.capacity))
        .bind(table.status.as_str())
        .bind(&table.location)
        .bind(features_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_restaurant(
        &self,
        restaurant_id: &RestaurantId,
    ) -> Result<Vec<TableResource>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE restaurant_id = ?
             ORDER BY id ASC"
        ))
        .bind(&restaurant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(table_from_row).collect()
    }

    async fn list_by_capacity(
        &self,
        restaurant_id: &RestaurantId,
        min_capacity: u32,
        status: TableStatus,
    ) -> Result<Vec<TableResource>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE restaurant_id = ? AND capacity >= ? AND status = ?
             ORDER BY capacity ASC, id ASC"
        ))
        .bind(&restaurant_id.0)
        .bind(i64::from(min_capacity))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(table_from_row).collect()
    }

    async fn update_status(
        &self,
        id: &TableId,
        status: TableStatus,
    ) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE dining_table SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(Utc::now().to_rfc3339())
                .bind(&id.0)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn table_from_row(row: SqliteRow) -> Result<TableResource, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = TableStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown table status `{status_raw}`")))?;

    let features_raw = row.try_get::<String, _>("features_json")?;
    let features = serde_json::from_str::<Vec<String>>(&features_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid features_json `{features_raw}` ({error})"))
    })?;

    Ok(TableResource {
        id: TableId(row.try_get("id")?),
        restaurant_id: RestaurantId(row.try_get("restaurant_id")?),
        name: row.try_get("name")?,
        capacity: parse_u32("capacity", row.try_get("capacity")?)?,
        status,
        location: row.try_get("location")?,
        features,
    })
}
