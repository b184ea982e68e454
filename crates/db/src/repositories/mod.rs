use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use maitre_core::domain::reservation::{
    ReservationId, ReservationRecord, ReservationStatus, RestaurantId,
};
use maitre_core::domain::table::{TableId, TableResource, TableStatus};

pub mod memory;
pub mod reservation;
pub mod table;

pub use memory::{InMemoryReservationRepository, InMemoryTableRepository};
pub use reservation::SqlReservationRepository;
pub use table::SqlTableRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ReservationId,
    ) -> Result<Option<ReservationRecord>, RepositoryError>;

    /// Inserts or replaces the record with the same id.
    async fn save(&self, reservation: ReservationRecord) -> Result<(), RepositoryError>;

    /// All reservations on `date`, ordered by time then id.
    async fn list_for_date(
        &self,
        restaurant_id: &RestaurantId,
        date: NaiveDate,
    ) -> Result<Vec<ReservationRecord>, RepositoryError>;

    async fn list_by_status(
        &self,
        restaurant_id: &RestaurantId,
        status: ReservationStatus,
    ) -> Result<Vec<ReservationRecord>, RepositoryError>;

    /// Reservations booked under `phone`, newest first.
    async fn find_by_phone(&self, phone: &str) -> Result<Vec<ReservationRecord>, RepositoryError>;

    /// Returns `false` when no reservation has the id.
    async fn update_status(
        &self,
        id: &ReservationId,
        status: ReservationStatus,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait TableRepository: Send + Sync {
    async fn find_by_id(&self, id: &TableId) -> Result<Option<TableResource>, RepositoryError>;

    async fn save(&self, table: TableResource) -> Result<(), RepositoryError>;

    async fn list_for_restaurant(
        &self,
        restaurant_id: &RestaurantId,
    ) -> Result<Vec<TableResource>, RepositoryError>;

    /// Tables in `status` seating at least `min_capacity`, smallest first.
    async fn list_by_capacity(
        &self,
        restaurant_id: &RestaurantId,
        min_capacity: u32,
        status: TableStatus,
    ) -> Result<Vec<TableResource>, RepositoryError>;

    /// Returns `false` when no table has the id.
    async fn update_status(
        &self,
        id: &TableId,
        status: TableStatus,
    ) -> Result<bool, RepositoryError>;
}
