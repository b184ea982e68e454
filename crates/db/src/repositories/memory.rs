use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::RwLock;

use maitre_core::domain::reservation::{
    ReservationId, ReservationRecord, ReservationStatus, RestaurantId,
};
use maitre_core::domain::table::{TableId, TableResource, TableStatus};

use super::{RepositoryError, ReservationRepository, TableRepository};

#[derive(Default)]
pub struct InMemoryReservationRepository {
    reservations: RwLock<HashMap<String, ReservationRecord>>,
}

#[async_trait::async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn find_by_id(
        &self,
        id: &ReservationId,
    ) -> Result<Option<ReservationRecord>, RepositoryError> {
        let reservations = self.reservations.read().await;
        Ok(reservations.get(&id.0).cloned())
    }

    async fn save(&self, reservation: ReservationRecord) -> Result<(), RepositoryError> {
        let mut reservations = self.reservations.write().await;
        reservations.insert(reservation.id.0.clone(), reservation);
        Ok(())
    }

    async fn list_for_date(
        &self,
        restaurant_id: &RestaurantId,
        date: NaiveDate,
    ) -> Result<Vec<ReservationRecord>, RepositoryError> {
        let reservations = self.reservations.read().await;
        let mut matching = reservations
            .values()
            .filter(|record| &record.restaurant_id == restaurant_id)
            .filter(|record| record.reservation_date == date)
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|left, right| {
            left.reservation_time.cmp(&right.reservation_time).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(matching)
    }

    async fn list_by_status(
        &self,
        restaurant_id: &RestaurantId,
        status: ReservationStatus,
    ) -> Result<Vec<ReservationRecord>, RepositoryError> {
        let reservations = self.reservations.read().await;
        let mut matching = reservations
            .values()
            .filter(|record| &record.restaurant_id == restaurant_id && record.status == status)
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|left, right| {
            (left.reservation_date, left.reservation_time, &left.id.0).cmp(&(
                right.reservation_date,
                right.reservation_time,
                &right.id.0,
            ))
        });
        Ok(matching)
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Vec<ReservationRecord>, RepositoryError> {
        let reservations = self.reservations.read().await;
        let mut matching = reservations
            .values()
            .filter(|record| record.customer_phone == phone)
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.0.cmp(&left.id.0))
        });
        Ok(matching)
    }

    async fn update_status(
        &self,
        id: &ReservationId,
        status: ReservationStatus,
    ) -> Result<bool, RepositoryError> {
        let mut reservations = self.reservations.write().await;
        Ok(reservations.get_mut(&id.0).map(|record| record.status = status).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryTableRepository {
    tables: RwLock<HashMap<String, TableResource>>,
}

impl InMemoryTableRepository {
    pub fn with_tables(tables: impl IntoIterator<Item = TableResource>) -> Self {
        Self {
            tables: RwLock::new(
                tables.into_iter().map(|table| (table.id.0.clone(), table)).collect(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl TableRepository for InMemoryTableRepository {
    async fn find_by_id(&self, id: &TableId) -> Result<Option<TableResource>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.get(&id.0).cloned())
    }

    async fn save(&self, table: TableResource) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.insert(table.id.0.clone(), table);
        Ok(())
    }

    async fn list_for_restaurant(
        &self,
        restaurant_id: &RestaurantId,
    ) -> Result<Vec<TableResource>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut matching = tables
            .values()
            .filter(|table| &table.restaurant_id == restaurant_id)
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(matching)
    }

    async fn list_by_capacity(
        &self,
        restaurant_id: &RestaurantId,
        min_capacity: u32,
        status: TableStatus,
    ) -> Result<Vec<TableResource>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut matching = tables
            .values()
            .filter(|table| &table.restaurant_id == restaurant_id)
            .filter(|table| table.capacity >= min_capacity && table.status == status)
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|left, right| {
            left.capacity.cmp(&right.capacity).then_with(|| left.id.cmp(&right.id))
        });
        Ok(matching)
    }

    async fn update_status(
        &self,
        id: &TableId,
        status: TableStatus,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        Ok(tables.get_mut(&id.0).map(|table| table.status = status).is_some())
    }
}
