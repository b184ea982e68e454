pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use fixtures::{demo_tables, seed_demo_tables, SeedResult};
pub use repositories::{
    InMemoryReservationRepository, InMemoryTableRepository, RepositoryError,
    ReservationRepository, SqlReservationRepository, SqlTableRepository, TableRepository,
};
