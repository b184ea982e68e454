use maitre_core::domain::reservation::RestaurantId;
use maitre_core::domain::table::{TableId, TableResource, TableStatus};
use serde_json::{json, Value};

use crate::repositories::{RepositoryError, TableRepository};

struct DemoTable {
    id: &'static str,
    name: &'static str,
    capacity: u32,
    location: &'static str,
    features: &'static [&'static str],
}

/// Floor plan used for local runs and end-to-end tests.
const DEMO_TABLES: &[DemoTable] = &[
    DemoTable { id: "T01", name: "吧台 1", capacity: 2, location: "bar", features: &["counter"] },
    DemoTable { id: "T02", name: "窗邊 1", capacity: 2, location: "window", features: &["window"] },
    DemoTable { id: "T03", name: "窗邊 2", capacity: 4, location: "window", features: &["window"] },
    DemoTable { id: "T04", name: "大廳 1", capacity: 4, location: "main hall", features: &[] },
    DemoTable { id: "T05", name: "大廳 2", capacity: 6, location: "main hall", features: &[] },
    DemoTable {
        id: "T06",
        name: "包廂",
        capacity: 10,
        location: "private room",
        features: &["private", "projector"],
    },
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedResult {
    pub inserted: Vec<String>,
    pub skipped: Vec<String>,
}

impl SeedResult {
    pub fn to_json(&self) -> Value {
        json!({
            "inserted": self.inserted,
            "skipped": self.skipped,
        })
    }
}

pub fn demo_tables(restaurant_id: &RestaurantId) -> Vec<TableResource> {
    DEMO_TABLES
        .iter()
        .map(|table| TableResource {
            id: TableId(table.id.to_string()),
            restaurant_id: restaurant_id.clone(),
            name: table.name.to_string(),
            capacity: table.capacity,
            status: TableStatus::Available,
            location: table.location.to_string(),
            features: table.features.iter().map(|feature| feature.to_string()).collect(),
        })
        .collect()
}

/// Inserts the demo floor plan. Tables that already exist are left untouched,
/// so re-running never resets a table's live status.
pub async fn seed_demo_tables<R>(
    repository: &R,
    restaurant_id: &RestaurantId,
) -> Result<SeedResult, RepositoryError>
where
    R: TableRepository + ?Sized,
{
    let mut result = SeedResult::default();

    for table in demo_tables(restaurant_id) {
        if repository.find_by_id(&table.id).await?.is_some() {
            result.skipped.push(table.id.0);
            continue;
        }

        let id = table.id.0.clone();
        repository.save(table).await?;
        result.inserted.push(id);
    }

    Ok(result)
}
