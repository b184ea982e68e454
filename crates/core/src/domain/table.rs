use serde::{Deserialize, Serialize};

use crate::domain::reservation::RestaurantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Available,
    Occupied,
    Reserved,
    Maintenance,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::Reserved => "reserved",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "available" => Some(Self::Available),
            "occupied" => Some(Self::Occupied),
            "reserved" => Some(Self::Reserved),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableResource {
    pub id: TableId,
    pub restaurant_id: RestaurantId,
    pub name: String,
    pub capacity: u32,
    pub status: TableStatus,
    pub location: String,
    pub features: Vec<String>,
}

impl TableResource {
    pub fn fits(&self, party_size: u32) -> bool {
        self.capacity >= party_size
    }

    pub fn surplus(&self, party_size: u32) -> u32 {
        self.capacity.saturating_sub(party_size)
    }
}
