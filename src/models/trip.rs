use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Trip {
    pub id: Uuid,
    pub destination: String,
    pub owner_email: String,
    pub owner_name: String,
    pub is_confirmed: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Payload for a trip that has not been persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrip {
    pub destination: String,
    pub owner_email: String,
    pub owner_name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripUpdate {
    pub destination: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_confirmed: bool,
}
