//! Persistence boundary for trips and everything hanging off them.

pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Activity, Link, NewActivity, NewLink, NewTrip, Participant, Trip, TripUpdate};

pub use sqlite::SqliteTripStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no matching row")]
    NotFound,
    #[error("constraint violated: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait TripStore: Send + Sync {
    /// Inserts the trip and one participant per invitee in a single
    /// transaction. Nothing is persisted unless every insert succeeds.
    async fn create_trip_with_participants(
        &self,
        trip: &NewTrip,
        invitees: &[String],
    ) -> Result<Uuid, StoreError>;

    async fn get_trip(&self, id: Uuid) -> Result<Trip, StoreError>;

    /// Overwrites destination, dates and the confirmed flag. Callers pass
    /// `is_confirmed: false`, so an update re-opens confirmation.
    async fn update_trip(&self, id: Uuid, update: &TripUpdate) -> Result<(), StoreError>;

    /// Flips only the confirmed flag; destination and dates stay untouched.
    async fn confirm_trip(&self, id: Uuid) -> Result<(), StoreError>;

    async fn get_participant(&self, id: Uuid) -> Result<Participant, StoreError>;

    async fn get_participants(&self, trip_id: Uuid) -> Result<Vec<Participant>, StoreError>;

    async fn confirm_participant(&self, id: Uuid) -> Result<(), StoreError>;

    async fn invite_participant(&self, trip_id: Uuid, email: &str) -> Result<Uuid, StoreError>;

    async fn create_activity(&self, activity: &NewActivity) -> Result<Uuid, StoreError>;

    async fn get_activities(&self, trip_id: Uuid) -> Result<Vec<Activity>, StoreError>;

    async fn create_link(&self, link: &NewLink) -> Result<Uuid, StoreError>;

    async fn get_links(&self, trip_id: Uuid) -> Result<Vec<Link>, StoreError>;
}
