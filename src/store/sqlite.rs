use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};
use tracing::debug;
use uuid::Uuid;

use super::{StoreError, TripStore};
use crate::{
    db::DbPool,
    models::{Activity, Link, NewActivity, NewLink, NewTrip, Participant, Trip, TripUpdate},
};

#[derive(Clone)]
pub struct SqliteTripStore {
    pool: DbPool,
}

impl SqliteTripStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        other => StoreError::Database(other),
    }
}

#[async_trait]
impl TripStore for SqliteTripStore {
    async fn create_trip_with_participants(
        &self,
        trip: &NewTrip,
        invitees: &[String],
    ) -> Result<Uuid, StoreError> {
        // Dropping `tx` without commit rolls everything back.
        let mut tx = self.pool.begin().await.map_err(map_err)?;

        let trip_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO trips (id, destination, owner_email, owner_name, is_confirmed, starts_at, ends_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
        )
        .bind(trip_id)
        .bind(&trip.destination)
        .bind(&trip.owner_email)
        .bind(&trip.owner_name)
        .bind(trip.starts_at)
        .bind(trip.ends_at)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        if !invitees.is_empty() {
            let mut insert: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO participants (id, trip_id, email) ");
            insert.push_values(invitees, |mut row, email| {
                row.push_bind(Uuid::new_v4())
                    .push_bind(trip_id)
                    .push_bind(email.clone());
            });
            insert.build().execute(&mut *tx).await.map_err(map_err)?;
        }

        tx.commit().await.map_err(map_err)?;
        debug!(%trip_id, participants = invitees.len(), "trip created");
        Ok(trip_id)
    }

    async fn get_trip(&self, id: Uuid) -> Result<Trip, StoreError> {
        sqlx::query_as::<_, Trip>(
            "SELECT id, destination, owner_email, owner_name, is_confirmed, starts_at, ends_at
             FROM trips WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)
    }

    async fn update_trip(&self, id: Uuid, update: &TripUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE trips SET destination = ?1, starts_at = ?2, ends_at = ?3, is_confirmed = ?4
             WHERE id = ?5",
        )
        .bind(&update.destination)
        .bind(update.starts_at)
        .bind(update.ends_at)
        .bind(update.is_confirmed)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn confirm_trip(&self, id: Uuid) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE trips SET is_confirmed = 1 WHERE id = ?1 AND is_confirmed = 0")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;

        if result.rows_affected() == 0 {
            // Either the row is gone or someone else confirmed it first.
            self.get_trip(id).await?;
            return Err(StoreError::Conflict("trip already confirmed".into()));
        }
        Ok(())
    }

    async fn get_participant(&self, id: Uuid) -> Result<Participant, StoreError> {
        sqlx::query_as::<_, Participant>(
            "SELECT id, trip_id, email, is_confirmed FROM participants WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or(StoreError::NotFound)
    }

    async fn get_participants(&self, trip_id: Uuid) -> Result<Vec<Participant>, StoreError> {
        sqlx::query_as::<_, Participant>(
            "SELECT id, trip_id, email, is_confirmed FROM participants
             WHERE trip_id = ?1 ORDER BY rowid",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn confirm_participant(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE participants SET is_confirmed = 1 WHERE id = ?1 AND is_confirmed = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            self.get_participant(id).await?;
            return Err(StoreError::Conflict("participant already confirmed".into()));
        }
        Ok(())
    }

    async fn invite_participant(&self, trip_id: Uuid, email: &str) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO participants (id, trip_id, email) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(trip_id)
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(id)
    }

    async fn create_activity(&self, activity: &NewActivity) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO activities (id, trip_id, title, occurs_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id)
        .bind(activity.trip_id)
        .bind(&activity.title)
        .bind(activity.occurs_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(id)
    }

    async fn get_activities(&self, trip_id: Uuid) -> Result<Vec<Activity>, StoreError> {
        sqlx::query_as::<_, Activity>(
            "SELECT id, trip_id, title, occurs_at FROM activities
             WHERE trip_id = ?1 ORDER BY occurs_at",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }

    async fn create_link(&self, link: &NewLink) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO links (id, trip_id, title, url) VALUES (?1, ?2, ?3, ?4)")
            .bind(id)
            .bind(link.trip_id)
            .bind(&link.title)
            .bind(&link.url)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(id)
    }

    async fn get_links(&self, trip_id: Uuid) -> Result<Vec<Link>, StoreError> {
        sqlx::query_as::<_, Link>(
            "SELECT id, trip_id, title, url FROM links WHERE trip_id = ?1 ORDER BY rowid",
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)
    }
}
