//! Trip operations as the HTTP layer sees them.
//!
//! Store failures are wrapped with the operation that hit them; only input,
//! not-found and conflict errors carry detail back to the caller. Emails go
//! out on detached fan-out tasks and their failures stay in the logs.

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Activity, Link, NewActivity, NewLink, NewTrip, Participant, Trip, TripUpdate},
    services::dispatcher::{DispatchHandle, FanoutDispatcher, Notification},
    store::{StoreError, TripStore},
    validation,
};

/// Result of an operation that also queued emails.
#[derive(Debug)]
pub struct Dispatched<T> {
    pub value: T,
    pub fanout: DispatchHandle,
}

#[derive(Clone)]
pub struct TripWorkflow {
    store: Arc<dyn TripStore>,
    dispatcher: FanoutDispatcher,
}

impl TripWorkflow {
    pub fn new(store: Arc<dyn TripStore>, dispatcher: FanoutDispatcher) -> Self {
        Self { store, dispatcher }
    }

    pub async fn create_trip(
        &self,
        mut trip: NewTrip,
        invitees: Vec<String>,
    ) -> Result<Dispatched<Uuid>, AppError> {
        trip.owner_email = validation::normalize_email(&trip.owner_email);
        let invitees: Vec<String> = invitees
            .iter()
            .map(|email| validation::normalize_email(email))
            .collect();
        validation::new_trip(&trip, &invitees)?;
        let mut seen = HashSet::new();
        if let Some(dup) = invitees.iter().find(|email| !seen.insert(email.as_str())) {
            return Err(AppError::InvalidInput(format!(
                "Invalid input: {dup} is invited more than once"
            )));
        }

        let trip_id = self
            .store
            .create_trip_with_participants(&trip, &invitees)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => {
                    AppError::Conflict("A participant is invited more than once".into())
                }
                other => AppError::store("creating trip", other),
            })?;
        info!(%trip_id, invitees = invitees.len(), "trip created");

        let fanout = self.dispatcher.spawn(
            trip_id,
            vec![Notification::confirm_trip(trip_id, trip.owner_email)],
        );
        Ok(Dispatched {
            value: trip_id,
            fanout,
        })
    }

    /// Waits for every email batch started so far to finish.
    pub async fn drain_notifications(&self) {
        self.dispatcher.drain().await;
    }

    pub async fn get_trip(&self, id: Uuid) -> Result<Trip, AppError> {
        self.store.get_trip(id).await.map_err(|err| match err {
            StoreError::NotFound => AppError::NotFound("Trip"),
            other => AppError::store("finding trip", other),
        })
    }

    /// Overwrites destination and dates. The trip has to be confirmed again.
    pub async fn update_trip(
        &self,
        id: Uuid,
        destination: String,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let update = TripUpdate {
            destination,
            starts_at,
            ends_at,
            is_confirmed: false,
        };
        validation::trip_update(&update)?;
        self.store
            .update_trip(id, &update)
            .await
            .map_err(|err| match err {
                StoreError::NotFound => AppError::NotFound("Trip"),
                other => AppError::store("updating trip", other),
            })
    }

    /// Confirms the trip and invites every participant in the background.
    ///
    /// The participant list is read before the flag flips, so a failed read
    /// leaves the trip unconfirmed and the call can be retried.
    pub async fn confirm_trip(&self, id: Uuid) -> Result<Dispatched<()>, AppError> {
        let trip = self.get_trip(id).await?;
        if trip.is_confirmed {
            return Err(AppError::Conflict("Trip already confirmed".into()));
        }

        let participants = self
            .store
            .get_participants(id)
            .await
            .map_err(|err| AppError::store("getting participants for trip", err))?;

        self.store.confirm_trip(id).await.map_err(|err| match err {
            StoreError::NotFound => AppError::NotFound("Trip"),
            StoreError::Conflict(_) => AppError::Conflict("Trip already confirmed".into()),
            other => AppError::store("confirming trip", other),
        })?;
        info!(trip_id = %id, participants = participants.len(), "trip confirmed");

        let batch = participants
            .into_iter()
            .map(|participant| Notification::invite(id, participant.email))
            .collect();
        Ok(Dispatched {
            value: (),
            fanout: self.dispatcher.spawn(id, batch),
        })
    }

    pub async fn get_participant(&self, id: Uuid) -> Result<Participant, AppError> {
        self.store.get_participant(id).await.map_err(|err| match err {
            StoreError::NotFound => AppError::NotFound("Participant"),
            other => AppError::store("finding participant", other),
        })
    }

    pub async fn confirm_participant(&self, id: Uuid) -> Result<(), AppError> {
        let participant = self.get_participant(id).await?;
        if participant.is_confirmed {
            return Err(AppError::Conflict("Participant already confirmed".into()));
        }

        self.store
            .confirm_participant(id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound => AppError::NotFound("Participant"),
                StoreError::Conflict(_) => {
                    AppError::Conflict("Participant already confirmed".into())
                }
                other => AppError::store("confirming participant", other),
            })
    }

    pub async fn list_participants(&self, trip_id: Uuid) -> Result<Vec<Participant>, AppError> {
        self.get_trip(trip_id).await?;
        self.store
            .get_participants(trip_id)
            .await
            .map_err(|err| AppError::store("finding participants from trip", err))
    }

    /// Adds one participant after creation and sends them an invitation.
    pub async fn invite_participant(
        &self,
        trip_id: Uuid,
        email: String,
    ) -> Result<Dispatched<Uuid>, AppError> {
        let email = validation::normalize_email(&email);
        validation::email(&email)?;
        self.get_trip(trip_id).await?;

        let participant_id = self
            .store
            .invite_participant(trip_id, &email)
            .await
            .map_err(|err| match err {
                StoreError::NotFound => AppError::NotFound("Trip"),
                StoreError::Conflict(_) => {
                    warn!(%trip_id, "participant invited twice");
                    AppError::Conflict("Participant already invited".into())
                }
                other => AppError::store("inviting to trip", other),
            })?;

        let fanout = self
            .dispatcher
            .spawn(trip_id, vec![Notification::invite(trip_id, email)]);
        Ok(Dispatched {
            value: participant_id,
            fanout,
        })
    }

    pub async fn create_activity(&self, activity: NewActivity) -> Result<Uuid, AppError> {
        validation::activity(&activity)?;
        self.get_trip(activity.trip_id).await?;
        self.store
            .create_activity(&activity)
            .await
            .map_err(|err| match err {
                StoreError::NotFound => AppError::NotFound("Trip"),
                other => AppError::store("creating activity for trip", other),
            })
    }

    pub async fn list_activities(&self, trip_id: Uuid) -> Result<Vec<Activity>, AppError> {
        self.get_trip(trip_id).await?;
        self.store
            .get_activities(trip_id)
            .await
            .map_err(|err| AppError::store("finding activities from trip", err))
    }

    pub async fn create_link(&self, link: NewLink) -> Result<Uuid, AppError> {
        validation::link(&link)?;
        self.get_trip(link.trip_id).await?;
        self.store
            .create_link(&link)
            .await
            .map_err(|err| match err {
                StoreError::NotFound => AppError::NotFound("Trip"),
                other => AppError::store("adding link to trip", other),
            })
    }

    pub async fn list_links(&self, trip_id: Uuid) -> Result<Vec<Link>, AppError> {
        self.get_trip(trip_id).await?;
        self.store
            .get_links(trip_id)
            .await
            .map_err(|err| AppError::store("finding links from trip", err))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::{
        db::memory_pool,
        services::dispatcher::{testing::RecordingMailer, DispatchConfig, NotificationKind},
        store::SqliteTripStore,
    };

    struct Harness {
        workflow: TripWorkflow,
        mailer: Arc<RecordingMailer>,
    }

    async fn harness_with(mailer: RecordingMailer) -> Harness {
        let store = Arc::new(SqliteTripStore::new(memory_pool().await.unwrap()));
        let mailer = Arc::new(mailer);
        let dispatcher = FanoutDispatcher::new(
            mailer.clone(),
            DispatchConfig {
                concurrency: 2,
                send_timeout: Duration::from_secs(5),
            },
        );
        Harness {
            workflow: TripWorkflow::new(store, dispatcher),
            mailer,
        }
    }

    async fn harness() -> Harness {
        harness_with(RecordingMailer::default()).await
    }

    fn paris() -> NewTrip {
        NewTrip {
            destination: "Paris".into(),
            owner_email: "owner@example.com".into(),
            owner_name: "Olive".into(),
            starts_at: Utc.with_ymd_and_hms(2030, 5, 1, 9, 0, 0).unwrap(),
            ends_at: Utc.with_ymd_and_hms(2030, 5, 7, 18, 0, 0).unwrap(),
        }
    }

    fn guests() -> Vec<String> {
        vec!["ana@example.com".into(), "ben@example.com".into()]
    }

    #[tokio::test]
    async fn create_persists_and_mails_the_owner() {
        let h = harness().await;
        let created = h.workflow.create_trip(paris(), guests()).await.unwrap();
        let report = created.fanout.wait().await;
        assert_eq!(report.attempted, 1);

        let trip = h.workflow.get_trip(created.value).await.unwrap();
        assert!(!trip.is_confirmed);
        assert_eq!(h.workflow.list_participants(trip.id).await.unwrap().len(), 2);

        let sent = h.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::ConfirmTrip);
        assert_eq!(sent[0].trip_id, trip.id);
    }

    #[tokio::test]
    async fn create_rejects_invalid_input_without_writing() {
        let h = harness().await;
        let mut trip = paris();
        trip.owner_email = "nope".into();
        let err = h.workflow.create_trip(trip, guests()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let dup = vec!["ana@example.com".into(), "ana@example.com".into()];
        let err = h.workflow.create_trip(paris(), dup).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn confirm_trip_invites_every_participant_once() {
        let h = harness_with(RecordingMailer::failing_for(&["ana@example.com"])).await;
        let created = h.workflow.create_trip(paris(), guests()).await.unwrap();
        created.fanout.wait().await;

        let confirmed = h.workflow.confirm_trip(created.value).await.unwrap();
        let report = confirmed.fanout.wait().await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);

        assert!(h.workflow.get_trip(created.value).await.unwrap().is_confirmed);
        let invited: Vec<_> = h
            .mailer
            .sent()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Invite)
            .map(|n| n.recipient)
            .collect();
        assert_eq!(invited.len(), 2);
        assert!(invited.contains(&"ben@example.com".to_string()));
    }

    #[tokio::test]
    async fn confirm_trip_twice_is_a_conflict() {
        let h = harness().await;
        let id = h.workflow.create_trip(paris(), vec![]).await.unwrap().value;
        let first = h.workflow.confirm_trip(id).await.unwrap();
        assert_eq!(first.fanout.wait().await.attempted, 0);
        let before = h.workflow.get_trip(id).await.unwrap();

        let err = h.workflow.confirm_trip(id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.workflow.get_trip(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn confirm_unknown_trip_is_not_found() {
        let h = harness().await;
        let err = h.workflow.confirm_trip(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Trip")));
    }

    #[tokio::test]
    async fn confirm_participant_sends_nothing() {
        let h = harness().await;
        let created = h.workflow.create_trip(paris(), guests()).await.unwrap();
        created.fanout.wait().await;
        let participant = h.workflow.list_participants(created.value).await.unwrap()[0].clone();

        h.workflow.confirm_participant(participant.id).await.unwrap();
        assert!(h.workflow.get_participant(participant.id).await.unwrap().is_confirmed);
        let err = h.workflow.confirm_participant(participant.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = h.workflow.confirm_participant(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Participant")));
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn invite_mails_only_the_new_participant() {
        let h = harness().await;
        let created = h.workflow.create_trip(paris(), guests()).await.unwrap();
        created.fanout.wait().await;

        let invited = h
            .workflow
            .invite_participant(created.value, "cleo@example.com".into())
            .await
            .unwrap();
        invited.fanout.wait().await;

        let participant = h.workflow.get_participant(invited.value).await.unwrap();
        assert_eq!(participant.email, "cleo@example.com");
        assert!(!participant.is_confirmed);
        let last = h.mailer.sent().pop().unwrap();
        assert_eq!(last, Notification::invite(created.value, "cleo@example.com"));

        let err = h
            .workflow
            .invite_participant(created.value, "ana@example.com".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = h
            .workflow
            .invite_participant(Uuid::new_v4(), "dan@example.com".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Trip")));
    }

    #[tokio::test]
    async fn padded_invitees_are_stored_once() {
        let h = harness().await;
        let padded = vec!["ana@example.com".into(), " Ana@example.com ".into()];
        let err = h.workflow.create_trip(paris(), padded).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let id = h
            .workflow
            .create_trip(paris(), vec![" Ben@Example.com\t".into()])
            .await
            .unwrap()
            .value;
        let err = h
            .workflow
            .invite_participant(id, "ben@example.com\t".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let participants = h.workflow.list_participants(id).await.unwrap();
        let emails: Vec<_> = participants.into_iter().map(|p| p.email).collect();
        assert_eq!(emails, vec!["ben@example.com".to_string()]);

        h.workflow.confirm_trip(id).await.unwrap().fanout.wait().await;
        let invited = h
            .mailer
            .sent()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Invite)
            .count();
        assert_eq!(invited, 1);
    }

    #[tokio::test]
    async fn update_resets_confirmation() {
        let h = harness().await;
        let id = h.workflow.create_trip(paris(), vec![]).await.unwrap().value;
        h.workflow.confirm_trip(id).await.unwrap().fanout.wait().await;

        let trip = paris();
        h.workflow
            .update_trip(id, "Marseille".into(), trip.starts_at, trip.ends_at)
            .await
            .unwrap();
        let updated = h.workflow.get_trip(id).await.unwrap();
        assert_eq!(updated.destination, "Marseille");
        assert!(!updated.is_confirmed);
    }

    #[tokio::test]
    async fn activities_and_links_need_an_existing_trip() {
        let h = harness().await;
        let id = h.workflow.create_trip(paris(), vec![]).await.unwrap().value;

        h.workflow
            .create_activity(NewActivity {
                trip_id: id,
                title: "Louvre".into(),
                occurs_at: paris().starts_at,
            })
            .await
            .unwrap();
        h.workflow
            .create_link(NewLink {
                trip_id: id,
                title: "Hotel".into(),
                url: "https://example.com/hotel".into(),
            })
            .await
            .unwrap();
        assert_eq!(h.workflow.list_activities(id).await.unwrap().len(), 1);
        assert_eq!(h.workflow.list_links(id).await.unwrap().len(), 1);

        let err = h
            .workflow
            .create_link(NewLink {
                trip_id: Uuid::new_v4(),
                title: "Hotel".into(),
                url: "https://example.com/hotel".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Trip")));
    }

    /// Real store whose participant listing is down.
    struct ParticipantsUnavailable(SqliteTripStore);

    #[async_trait]
    impl TripStore for ParticipantsUnavailable {
        async fn create_trip_with_participants(
            &self,
            trip: &NewTrip,
            invitees: &[String],
        ) -> Result<Uuid, StoreError> {
            self.0.create_trip_with_participants(trip, invitees).await
        }
        async fn get_trip(&self, id: Uuid) -> Result<Trip, StoreError> {
            self.0.get_trip(id).await
        }
        async fn update_trip(&self, id: Uuid, update: &TripUpdate) -> Result<(), StoreError> {
            self.0.update_trip(id, update).await
        }
        async fn confirm_trip(&self, id: Uuid) -> Result<(), StoreError> {
            self.0.confirm_trip(id).await
        }
        async fn get_participant(&self, id: Uuid) -> Result<Participant, StoreError> {
            self.0.get_participant(id).await
        }
        async fn get_participants(&self, _: Uuid) -> Result<Vec<Participant>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn confirm_participant(&self, id: Uuid) -> Result<(), StoreError> {
            self.0.confirm_participant(id).await
        }
        async fn invite_participant(&self, trip_id: Uuid, email: &str) -> Result<Uuid, StoreError> {
            self.0.invite_participant(trip_id, email).await
        }
        async fn create_activity(&self, activity: &NewActivity) -> Result<Uuid, StoreError> {
            self.0.create_activity(activity).await
        }
        async fn get_activities(&self, trip_id: Uuid) -> Result<Vec<Activity>, StoreError> {
            self.0.get_activities(trip_id).await
        }
        async fn create_link(&self, link: &NewLink) -> Result<Uuid, StoreError> {
            self.0.create_link(link).await
        }
        async fn get_links(&self, trip_id: Uuid) -> Result<Vec<Link>, StoreError> {
            self.0.get_links(trip_id).await
        }
    }

    #[tokio::test]
    async fn failed_participant_read_leaves_trip_unconfirmed() {
        let mailer = Arc::new(RecordingMailer::default());
        let workflow = TripWorkflow::new(
            Arc::new(ParticipantsUnavailable(SqliteTripStore::new(
                memory_pool().await.unwrap(),
            ))),
            FanoutDispatcher::new(mailer.clone(), DispatchConfig::default()),
        );
        let created = workflow.create_trip(paris(), guests()).await.unwrap();
        created.fanout.wait().await;

        for _ in 0..2 {
            let err = workflow.confirm_trip(created.value).await.unwrap_err();
            assert!(matches!(
                err,
                AppError::Store {
                    context: "getting participants for trip",
                    ..
                }
            ));
        }
        assert!(!workflow.get_trip(created.value).await.unwrap().is_confirmed);
        assert!(mailer
            .sent()
            .iter()
            .all(|n| n.kind == NotificationKind::ConfirmTrip));
    }

    /// Store whose writes always fail, to check how store errors surface.
    struct BrokenStore;

    #[async_trait]
    impl TripStore for BrokenStore {
        async fn create_trip_with_participants(
            &self,
            _: &NewTrip,
            _: &[String],
        ) -> Result<Uuid, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn get_trip(&self, _: Uuid) -> Result<Trip, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn update_trip(&self, _: Uuid, _: &TripUpdate) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn confirm_trip(&self, _: Uuid) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn get_participant(&self, _: Uuid) -> Result<Participant, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn get_participants(&self, _: Uuid) -> Result<Vec<Participant>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn confirm_participant(&self, _: Uuid) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn invite_participant(&self, _: Uuid, _: &str) -> Result<Uuid, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn create_activity(&self, _: &NewActivity) -> Result<Uuid, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn get_activities(&self, _: Uuid) -> Result<Vec<Activity>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn create_link(&self, _: &NewLink) -> Result<Uuid, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn get_links(&self, _: Uuid) -> Result<Vec<Link>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn store_failures_become_generic_errors() {
        let mailer = Arc::new(RecordingMailer::default());
        let workflow = TripWorkflow::new(
            Arc::new(BrokenStore),
            FanoutDispatcher::new(mailer.clone(), DispatchConfig::default()),
        );

        let err = workflow.create_trip(paris(), guests()).await.unwrap_err();
        assert!(matches!(err, AppError::Store { context: "creating trip", .. }));
        assert_eq!(
            err.public_message(),
            "Something went wrong creating trip, try again"
        );

        let err = workflow.confirm_trip(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::Store { .. }));
        assert!(mailer.sent().is_empty());
    }
}
