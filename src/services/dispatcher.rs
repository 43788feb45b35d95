//! Bounded fan-out of trip emails.
//!
//! Every batch gets its own semaphore, so the cap applies per batch and never
//! across requests. A send that fails or times out is logged and counted; it
//! never stops the rest of the batch and is never retried.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{RwLock, Semaphore},
    task::{JoinHandle, JoinSet},
};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::services::mailer::{Mailer, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    ConfirmTrip,
    Invite,
}

/// One email to one recipient about one trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub trip_id: Uuid,
    pub recipient: String,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn confirm_trip(trip_id: Uuid, owner_email: impl Into<String>) -> Self {
        Self {
            trip_id,
            recipient: owner_email.into(),
            kind: NotificationKind::ConfirmTrip,
        }
    }

    pub fn invite(trip_id: Uuid, recipient: impl Into<String>) -> Self {
        Self {
            trip_id,
            recipient: recipient.into(),
            kind: NotificationKind::Invite,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of sends in flight at once.
    pub concurrency: usize,
    pub send_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            send_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub failed: usize,
}

/// Handle to a detached batch. Dropping it leaves the batch running.
#[derive(Debug)]
pub struct DispatchHandle(JoinHandle<DispatchReport>);

impl DispatchHandle {
    pub async fn wait(self) -> DispatchReport {
        match self.0.await {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "fan-out task did not finish");
                DispatchReport::default()
            }
        }
    }
}

#[derive(Clone)]
pub struct FanoutDispatcher {
    mailer: Arc<dyn Mailer>,
    config: DispatchConfig,
    // Each spawned batch holds a read guard until it finishes.
    batches: Arc<RwLock<()>>,
}

impl FanoutDispatcher {
    pub fn new(mailer: Arc<dyn Mailer>, mut config: DispatchConfig) -> Self {
        config.concurrency = config.concurrency.max(1);
        Self {
            mailer,
            config,
            batches: Arc::new(RwLock::new(())),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Runs `batch` on a background task and returns right away.
    pub fn spawn(&self, trip_id: Uuid, batch: Vec<Notification>) -> DispatchHandle {
        let dispatcher = self.clone();
        // Only fails while `drain` holds the lock.
        let guard = self.batches.clone().try_read_owned().ok();
        let span = info_span!("fanout", %trip_id, recipients = batch.len());
        DispatchHandle(tokio::spawn(
            async move {
                let report = dispatcher.dispatch(batch).await;
                drop(guard);
                report
            }
            .instrument(span),
        ))
    }

    /// Waits until every batch spawned so far has finished.
    pub async fn drain(&self) {
        let _idle = self.batches.write().await;
    }

    /// Attempts every notification exactly once and waits for all of them.
    pub async fn dispatch(&self, batch: Vec<Notification>) -> DispatchReport {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut sends = JoinSet::new();
        let mut report = DispatchReport::default();

        for notification in batch {
            // The semaphore is local and never closed.
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let mailer = self.mailer.clone();
            let timeout = self.config.send_timeout;
            report.attempted += 1;
            sends.spawn(
                async move {
                    let outcome = send_one(mailer.as_ref(), &notification, timeout).await;
                    drop(permit);
                    if let Err(err) = &outcome {
                        error!(
                            trip_id = %notification.trip_id,
                            recipient = %notification.recipient,
                            kind = ?notification.kind,
                            error = %err,
                            "failed to send trip email"
                        );
                    }
                    outcome.is_ok()
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => report.failed += 1,
                Err(err) => {
                    error!(error = %err, "email send task panicked");
                    report.failed += 1;
                }
            }
        }

        info!(
            attempted = report.attempted,
            failed = report.failed,
            "fan-out finished"
        );
        report
    }
}

async fn send_one(
    mailer: &dyn Mailer,
    notification: &Notification,
    timeout: Duration,
) -> Result<(), TransportError> {
    let send = async {
        match notification.kind {
            NotificationKind::ConfirmTrip => {
                mailer.send_confirm_owner_email(notification.trip_id).await
            }
            NotificationKind::Invite => {
                mailer
                    .send_invite_email(notification.trip_id, &notification.recipient)
                    .await
            }
        }
    };
    tokio::time::timeout(timeout, send)
        .await
        .map_err(|_| TransportError::Timeout)?
}
