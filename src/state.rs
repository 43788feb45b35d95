use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    error::AppError,
    services::{
        dispatcher::{DispatchConfig, FanoutDispatcher},
        mailer::{Mailer, SmtpMailer},
    },
    store::{SqliteTripStore, TripStore},
    workflow::TripWorkflow,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub workflow: TripWorkflow,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool, mailer: Arc<dyn Mailer>) -> Self {
        let store: Arc<dyn TripStore> = Arc::new(SqliteTripStore::new(db.clone()));
        let dispatcher = FanoutDispatcher::new(
            mailer,
            DispatchConfig {
                concurrency: config.fanout_concurrency,
                send_timeout: config.mail_send_timeout,
            },
        );
        Self {
            workflow: TripWorkflow::new(store, dispatcher),
            config,
            db,
        }
    }

    /// Wires the SMTP mailer against the same database.
    pub fn with_smtp(config: AppConfig, db: DbPool) -> Result<Self, AppError> {
        let store: Arc<dyn TripStore> = Arc::new(SqliteTripStore::new(db.clone()));
        let mailer = SmtpMailer::new(&config.smtp, store)
            .map_err(|err| AppError::Config(format!("smtp: {err}")))?;
        Ok(Self::new(config, db, Arc::new(mailer)))
    }
}
