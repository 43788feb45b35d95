use std::sync::Arc;

use askama::Template;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    config::SmtpConfig,
    services::templates::{ConfirmTripEmail, InviteEmail},
    store::{StoreError, TripStore},
};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to load trip: {0}")]
    Trip(#[source] StoreError),
    #[error("invalid address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("smtp: {0}")]
    Smtp(String),
    #[error("send timed out")]
    Timeout,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Asks the trip owner to confirm the trip.
    async fn send_confirm_owner_email(&self, trip_id: Uuid) -> Result<(), TransportError>;

    async fn send_invite_email(&self, trip_id: Uuid, recipient: &str) -> Result<(), TransportError>;
}

pub struct SmtpMailer {
    store: Arc<dyn TripStore>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, store: Arc<dyn TripStore>) -> Result<Self, TransportError> {
        let mut builder = if config.use_tls {
            let tls = TlsParameters::new(config.host.clone())
                .map_err(|err| TransportError::Smtp(format!("tls configuration: {err}")))?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .tls(Tls::Required(tls))
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
        };

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            store,
            transport: builder.build(),
            from: parse_mailbox(&config.from_address)?,
        })
    }

    async fn deliver(&self, to: &str, subject: String, body: String) -> Result<(), TransportError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(to)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|err| TransportError::Build(err.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|err| TransportError::Smtp(err.to_string()))?;
        debug!(recipient = %to, "email sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address.parse().map_err(|err: lettre::address::AddressError| TransportError::Address {
        address: address.to_string(),
        reason: err.to_string(),
    })
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_confirm_owner_email(&self, trip_id: Uuid) -> Result<(), TransportError> {
        let trip = self.store.get_trip(trip_id).await.map_err(TransportError::Trip)?;
        let email = ConfirmTripEmail::new(&trip);
        let body = email
            .render()
            .map_err(|err| TransportError::Build(err.to_string()))?;
        self.deliver(&trip.owner_email, email.subject(), body).await
    }

    async fn send_invite_email(
        &self,
        trip_id: Uuid,
        recipient: &str,
    ) -> Result<(), TransportError> {
        let trip = self.store.get_trip(trip_id).await.map_err(TransportError::Trip)?;
        let email = InviteEmail::new(&trip);
        let body = email
            .render()
            .map_err(|err| TransportError::Build(err.to_string()))?;
        self.deliver(recipient, email.subject(), body).await
    }
}
