//! Plain-text bodies for the two kinds of trip email.

use askama::Template;

use crate::models::Trip;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Template)]
#[template(path = "emails/confirm_trip.txt")]
pub struct ConfirmTripEmail {
    owner_name: String,
    destination: String,
    trip_id: String,
    starts_at: String,
    ends_at: String,
}

#[derive(Template)]
#[template(path = "emails/invite.txt")]
pub struct InviteEmail {
    owner_name: String,
    destination: String,
    trip_id: String,
    starts_at: String,
    ends_at: String,
}

impl ConfirmTripEmail {
    pub fn new(trip: &Trip) -> Self {
        Self {
            owner_name: trip.owner_name.clone(),
            destination: trip.destination.clone(),
            trip_id: trip.id.to_string(),
            starts_at: trip.starts_at.format(DATE_FORMAT).to_string(),
            ends_at: trip.ends_at.format(DATE_FORMAT).to_string(),
        }
    }

    pub fn subject(&self) -> String {
        format!("Confirm your trip to {}", self.destination)
    }
}

impl InviteEmail {
    pub fn new(trip: &Trip) -> Self {
        Self {
            owner_name: trip.owner_name.clone(),
            destination: trip.destination.clone(),
            trip_id: trip.id.to_string(),
            starts_at: trip.starts_at.format(DATE_FORMAT).to_string(),
            ends_at: trip.ends_at.format(DATE_FORMAT).to_string(),
        }
    }

    pub fn subject(&self) -> String {
        format!("You are invited on a trip to {}!", self.destination)
    }
}
