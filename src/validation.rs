use lettre::{address::AddressError, Address};
use url::Url;

use crate::{
    error::AppError,
    models::{NewActivity, NewLink, NewTrip, TripUpdate},
};

const MIN_DESTINATION_LEN: usize = 4;

fn invalid(msg: impl Into<String>) -> AppError {
    AppError::InvalidInput(format!("Invalid input: {}", msg.into()))
}

/// Canonical form under which an address is deduplicated, stored and mailed.
pub fn normalize_email(address: &str) -> String {
    address.trim().to_lowercase()
}

pub fn email(address: &str) -> Result<(), AppError> {
    let parsed: Address = address.parse().map_err(|err: AddressError| {
        invalid(format!("{address:?} is not a valid email: {err}"))
    })?;
    let has_tld = parsed
        .domain()
        .rsplit_once('.')
        .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty());
    if !has_tld {
        return Err(invalid(format!("{address:?} is not a valid email")));
    }
    Ok(())
}

fn destination(value: &str) -> Result<(), AppError> {
    if value.trim().chars().count() < MIN_DESTINATION_LEN {
        return Err(invalid(format!(
            "destination must have at least {MIN_DESTINATION_LEN} characters"
        )));
    }
    Ok(())
}

pub fn new_trip(trip: &NewTrip, invitees: &[String]) -> Result<(), AppError> {
    destination(&trip.destination)?;
    if trip.owner_name.trim().is_empty() {
        return Err(invalid("owner_name is required"));
    }
    email(&trip.owner_email)?;
    if trip.ends_at < trip.starts_at {
        return Err(invalid("ends_at must not be before starts_at"));
    }
    invitees.iter().try_for_each(|invitee| email(invitee))
}

pub fn trip_update(update: &TripUpdate) -> Result<(), AppError> {
    destination(&update.destination)?;
    if update.ends_at < update.starts_at {
        return Err(invalid("ends_at must not be before starts_at"));
    }
    Ok(())
}

pub fn activity(activity: &NewActivity) -> Result<(), AppError> {
    if activity.title.trim().is_empty() {
        return Err(invalid("title is required"));
    }
    Ok(())
}

pub fn link(link: &NewLink) -> Result<(), AppError> {
    if link.title.trim().is_empty() {
        return Err(invalid("title is required"));
    }
    match Url::parse(&link.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(invalid(format!("unsupported url scheme {}", url.scheme()))),
        Err(err) => Err(invalid(format!("url: {err}"))),
    }
}
