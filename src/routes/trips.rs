use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{json_body, parse_id};
use crate::{
    error::AppError,
    models::{Activity, NewActivity, NewLink, NewTrip},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trips", post(create_trip))
        .route("/trips/:trip_id", get(trip_details).put(update_trip))
        .route("/trips/:trip_id/confirm", get(confirm_trip))
        .route("/trips/:trip_id/invites", post(invite))
        .route("/trips/:trip_id/participants", get(participants))
        .route(
            "/trips/:trip_id/activities",
            get(activities).post(create_activity),
        )
        .route("/trips/:trip_id/links", get(links).post(create_link))
}

#[derive(Debug, Deserialize)]
pub struct CreateTripRequest {
    pub destination: String,
    pub owner_name: String,
    pub owner_email: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub emails_to_invite: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTripResponse {
    trip_id: Uuid,
}

async fn create_trip(
    State(state): State<AppState>,
    payload: Result<Json<CreateTripRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let body = json_body(payload)?;
    let trip = NewTrip {
        destination: body.destination,
        owner_email: body.owner_email,
        owner_name: body.owner_name,
        starts_at: body.starts_at,
        ends_at: body.ends_at,
    };
    let created = state.workflow.create_trip(trip, body.emails_to_invite).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTripResponse {
            trip_id: created.value,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct TripDetails {
    id: Uuid,
    destination: String,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    is_confirmed: bool,
}

#[derive(Debug, Serialize)]
struct TripDetailsResponse {
    trip: TripDetails,
}

async fn trip_details(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let trip = state.workflow.get_trip(parse_id(&trip_id)?).await?;
    Ok(Json(TripDetailsResponse {
        trip: TripDetails {
            id: trip.id,
            destination: trip.destination,
            starts_at: trip.starts_at,
            ends_at: trip.ends_at,
            is_confirmed: trip.is_confirmed,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTripRequest {
    pub destination: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

async fn update_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    payload: Result<Json<UpdateTripRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&trip_id)?;
    let body = json_body(payload)?;
    state
        .workflow
        .update_trip(id, body.destination, body.starts_at, body.ends_at)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn confirm_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<StatusCode, AppError> {
    // The invitation fan-out keeps running after the response is sent.
    state.workflow.confirm_trip(parse_id(&trip_id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InviteResponse {
    participant_id: Uuid,
}

async fn invite(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    payload: Result<Json<InviteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_id(&trip_id)?;
    let body = json_body(payload)?;
    let invited = state.workflow.invite_participant(id, body.email).await?;
    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            participant_id: invited.value,
        }),
    ))
}

#[derive(Debug, Serialize)]
struct ParticipantItem {
    id: Uuid,
    email: String,
    is_confirmed: bool,
}

#[derive(Debug, Serialize)]
struct ParticipantsResponse {
    participants: Vec<ParticipantItem>,
}

async fn participants(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let participants = state
        .workflow
        .list_participants(parse_id(&trip_id)?)
        .await?
        .into_iter()
        .map(|p| ParticipantItem {
            id: p.id,
            email: p.email,
            is_confirmed: p.is_confirmed,
        })
        .collect();
    Ok(Json(ParticipantsResponse { participants }))
}

#[derive(Debug, Deserialize)]
pub struct CreateActivityRequest {
    pub title: String,
    pub occurs_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateActivityResponse {
    activity_id: Uuid,
}

async fn create_activity(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    payload: Result<Json<CreateActivityRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let trip_id = parse_id(&trip_id)?;
    let body = json_body(payload)?;
    let activity_id = state
        .workflow
        .create_activity(NewActivity {
            trip_id,
            title: body.title,
            occurs_at: body.occurs_at,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateActivityResponse { activity_id }),
    ))
}

#[derive(Debug, Serialize)]
struct ActivityItem {
    id: Uuid,
    title: String,
    occurs_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ActivityDay {
    date: NaiveDate,
    activities: Vec<ActivityItem>,
}

#[derive(Debug, Serialize)]
struct ActivitiesResponse {
    activities: Vec<ActivityDay>,
}

fn group_by_day(activities: Vec<Activity>) -> Vec<ActivityDay> {
    let mut days: BTreeMap<NaiveDate, Vec<ActivityItem>> = BTreeMap::new();
    for activity in activities {
        days.entry(activity.occurs_at.date_naive())
            .or_default()
            .push(ActivityItem {
                id: activity.id,
                title: activity.title,
                occurs_at: activity.occurs_at,
            });
    }
    days.into_iter()
        .map(|(date, activities)| ActivityDay { date, activities })
        .collect()
}

async fn activities(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let activities = state
        .workflow
        .list_activities(parse_id(&trip_id)?)
        .await?;
    Ok(Json(ActivitiesResponse {
        activities: group_by_day(activities),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLinkResponse {
    link_id: Uuid,
}

async fn create_link(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    payload: Result<Json<CreateLinkRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let trip_id = parse_id(&trip_id)?;
    let body = json_body(payload)?;
    let link_id = state
        .workflow
        .create_link(NewLink {
            trip_id,
            title: body.title,
            url: body.url,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(CreateLinkResponse { link_id })))
}

#[derive(Debug, Serialize)]
struct LinkItem {
    id: Uuid,
    title: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct LinksResponse {
    links: Vec<LinkItem>,
}

async fn links(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let links = state
        .workflow
        .list_links(parse_id(&trip_id)?)
        .await?
        .into_iter()
        .map(|l| LinkItem {
            id: l.id,
            title: l.title,
            url: l.url,
        })
        .collect();
    Ok(Json(LinksResponse { links }))
}
