use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use tally_types::api::{CreatePollRequest, UpdatePollRequest, VoteCountResponse};
use tally_types::models::PollStatus;

use crate::error::{ApiError, blocking};
use crate::middleware::{AuthMember, Viewer};
use crate::state::AppState;

/// Upper bound on `limit` for the ranking endpoint.
const MAX_TOP_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<PollStatus>,
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub status: Option<PollStatus>,
    pub limit: Option<u32>,
}

pub async fn create_poll(
    State(state): State<AppState>,
    AuthMember(member_id): AuthMember,
    Json(req): Json<CreatePollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = blocking(&state, move |svc| svc.create_poll(req, member_id)).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn list_polls(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let views = blocking(&state, move |svc| svc.list_polls(query.status, viewer)).await?;
    Ok(Json(views))
}

pub async fn top_polls(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Query(query): Query<TopQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query.status.unwrap_or(PollStatus::Ongoing);
    let limit = query.limit.unwrap_or(1).min(MAX_TOP_LIMIT);
    let views = blocking(&state, move |svc| svc.top_polls(status, limit, viewer)).await?;
    Ok(Json(views))
}

pub async fn get_poll(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(poll_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let view = blocking(&state, move |svc| svc.get_poll(poll_id, viewer)).await?;
    Ok(Json(view))
}

pub async fn update_poll(
    State(state): State<AppState>,
    AuthMember(member_id): AuthMember,
    Path(poll_id): Path<i64>,
    Json(req): Json<UpdatePollRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = blocking(&state, move |svc| svc.update_poll(poll_id, req, member_id)).await?;
    Ok(Json(view))
}

pub async fn delete_poll(
    State(state): State<AppState>,
    AuthMember(member_id): AuthMember,
    Path(poll_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |svc| svc.delete_poll(poll_id, member_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn close_poll(
    State(state): State<AppState>,
    AuthMember(member_id): AuthMember,
    Path(poll_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let view = blocking(&state, move |svc| svc.close_poll_as(poll_id, member_id)).await?;
    Ok(Json(view))
}

pub async fn get_statistics(
    State(state): State<AppState>,
    Path(poll_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = blocking(&state, move |svc| svc.get_statistics(poll_id)).await?;
    Ok(Json(stats))
}

pub async fn vote_count(
    State(state): State<AppState>,
    Path(poll_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let vote_count = blocking(&state, move |svc| svc.vote_count(poll_id)).await?;
    Ok(Json(VoteCountResponse { vote_count }))
}

pub async fn vote_count_by_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let vote_count = blocking(&state, move |svc| svc.vote_count_by_post(post_id)).await?;
    Ok(Json(VoteCountResponse { vote_count }))
}
