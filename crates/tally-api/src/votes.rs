use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::error::{ApiError, blocking};
use crate::middleware::AuthMember;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OptionQuery {
    pub option_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    pub index: usize,
}

pub async fn cast_vote(
    State(state): State<AppState>,
    AuthMember(member_id): AuthMember,
    Path(poll_id): Path<i64>,
    Query(query): Query<OptionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let result =
        blocking(&state, move |svc| svc.cast_vote(poll_id, query.option_id, member_id)).await?;
    Ok(Json(result))
}

pub async fn cast_vote_by_index(
    State(state): State<AppState>,
    AuthMember(member_id): AuthMember,
    Path(poll_id): Path<i64>,
    Query(query): Query<IndexQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let result =
        blocking(&state, move |svc| svc.cast_vote_by_index(poll_id, query.index, member_id)).await?;
    Ok(Json(result))
}

pub async fn cancel_vote(
    State(state): State<AppState>,
    AuthMember(member_id): AuthMember,
    Path(poll_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |svc| svc.cancel_vote(poll_id, member_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
