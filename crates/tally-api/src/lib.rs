//! HTTP surface for polls and votes.

pub mod error;
pub mod middleware;
pub mod polls;
pub mod state;
pub mod votes;

use axum::{
    Router,
    routing::{get, post, put},
};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// Every poll route. Handlers needing a member reject anonymous requests
/// themselves through the `AuthMember` extractor.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/polls", get(polls::list_polls).post(polls::create_poll))
        .route("/polls/top", get(polls::top_polls))
        .route(
            "/polls/{poll_id}",
            get(polls::get_poll).put(polls::update_poll).delete(polls::delete_poll),
        )
        .route("/polls/{poll_id}/close", put(polls::close_poll))
        .route("/polls/{poll_id}/vote", post(votes::cast_vote).delete(votes::cancel_vote))
        .route("/polls/{poll_id}/voting", post(votes::cast_vote_by_index))
        .route("/polls/{poll_id}/statistics", get(polls::get_statistics))
        .route("/polls/{poll_id}/votes/count", get(polls::vote_count))
        .route("/posts/{post_id}/poll/votes/count", get(polls::vote_count_by_post))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ))
        .with_state(state)
}
