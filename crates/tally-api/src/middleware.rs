use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use tally_types::api::Claims;

use crate::error::{ApiError, blocking};
use crate::state::AppState;

/// Who is making the request, if anyone. Always present after `authenticate`.
#[derive(Debug, Clone, Copy)]
pub struct Viewer(pub Option<i64>);

/// Extractor for routes that need a signed-in member.
#[derive(Debug, Clone, Copy)]
pub struct AuthMember(pub i64);

/// Validate the bearer token if one is sent. Requests without an
/// Authorization header pass through anonymously; a bad token is rejected.
/// A token that carries the member's profile refreshes the member table.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let viewer = match req.headers().get(header::AUTHORIZATION) {
        None => Viewer(None),
        Some(value) => {
            let token = value
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .ok_or(ApiError::Unauthorized)?;

            let token_data = decode::<Claims>(
                token,
                &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
                &Validation::default(),
            )
            .map_err(|_| ApiError::Unauthorized)?;

            // Profile claims keep the local member copy current.
            if let Some(member) = token_data.claims.member() {
                blocking(&state, move |svc| svc.sync_member(&member)).await?;
            }

            let member_id = token_data.claims.sub;
            req.extensions_mut().insert(token_data.claims);
            Viewer(Some(member_id))
        }
    };

    req.extensions_mut().insert(viewer);
    Ok(next.run(req).await)
}

impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Viewer>().copied().unwrap_or(Viewer(None)))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthMember {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Viewer>() {
            Some(Viewer(Some(member_id))) => Ok(AuthMember(*member_id)),
            _ => Err(ApiError::Unauthorized),
        }
    }
}
