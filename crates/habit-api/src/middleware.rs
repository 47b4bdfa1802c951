use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::auth::{AppState, decode_token};
use crate::error::ApiError;

/// Extract and validate the bearer token; handlers read the claims from
/// request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".into()))?;

    let claims = decode_token(&state.jwt_secret, bearer.token())?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
