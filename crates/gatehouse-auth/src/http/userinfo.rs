//! Userinfo handler.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};

use super::GatewayState;
use crate::error::AuthError;
use crate::middleware::PeerAddr;

/// `GET|POST {userinfo_path}`
///
/// Accepts only a Bearer token in the `Authorization` header.
pub async fn userinfo(
    State(state): State<GatewayState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
) -> Response {
    let Some(bearer) = bearer_token(&headers) else {
        return state.error(AuthError::invalid_token("Missing bearer token"));
    };
    let issuer = match state.issuer(peer, &headers) {
        Ok(issuer) => issuer,
        Err(e) => return state.error(e),
    };

    match state.tokens.userinfo(bearer, &issuer).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => state.error(e),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}
