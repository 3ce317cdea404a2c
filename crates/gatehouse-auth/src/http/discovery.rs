//! Discovery and JWKS handlers.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};

use super::GatewayState;
use crate::discovery::WellKnownConfiguration;
use crate::middleware::PeerAddr;

/// `GET /.well-known/openid-configuration`
///
/// The issuer comes from the trusted forwarded host, so one deployment can
/// serve several hostnames.
pub async fn openid_configuration(
    State(state): State<GatewayState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
) -> Response {
    match state.issuer(peer, &headers) {
        Ok(issuer) => Json(WellKnownConfiguration::build(&issuer, &state.oidc)).into_response(),
        Err(e) => state.error(e),
    }
}

/// `GET {jwks_path}`
///
/// Publishes the active key and every retired key still in its grace
/// period.
pub async fn jwks(State(state): State<GatewayState>) -> Response {
    let mut response = Json(state.keys.public_key_set()).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=300"),
    );
    response
}
