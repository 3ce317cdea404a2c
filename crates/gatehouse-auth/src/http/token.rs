//! Token, introspection and revocation handlers.
//!
//! All three authenticate the calling client first. The assertion audience
//! for `private_key_jwt` is the URL of the endpoint being called.

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::debug;

use super::GatewayState;
use crate::AuthResult;
use crate::error::AuthError;
use crate::middleware::PeerAddr;
use crate::oauth::{AuthenticatedClient, ClientCredentials, TokenRequest, parse_basic_auth};
use crate::token::{IntrospectionRequest, RevocationRequest};

/// `POST {token_path}`
pub async fn token(
    State(state): State<GatewayState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let result = async {
        let Form(request) = form.map_err(malformed)?;
        let issuer = state.issuer(peer, &headers)?;
        let caller = authenticate(
            &state,
            &headers,
            &request.credentials(),
            &issuer,
            &state.oidc.token_path,
        )
        .await?;
        state
            .tokens
            .exchange(&request, &caller.client, &issuer)
            .await
    }
    .await;

    match result {
        Ok(body) => no_store(body),
        Err(e) => state.error(e),
    }
}

/// `POST {introspection_path}` (RFC 7662)
pub async fn introspect(
    State(state): State<GatewayState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    form: Result<Form<IntrospectionRequest>, FormRejection>,
) -> Response {
    let result = async {
        let Form(request) = form.map_err(malformed)?;
        let issuer = state.issuer(peer, &headers)?;
        let caller = authenticate(
            &state,
            &headers,
            &request.credentials(),
            &issuer,
            &state.oidc.introspection_path,
        )
        .await?;
        state
            .tokens
            .introspect(&request.token, &caller.client, &issuer)
            .await
    }
    .await;

    match result {
        Ok(body) => no_store(body),
        Err(e) => state.error(e),
    }
}

/// `POST {revocation_path}` (RFC 7009)
///
/// Always `200` with an empty body once the caller is authenticated.
pub async fn revoke(
    State(state): State<GatewayState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    form: Result<Form<RevocationRequest>, FormRejection>,
) -> Response {
    let result = async {
        let Form(request) = form.map_err(malformed)?;
        let issuer = state.issuer(peer, &headers)?;
        let caller = authenticate(
            &state,
            &headers,
            &request.credentials(),
            &issuer,
            &state.oidc.revocation_path,
        )
        .await?;
        state
            .tokens
            .revoke(&request.token, request.token_type_hint, &caller.client)
            .await
    }
    .await;

    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => state.error(e),
    }
}

async fn authenticate(
    state: &GatewayState,
    headers: &HeaderMap,
    credentials: &ClientCredentials,
    issuer: &str,
    path: &str,
) -> AuthResult<AuthenticatedClient> {
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_auth);
    let audience = format!("{}{}", issuer.trim_end_matches('/'), path);
    state
        .authenticator
        .authenticate(credentials, basic, &audience)
        .await
}

fn malformed(rejection: FormRejection) -> AuthError {
    debug!(error = %rejection, "Rejected malformed form body");
    AuthError::invalid_request(rejection.body_text())
}

/// JSON with the caching headers token responses require.
fn no_store<T: Serialize>(body: T) -> Response {
    let mut response = Json(body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
