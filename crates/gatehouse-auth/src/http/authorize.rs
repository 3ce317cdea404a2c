//! Authorization and consent handlers.

use axum::{
    Json,
    extract::{OriginalUri, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{debug, warn};

use super::GatewayState;
use crate::error::AuthError;
use crate::middleware::PeerAddr;
use crate::oauth::{
    AuthorizationRequest, AuthorizeError, AuthorizeOutcome, ConsentDecision, ConsentRedirect,
};

/// `GET {authorization_path}`
///
/// Sends the browser to the portal to log in or consent. Errors are shown
/// directly until the client and redirect URI are validated, and delivered
/// to the client afterwards.
pub async fn authorize(
    State(state): State<GatewayState>,
    PeerAddr(peer): PeerAddr,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(request): Query<AuthorizationRequest>,
) -> Response {
    let issuer = match state.issuer(peer, &headers) {
        Ok(issuer) => issuer,
        Err(e) => return state.error(e),
    };
    let session = match state.session(&headers).await {
        Ok(session) => session,
        Err(e) => return state.error(e),
    };

    match state.authorization.authorize(&request, session.as_ref()).await {
        Ok(AuthorizeOutcome::LoginRequired { required }) => {
            debug!(required = %required, "Authorization requires login");
            let mut portal = state.forward.portal_url.clone();
            let target = format!(
                "{}{}",
                issuer.trim_end_matches('/'),
                uri.path_and_query().map_or("/", |pq| pq.as_str())
            );
            if state.forward.guard.is_safe(&target) {
                portal.query_pairs_mut().append_pair("rd", &target);
            } else {
                warn!(target = %target, "Authorization target is outside the session domain");
            }
            Redirect::to(portal.as_str()).into_response()
        }
        Ok(AuthorizeOutcome::ConsentRequired { consent_id }) => {
            let mut consent = state.forward.portal_url.clone();
            let path = format!("{}/consent", consent.path().trim_end_matches('/'));
            consent.set_path(&path);
            consent
                .query_pairs_mut()
                .append_pair("consent_id", &consent_id);
            Redirect::to(consent.as_str()).into_response()
        }
        Err(AuthorizeError::Direct(e)) => state.error(e),
        Err(err @ AuthorizeError::Redirect { .. }) => match err.redirect_url() {
            Some(url) => Redirect::to(&url).into_response(),
            None => state.error(AuthError::invalid_request("Invalid redirect URI")),
        },
    }
}

/// Query of `GET {consent_path}`.
#[derive(Debug, Deserialize)]
pub struct ConsentQuery {
    /// Pending consent identifier.
    #[serde(default)]
    pub consent_id: String,
}

/// `GET {consent_path}?consent_id=...`
///
/// Describes a pending consent to the logged-in subject it belongs to.
pub async fn consent_get(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<ConsentQuery>,
) -> Response {
    let subject = match require_subject(&state, &headers).await {
        Ok(subject) => subject,
        Err(e) => return state.error(e),
    };
    match state.authorization.describe(&query.consent_id, &subject).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => state.error(e),
    }
}

/// `POST {consent_path}`
///
/// Records an accept or reject and returns where the portal should send
/// the browser.
pub async fn consent_post(
    State(state): State<GatewayState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
    Json(decision): Json<ConsentDecision>,
) -> Response {
    let subject = match require_subject(&state, &headers).await {
        Ok(subject) => subject,
        Err(e) => return state.error(e),
    };
    let Some(accept) = decision.accepted() else {
        return state.error(AuthError::invalid_request(
            "accept_or_reject must be 'accept' or 'reject'",
        ));
    };
    let issuer = match state.issuer(peer, &headers) {
        Ok(issuer) => issuer,
        Err(e) => return state.error(e),
    };

    match state
        .authorization
        .decide(&decision.consent_id, &subject, accept, &issuer)
        .await
    {
        Ok(redirect_uri) => Json(ConsentRedirect { redirect_uri }).into_response(),
        Err(e) => state.error(e),
    }
}

async fn require_subject(state: &GatewayState, headers: &HeaderMap) -> Result<String, AuthError> {
    state
        .session(headers)
        .await?
        .map(|s| s.subject.username)
        .ok_or_else(|| AuthError::authentication_required("A session is required"))
}
