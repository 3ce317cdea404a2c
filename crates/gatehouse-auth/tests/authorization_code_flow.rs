mod common;

use std::collections::HashMap;

use axum::http::{Method, StatusCode, header};
use axum::body::Body;
use common::{Gateway, empty, json, proxied, session_cookie};
use gatehouse_auth::AuthenticationLevel;
use gatehouse_auth::oauth::{PkceChallenge, PkceChallengeMethod, PkceVerifier};
use serde_json::{Value, json as body};
use tower::ServiceExt;
use url::Url;

const APP1_BASIC: &str = "Basic YXBwMTphcHAxLXNlY3JldA==";

/// Runs authorization and consent, returning the client redirect parameters.
async fn authorize(gateway: &Gateway, session: &str, query: &str) -> HashMap<String, String> {
    let response = gateway
        .router()
        .oneshot(
            proxied(Method::GET, &format!("/api/oidc/authorization?{query}"))
                .header(header::COOKIE, session_cookie(session))
                .body(empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let consent = Url::parse(response.headers()[header::LOCATION].to_str().unwrap()).unwrap();
    let consent_id = consent
        .query_pairs()
        .find(|(k, _)| k == "consent_id")
        .map(|(_, v)| v.into_owned())
        .expect("consent_id");

    let response = gateway
        .router()
        .oneshot(
            proxied(Method::GET, &format!("/api/oidc/consent?consent_id={consent_id}"))
                .header(header::COOKIE, session_cookie(session))
                .body(empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view = json(response).await;
    assert!(view["scopes"].as_array().is_some_and(|s| !s.is_empty()));

    let response = gateway
        .router()
        .oneshot(
            proxied(Method::POST, "/api/oidc/consent")
                .header(header::COOKIE, session_cookie(session))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    body!({ "consent_id": consent_id, "accept_or_reject": "accept" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let redirect = json(response).await["redirect_uri"]
        .as_str()
        .expect("redirect_uri")
        .to_string();
    Url::parse(&redirect)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

async fn token(gateway: &Gateway, basic: Option<&str>, form: &str) -> (StatusCode, Value) {
    let mut request = proxied(Method::POST, "/api/oidc/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(basic) = basic {
        request = request.header(header::AUTHORIZATION, basic);
    }
    let response = gateway
        .router()
        .oneshot(request.body(Body::from(form.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, json(response).await)
}

#[tokio::test]
async fn code_exchanges_exactly_once() {
    let gateway = Gateway::new();
    let session = gateway.login("john", &["admins"], AuthenticationLevel::OneFactor);

    let params = authorize(
        &gateway,
        &session,
        "response_type=code&client_id=app1&redirect_uri=https%3A%2F%2Fapp1.example%2Fcb\
         &scope=openid%20profile&state=abc",
    )
    .await;
    assert_eq!(params["state"], "abc");
    let code = &params["code"];

    let form = format!(
        "grant_type=authorization_code&code={code}&redirect_uri=https%3A%2F%2Fapp1.example%2Fcb"
    );
    let (status, tokens) = token(&gateway, Some(APP1_BASIC), &form).await;
    assert_eq!(status, StatusCode::OK);
    assert!(tokens["id_token"].is_string());
    assert!(tokens["access_token"].is_string());
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["scope"], "openid profile");

    let (status, error) = token(&gateway, Some(APP1_BASIC), &form).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "invalid_grant");
}

#[tokio::test]
async fn unregistered_redirect_uri_is_not_followed() {
    let gateway = Gateway::new();
    let session = gateway.login("john", &["admins"], AuthenticationLevel::OneFactor);

    for redirect in [
        "https%3A%2F%2Fapp1.example%2Fcb%2F..%2Fevil",
        "https%3A%2F%2Fapp1.example%2Fcbx",
        "https%3A%2F%2Fevil.com%2Fcb",
    ] {
        let response = gateway
            .router()
            .oneshot(
                proxied(
                    Method::GET,
                    &format!(
                        "/api/oidc/authorization?response_type=code&client_id=app1\
                         &redirect_uri={redirect}&scope=openid"
                    ),
                )
                .header(header::COOKIE, session_cookie(&session))
                .body(empty())
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{redirect}");
        assert!(response.headers().get(header::LOCATION).is_none());
        assert_eq!(json(response).await["error"], "invalid_request");
    }
}

#[tokio::test]
async fn unregistered_scope_is_redirected_as_error() {
    let gateway = Gateway::new();
    let session = gateway.login("john", &["admins"], AuthenticationLevel::OneFactor);

    let response = gateway
        .router()
        .oneshot(
            proxied(
                Method::GET,
                "/api/oidc/authorization?response_type=code&client_id=app1\
                 &redirect_uri=https%3A%2F%2Fapp1.example%2Fcb&scope=openid%20admin&state=s",
            )
            .header(header::COOKIE, session_cookie(&session))
            .body(empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = Url::parse(response.headers()[header::LOCATION].to_str().unwrap()).unwrap();
    let params: HashMap<_, _> = location.query_pairs().into_owned().collect();
    assert_eq!(location.host_str(), Some("app1.example"));
    assert_eq!(params["error"], "invalid_scope");
    assert_eq!(params["state"], "s");
}

#[tokio::test]
async fn public_client_must_prove_pkce() {
    let gateway = Gateway::new();
    let session = gateway.login("john", &["admins"], AuthenticationLevel::TwoFactor);
    let verifier = PkceVerifier::generate();
    let challenge = PkceChallenge::from_verifier(&verifier, PkceChallengeMethod::S256);

    let params = authorize(
        &gateway,
        &session,
        &format!(
            "response_type=code&client_id=spa&redirect_uri=https%3A%2F%2Fspa.example.com%2Fcallback\
             &scope=openid&code_challenge={}&code_challenge_method=S256",
            challenge.as_str()
        ),
    )
    .await;
    let code = &params["code"];

    let wrong = PkceVerifier::generate();
    let (status, error) = token(
        &gateway,
        None,
        &format!(
            "grant_type=authorization_code&client_id=spa&code={code}\
             &redirect_uri=https%3A%2F%2Fspa.example.com%2Fcallback&code_verifier={}",
            wrong.as_str()
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "invalid_grant");
}

#[tokio::test]
async fn refresh_tokens_rotate_and_replay_revokes_the_grant() {
    let gateway = Gateway::new();
    let session = gateway.login("john", &["admins"], AuthenticationLevel::OneFactor);

    let params = authorize(
        &gateway,
        &session,
        "response_type=code&client_id=app1&redirect_uri=https%3A%2F%2Fapp1.example%2Fcb\
         &scope=openid%20offline_access",
    )
    .await;
    let (status, first) = token(
        &gateway,
        Some(APP1_BASIC),
        &format!(
            "grant_type=authorization_code&code={}&redirect_uri=https%3A%2F%2Fapp1.example%2Fcb",
            params["code"]
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let original = first["refresh_token"].as_str().expect("refresh token").to_string();

    let (status, second) = token(
        &gateway,
        Some(APP1_BASIC),
        &format!("grant_type=refresh_token&refresh_token={original}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(second.get("id_token").is_none());
    let rotated = second["refresh_token"].as_str().expect("rotated").to_string();
    assert_ne!(rotated, original);

    let (status, error) = token(
        &gateway,
        Some(APP1_BASIC),
        &format!("grant_type=refresh_token&refresh_token={original}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "invalid_grant");

    let (status, _) = token(
        &gateway,
        Some(APP1_BASIC),
        &format!("grant_type=refresh_token&refresh_token={rotated}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
