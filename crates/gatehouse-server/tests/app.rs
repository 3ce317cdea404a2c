use std::net::SocketAddr;

use assert_json_diff::assert_json_include;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use gatehouse_server::{AppConfig, GatehouseServer, ServerBuilder};
use serde_json::{Value, json};
use tower::ServiceExt;

const ISSUER_PEM: &str = include_str!("fixtures/issuer.pem");

fn server() -> GatehouseServer {
    let mut config = AppConfig::default();
    config.auth.session.domain = "example.com".into();
    config.auth.session.portal_url = "https://auth.example.com".into();
    config.auth.oidc.issuer_private_key = Some(ISSUER_PEM.into());
    ServerBuilder::new()
        .with_config(config)
        .build()
        .expect("server builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-proto", "https")
        .header("x-forwarded-host", "auth.example.com")
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn health_through_full_stack() {
    let app = server().app();
    tokio_test::block_on(async {
        let response = app.oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_json_include!(actual: json_body(response).await, expected: json!({"status": "OK"}));
    });
}

#[tokio::test]
async fn discovery_uses_forwarded_issuer() {
    let response = server()
        .app()
        .oneshot(get("/.well-known/openid-configuration"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_json_include!(
        actual: json_body(response).await,
        expected: json!({
            "issuer": "https://auth.example.com",
            "jwks_uri": "https://auth.example.com/api/oidc/jwks",
            "code_challenge_methods_supported": ["plain", "S256"],
        })
    );
}

#[tokio::test]
async fn jwks_publishes_thumbprint_kid() {
    let response = server().app().oneshot(get("/api/oidc/jwks")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::CACHE_CONTROL));

    let body = json_body(response).await;
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kid"].as_str().unwrap().len(), 43);
    assert_json_include!(actual: keys[0].clone(), expected: json!({"kty": "RSA", "use": "sig"}));
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let mut config = AppConfig::default();
    config.server.body_limit_bytes = 16;
    config.auth.oidc.issuer_private_key = Some(ISSUER_PEM.into());
    let app = ServerBuilder::new().with_config(config).build().unwrap().app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/firstfactor")
        .header("content-type", "application/json")
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
        .body(Body::from(
            json!({"username": "john", "password": "a-long-password"}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
