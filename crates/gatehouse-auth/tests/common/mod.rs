#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{self, Method},
    response::Response,
};
use gatehouse_auth::config::{ClientConfig, UserConfig};
use gatehouse_auth::policy::AccessRuleConfig;
use gatehouse_auth::{
    AuthConfig, AuthenticationLevel, Collaborators, GatewayState, KeyManager,
    MemoryCredentialBackend, MemoryGrantStore, MemorySessionProvider, SigningKey, Subject,
};
use serde_json::Value;

pub struct Gateway {
    pub state: GatewayState,
    pub sessions: Arc<MemorySessionProvider>,
}

fn signing_key() -> SigningKey {
    static KEY: OnceLock<SigningKey> = OnceLock::new();
    KEY.get_or_init(|| SigningKey::generate().expect("key generation")).clone()
}

pub fn config() -> AuthConfig {
    let mut config = AuthConfig::default();
    config.server.production_mode = false;
    config.oidc.clients.push(ClientConfig {
        id: "app1".to_string(),
        secret: Some("$plaintext$app1-secret".to_string()),
        redirect_uris: vec!["https://app1.example/cb".to_string()],
        scopes: vec![
            "openid".to_string(),
            "profile".to_string(),
            "offline_access".to_string(),
        ],
        authorization_policy: "one_factor".to_string(),
        ..ClientConfig::default()
    });
    config.oidc.clients.push(ClientConfig {
        id: "spa".to_string(),
        public: true,
        redirect_uris: vec!["https://spa.example.com/callback".to_string()],
        ..ClientConfig::default()
    });
    config.access_control.rules = vec![
        AccessRuleConfig {
            domain: vec!["public.example.com".to_string()],
            policy: "bypass".to_string(),
            ..AccessRuleConfig::default()
        },
        AccessRuleConfig {
            domain: vec!["secure.example.com".to_string()],
            resources: vec!["^/admin.*$".to_string()],
            subject: vec!["group:admins".to_string()],
            policy: "two_factor".to_string(),
            ..AccessRuleConfig::default()
        },
        AccessRuleConfig {
            domain: vec!["secure.example.com".to_string()],
            resources: vec!["^/admin.*$".to_string()],
            policy: "deny".to_string(),
            ..AccessRuleConfig::default()
        },
        AccessRuleConfig {
            domain: vec!["*.example.com".to_string()],
            policy: "one_factor".to_string(),
            ..AccessRuleConfig::default()
        },
    ];
    config.users = vec![
        UserConfig {
            username: "john".to_string(),
            display_name: "John Doe".to_string(),
            password: "$plaintext$password".to_string(),
            emails: vec!["john@example.com".to_string()],
            groups: vec!["admins".to_string()],
            disabled: false,
        },
        UserConfig {
            username: "harry".to_string(),
            display_name: "Harry Potter".to_string(),
            password: "$plaintext$password".to_string(),
            emails: vec!["harry@example.com".to_string()],
            groups: vec!["users".to_string()],
            disabled: false,
        },
    ];
    config
}

impl Gateway {
    pub fn new() -> Self {
        let config = config();
        let sessions = Arc::new(MemorySessionProvider::new(time::Duration::hours(1)));
        let backend = Arc::new(MemoryCredentialBackend::new(
            config.user_records().expect("users"),
        ));
        let state = GatewayState::from_config(
            &config,
            Arc::new(KeyManager::new(signing_key())),
            Arc::new(MemoryGrantStore::new()),
            Collaborators {
                sessions: sessions.clone(),
                session_store: sessions.clone(),
                credentials: backend.clone(),
                users: backend,
            },
        )
        .expect("gateway state");
        Self { state, sessions }
    }

    pub fn router(&self) -> Router {
        gatehouse_auth::router(self.state.clone())
    }

    pub fn login(&self, username: &str, groups: &[&str], level: AuthenticationLevel) -> String {
        self.sessions.create(
            Subject {
                username: username.to_string(),
                display_name: username.to_string(),
                emails: vec![format!("{username}@example.com")],
                groups: groups.iter().map(|g| g.to_string()).collect(),
            },
            level,
        )
    }
}

/// A request relayed by the trusted local proxy.
pub fn proxied(method: Method, uri: &str) -> http::request::Builder {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
        .header("x-forwarded-proto", "https")
        .header("x-forwarded-host", "auth.example.com")
}

/// A forward-auth subrequest for `https://{host}{uri}`.
pub fn verify(host: &str, uri: &str) -> http::request::Builder {
    http::Request::builder()
        .uri("/api/verify")
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
        .header("x-forwarded-proto", "https")
        .header("x-forwarded-host", host)
        .header("x-forwarded-uri", uri)
        .header("x-forwarded-method", "GET")
        .header("x-forwarded-for", "192.0.2.10")
}

pub fn session_cookie(id: &str) -> String {
    format!("gatehouse_session={id}")
}

pub async fn json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn empty() -> Body {
    Body::empty()
}
