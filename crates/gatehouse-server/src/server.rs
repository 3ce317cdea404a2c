use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use gatehouse_auth::{
    Collaborators, GatewayState, GrantStore, KeyManager, MemoryCredentialBackend,
    MemoryGrantStore, MemorySessionProvider, SigningKey, TimeoutGrantStore,
    config::lifespan,
};
use tokio::task::JoinHandle;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::config::AppConfig;

/// How often expired grants, sessions and pending consents are dropped.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Wraps the gateway router with tracing, compression and a body limit.
pub fn build_app(state: GatewayState, body_limit: usize) -> Router {
    gatehouse_auth::router(state)
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    // Proxies poll these constantly.
                    if req.uri().path() == "/api/health" || req.uri().path() == "/favicon.ico" {
                        return tracing::span!(tracing::Level::TRACE, "noop");
                    }
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        if let Some(meta) = span.metadata() {
                            if meta.name() != "noop" {
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            }
                        }
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

/// Runtime pieces the background tasks need after the router took the state.
struct Maintenance {
    grants: Arc<dyn GrantStore>,
    sessions: Arc<MemorySessionProvider>,
    state: GatewayState,
}

impl Maintenance {
    async fn sweep(&self) {
        match self.grants.purge_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(purged = n, "Expired grants purged"),
            Err(e) => tracing::warn!(error = %e, "Grant purge failed"),
        }
        let sessions = self.sessions.purge_expired();
        let consents = self.state.authorization.consents().purge_expired();
        if sessions + consents > 0 {
            tracing::debug!(sessions, consents, "Expired sessions and consents purged");
        }
    }

    fn spawn(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Wires keys, stores and collaborators into a ready server.
    ///
    /// Must be called inside a Tokio runtime when key rotation is configured.
    pub fn build(self) -> anyhow::Result<GatehouseServer> {
        let auth = &self.config.auth;

        let signing_key = match &auth.oidc.issuer_private_key {
            Some(pem) => SigningKey::from_pem_thumbprint(pem)
                .context("oidc.issuer_private_key is not a usable RSA key")?,
            None => {
                tracing::warn!("No issuer key configured, generating an ephemeral one");
                SigningKey::generate().context("failed to generate a signing key")?
            }
        };
        let keys = Arc::new(KeyManager::new(signing_key));

        let grants: Arc<dyn GrantStore> = Arc::new(
            TimeoutGrantStore::new(Arc::new(MemoryGrantStore::new()), auth.session.store_timeout)
                .with_backoff(auth.session.retry_backoff),
        );
        let sessions = Arc::new(MemorySessionProvider::new(lifespan(auth.session.lifespan)));
        let users = Arc::new(MemoryCredentialBackend::new(auth.user_records()?));

        let state = GatewayState::from_config(
            auth,
            keys.clone(),
            grants.clone(),
            Collaborators {
                sessions: sessions.clone(),
                session_store: sessions.clone(),
                credentials: users.clone(),
                users,
            },
        )?;

        let mut tasks = Vec::new();
        if let Some(interval) = auth.oidc.key_rotation_interval {
            tracing::info!(?interval, "Signing key rotation enabled");
            tasks.push(keys.spawn_rotation(interval, auth.oidc.retired_key_lifespan));
        }

        let maintenance = Maintenance {
            grants,
            sessions,
            state: state.clone(),
        };

        Ok(GatehouseServer {
            addr: self.addr,
            app: build_app(state, self.config.server.body_limit_bytes),
            maintenance: Some(maintenance),
            tasks,
        })
    }
}

pub struct GatehouseServer {
    addr: SocketAddr,
    app: Router,
    maintenance: Option<Maintenance>,
    tasks: Vec<JoinHandle<()>>,
}

impl GatehouseServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The fully layered router, for driving requests without a listener.
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        if let Some(maintenance) = self.maintenance.take() {
            self.tasks.push(maintenance.spawn(MAINTENANCE_INTERVAL));
        }

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        for task in self.tasks {
            task.abort();
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUER_PEM: &str = include_str!("../tests/fixtures/issuer.pem");

    #[tokio::test]
    async fn test_build_with_defaults() {
        let mut config = AppConfig::default();
        config.auth.session.domain = "example.com".into();
        config.auth.session.portal_url = "https://auth.example.com".into();
        config.auth.oidc.issuer_private_key = Some(ISSUER_PEM.into());

        let server = ServerBuilder::new().with_config(config).build().unwrap();
        assert_eq!(server.addr(), "0.0.0.0:9091".parse().unwrap());
    }

    #[tokio::test]
    async fn test_build_rejects_bad_pem() {
        let mut config = AppConfig::default();
        config.auth.session.domain = "example.com".into();
        config.auth.session.portal_url = "https://auth.example.com".into();
        config.auth.oidc.issuer_private_key = Some("not a key".into());

        let err = ServerBuilder::new()
            .with_config(config)
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("issuer_private_key"));
    }
}
