//! Gateway configuration.
//!
//! The configuration is an immutable snapshot for the lifetime of the
//! process. Validation collects every problem instead of stopping at the
//! first, and separates fatal errors from warnings.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth.session]
//! domain = "example.com"
//! portal_url = "https://auth.example.com"
//!
//! [auth.access_control]
//! default_policy = "deny"
//!
//! [[auth.access_control.rules]]
//! domain = ["*.example.com"]
//! resources = ["^/admin/.*$"]
//! policy = "two_factor"
//!
//! [[auth.oidc.clients]]
//! id = "app1"
//! secret = "$plaintext$app1-secret"
//! redirect_uris = ["https://app1.example.com/cb"]
//! ```

use std::collections::HashSet;
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::clients::{Client, ClientSecret, GrantType, TokenEndpointAuthMethod};
use crate::keys::Jwks;
use crate::middleware::redirect::host_within_domain;
use crate::policy::{AccessRuleConfig, Level, RuleSet};
use crate::session::{Subject, UserRecord};

/// Routes the OIDC paths must not shadow.
const RESERVED_PATHS: [&str; 7] = [
    "/",
    crate::http::VERIFY_PATH,
    crate::http::HEALTH_PATH,
    crate::http::DISCOVERY_PATH,
    crate::http::AUTHORIZATION_SERVER_METADATA_PATH,
    crate::http::portal::FIRST_FACTOR_PATH,
    crate::http::portal::LOGOUT_PATH,
];

/// Root gateway configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session cookie and portal settings.
    pub session: SessionConfig,
    /// Reverse proxy trust settings.
    pub server: TrustConfig,
    /// OpenID Connect provider settings.
    pub oidc: OidcConfig,
    /// Ordered access rules.
    pub access_control: AccessControlConfig,
    /// Users for the file-backed credential backend.
    pub users: Vec<UserConfig>,
}

/// Session cookie and portal settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Protected domain. Redirects and CORS origins must stay inside it.
    pub domain: String,
    /// Login portal URL.
    pub portal_url: String,
    /// Session cookie name.
    pub cookie_name: String,
    /// Session lifetime.
    #[serde(with = "humantime_serde")]
    pub lifespan: Duration,
    /// Deadline for one session or grant store call.
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
    /// Pause before retrying an idempotent store call.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            domain: "example.com".to_string(),
            portal_url: "https://auth.example.com".to_string(),
            cookie_name: "gatehouse_session".to_string(),
            lifespan: Duration::from_secs(3600),
            store_timeout: Duration::from_secs(2),
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Reverse proxy trust settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Networks whose `X-Forwarded-*` headers are believed.
    pub trusted_proxies: Vec<String>,
    /// Hide internal error detail from responses.
    pub production_mode: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trusted_proxies: vec!["127.0.0.0/8".to_string(), "::1/128".to_string()],
            production_mode: true,
        }
    }
}

impl TrustConfig {
    /// Parses the trusted proxy networks.
    ///
    /// # Errors
    /// Returns the first entry that is not an address or CIDR block.
    pub fn networks(&self) -> Result<Vec<IpNetwork>, ConfigError> {
        self.trusted_proxies
            .iter()
            .map(|n| {
                n.parse::<IpNetwork>().map_err(|_| {
                    ConfigError::InvalidValue(format!("server.trusted_proxies: invalid network '{n}'"))
                })
            })
            .collect()
    }
}

/// OpenID Connect provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Authorization endpoint path.
    pub authorization_path: String,
    /// Token endpoint path.
    pub token_path: String,
    /// Introspection endpoint path.
    pub introspection_path: String,
    /// Revocation endpoint path.
    pub revocation_path: String,
    /// Userinfo endpoint path.
    pub userinfo_path: String,
    /// JWKS path.
    pub jwks_path: String,
    /// Consent endpoint path.
    pub consent_path: String,

    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifespan: Duration,
    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifespan: Duration,
    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifespan: Duration,
    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifespan: Duration,
    /// How long a pending consent waits for the user.
    #[serde(with = "humantime_serde")]
    pub consent_lifespan: Duration,

    /// Signing key rotation interval; no rotation when absent.
    #[serde(with = "humantime_serde")]
    pub key_rotation_interval: Option<Duration>,
    /// How long a retired key stays in the JWKS.
    #[serde(with = "humantime_serde")]
    pub retired_key_lifespan: Duration,
    /// PEM-encoded RSA private key; a key is generated when absent.
    pub issuer_private_key: Option<String>,

    /// Clients that may introspect and revoke any token.
    pub privileged_clients: Vec<String>,
    /// Registered clients.
    pub clients: Vec<ClientConfig>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            authorization_path: "/api/oidc/authorization".to_string(),
            token_path: "/api/oidc/token".to_string(),
            introspection_path: "/api/oidc/introspection".to_string(),
            revocation_path: "/api/oidc/revocation".to_string(),
            userinfo_path: "/api/oidc/userinfo".to_string(),
            jwks_path: "/api/oidc/jwks".to_string(),
            consent_path: "/api/oidc/consent".to_string(),
            authorization_code_lifespan: Duration::from_secs(60),
            access_token_lifespan: Duration::from_secs(3600),
            refresh_token_lifespan: Duration::from_secs(90 * 60),
            id_token_lifespan: Duration::from_secs(3600),
            consent_lifespan: Duration::from_secs(600),
            key_rotation_interval: None,
            retired_key_lifespan: Duration::from_secs(24 * 3600),
            issuer_private_key: None,
            privileged_clients: Vec::new(),
            clients: Vec::new(),
        }
    }
}

/// A client registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client identifier.
    pub id: String,
    /// Description shown on the consent page.
    pub description: String,
    /// Secret (`$plaintext$...` or an argon2 PHC hash).
    pub secret: Option<String>,
    /// Public clients have no secret and must use PKCE.
    pub public: bool,
    /// Exact redirect URIs.
    pub redirect_uris: Vec<String>,
    /// Allowed grant types.
    pub grant_types: Vec<String>,
    /// Allowed response types.
    pub response_types: Vec<String>,
    /// Allowed response modes.
    pub response_modes: Vec<String>,
    /// Allowed scopes.
    pub scopes: Vec<String>,
    /// Allowed audience.
    pub audience: Vec<String>,
    /// Token endpoint auth method; derived from `public` when absent.
    pub token_endpoint_auth_method: Option<String>,
    /// Minimum level of the end user.
    pub authorization_policy: String,
    /// Keys for `private_key_jwt`.
    pub public_keys: Option<Jwks>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            description: String::new(),
            secret: None,
            public: false,
            redirect_uris: Vec::new(),
            grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types: vec!["code".to_string()],
            response_modes: vec!["query".to_string()],
            scopes: vec![
                "openid".to_string(),
                "groups".to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            audience: Vec::new(),
            token_endpoint_auth_method: None,
            authorization_policy: "two_factor".to_string(),
            public_keys: None,
        }
    }
}

impl ClientConfig {
    /// Builds the runtime client.
    ///
    /// # Errors
    /// Returns an error for unknown grant types, auth methods or policies,
    /// or a malformed secret hash.
    pub fn build(&self) -> Result<Client, ConfigError> {
        let field = |name: &str| format!("oidc.clients[{}].{name}", self.id);

        let grant_types = self
            .grant_types
            .iter()
            .map(|g| {
                GrantType::parse(g).ok_or_else(|| {
                    ConfigError::InvalidValue(format!("{}: unknown grant type '{g}'", field("grant_types")))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let auth_method = match self.token_endpoint_auth_method.as_deref() {
            Some(method) => Some(TokenEndpointAuthMethod::parse(method).ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "{}: unknown method '{method}'",
                    field("token_endpoint_auth_method")
                ))
            })?),
            None if self.public => Some(TokenEndpointAuthMethod::None),
            None => None,
        };

        let policy = Level::parse(&self.authorization_policy).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "{}: unknown policy '{}'",
                field("authorization_policy"),
                self.authorization_policy
            ))
        })?;

        let secret = self
            .secret
            .as_deref()
            .map(ClientSecret::parse)
            .transpose()
            .map_err(|e| ConfigError::InvalidValue(format!("{}: {e}", field("secret"))))?;

        Ok(Client {
            id: self.id.clone(),
            description: if self.description.is_empty() {
                self.id.clone()
            } else {
                self.description.clone()
            },
            secret,
            public: self.public,
            redirect_uris: self.redirect_uris.clone(),
            grant_types,
            response_types: self.response_types.clone(),
            response_modes: self.response_modes.clone(),
            scopes: self.scopes.clone(),
            audience: self.audience.clone(),
            auth_method,
            policy,
            public_keys: self.public_keys.clone(),
        })
    }
}

/// Ordered access rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessControlConfig {
    /// Level applied when no rule matches.
    pub default_policy: String,
    /// Rules in evaluation order.
    pub rules: Vec<AccessRuleConfig>,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            default_policy: "deny".to_string(),
            rules: Vec::new(),
        }
    }
}

/// A user of the file-backed credential backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UserConfig {
    /// Login name.
    pub username: String,
    /// Display name.
    pub display_name: String,
    /// Password (`$plaintext$...` or an argon2 PHC hash).
    pub password: String,
    /// Email addresses, primary first.
    pub emails: Vec<String>,
    /// Groups.
    pub groups: Vec<String>,
    /// Disabled users cannot log in.
    pub disabled: bool,
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

/// Outcome of validating a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Problems that do not prevent startup.
    pub warnings: Vec<String>,
    /// Problems that prevent startup.
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Returns `true` if there are no errors.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl AuthConfig {
    /// Validates the configuration.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.validate_session(&mut report);
        self.validate_clients(&mut report);
        self.validate_access_control(&mut report);

        if let Err(e) = self.server.networks() {
            report.error(e.to_string());
        }
        if self.oidc.key_rotation_interval.is_some_and(|i| i.is_zero()) {
            report.error("oidc.key_rotation_interval must be greater than zero");
        }
        let mut routes: HashSet<&str> = RESERVED_PATHS.into_iter().collect();
        for (name, path) in self.oidc.paths() {
            if !path.starts_with('/') {
                report.error(format!("oidc.{name}: '{path}' must start with '/'"));
            }
            if !routes.insert(path) {
                report.error(format!("oidc.{name}: '{path}' is already used by another route"));
            }
        }

        let mut usernames = HashSet::new();
        for user in &self.users {
            if user.username.is_empty() {
                report.error("users: a user has an empty username");
            } else if !usernames.insert(user.username.as_str()) {
                report.error(format!("users: duplicate username '{}'", user.username));
            }
            if let Err(e) = ClientSecret::parse(&user.password) {
                report.error(format!("users[{}].password: {e}", user.username));
            }
        }

        report
    }

    fn validate_session(&self, report: &mut ValidationReport) {
        let domain = self.session.domain.trim();
        if domain.is_empty() {
            report.error("session.domain must not be empty");
            return;
        }

        match url::Url::parse(&self.session.portal_url) {
            Ok(portal) => {
                if portal.scheme() != "https" {
                    report.error("session.portal_url must use https");
                }
                if !portal.host_str().is_some_and(|h| host_within_domain(h, domain)) {
                    report.error(format!(
                        "session.portal_url must be inside the protected domain '{domain}'"
                    ));
                }
            }
            Err(e) => report.error(format!("session.portal_url: {e}")),
        }

        if self.session.store_timeout.is_zero() {
            report.error("session.store_timeout must be greater than zero");
        }
    }

    fn validate_clients(&self, report: &mut ValidationReport) {
        let mut ids = HashSet::new();
        for client in &self.oidc.clients {
            if client.id.is_empty() {
                report.error("oidc.clients: a client has an empty id");
                continue;
            }
            if !ids.insert(client.id.as_str()) {
                report.error(format!("oidc.clients: duplicate client id '{}'", client.id));
            }

            if let Err(e) = client.build() {
                report.error(e.to_string());
            }

            match (&client.secret, client.public) {
                (None, false) => report.error(format!(
                    "oidc.clients[{}]: confidential clients require a secret",
                    client.id
                )),
                (Some(_), true) => report.warn(format!(
                    "oidc.clients[{}]: the secret of a public client is ignored",
                    client.id
                )),
                (Some(secret), false) if !secret.starts_with("$argon2") => report.warn(format!(
                    "oidc.clients[{}]: the secret is stored in plaintext",
                    client.id
                )),
                _ => {}
            }

            if client.redirect_uris.is_empty()
                && client.grant_types.iter().any(|g| g == "authorization_code")
            {
                report.error(format!("oidc.clients[{}]: no redirect_uris", client.id));
            }
            for uri in &client.redirect_uris {
                match url::Url::parse(uri) {
                    Ok(url) if url.fragment().is_some() => report.error(format!(
                        "oidc.clients[{}]: redirect URI '{uri}' must not contain a fragment",
                        client.id
                    )),
                    Ok(_) => {}
                    Err(_) => report.error(format!(
                        "oidc.clients[{}]: redirect URI '{uri}' is not an absolute URL",
                        client.id
                    )),
                }
            }
        }

        for id in &self.oidc.privileged_clients {
            if !ids.contains(id.as_str()) {
                report.warn(format!("oidc.privileged_clients: unknown client '{id}'"));
            }
        }
    }

    fn validate_access_control(&self, report: &mut ValidationReport) {
        if let Err(e) = self.rule_set() {
            report.error(e.to_string());
        }
        if self.access_control.default_policy == "deny" && self.access_control.rules.is_empty() {
            report.warn("access_control: default policy is 'deny' and no rules are defined, every request will be denied");
        }
    }

    /// Compiles the access rules.
    ///
    /// # Errors
    /// Returns the first rule that fails to compile.
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::compile(&self.access_control.default_policy, &self.access_control.rules)
            .map_err(|e| ConfigError::InvalidValue(format!("access_control: {e}")))
    }

    /// Builds the registered clients.
    ///
    /// # Errors
    /// Returns the first client that fails to build.
    pub fn clients(&self) -> Result<Vec<Client>, ConfigError> {
        self.oidc.clients.iter().map(ClientConfig::build).collect()
    }

    /// Builds the users of the file-backed credential backend.
    ///
    /// # Errors
    /// Returns an error for a malformed password hash.
    pub fn user_records(&self) -> Result<Vec<UserRecord>, ConfigError> {
        self.users
            .iter()
            .map(|u| {
                let password = ClientSecret::parse(&u.password).map_err(|e| {
                    ConfigError::InvalidValue(format!("users[{}].password: {e}", u.username))
                })?;
                Ok(UserRecord {
                    subject: Subject {
                        username: u.username.clone(),
                        display_name: if u.display_name.is_empty() {
                            u.username.clone()
                        } else {
                            u.display_name.clone()
                        },
                        emails: u.emails.clone(),
                        groups: u.groups.clone(),
                    },
                    password,
                    disabled: u.disabled,
                })
            })
            .collect()
    }
}

impl OidcConfig {
    /// Endpoint paths by configuration key.
    #[must_use]
    pub fn paths(&self) -> [(&'static str, &str); 7] {
        [
            ("authorization_path", &self.authorization_path),
            ("token_path", &self.token_path),
            ("introspection_path", &self.introspection_path),
            ("revocation_path", &self.revocation_path),
            ("userinfo_path", &self.userinfo_path),
            ("jwks_path", &self.jwks_path),
            ("consent_path", &self.consent_path),
        ]
    }
}

/// Converts a configured duration to a `time` duration, saturating.
#[must_use]
pub fn lifespan(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}
