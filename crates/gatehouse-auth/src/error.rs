//! Authentication and authorization error types.
//!
//! `AuthError` is the taxonomy surfaced at the HTTP boundary. Lower layers
//! (key manager, client registry, grant store, policy engine) have their own
//! error enums which are converted here so that each maps onto exactly one
//! OAuth 2.0 error code.

use std::fmt;

use crate::clients::RegistryError;
use crate::keys::JwtError;
use crate::oauth::pkce::PkceError;
use crate::store::StoreError;

/// Errors that can occur during authentication and authorization operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is missing a parameter or is otherwise malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// Client authentication failed or the client is unknown.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The authorization grant or refresh token is invalid, expired, revoked
    /// or was issued to another client.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The authenticated client is not allowed to use this grant or response type.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of what the client is not allowed to do.
        message: String,
    },

    /// The authorization server does not support the requested grant type.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The authorization server does not support the requested response type.
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType {
        /// The unsupported response type.
        response_type: String,
    },

    /// The requested scope is invalid, unknown, or exceeds the client's registration.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The resource owner or policy denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
    },

    /// The bearer token is invalid, expired or revoked.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// No usable session or credential was presented.
    #[error("Authentication required: {message}")]
    AuthenticationRequired {
        /// Description of what is missing.
        message: String,
    },

    /// The subject is authenticated but not permitted.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// An unknown client or token was referenced.
    #[error("Not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// A single-use artifact (authorization code, refresh token) was reused.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting operation.
        message: String,
    },

    /// A session or grant store call did not complete in time.
    #[error("Upstream timeout: {operation}")]
    UpstreamTimeout {
        /// The operation that timed out.
        operation: String,
    },

    /// An error occurred while storing or retrieving grant data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `UnsupportedResponseType` error.
    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `AuthenticationRequired` error.
    #[must_use]
    pub fn authentication_required(message: impl Into<String>) -> Self {
        Self::AuthenticationRequired {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `UpstreamTimeout` error.
    #[must_use]
    pub fn upstream_timeout(operation: impl Into<String>) -> Self {
        Self::UpstreamTimeout {
            operation: operation.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout { .. }
                | Self::Storage { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if the error concerns client authentication.
    #[must_use]
    pub fn is_client_authentication_error(&self) -> bool {
        matches!(self, Self::InvalidClient { .. } | Self::NotFound { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::UnsupportedResponseType { .. } => ErrorCategory::ProtocolViolation,
            Self::InvalidClient { .. }
            | Self::InvalidGrant { .. }
            | Self::AuthenticationRequired { .. } => ErrorCategory::Authentication,
            Self::UnauthorizedClient { .. }
            | Self::InvalidScope { .. }
            | Self::AccessDenied { .. }
            | Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::UpstreamTimeout { .. } | Self::Storage { .. } => ErrorCategory::Upstream,
            Self::Configuration { .. } | Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    ///
    /// `NotFound` is reported as `invalid_client` so that callers cannot
    /// probe which client identifiers exist, and `Conflict` as
    /// `invalid_grant` because a replayed code is simply an invalid grant
    /// from the client's point of view.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::AccessDenied { .. } => "access_denied",
            Self::InvalidToken { .. } => "invalid_token",
            Self::AuthenticationRequired { .. } => "login_required",
            Self::Forbidden { .. } => "access_denied",
            Self::NotFound { .. } => "invalid_client",
            Self::Conflict { .. } => "invalid_grant",
            Self::UpstreamTimeout { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the description that may be shown to the client.
    ///
    /// Server-side failures never expose their detail.
    #[must_use]
    pub fn public_description(&self) -> String {
        match self {
            Self::UpstreamTimeout { .. } => {
                "The authorization server is temporarily unavailable".to_string()
            }
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "The authorization server encountered an unexpected condition".to_string()
            }
            Self::NotFound { .. } | Self::InvalidClient { .. } => {
                "Client authentication failed".to_string()
            }
            Self::Conflict { .. } => {
                "The authorization grant is invalid or has already been used".to_string()
            }
            Self::InvalidRequest { message }
            | Self::InvalidGrant { message }
            | Self::UnauthorizedClient { message }
            | Self::InvalidScope { message }
            | Self::AccessDenied { message }
            | Self::InvalidToken { message }
            | Self::AuthenticationRequired { message }
            | Self::Forbidden { message } => message.clone(),
            Self::UnsupportedGrantType { grant_type } => {
                format!("Unsupported grant type: {grant_type}")
            }
            Self::UnsupportedResponseType { response_type } => {
                format!("Unsupported response type: {response_type}")
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::invalid_grant("The grant was not found"),
            StoreError::Expired => Self::invalid_grant("The grant has expired"),
            StoreError::Revoked => Self::invalid_grant("The grant has been revoked"),
            StoreError::AlreadyUsed => Self::conflict("The grant has already been used"),
            StoreError::Timeout { operation } => Self::upstream_timeout(operation),
            StoreError::Backend { message } => Self::storage(message),
        }
    }
}

impl From<RegistryError> for AuthError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { client_id } => {
                Self::not_found(format!("client '{client_id}' is not registered"))
            }
            RegistryError::InvalidClient { message } => Self::invalid_client(message),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        if err.rejects_token() {
            Self::invalid_token(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

impl From<PkceError> for AuthError {
    fn from(err: PkceError) -> Self {
        if err.is_verification_error() {
            Self::invalid_grant(err.to_string())
        } else {
            Self::invalid_request(err.to_string())
        }
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed protocol request.
    ProtocolViolation,
    /// Identity verification failures.
    Authentication,
    /// Permission failures.
    Authorization,
    /// Bearer token failures.
    Token,
    /// Unknown client or token.
    NotFound,
    /// Double-spent single-use artifact.
    Conflict,
    /// Session or grant store unavailable.
    Upstream,
    /// Unexpected internal failures.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolViolation => write!(f, "protocol_violation"),
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Token => write!(f, "token"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Upstream => write!(f, "upstream"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_client("client not found");
        assert_eq!(err.to_string(), "Invalid client: client not found");

        let err = AuthError::invalid_grant("expired authorization code");
        assert_eq!(err.to_string(), "Invalid grant: expired authorization code");

        let err = AuthError::upstream_timeout("session lookup");
        assert_eq!(err.to_string(), "Upstream timeout: session lookup");
    }

    #[test]
    fn test_error_predicates() {
        let err = AuthError::invalid_client("test");
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert!(err.is_client_authentication_error());

        let err = AuthError::not_found("client");
        assert!(err.is_client_authentication_error());

        let err = AuthError::storage("database down");
        assert!(!err.is_client_error());
        assert!(err.is_server_error());

        assert!(AuthError::upstream_timeout("exchange").is_server_error());
    }

    #[test]
    fn test_oauth_error_code() {
        assert_eq!(
            AuthError::invalid_request("x").oauth_error_code(),
            "invalid_request"
        );
        assert_eq!(
            AuthError::unauthorized_client("x").oauth_error_code(),
            "unauthorized_client"
        );
        assert_eq!(
            AuthError::unsupported_grant_type("password").oauth_error_code(),
            "unsupported_grant_type"
        );
        assert_eq!(AuthError::invalid_scope("x").oauth_error_code(), "invalid_scope");
        assert_eq!(AuthError::internal("x").oauth_error_code(), "server_error");
    }

    #[test]
    fn test_not_found_is_indistinguishable_from_invalid_client() {
        let unknown = AuthError::not_found("client 'ghost' is not registered");
        let wrong_secret = AuthError::invalid_client("secret mismatch");

        assert_eq!(unknown.oauth_error_code(), wrong_secret.oauth_error_code());
        assert_eq!(unknown.public_description(), wrong_secret.public_description());
        assert!(!unknown.public_description().contains("ghost"));
    }

    #[test]
    fn test_server_errors_hide_detail() {
        let err = AuthError::storage("connection refused to 10.0.0.4:6379");
        assert!(!err.public_description().contains("10.0.0.4"));

        let err = AuthError::internal("panic in signer");
        assert!(!err.public_description().contains("signer"));
    }

    #[test]
    fn test_store_error_conversion() {
        let err: AuthError = StoreError::AlreadyUsed.into();
        assert!(matches!(err, AuthError::Conflict { .. }));
        assert_eq!(err.oauth_error_code(), "invalid_grant");

        let err: AuthError = StoreError::Expired.into();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));

        let err: AuthError = StoreError::timeout("exchange_code").into();
        assert!(matches!(err, AuthError::UpstreamTimeout { .. }));
    }

    #[test]
    fn test_registry_error_conversion() {
        let err: AuthError = RegistryError::not_found("ghost").into();
        assert_eq!(err.oauth_error_code(), "invalid_client");

        let err: AuthError = RegistryError::invalid_client("bad secret").into();
        assert_eq!(err.oauth_error_code(), "invalid_client");
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(
            AuthError::conflict("x").category().to_string(),
            "conflict"
        );
        assert_eq!(
            AuthError::invalid_request("x").category(),
            ErrorCategory::ProtocolViolation
        );
        assert_eq!(AuthError::storage("x").category(), ErrorCategory::Upstream);
    }
}
