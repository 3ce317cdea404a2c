//! Forwarded request metadata.
//!
//! The reverse proxy describes the original request with `X-Forwarded-*`
//! headers, or with a single `X-Original-URL`. These headers are believed
//! only when the request arrives from a trusted proxy network.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use ipnetwork::IpNetwork;
use url::Url;

/// Original request scheme.
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
/// Original request host.
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Original request path and query.
pub const X_FORWARDED_URI: &str = "x-forwarded-uri";
/// Original request method.
pub const X_FORWARDED_METHOD: &str = "x-forwarded-method";
/// Client and proxy chain.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Full original URL, used instead of proto, host and URI.
pub const X_ORIGINAL_URL: &str = "x-original-url";

/// Errors reading forwarded metadata.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForwardedError {
    /// A mandatory header is absent.
    #[error("Missing header: {header}")]
    MissingHeader {
        /// Header name.
        header: &'static str,
    },

    /// A header is present but unusable.
    #[error("Malformed header {header}: {message}")]
    Malformed {
        /// Header name.
        header: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The request did not come from a trusted proxy.
    #[error("Forwarded headers from untrusted peer")]
    UntrustedProxy,
}

impl ForwardedError {
    fn malformed(header: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            header,
            message: message.into(),
        }
    }
}

/// Networks whose forwarded headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    networks: Vec<IpNetwork>,
}

impl TrustedProxies {
    /// Creates the set.
    #[must_use]
    pub fn new(networks: Vec<IpNetwork>) -> Self {
        Self { networks }
    }

    /// Returns `true` if `ip` is inside a trusted network.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        self.networks.iter().any(|n| n.contains(ip))
    }

    /// Decides whether the forwarded headers of a request can be believed.
    ///
    /// Only the socket peer counts. Without one nothing is trusted, since
    /// every `X-Forwarded-For` hop is client controlled.
    #[must_use]
    pub fn is_trusted(&self, peer: Option<IpAddr>) -> bool {
        peer.is_some_and(|ip| self.contains(ip))
    }
}

/// Maps IPv4-mapped IPv6 addresses back to IPv4.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    }
}

/// Parses `X-Forwarded-For`, skipping unparsable entries.
fn forwarded_for(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|entry| entry.trim().parse::<IpAddr>().ok())
        .collect()
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, ForwardedError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| ForwardedError::malformed(name, "not valid ASCII"))
        })
        .transpose()
        .map(|v| v.filter(|s| !s.is_empty()))
}

/// The socket address of the connecting peer, when the server was started
/// with connect info.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddr(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for PeerAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        ))
    }
}

/// The original request as described by the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedRequest {
    /// Full original URL.
    pub url: Url,
    /// Original method, if forwarded.
    pub method: Option<String>,
    /// Original client address.
    pub remote_ip: Option<IpAddr>,
}

impl ForwardedRequest {
    /// Reads the forwarded metadata of a request from a trusted proxy.
    ///
    /// # Errors
    ///
    /// Returns `UntrustedProxy` for untrusted peers, and `MissingHeader` or
    /// `Malformed` when the original URL cannot be reconstructed.
    pub fn from_headers(
        headers: &HeaderMap,
        peer: Option<IpAddr>,
        trusted: &TrustedProxies,
    ) -> Result<Self, ForwardedError> {
        if !trusted.is_trusted(peer) {
            return Err(ForwardedError::UntrustedProxy);
        }

        let url = match header(headers, X_ORIGINAL_URL)? {
            Some(original) => Url::parse(original)
                .map_err(|e| ForwardedError::malformed(X_ORIGINAL_URL, e.to_string()))?,
            None => {
                let proto = header(headers, X_FORWARDED_PROTO)?.ok_or(
                    ForwardedError::MissingHeader {
                        header: X_FORWARDED_PROTO,
                    },
                )?;
                let host = header(headers, X_FORWARDED_HOST)?.ok_or(
                    ForwardedError::MissingHeader {
                        header: X_FORWARDED_HOST,
                    },
                )?;
                let uri = header(headers, X_FORWARDED_URI)?.unwrap_or("/");

                if !uri.starts_with('/') {
                    return Err(ForwardedError::malformed(X_FORWARDED_URI, "must start with '/'"));
                }
                if host.contains(['/', '@', '?', '#']) {
                    return Err(ForwardedError::malformed(X_FORWARDED_HOST, "not a host"));
                }

                Url::parse(&format!("{proto}://{host}{uri}"))
                    .map_err(|e| ForwardedError::malformed(X_FORWARDED_HOST, e.to_string()))?
            }
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ForwardedError::malformed(X_FORWARDED_PROTO, "must be http or https"));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ForwardedError::malformed(X_FORWARDED_HOST, "empty host"));
        }

        let method = header(headers, X_FORWARDED_METHOD)?.map(str::to_ascii_uppercase);
        let remote_ip = forwarded_for(headers).first().copied().or(peer);

        Ok(Self {
            url,
            method,
            remote_ip,
        })
    }

    /// Host of the original request, without port.
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Path of the original request.
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// `scheme://host[:port]` of the original request.
    #[must_use]
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }
}

/// Derives the issuer for a request to the provider's own endpoints.
///
/// Forwarded proto and host are used only from trusted proxies; otherwise
/// the `Host` header is taken with the `http` scheme.
///
/// # Errors
///
/// Returns `MissingHeader` if no host can be determined.
pub fn issuer(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted: &TrustedProxies,
) -> Result<String, ForwardedError> {
    let forwarded_host = if trusted.is_trusted(peer) {
        header(headers, X_FORWARDED_HOST)?
    } else {
        None
    };

    let (proto, host) = match forwarded_host {
        Some(host) => {
            let proto = header(headers, X_FORWARDED_PROTO)?.unwrap_or("https");
            (proto, host)
        }
        None => {
            let host = header(headers, "host")?.ok_or(ForwardedError::MissingHeader { header: "host" })?;
            ("http", host)
        }
    };

    if !matches!(proto, "http" | "https") {
        return Err(ForwardedError::malformed(X_FORWARDED_PROTO, "must be http or https"));
    }
    if host.contains(['/', '@', '?', '#', ' ']) {
        return Err(ForwardedError::malformed(X_FORWARDED_HOST, "not a host"));
    }

    Ok(format!("{proto}://{host}"))
}
