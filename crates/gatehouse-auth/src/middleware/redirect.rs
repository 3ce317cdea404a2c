//! Open-redirect defense.
//!
//! Every redirect target or CORS origin taken from request input goes
//! through [`RedirectGuard`].

use url::Url;

/// Returns `true` if `host` is `domain` or one of its subdomains.
///
/// The comparison is label-aligned: `evilexample.com` is not inside
/// `example.com`.
#[must_use]
pub fn host_within_domain(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_end_matches('.').trim_start_matches('.').to_ascii_lowercase();

    if domain.is_empty() {
        return false;
    }
    host == domain
        || host
            .strip_suffix(&domain)
            .is_some_and(|prefix| prefix.ends_with('.') && prefix.len() > 1)
}

/// Whitelist check against the protected session domain.
#[derive(Debug, Clone)]
pub struct RedirectGuard {
    domain: String,
}

impl RedirectGuard {
    /// Creates a guard for `domain`.
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    /// The protected domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns `true` if `url` is an absolute `https` URL whose host is the
    /// protected domain or a subdomain of it.
    #[must_use]
    pub fn is_safe(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|url| self.is_safe_url(&url))
    }

    /// Parsed variant of [`Self::is_safe`].
    #[must_use]
    pub fn is_safe_url(&self, url: &Url) -> bool {
        url.scheme() == "https"
            && url.username().is_empty()
            && url.password().is_none()
            && url
                .host_str()
                .is_some_and(|host| host_within_domain(host, &self.domain))
    }

    /// Returns `true` if an `Origin` header value is inside the domain.
    ///
    /// An origin carries no path, query or fragment.
    #[must_use]
    pub fn is_safe_origin(&self, origin: &str) -> bool {
        match Url::parse(origin) {
            Ok(url) => {
                url.path() == "/"
                    && !origin.ends_with('/')
                    && url.query().is_none()
                    && url.fragment().is_none()
                    && self.is_safe_url(&url)
            }
            Err(_) => false,
        }
    }
}
