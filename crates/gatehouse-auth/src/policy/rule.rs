//! Access rules and their matchers.
//!
//! Rules are compiled once from configuration. A rule matches a request when
//! every criterion it specifies matches; an empty criterion list matches
//! anything.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::level::Level;
use crate::session::Subject;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while compiling access rules.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A domain or resource pattern failed to compile.
    #[error("Rule #{rule}: invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// One-based rule position.
        rule: usize,
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },

    /// A network entry is not a valid address or CIDR block.
    #[error("Rule #{rule}: invalid network '{network}'")]
    InvalidNetwork {
        /// One-based rule position.
        rule: usize,
        /// The offending network.
        network: String,
    },

    /// A subject is not of the form `user:<name>` or `group:<name>`.
    #[error("Rule #{rule}: invalid subject '{subject}', expected 'user:<name>' or 'group:<name>'")]
    InvalidSubject {
        /// One-based rule position.
        rule: usize,
        /// The offending subject.
        subject: String,
    },

    /// The policy name is unknown.
    #[error("Rule #{rule}: unknown policy '{policy}'")]
    UnknownPolicy {
        /// One-based rule position (0 for the default policy).
        rule: usize,
        /// The offending policy name.
        policy: String,
    },

    /// Subjects are only known after authentication, so they cannot
    /// select a bypass rule.
    #[error("Rule #{rule}: 'bypass' policy cannot be combined with subjects")]
    BypassWithSubjects {
        /// One-based rule position.
        rule: usize,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// An access rule as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessRuleConfig {
    /// Domain globs (`app.example.com`, `*.example.com`).
    pub domain: Vec<String>,
    /// Path globs (`/admin/*`) or regexes (`^/api/v[0-9]+/`).
    pub resources: Vec<String>,
    /// Subjects (`user:john`, `group:admins`).
    pub subject: Vec<String>,
    /// HTTP methods.
    pub methods: Vec<String>,
    /// Client networks in CIDR notation.
    pub networks: Vec<String>,
    /// Required policy level.
    pub policy: String,
}

// =============================================================================
// Compiled rule
// =============================================================================

/// A subject restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectMatcher {
    /// Matches one username.
    User(String),
    /// Matches members of a group.
    Group(String),
}

impl SubjectMatcher {
    fn parse(value: &str) -> Option<Self> {
        let (kind, name) = value.split_once(':')?;
        if name.is_empty() {
            return None;
        }
        match kind {
            "user" => Some(Self::User(name.to_string())),
            "group" => Some(Self::Group(name.to_string())),
            _ => None,
        }
    }

    fn matches(&self, subject: &Subject) -> bool {
        match self {
            Self::User(name) => subject.username == *name,
            Self::Group(name) => subject.groups.iter().any(|g| g == name),
        }
    }
}

/// The request attributes a rule is matched against.
#[derive(Debug, Clone, Copy)]
pub struct AccessTarget<'a> {
    /// Requested host, without port.
    pub domain: &'a str,
    /// Requested path, including any query string.
    pub path: &'a str,
    /// Original HTTP method, when known.
    pub method: Option<&'a str>,
    /// Original client address, when known.
    pub remote_ip: Option<IpAddr>,
}

impl<'a> AccessTarget<'a> {
    /// A target identified by domain and path only.
    #[must_use]
    pub fn new(domain: &'a str, path: &'a str) -> Self {
        Self {
            domain,
            path,
            method: None,
            remote_ip: None,
        }
    }
}

/// A compiled access rule.
#[derive(Debug, Clone)]
pub struct AccessRule {
    position: usize,
    domains: Vec<Regex>,
    resources: Vec<Regex>,
    subjects: Vec<SubjectMatcher>,
    methods: Vec<String>,
    networks: Vec<IpNetwork>,
    policy: Level,
}

/// How a rule relates to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuleMatch {
    /// Every criterion matches.
    Full,
    /// Everything but the subject matches and the subject is unknown.
    PendingSubject,
    /// The rule does not apply.
    None,
}

impl AccessRule {
    /// Compiles a configured rule. `position` is one-based.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed patterns, networks, subjects or policy
    /// names.
    pub fn compile(position: usize, config: &AccessRuleConfig) -> Result<Self, PolicyError> {
        let policy = Level::parse(&config.policy).ok_or_else(|| PolicyError::UnknownPolicy {
            rule: position,
            policy: config.policy.clone(),
        })?;

        let domains = config
            .domain
            .iter()
            .map(|d| compile_pattern(position, d, true))
            .collect::<Result<Vec<_>, _>>()?;

        let resources = config
            .resources
            .iter()
            .map(|r| compile_pattern(position, r, false))
            .collect::<Result<Vec<_>, _>>()?;

        let subjects = config
            .subject
            .iter()
            .map(|s| {
                SubjectMatcher::parse(s).ok_or_else(|| PolicyError::InvalidSubject {
                    rule: position,
                    subject: s.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if policy == Level::Bypass && !subjects.is_empty() {
            return Err(PolicyError::BypassWithSubjects { rule: position });
        }

        let networks = config
            .networks
            .iter()
            .map(|n| parse_network(n).ok_or_else(|| PolicyError::InvalidNetwork {
                rule: position,
                network: n.clone(),
            }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            position,
            domains,
            resources,
            subjects,
            methods: config.methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
            networks,
            policy,
        })
    }

    /// One-based position in the configured list.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Required level when this rule matches.
    #[must_use]
    pub fn policy(&self) -> Level {
        self.policy
    }

    /// Returns `true` if the rule restricts subjects.
    #[must_use]
    pub fn has_subjects(&self) -> bool {
        !self.subjects.is_empty()
    }

    pub(crate) fn matches(&self, subject: Option<&Subject>, target: &AccessTarget<'_>) -> RuleMatch {
        if !self.matches_object(target) {
            return RuleMatch::None;
        }
        if self.subjects.is_empty() {
            return RuleMatch::Full;
        }
        match subject {
            Some(s) if self.subjects.iter().any(|m| m.matches(s)) => RuleMatch::Full,
            Some(_) => RuleMatch::None,
            None => RuleMatch::PendingSubject,
        }
    }

    fn matches_object(&self, target: &AccessTarget<'_>) -> bool {
        let domain_ok = self.domains.is_empty()
            || self.domains.iter().any(|re| re.is_match(target.domain));
        let resource_ok = self.resources.is_empty()
            || self.resources.iter().any(|re| re.is_match(target.path));
        let method_ok = self.methods.is_empty()
            || target
                .method
                .is_some_and(|m| self.methods.iter().any(|allowed| allowed.eq_ignore_ascii_case(m)));
        let network_ok = self.networks.is_empty()
            || target
                .remote_ip
                .is_some_and(|ip| self.networks.iter().any(|n| n.contains(ip)));

        domain_ok && resource_ok && method_ok && network_ok
    }
}

/// Compiles a glob or, when it starts with `^`, a regex.
///
/// In globs `*` matches any run of characters (including `/`) and `?` a
/// single character. Domain patterns are case-insensitive.
fn compile_pattern(rule: usize, pattern: &str, domain: bool) -> Result<Regex, PolicyError> {
    let source = if pattern.starts_with('^') {
        pattern.to_string()
    } else {
        let mut out = String::with_capacity(pattern.len() + 8);
        out.push('^');
        for c in pattern.chars() {
            match c {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        out.push('$');
        out
    };

    RegexBuilder::new(&source)
        .case_insensitive(domain)
        .build()
        .map_err(|e| PolicyError::InvalidPattern {
            rule,
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn parse_network(value: &str) -> Option<IpNetwork> {
    value
        .parse::<IpNetwork>()
        .ok()
        .or_else(|| value.parse::<IpAddr>().ok().map(IpNetwork::from))
}
