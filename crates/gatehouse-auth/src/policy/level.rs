//! Policy levels and achieved authentication levels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The level an access rule requires.
///
/// Variants are ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// No authentication required.
    Bypass,
    /// A single authentication factor is required.
    OneFactor,
    /// Two authentication factors are required.
    TwoFactor,
    /// Access is always denied.
    Deny,
}

impl Level {
    /// Parses a policy name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bypass" => Some(Self::Bypass),
            "one_factor" => Some(Self::OneFactor),
            "two_factor" => Some(Self::TwoFactor),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }

    /// Returns the policy name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bypass => "bypass",
            Self::OneFactor => "one_factor",
            Self::TwoFactor => "two_factor",
            Self::Deny => "deny",
        }
    }

    /// Returns `true` if a subject that achieved `achieved` satisfies this level.
    #[must_use]
    pub fn is_satisfied_by(&self, achieved: AuthenticationLevel) -> bool {
        match self {
            Self::Bypass => true,
            Self::OneFactor => achieved >= AuthenticationLevel::OneFactor,
            Self::TwoFactor => achieved >= AuthenticationLevel::TwoFactor,
            Self::Deny => false,
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::Deny
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authentication level a session has achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationLevel {
    /// No factor completed.
    NotAuthenticated,
    /// First factor completed.
    OneFactor,
    /// Both factors completed.
    TwoFactor,
}

impl Default for AuthenticationLevel {
    fn default() -> Self {
        Self::NotAuthenticated
    }
}

impl fmt::Display for AuthenticationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => f.write_str("not_authenticated"),
            Self::OneFactor => f.write_str("one_factor"),
            Self::TwoFactor => f.write_str("two_factor"),
        }
    }
}
