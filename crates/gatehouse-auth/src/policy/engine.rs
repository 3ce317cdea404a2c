//! Ordered access-rule evaluation.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, info};

use super::level::Level;
use super::rule::{AccessRule, AccessRuleConfig, AccessTarget, PolicyError, RuleMatch};
use crate::session::Subject;

/// An immutable, ordered rule list with its default.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<AccessRule>,
    default_policy: Level,
}

impl RuleSet {
    /// Creates a rule set.
    #[must_use]
    pub fn new(rules: Vec<AccessRule>, default_policy: Level) -> Self {
        Self {
            rules,
            default_policy,
        }
    }

    /// Compiles configured rules in order.
    ///
    /// # Errors
    ///
    /// Returns the first rule that fails to compile, or an unknown default.
    pub fn compile(default_policy: &str, rules: &[AccessRuleConfig]) -> Result<Self, PolicyError> {
        let default_policy =
            Level::parse(default_policy).ok_or_else(|| PolicyError::UnknownPolicy {
                rule: 0,
                policy: default_policy.to_string(),
            })?;

        let rules = rules
            .iter()
            .enumerate()
            .map(|(i, config)| AccessRule::compile(i + 1, config))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(rules, default_policy))
    }

    /// The compiled rules.
    #[must_use]
    pub fn rules(&self) -> &[AccessRule] {
        &self.rules
    }

    /// Level applied when no rule matches.
    #[must_use]
    pub fn default_policy(&self) -> Level {
        self.default_policy
    }
}

/// The outcome of evaluating a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Required level.
    pub level: Level,
    /// One-based position of the deciding rule; `None` when the default applied.
    pub rule: Option<usize>,
}

/// Evaluates subjects against the active rule set.
///
/// Evaluation reads an immutable snapshot; [`PolicyEngine::reload`] swaps
/// the whole rule set atomically.
#[derive(Debug)]
pub struct PolicyEngine {
    rules: ArcSwap<RuleSet>,
}

impl PolicyEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    /// Required level for a subject accessing `domain` + `path`.
    #[must_use]
    pub fn evaluate(&self, subject: Option<&Subject>, domain: &str, path: &str) -> Level {
        self.evaluate_target(subject, &AccessTarget::new(domain, path))
            .level
    }

    /// Evaluates a fully described target. First matching rule wins.
    ///
    /// For an anonymous subject, a rule that would match except for its
    /// subject restriction decides the request as "authenticate first":
    /// it requires at least one factor, and its own level if stricter
    /// (a `deny` is only applied once the subject is known).
    #[must_use]
    pub fn evaluate_target(&self, subject: Option<&Subject>, target: &AccessTarget<'_>) -> Evaluation {
        let rules = self.rules.load();

        for rule in rules.rules() {
            match rule.matches(subject, target) {
                RuleMatch::Full => {
                    debug!(
                        rule = rule.position(),
                        level = %rule.policy(),
                        domain = target.domain,
                        path = target.path,
                        "Access rule matched"
                    );
                    return Evaluation {
                        level: rule.policy(),
                        rule: Some(rule.position()),
                    };
                }
                RuleMatch::PendingSubject => {
                    let level = match rule.policy() {
                        Level::Deny => Level::OneFactor,
                        other => other.max(Level::OneFactor),
                    };
                    debug!(
                        rule = rule.position(),
                        level = %level,
                        "Access rule needs an identified subject"
                    );
                    return Evaluation {
                        level,
                        rule: Some(rule.position()),
                    };
                }
                RuleMatch::None => {}
            }
        }

        Evaluation {
            level: rules.default_policy(),
            rule: None,
        }
    }

    /// Replaces the rule set.
    pub fn reload(&self, rules: RuleSet) {
        info!(rules = rules.rules().len(), default = %rules.default_policy(), "Reloading access rules");
        self.rules.store(Arc::new(rules));
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }
}
