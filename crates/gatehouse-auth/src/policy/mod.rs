//! Access-control policy engine.
//!
//! Rules are evaluated in configured order and the first match decides the
//! required [`Level`]. The rule list is immutable once loaded and replaced
//! atomically on reload.

pub mod engine;
pub mod level;
pub mod rule;

pub use engine::{Evaluation, PolicyEngine, RuleSet};
pub use level::{AuthenticationLevel, Level};
pub use rule::{AccessRule, AccessRuleConfig, AccessTarget, PolicyError, SubjectMatcher};
