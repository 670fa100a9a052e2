//! Policy decisions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Decision a policy returns for a single request
///
/// `Deny` is absolute: nothing later in the approval pipeline can override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny,
    #[default]
    RequireApproval,
}

impl PolicyDecision {
    /// Wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::RequireApproval => "require_approval",
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating a policy against one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyResult {
    /// The decision
    pub decision: PolicyDecision,

    /// Rule that produced the decision; `None` when the policy default applied
    pub matched_rule_id: Option<String>,
}

impl PolicyResult {
    /// A result produced by a named rule
    pub fn matched(decision: PolicyDecision, rule_id: impl Into<String>) -> Self {
        Self {
            decision,
            matched_rule_id: Some(rule_id.into()),
        }
    }

    /// A result produced by the policy default
    pub fn default_decision(decision: PolicyDecision) -> Self {
        Self {
            decision,
            matched_rule_id: None,
        }
    }
}
