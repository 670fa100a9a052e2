//! Governance events and the per-run event log

use safe_agent_classifiers::Severity;
use safe_agent_core::RiskLevel;
use safe_agent_policy::PolicyDecision;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::metrics;

/// Terminal outcome of one proposed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    BlockedUnsafePath,
    BlockedUnknownAction,
    BlockedByPolicyDeny,
    BlockedByFailOnRisk,
    BlockedNonInteractiveRequiresApproval,
    BlockedDryRun,
    ApprovedNonInteractive,
    ApprovedAutoLowRisk,
    ApprovedInteractive,
    RejectedInteractive,
}

impl Outcome {
    pub const ALL: [Outcome; 10] = [
        Self::BlockedUnsafePath,
        Self::BlockedUnknownAction,
        Self::BlockedByPolicyDeny,
        Self::BlockedByFailOnRisk,
        Self::BlockedNonInteractiveRequiresApproval,
        Self::BlockedDryRun,
        Self::ApprovedNonInteractive,
        Self::ApprovedAutoLowRisk,
        Self::ApprovedInteractive,
        Self::RejectedInteractive,
    ];

    /// Wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedUnsafePath => "blocked_unsafe_path",
            Self::BlockedUnknownAction => "blocked_unknown_action",
            Self::BlockedByPolicyDeny => "blocked_by_policy_deny",
            Self::BlockedByFailOnRisk => "blocked_by_fail_on_risk",
            Self::BlockedNonInteractiveRequiresApproval => {
                "blocked_non_interactive_requires_approval"
            }
            Self::BlockedDryRun => "blocked_dry_run",
            Self::ApprovedNonInteractive => "approved_non_interactive",
            Self::ApprovedAutoLowRisk => "approved_auto_low_risk",
            Self::ApprovedInteractive => "approved_interactive",
            Self::RejectedInteractive => "rejected_interactive",
        }
    }

    /// Whether the change moves to the applied set
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            Self::ApprovedNonInteractive | Self::ApprovedAutoLowRisk | Self::ApprovedInteractive
        )
    }

    /// Approved without a human confirming it
    pub fn is_unattended_approval(&self) -> bool {
        matches!(self, Self::ApprovedNonInteractive | Self::ApprovedAutoLowRisk)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision record for one proposed change.
///
/// Fields that were not computed before the terminal branch stay `None`
/// (an unknown action never reaches the analyzer, so it carries no risk).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceEvent {
    pub path: String,
    pub action: String,
    pub risk_level: Option<RiskLevel>,
    pub policy_decision: Option<PolicyDecision>,
    pub matched_rule_id: Option<String>,
    pub scanner_severity: Option<Severity>,
    #[serde(default)]
    pub scanner_reason_ids: Vec<String>,
    pub outcome: Outcome,
}

impl GovernanceEvent {
    /// An event with only path, action and outcome set
    pub fn new(path: impl Into<String>, action: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            path: path.into(),
            action: action.into(),
            risk_level: None,
            policy_decision: None,
            matched_rule_id: None,
            scanner_severity: None,
            scanner_reason_ids: Vec::new(),
            outcome,
        }
    }

    pub fn with_risk(mut self, level: RiskLevel) -> Self {
        self.risk_level = Some(level);
        self
    }
}

/// Append-only, hash-chained list of governance events for one run
#[derive(Debug, Clone, Default)]
pub struct GovernanceEventLog {
    events: Vec<GovernanceEvent>,
    hashes: Vec<String>,
}

impl GovernanceEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, chaining it to the previous one
    pub fn append(&mut self, event: GovernanceEvent) -> &GovernanceEvent {
        let hash = Self::compute_hash(&event, self.hashes.last().map(String::as_str));
        metrics::record_decision(event.outcome);
        self.hashes.push(hash);
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    pub fn events(&self) -> &[GovernanceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Outcome of the most recent event
    pub fn last_outcome(&self) -> Option<Outcome> {
        self.events.last().map(|event| event.outcome)
    }

    /// Distinct rule ids that produced a deny, sorted
    pub fn blocking_rule_ids(&self) -> Vec<String> {
        self.events
            .iter()
            .filter(|event| event.outcome == Outcome::BlockedByPolicyDeny)
            .filter_map(|event| event.matched_rule_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct scanner reason ids across all events, sorted
    pub fn scanner_reason_ids(&self) -> Vec<String> {
        self.events
            .iter()
            .flat_map(|event| event.scanner_reason_ids.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn outcome_counts(&self) -> BTreeMap<Outcome, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.outcome).or_insert(0) += 1;
        }
        counts
    }

    /// Number of events with `outcome`
    pub fn count(&self, outcome: Outcome) -> usize {
        self.events.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn has_outcome(&self, outcome: Outcome) -> bool {
        self.events.iter().any(|e| e.outcome == outcome)
    }

    /// Events per assessed risk level; events without a risk are skipped
    pub fn risk_counts(&self) -> BTreeMap<RiskLevel, usize> {
        let mut counts = BTreeMap::new();
        for level in self.events.iter().filter_map(|e| e.risk_level) {
            *counts.entry(level).or_insert(0) += 1;
        }
        counts
    }

    /// Hash of the event at `index`
    pub fn hash_at(&self, index: usize) -> Option<&str> {
        self.hashes.get(index).map(String::as_str)
    }

    /// Hash of the newest event
    pub fn chain_head(&self) -> Option<&str> {
        self.hashes.last().map(String::as_str)
    }

    /// Recompute the chain and compare
    pub fn verify(&self) -> bool {
        let mut previous: Option<&str> = None;
        for (event, stored) in self.events.iter().zip(&self.hashes) {
            if Self::compute_hash(event, previous) != *stored {
                return false;
            }
            previous = Some(stored);
        }
        self.events.len() == self.hashes.len()
    }

    fn compute_hash(event: &GovernanceEvent, previous: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(event).unwrap_or_default());
        if let Some(prev) = previous {
            hasher.update(prev.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    #[cfg(test)]
    pub(crate) fn events_mut(&mut self) -> &mut Vec<GovernanceEvent> {
        &mut self.events
    }
}
