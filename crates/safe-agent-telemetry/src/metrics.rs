//! Decision metrics
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder.

use safe_agent_core::RiskLevel;

use crate::events::Outcome;

/// Register metric descriptions with the installed recorder
pub fn describe() {
    ::metrics::describe_counter!(
        "safe_agent_decisions_total",
        "Governance decisions by terminal outcome"
    );
    ::metrics::describe_gauge!(
        "safe_agent_max_risk_severity",
        "Highest risk severity seen in the current run (0=low .. 3=critical)"
    );
}

pub fn record_decision(outcome: Outcome) {
    ::metrics::counter!("safe_agent_decisions_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_max_risk(level: RiskLevel) {
    ::metrics::gauge!("safe_agent_max_risk_severity").set(f64::from(level.severity()));
}
