//! Adversarial evaluation of the approval pipeline
//!
//! Each case pins a risk level, feeds one change through a fresh engine and
//! compares the outcome with the expectation written in the suite file.

use async_trait::async_trait;
use safe_agent_core::{ActionRequest, Change, Error, PathSafetyResolver, Preview, Result, RiskLevel};
use safe_agent_policy::LoadedPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::DecisionSettings;
use crate::engine::{ApprovalEngine, Collaborators, RunState};

/// Report format version
pub const SUITE_VERSION: &str = "1";

/// One adversarial case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdversarialCase {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_risk")]
    pub risk_level: String,
    pub change: Change,
    #[serde(default)]
    pub agent: CaseAgent,
    #[serde(default)]
    pub expected: CaseExpectation,
}

fn default_risk() -> String {
    "low".to_string()
}

/// Agent switches for one case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseAgent {
    #[serde(default = "default_true")]
    pub non_interactive: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub fail_on_risk: Option<String>,
    #[serde(default)]
    pub policy_preset: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for CaseAgent {
    fn default() -> Self {
        Self {
            non_interactive: true,
            dry_run: false,
            fail_on_risk: None,
            policy_preset: None,
        }
    }
}

/// What the case must produce; absent flags are not checked
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseExpectation {
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub risk_policy_failed: Option<bool>,
    #[serde(default)]
    pub governance_policy_failed: Option<bool>,
}

/// Result of one case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub id: String,
    pub description: String,
    pub approved: bool,
    pub expected_approved: bool,
    pub outcome: String,
    pub expected_outcome: Option<String>,
    pub risk_policy_failed: bool,
    pub governance_policy_failed: bool,
    pub checks: BTreeMap<String, bool>,
    pub passed: bool,
}

/// Result of a whole suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdversarialReport {
    pub suite_version: String,
    pub total_cases: usize,
    pub passed_cases: usize,
    pub failed_cases: usize,
    pub all_passed: bool,
    pub results: Vec<CaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl AdversarialReport {
    fn from_results(results: Vec<CaseResult>) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        let failed = results.len() - passed;
        Self {
            suite_version: SUITE_VERSION.to_string(),
            total_cases: results.len(),
            passed_cases: passed,
            failed_cases: failed,
            all_passed: failed == 0,
            results,
            source: None,
        }
    }

    /// Markdown table of expected versus actual outcomes
    pub fn to_markdown(&self) -> String {
        let (icon, status) = if self.all_passed {
            ("✅", "PASS")
        } else {
            ("❌", "FAIL")
        };
        let mut lines = vec![
            "### Safe Agent Adversarial Evaluation".to_string(),
            format!("- Result: {} {}", icon, status),
            format!("- Cases: {}/{} passed", self.passed_cases, self.total_cases),
            String::new(),
            "| Case | Expected | Actual | Pass |".to_string(),
            "| --- | --- | --- | --- |".to_string(),
        ];
        for item in &self.results {
            let expected = format!(
                "{} / approved={}",
                item.expected_outcome.as_deref().unwrap_or("none"),
                item.expected_approved
            );
            let actual = format!("{} / approved={}", item.outcome, item.approved);
            let mark = if item.passed { "✅" } else { "❌" };
            lines.push(format!(
                "| {} | `{}` | `{}` | {} |",
                item.id, expected, actual, mark
            ));
        }
        lines.join("\n")
    }
}

/// A loaded suite
#[derive(Debug, Clone, Default)]
pub struct AdversarialSuite {
    pub cases: Vec<AdversarialCase>,
    source: Option<PathBuf>,
}

impl AdversarialSuite {
    pub fn new(cases: Vec<AdversarialCase>) -> Self {
        Self {
            cases,
            source: None,
        }
    }

    /// Load `{"cases": [...]}` or a bare list of cases
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read adversarial suite {}: {}", path.display(), e))
        })?;
        let payload: Value = serde_json::from_str(&text)?;
        let cases = match payload {
            Value::Object(mut map) => map.remove("cases").unwrap_or(Value::Null),
            other => other,
        };
        if !cases.is_array() {
            return Err(Error::config(
                "adversarial suite JSON must contain a list of cases or a {\"cases\": [...]} object",
            ));
        }
        Ok(Self {
            cases: serde_json::from_value(cases)?,
            source: Some(path.to_path_buf()),
        })
    }

    /// Run every case in `workdir`, or in a fresh temporary directory
    pub async fn run(&self, workdir: Option<&Path>) -> Result<AdversarialReport> {
        let temp;
        let root = match workdir {
            Some(dir) => dir,
            None => {
                temp = tempfile::Builder::new()
                    .prefix("safe-agent-adversarial-")
                    .tempdir()?;
                temp.path()
            }
        };

        let mut results = Vec::with_capacity(self.cases.len());
        for case in &self.cases {
            results.push(run_case(case, root).await?);
        }

        let mut report = AdversarialReport::from_results(results);
        report.source = self.source.as_ref().map(|p| p.display().to_string());
        info!(
            total = report.total_cases,
            passed = report.passed_cases,
            "Adversarial suite finished"
        );
        Ok(report)
    }
}

/// Analyzer returning the risk pinned by a case
struct FixedRiskAnalyzer(RiskLevel);

#[async_trait]
impl safe_agent_classifiers::Analyzer for FixedRiskAnalyzer {
    async fn analyze(&self, _request: &ActionRequest) -> Result<Preview> {
        Ok(Preview::new(self.0))
    }
}

fn parse_risk(raw: &str, case_id: &str) -> Result<RiskLevel> {
    raw.parse()
        .map_err(|e: String| Error::config(format!("case {}: {}", case_id, e)))
}

async fn run_case(case: &AdversarialCase, root: &Path) -> Result<CaseResult> {
    let risk = parse_risk(&case.risk_level, &case.id)?;
    let fail_on_risk = case
        .agent
        .fail_on_risk
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| parse_risk(raw, &case.id))
        .transpose()?;

    let resolver = PathSafetyResolver::new(root)?;
    let policy = LoadedPolicy::resolve(&resolver, None, case.agent.policy_preset.as_deref(), false)?;
    let collaborators =
        Collaborators::standard()?.with_analyzer(Arc::new(FixedRiskAnalyzer(risk)));
    let settings = DecisionSettings {
        fail_on_risk,
        non_interactive: case.agent.non_interactive,
        auto_approve_low_risk: false,
        dry_run: case.agent.dry_run,
    };
    let engine = ApprovalEngine::new(resolver, policy, collaborators, settings);

    let mut state = RunState::new();
    let decision = engine.decide(&mut state, &case.change).await?;
    let approved = decision.approved();
    let outcome = decision.outcome.as_str().to_string();

    let expected = &case.expected;
    let mut checks = BTreeMap::new();
    checks.insert("approved".to_string(), approved == expected.approved);
    checks.insert(
        "outcome".to_string(),
        expected.outcome.as_deref() == Some(outcome.as_str()),
    );
    if let Some(flag) = expected.risk_policy_failed {
        checks.insert(
            "risk_policy_failed".to_string(),
            state.risk_policy_failed == flag,
        );
    }
    if let Some(flag) = expected.governance_policy_failed {
        checks.insert(
            "governance_policy_failed".to_string(),
            state.governance_policy_failed == flag,
        );
    }
    let passed = checks.values().all(|ok| *ok);
    debug!(case = %case.id, outcome = %outcome, passed, "Adversarial case evaluated");

    Ok(CaseResult {
        id: case.id.clone(),
        description: case.description.clone(),
        approved,
        expected_approved: expected.approved,
        outcome,
        expected_outcome: expected.outcome.clone(),
        risk_policy_failed: state.risk_policy_failed,
        governance_policy_failed: state.governance_policy_failed,
        checks,
        passed,
    })
}
