//! Policy and rule definitions

use globset::Glob;
use safe_agent_core::{ChangeAction, Error, Result, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::PolicyDecision;

/// A complete policy: ordered rules plus a fallback decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Version label of the policy document
    #[serde(default)]
    pub version: String,

    /// Decision used when no rule matches
    #[serde(default)]
    pub defaults: PolicyDefaults,

    /// Rules, evaluated by ascending priority
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl PolicyConfig {
    /// Create an empty policy with the given version
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            defaults: PolicyDefaults::default(),
            rules: Vec::new(),
        }
    }

    /// Add a rule
    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Load a policy from a YAML string (JSON is valid YAML)
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a policy from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a policy from a file, choosing the parser by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        };
        parsed.map_err(|e| Error::policy(format!("failed to load {}: {}", path.display(), e)))
    }

    /// Reject empty or duplicate rule ids and malformed globs
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(Error::policy("policy rule with empty id"));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(Error::policy(format!("duplicate policy rule id '{}'", rule.id)));
            }
            for pattern in &rule.path_globs {
                Glob::new(pattern).map_err(|e| {
                    Error::policy(format!("rule '{}' has invalid glob '{}': {}", rule.id, pattern, e))
                })?;
            }
            if let (Some(min), Some(max)) = (rule.min_risk_level, rule.max_risk_level) {
                if min > max {
                    return Err(Error::policy(format!(
                        "rule '{}' has min_risk_level above max_risk_level",
                        rule.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether any enabled rule can return `allow`
    pub fn has_allow_rule(&self) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.enabled && rule.decision == PolicyDecision::Allow)
    }
}

/// Policy-wide defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PolicyDefaults {
    /// Decision when no rule matches
    #[serde(default)]
    pub decision: PolicyDecision,
}

/// A single rule within a policy
///
/// Every matcher that is present must match for the rule to apply; a rule
/// with no matchers applies to everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule identifier, reported as `matched_rule_id`
    pub id: String,

    /// Decision when the rule matches
    pub decision: PolicyDecision,

    /// Lower values are evaluated first
    #[serde(default)]
    pub priority: i32,

    /// Actions this rule applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_types: Vec<ChangeAction>,

    /// Globs over the working-directory-relative path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_globs: Vec<String>,

    /// Case-insensitive substrings of the relative path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_contains: Vec<String>,

    /// Inclusive lower risk bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_risk_level: Option<RiskLevel>,

    /// Inclusive upper risk bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_risk_level: Option<RiskLevel>,

    /// Free-form annotations (rationale, ticket links)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Whether this rule is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl PolicyRule {
    /// A rule with no matchers
    pub fn new(id: impl Into<String>, decision: PolicyDecision, priority: i32) -> Self {
        Self {
            id: id.into(),
            decision,
            priority,
            action_types: Vec::new(),
            path_globs: Vec::new(),
            target_contains: Vec::new(),
            min_risk_level: None,
            max_risk_level: None,
            metadata: BTreeMap::new(),
            enabled: true,
        }
    }

    /// Restrict to paths containing any of `needles`
    pub fn with_target_contains<I, S>(mut self, needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_contains = needles.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to paths matching any of `globs`
    pub fn with_path_globs<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_globs = globs.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to the given actions
    pub fn with_action_types(mut self, actions: impl IntoIterator<Item = ChangeAction>) -> Self {
        self.action_types = actions.into_iter().collect();
        self
    }

    /// Set the inclusive upper risk bound
    pub fn with_max_risk(mut self, level: RiskLevel) -> Self {
        self.max_risk_level = Some(level);
        self
    }

    /// Set the inclusive lower risk bound
    pub fn with_min_risk(mut self, level: RiskLevel) -> Self {
        self.min_risk_level = Some(level);
        self
    }

    /// Attach a rationale
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.metadata
            .insert("rationale".to_string(), serde_json::Value::String(rationale.into()));
        self
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_deserialization() {
        let yaml = r#"
version: "test-1"
defaults:
  decision: require_approval
rules:
  - id: deny-foo
    decision: deny
    priority: 0
    path_globs: ["*foo.py"]
  - id: allow-docs
    decision: allow
    priority: 10
    action_types: [create, file_write]
    max_risk_level: medium
"#;

        let policy = PolicyConfig::from_yaml(yaml).unwrap();
        assert_eq!(policy.version, "test-1");
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(
            policy.rules[1].action_types,
            vec![ChangeAction::Create, ChangeAction::Modify]
        );
        assert!(policy.rules[0].enabled);
        assert!(policy.has_allow_rule());
    }

    #[test]
    fn test_json_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{"version": "test-1", "defaults": {"decision": "require_approval"}, "rules": []}"#,
        )
        .unwrap();

        let policy = PolicyConfig::from_file(&path).unwrap();
        assert_eq!(policy.defaults.decision, PolicyDecision::RequireApproval);
        assert!(policy.rules.is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
rules:
  - id: same
    decision: deny
  - id: same
    decision: allow
"#;
        let err = PolicyConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let yaml = r#"
rules:
  - id: broken
    decision: deny
    path_globs: ["src/[unclosed"]
"#;
        assert!(PolicyConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_malformed_file_is_policy_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, "rules: [ {id: x").unwrap();

        let err = PolicyConfig::from_file(&path).unwrap_err();
        assert!(err.is_configuration());
    }
}
