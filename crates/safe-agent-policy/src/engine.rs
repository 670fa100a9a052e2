//! Policy evaluation engine

use globset::{Glob, GlobSet, GlobSetBuilder};
use safe_agent_core::{ActionRequest, Error, Result, RiskLevel};
use tracing::debug;

use crate::{PolicyConfig, PolicyResult, PolicyRule};

/// A policy with its enabled rules ordered and their glob matchers built
///
/// Built once when the policy is loaded; evaluation never compiles a pattern.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    config: PolicyConfig,
    rules: Vec<CompiledRule>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    index: usize,
    globs: Option<GlobSet>,
}

impl CompiledPolicy {
    /// Order enabled rules by ascending priority (ties keep document order)
    /// and build one [`GlobSet`] per rule
    pub fn compile(config: PolicyConfig) -> Result<Self> {
        let mut rules = Vec::new();
        for (index, rule) in config.rules.iter().enumerate() {
            if !rule.enabled {
                continue;
            }
            rules.push(CompiledRule {
                index,
                globs: build_globs(rule)?,
            });
        }
        rules.sort_by_key(|compiled| config.rules[compiled.index].priority);

        Ok(Self { config, rules })
    }

    /// The policy as loaded
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Ids of the enabled rules in evaluation order
    pub fn rule_ids(&self) -> Vec<&str> {
        self.ordered().map(|(rule, _)| rule.id.as_str()).collect()
    }

    fn ordered(&self) -> impl Iterator<Item = (&PolicyRule, Option<&GlobSet>)> + '_ {
        self.rules
            .iter()
            .map(|compiled| (&self.config.rules[compiled.index], compiled.globs.as_ref()))
    }
}

fn build_globs(rule: &PolicyRule) -> Result<Option<GlobSet>> {
    if rule.path_globs.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in &rule.path_globs {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::policy(format!("rule '{}' has invalid glob '{}': {}", rule.id, pattern, e))
        })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::policy(format!("rule '{}' globs: {}", rule.id, e)))?;
    Ok(Some(set))
}

/// Evaluates a policy against a single request
///
/// Implementations must be pure with respect to the run: the decision engine
/// calls this once per change, in order.
pub trait PolicyEvaluator: Send + Sync {
    /// Decide on `request`, whose analyzed risk is `risk_level`
    fn evaluate(
        &self,
        policy: &CompiledPolicy,
        request: &ActionRequest,
        risk_level: RiskLevel,
    ) -> PolicyResult;
}

/// First-match rule evaluator
///
/// The first rule, in [`CompiledPolicy`] order, whose matchers all accept
/// the request decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// Create a new rule evaluator
    pub fn new() -> Self {
        Self
    }

    fn rule_matches(
        rule: &PolicyRule,
        globs: Option<&GlobSet>,
        request: &ActionRequest,
        risk_level: RiskLevel,
    ) -> bool {
        if !rule.action_types.is_empty() && !rule.action_types.contains(&request.action) {
            return false;
        }

        if let Some(min) = rule.min_risk_level {
            if risk_level < min {
                return false;
            }
        }
        if let Some(max) = rule.max_risk_level {
            if risk_level > max {
                return false;
            }
        }

        let path = request.relative_path.as_str();

        if !rule.target_contains.is_empty() {
            let lowered = path.to_lowercase();
            let hit = rule
                .target_contains
                .iter()
                .any(|needle| lowered.contains(&needle.to_lowercase()));
            if !hit {
                return false;
            }
        }

        match globs {
            Some(set) => set.is_match(path),
            None => true,
        }
    }
}

impl PolicyEvaluator for RuleEvaluator {
    fn evaluate(
        &self,
        policy: &CompiledPolicy,
        request: &ActionRequest,
        risk_level: RiskLevel,
    ) -> PolicyResult {
        for (rule, globs) in policy.ordered() {
            if Self::rule_matches(rule, globs, request, risk_level) {
                debug!(
                    rule = %rule.id,
                    decision = %rule.decision,
                    path = %request.relative_path,
                    "Policy rule matched"
                );
                return PolicyResult::matched(rule.decision, rule.id.clone());
            }
        }

        let default = policy.config().defaults.decision;
        debug!(
            decision = %default,
            path = %request.relative_path,
            "No policy rule matched, using default"
        );
        PolicyResult::default_decision(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PolicyDecision;
    use safe_agent_core::ChangeAction;
    use std::path::PathBuf;

    fn request(action: ChangeAction, path: &str) -> ActionRequest {
        ActionRequest {
            action,
            target: PathBuf::from("/work").join(path),
            relative_path: path.to_string(),
            description: String::new(),
            content: String::new(),
        }
    }

    #[test]
    fn test_default_decision_when_nothing_matches() {
        let config = PolicyConfig::new("t");
        let policy = CompiledPolicy::compile(config).unwrap();
        let result = RuleEvaluator.evaluate(
            &policy,
            &request(ChangeAction::Modify, "foo.py"),
            RiskLevel::Low,
        );
        assert_eq!(result.decision, PolicyDecision::RequireApproval);
        assert_eq!(result.matched_rule_id, None);
    }

    #[test]
    fn test_priority_order_wins_over_document_order() {
        let config = PolicyConfig::new("t")
            .with_rule(PolicyRule::new("allow-all", PolicyDecision::Allow, 100))
            .with_rule(
                PolicyRule::new("deny-foo", PolicyDecision::Deny, 0).with_path_globs(["*foo.py"]),
            );
        let policy = CompiledPolicy::compile(config).unwrap();

        let result = RuleEvaluator.evaluate(
            &policy,
            &request(ChangeAction::Modify, "src/foo.py"),
            RiskLevel::Low,
        );
        assert_eq!(result, PolicyResult::matched(PolicyDecision::Deny, "deny-foo"));

        let result = RuleEvaluator.evaluate(
            &policy,
            &request(ChangeAction::Modify, "src/bar.py"),
            RiskLevel::Low,
        );
        assert_eq!(result.matched_rule_id.as_deref(), Some("allow-all"));
    }

    #[test]
    fn test_risk_bounds_are_inclusive() {
        let config = PolicyConfig::new("t").with_rule(
            PolicyRule::new("allow-low-medium", PolicyDecision::Allow, 0)
                .with_max_risk(RiskLevel::Medium),
        );
        let policy = CompiledPolicy::compile(config).unwrap();
        let req = request(ChangeAction::Create, "a.txt");

        assert_eq!(
            RuleEvaluator.evaluate(&policy, &req, RiskLevel::Medium).decision,
            PolicyDecision::Allow
        );
        assert_eq!(
            RuleEvaluator.evaluate(&policy, &req, RiskLevel::High).decision,
            PolicyDecision::RequireApproval
        );
    }

    #[test]
    fn test_target_contains_is_case_insensitive() {
        let config = PolicyConfig::new("t").with_rule(
            PolicyRule::new("deny-secrets", PolicyDecision::Deny, 0)
                .with_target_contains(["credentials"]),
        );
        let policy = CompiledPolicy::compile(config).unwrap();
        let result = RuleEvaluator.evaluate(
            &policy,
            &request(ChangeAction::Modify, "config/AWS_Credentials"),
            RiskLevel::Low,
        );
        assert_eq!(result.decision, PolicyDecision::Deny);
    }

    #[test]
    fn test_action_types_filter() {
        let config = PolicyConfig::new("t").with_rule(
            PolicyRule::new("deny-deletes", PolicyDecision::Deny, 0)
                .with_action_types([ChangeAction::Delete]),
        );
        let policy = CompiledPolicy::compile(config).unwrap();

        let result =
            RuleEvaluator.evaluate(&policy, &request(ChangeAction::Create, "a.rs"), RiskLevel::Low);
        assert_eq!(result.matched_rule_id, None);

        let result =
            RuleEvaluator.evaluate(&policy, &request(ChangeAction::Delete, "a.rs"), RiskLevel::Low);
        assert_eq!(result.decision, PolicyDecision::Deny);
    }

    #[test]
    fn test_disabled_rules_are_skipped() {
        let mut rule = PolicyRule::new("deny-all", PolicyDecision::Deny, 0);
        rule.enabled = false;
        let config = PolicyConfig::new("t").with_rule(rule);
        let policy = CompiledPolicy::compile(config).unwrap();

        let result =
            RuleEvaluator.evaluate(&policy, &request(ChangeAction::Create, "a.rs"), RiskLevel::Low);
        assert_eq!(result.matched_rule_id, None);
    }

    #[test]
    fn test_compiled_order_skips_disabled_rules() {
        let mut disabled = PolicyRule::new("deny-all", PolicyDecision::Deny, 0);
        disabled.enabled = false;
        let config = PolicyConfig::new("t")
            .with_rule(PolicyRule::new("late", PolicyDecision::Allow, 50))
            .with_rule(disabled)
            .with_rule(PolicyRule::new("early", PolicyDecision::Deny, 10))
            .with_rule(PolicyRule::new("late-tie", PolicyDecision::Allow, 50));

        let policy = CompiledPolicy::compile(config).unwrap();

        assert_eq!(policy.rule_ids(), vec!["early", "late", "late-tie"]);
        assert_eq!(policy.config().rules.len(), 4);
    }

    #[test]
    fn test_invalid_glob_fails_at_compile_time() {
        let config = PolicyConfig::new("t").with_rule(
            PolicyRule::new("bad", PolicyDecision::Deny, 0).with_path_globs(["src/[unclosed"]),
        );

        let err = CompiledPolicy::compile(config).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("invalid glob"));
    }

    #[test]
    fn test_any_glob_in_a_rule_matches() {
        let config = PolicyConfig::new("t").with_rule(
            PolicyRule::new("lockfiles", PolicyDecision::Deny, 0)
                .with_path_globs(["*.lock", "**/*.lock", "package-lock.json"]),
        );
        let policy = CompiledPolicy::compile(config).unwrap();

        for path in ["Cargo.lock", "web/yarn.lock", "package-lock.json"] {
            let result =
                RuleEvaluator.evaluate(&policy, &request(ChangeAction::Modify, path), RiskLevel::Low);
            assert_eq!(result.decision, PolicyDecision::Deny, "{}", path);
        }
        let result = RuleEvaluator.evaluate(
            &policy,
            &request(ChangeAction::Modify, "src/lock.rs"),
            RiskLevel::Low,
        );
        assert_eq!(result.matched_rule_id, None);
    }
}
