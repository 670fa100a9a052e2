//! Policy source resolution

use safe_agent_core::{Error, PathSafetyResolver, Result};
use std::fmt;
use tracing::info;

use crate::presets::{builtin_policy, load_preset};
use crate::{CompiledPolicy, PolicyConfig};

/// Where the active policy came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// The builtin default policy
    Builtin,
    /// A bundled preset, by id
    Preset(String),
    /// A policy file, as a `/`-separated path relative to the working directory
    File(String),
}

impl PolicySource {
    /// Whether the policy was loaded from a user-supplied file
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

impl fmt::Display for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::Preset(id) => write!(f, "preset:{}", id),
            Self::File(path) => write!(f, "file:{}", path),
        }
    }
}

/// A compiled policy together with its provenance
#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    policy: CompiledPolicy,
    pub source: PolicySource,
}

impl LoadedPolicy {
    /// Compile `config`, failing on any malformed rule matcher
    pub fn new(config: PolicyConfig, source: PolicySource) -> Result<Self> {
        Ok(Self {
            policy: CompiledPolicy::compile(config)?,
            source,
        })
    }

    /// The policy as loaded
    pub fn config(&self) -> &PolicyConfig {
        self.policy.config()
    }

    /// The policy ready for evaluation
    pub fn compiled(&self) -> &CompiledPolicy {
        &self.policy
    }

    /// Resolve the active policy.
    ///
    /// A file path and a preset are mutually exclusive. The file must resolve
    /// inside the working directory.
    pub fn resolve(
        resolver: &PathSafetyResolver,
        policy_path: Option<&str>,
        preset: Option<&str>,
        compliance_mode: bool,
    ) -> Result<Self> {
        let policy_path = policy_path.map(str::trim).filter(|p| !p.is_empty());
        let preset = preset.map(str::trim).filter(|p| !p.is_empty());

        let loaded = match (policy_path, preset) {
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "policy_path and policy_preset cannot be used together",
                ))
            }
            (Some(path), None) => {
                let resolved = resolver.resolve_config_path(path)?;
                let config = PolicyConfig::from_file(&resolved.absolute)?;
                Self::new(config, PolicySource::File(resolved.relative))?
            }
            (None, Some(id)) => Self::new(load_preset(id)?, PolicySource::Preset(id.to_string()))?,
            (None, None) => Self::new(builtin_policy(compliance_mode), PolicySource::Builtin)?,
        };

        info!(
            source = %loaded.source,
            version = %loaded.config().version,
            rules = loaded.policy.rule_ids().len(),
            "Policy loaded"
        );
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::BUILTIN_VERSION;

    fn resolver(dir: &tempfile::TempDir) -> PathSafetyResolver {
        PathSafetyResolver::new(dir.path()).unwrap()
    }

    #[test]
    fn test_builtin_when_nothing_configured() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = LoadedPolicy::resolve(&resolver(&dir), None, None, false).unwrap();
        assert_eq!(loaded.source, PolicySource::Builtin);
        assert_eq!(loaded.config().version, BUILTIN_VERSION);
        assert_eq!(loaded.source.to_string(), "builtin");
    }

    #[test]
    fn test_path_and_preset_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let err = LoadedPolicy::resolve(&resolver(&dir), Some("policy.yaml"), Some("startup"), false)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_preset_source_label() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = LoadedPolicy::resolve(&resolver(&dir), None, Some("fintech"), false).unwrap();
        assert_eq!(loaded.source.to_string(), "preset:fintech");
        assert!(!loaded.source.is_file());
    }

    #[test]
    fn test_file_policy_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("policies")).unwrap();
        std::fs::write(
            dir.path().join("policies/team.yaml"),
            "version: team-1\nrules:\n  - id: deny-all\n    decision: deny\n",
        )
        .unwrap();

        let loaded =
            LoadedPolicy::resolve(&resolver(&dir), Some("policies/team.yaml"), None, false).unwrap();
        assert_eq!(loaded.source.to_string(), "file:policies/team.yaml");
        assert_eq!(loaded.config().version, "team-1");
    }

    #[test]
    fn test_file_policy_outside_root_rejected() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("repo");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("policy.yaml"), "rules: []\n").unwrap();

        let resolver = PathSafetyResolver::new(&root).unwrap();
        let err = LoadedPolicy::resolve(&resolver, Some("../policy.yaml"), None, false).unwrap_err();
        assert!(matches!(err, Error::UnsafePath(_)));

        let absolute = outer.path().join("policy.yaml");
        let err = LoadedPolicy::resolve(&resolver, absolute.to_str(), None, false).unwrap_err();
        assert!(matches!(err, Error::UnsafePath(_)));
    }

    #[test]
    fn test_loaded_file_policy_is_compiled_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("policy.yaml"),
            "rules:\n  - id: docs\n    decision: allow\n    priority: 20\n    path_globs: [\"docs/**\"]\n  - id: secrets\n    decision: deny\n    priority: 0\n    target_contains: [\".env\"]\n",
        )
        .unwrap();

        let loaded = LoadedPolicy::resolve(&resolver(&dir), Some("policy.yaml"), None, false).unwrap();
        assert_eq!(loaded.compiled().rule_ids(), vec!["secrets", "docs"]);
    }
}
