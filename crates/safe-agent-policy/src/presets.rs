//! Builtin policy and bundled presets

use safe_agent_core::{Error, Result, RiskLevel};

use crate::{PolicyConfig, PolicyDecision, PolicyRule};

/// Rule id of the builtin secrets denial
pub const BUILTIN_DENY_SECRETS: &str = "builtin:deny-secrets-and-keys";

/// Rule id of the builtin low/medium allowance
pub const BUILTIN_ALLOW_LOW_MEDIUM: &str = "builtin:allow-low-and-medium-risk";

/// Version label of the builtin policy
pub const BUILTIN_VERSION: &str = "safe-agent-builtin-1";

/// Path substrings treated as secret or credential material
pub const SECRET_PATH_MARKERS: &[&str] = &[
    ".env",
    ".ssh",
    "id_rsa",
    "credentials",
    "secrets",
    "password",
    ".pem",
    "api_key",
    "secret_key",
    "access_key",
];

/// The policy used when neither a file nor a preset is configured.
///
/// Compliance mode drops the allow rule, so every change needs explicit
/// approval; the secrets denial is always present.
pub fn builtin_policy(compliance_mode: bool) -> PolicyConfig {
    let mut config = PolicyConfig::new(BUILTIN_VERSION).with_rule(
        PolicyRule::new(BUILTIN_DENY_SECRETS, PolicyDecision::Deny, 0)
            .with_target_contains(SECRET_PATH_MARKERS.iter().copied())
            .with_rationale(
                "Secrets/key material should not be modified or handled by agent actions \
                 without explicit, out-of-band review.",
            ),
    );

    if !compliance_mode {
        config = config.with_rule(
            PolicyRule::new(BUILTIN_ALLOW_LOW_MEDIUM, PolicyDecision::Allow, 100)
                .with_max_risk(RiskLevel::Medium)
                .with_rationale(
                    "Low and medium risk actions are allowed; higher risk requires explicit approval.",
                ),
        );
    }

    config
}

/// Description of a bundled preset
#[derive(Debug, Clone, Copy)]
pub struct PresetInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    source: &'static str,
}

const PRESETS: &[PresetInfo] = &[
    PresetInfo {
        id: "startup",
        name: "Startup",
        description: "Allows up to high risk; denies key material; reviews CI and infra",
        source: include_str!("../presets/startup.yaml"),
    },
    PresetInfo {
        id: "fintech",
        name: "Fintech",
        description: "Allows only low risk; denies credentials and ledger/migration deletes",
        source: include_str!("../presets/fintech.yaml"),
    },
    PresetInfo {
        id: "games",
        name: "Games",
        description: "Allows asset changes freely and code changes up to medium risk",
        source: include_str!("../presets/games.yaml"),
    },
];

/// All bundled presets
pub fn list_presets() -> &'static [PresetInfo] {
    PRESETS
}

/// Load a bundled preset by id
pub fn load_preset(id: &str) -> Result<PolicyConfig> {
    let preset = PRESETS
        .iter()
        .find(|preset| preset.id == id.trim())
        .ok_or_else(|| {
            let known: Vec<&str> = PRESETS.iter().map(|p| p.id).collect();
            Error::config(format!(
                "unknown policy preset '{}' (available: {})",
                id,
                known.join(", ")
            ))
        })?;

    PolicyConfig::from_yaml(preset.source)
}
