//! Safe Agent Policy Engine
//!
//! Declarative policy-as-code for gating proposed file changes.
//!
//! Policies are ordered rule lists loaded from YAML or JSON:
//!
//! ```yaml
//! version: "team-1"
//! defaults:
//!   decision: require_approval
//! rules:
//!   - id: deny-secrets
//!     decision: deny
//!     priority: 0
//!     target_contains: [".env", "id_rsa"]
//!   - id: allow-docs
//!     decision: allow
//!     priority: 10
//!     path_globs: ["docs/**"]
//!     max_risk_level: medium
//! ```
//!
//! A `deny` decision is final; nothing downstream can override it.

pub mod decision;
pub mod engine;
pub mod loader;
pub mod presets;
pub mod rule;

pub use decision::{PolicyDecision, PolicyResult};
pub use engine::{CompiledPolicy, PolicyEvaluator, RuleEvaluator};
pub use loader::{LoadedPolicy, PolicySource};
pub use presets::{builtin_policy, list_presets, load_preset, PresetInfo};
pub use rule::{PolicyConfig, PolicyDefaults, PolicyRule};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::decision::{PolicyDecision, PolicyResult};
    pub use crate::engine::{CompiledPolicy, PolicyEvaluator, RuleEvaluator};
    pub use crate::loader::{LoadedPolicy, PolicySource};
    pub use crate::rule::{PolicyConfig, PolicyRule};
}
