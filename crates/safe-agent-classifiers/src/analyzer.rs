//! Impact analysis for proposed file changes
//!
//! Assigns a risk level to one request by looking at what it touches and how
//! much of the existing file it rewrites.

use async_trait::async_trait;
use safe_agent_core::{ActionRequest, ChangeAction, FileChange, Preview, Result, RiskLevel};
use std::collections::HashMap;
use std::io::ErrorKind;
use tracing::debug;

/// Produces an impact preview for a single request
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze `request`; the engine awaits this before consulting policy
    async fn analyze(&self, request: &ActionRequest) -> Result<Preview>;
}

const SECRET_MARKERS: &[&str] = &[
    ".env",
    ".ssh/",
    "id_rsa",
    "id_ed25519",
    ".pem",
    "credentials",
    "secrets",
    "password",
    "api_key",
    "secret_key",
    "access_key",
    ".npmrc",
    ".pypirc",
];

const INFRA_MARKERS: &[&str] = &[
    ".github/workflows/",
    ".gitlab-ci.yml",
    ".circleci/",
    "jenkinsfile",
    "dockerfile",
    "docker-compose",
    "terraform/",
    "infra/",
    "k8s/",
    "helm/",
    "deploy/",
];

const MANIFESTS: &[&str] = &[
    "cargo.toml",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "go.mod",
    "gemfile",
    "pom.xml",
    "build.gradle",
];

const LOCKFILES: &[&str] = &[
    "cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "go.sum",
    "gemfile.lock",
];

const CONFIG_EXTENSIONS: &[&str] = &["toml", "ini", "cfg", "conf", "yaml", "yml"];

/// Heuristic analyzer over the file currently on disk
#[derive(Debug, Clone, Copy, Default)]
pub struct ImpactAnalyzer;

impl ImpactAnalyzer {
    pub fn new() -> Self {
        Self
    }

    async fn read_existing(request: &ActionRequest) -> Result<Option<String>> {
        match tokio::fs::read(&request.target).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            // Directories and unreadable files are analyzed as absent
            Err(e) if e.kind() == ErrorKind::PermissionDenied || request.target.is_dir() => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Assign a risk level and collect the reasons for it
    pub fn assess(
        request: &ActionRequest,
        existing: Option<&str>,
        change: &FileChange,
    ) -> (RiskLevel, Vec<String>) {
        let path = request.relative_path.to_lowercase();
        let file_name = path.rsplit('/').next().unwrap_or(path.as_str());
        let mut level = RiskLevel::Low;
        let mut factors = Vec::new();
        let mut raise = |to: RiskLevel, factor: String| {
            if to > level {
                level = to;
            }
            factors.push(factor);
        };

        if let Some(marker) = SECRET_MARKERS.iter().find(|m| path.contains(*m)) {
            raise(
                RiskLevel::Critical,
                format!("Path looks like secret or credential material ({})", marker),
            );
        }

        if request.action == ChangeAction::Delete {
            if existing.is_some() {
                raise(
                    RiskLevel::High,
                    format!("Deletes an existing file ({} lines)", change.lines_before),
                );
            } else {
                raise(RiskLevel::Low, "Delete target does not exist".to_string());
            }
        }

        if let Some(marker) = INFRA_MARKERS.iter().find(|m| path.contains(*m)) {
            raise(
                RiskLevel::High,
                format!("Touches CI, deployment or infrastructure configuration ({})", marker),
            );
        }

        if MANIFESTS.contains(&file_name) {
            raise(RiskLevel::Medium, "Changes a dependency manifest".to_string());
        } else if LOCKFILES.contains(&file_name) {
            raise(RiskLevel::Medium, "Changes a dependency lockfile".to_string());
        } else if file_name
            .rsplit_once('.')
            .is_some_and(|(_, ext)| CONFIG_EXTENSIONS.contains(&ext))
        {
            raise(RiskLevel::Medium, "Changes a configuration file".to_string());
        }

        if request.action != ChangeAction::Delete
            && change.lines_before > 0
            && change.lines_removed * 2 > change.lines_before
        {
            raise(
                RiskLevel::Medium,
                format!(
                    "Rewrites {} of {} existing lines",
                    change.lines_removed, change.lines_before
                ),
            );
        }

        (level, factors)
    }
}

#[async_trait]
impl Analyzer for ImpactAnalyzer {
    async fn analyze(&self, request: &ActionRequest) -> Result<Preview> {
        let existing = Self::read_existing(request).await?;
        let change = line_summary(request, existing.as_deref());
        let (risk_level, risk_factors) = Self::assess(request, existing.as_deref(), &change);

        debug!(
            path = %request.relative_path,
            action = %request.action,
            risk = %risk_level,
            factors = risk_factors.len(),
            "Impact analyzed"
        );

        Ok(Preview {
            risk_level,
            risk_factors,
            file_changes: vec![change],
        })
    }
}

/// Line counts for the transition from `existing` to the proposed content.
///
/// Added/removed are multiset differences of lines, not a positional diff.
pub fn line_summary(request: &ActionRequest, existing: Option<&str>) -> FileChange {
    let before: Vec<&str> = existing.map(|text| text.lines().collect()).unwrap_or_default();
    let after: Vec<&str> = match request.action {
        ChangeAction::Delete => Vec::new(),
        ChangeAction::Create | ChangeAction::Modify => request.content.lines().collect(),
    };

    let mut pool: HashMap<&str, usize> = HashMap::new();
    for line in &before {
        *pool.entry(*line).or_default() += 1;
    }
    let mut lines_added = 0;
    for line in &after {
        match pool.get_mut(line) {
            Some(count) if *count > 0 => *count -= 1,
            _ => lines_added += 1,
        }
    }
    let lines_removed = pool.values().sum();

    FileChange {
        path: request.relative_path.clone(),
        action: request.action,
        lines_before: before.len(),
        lines_after: after.len(),
        lines_added,
        lines_removed,
    }
}
