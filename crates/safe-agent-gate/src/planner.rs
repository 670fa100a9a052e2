//! Change planning
//!
//! A [`Planner`] turns a task description into an ordered list of proposed
//! changes. Every change it emits is untrusted and goes through the approval
//! engine before anything touches the disk.

use async_trait::async_trait;
use reqwest::Client;
use safe_agent_core::{Change, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Environment variable holding the planner API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Most workspace paths sent to the planner as context
pub const MAX_CONTEXT_FILES: usize = 100;

const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__", "venv"];

const SYSTEM_PROMPT: &str = r#"You are a coding assistant that plans file changes.

Given a task, analyze what file changes are needed and output a structured plan.

IMPORTANT: You must respond with ONLY a valid JSON object, no markdown, no explanation.

The JSON must have this structure:
{
    "summary": "Brief description of what you'll do",
    "changes": [
        {
            "action": "create" | "modify" | "delete",
            "path": "relative/path/to/file.py",
            "description": "What this change does",
            "content": "Full file content (for create/modify)"
        }
    ]
}

Rules:
- Only include file changes, not commands to run
- Use relative paths from the current directory
- For modifications, include the COMPLETE new file content
- Keep changes minimal and focused on the task
"#;

/// A planned set of changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub changes: Vec<Change>,
}

impl Plan {
    /// Placeholder returned when a planner reply cannot be parsed
    pub fn failed() -> Self {
        Self {
            summary: "Failed to plan".to_string(),
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// What the planner sees of the workspace
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    pub working_directory: PathBuf,
    pub files: Vec<String>,
}

impl PlanContext {
    /// List up to [`MAX_CONTEXT_FILES`] visible files under `root`
    pub fn gather(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            working_directory: root.to_path_buf(),
            files: workspace_files(root, MAX_CONTEXT_FILES),
        }
    }

    fn user_message(&self, task: &str) -> String {
        format!(
            "Current directory: {}\n\nFiles:\n{}\n\nTask: {}",
            self.working_directory.display(),
            self.files.join("\n"),
            task
        )
    }
}

/// Produces a plan for a task
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, task: &str, context: &PlanContext) -> Result<Plan>;

    /// Model id recorded in the audit trail
    fn model(&self) -> Option<&str> {
        None
    }
}

/// A plan fixed up front, from code or a JSON file
#[derive(Debug, Clone, Default)]
pub struct PlannedChanges {
    plan: Plan,
}

impl PlannedChanges {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }

    pub fn from_changes(changes: Vec<Change>) -> Self {
        Self::new(Plan {
            summary: String::new(),
            changes,
        })
    }

    /// Load `{summary, changes}` or a bare list of changes
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!("cannot read plan {}: {}", path.as_ref().display(), e))
        })?;
        let value: Value = serde_json::from_str(&text)?;
        let plan = if value.is_array() {
            Plan {
                summary: String::new(),
                changes: serde_json::from_value(value)?,
            }
        } else {
            serde_json::from_value(value)?
        };
        Ok(Self::new(plan))
    }
}

#[async_trait]
impl Planner for PlannedChanges {
    async fn plan(&self, _task: &str, _context: &PlanContext) -> Result<Plan> {
        Ok(self.plan.clone())
    }
}

/// Planner backed by the Anthropic Messages API
pub struct AnthropicPlanner {
    client: Client,
    api_key: String,
    model: String,
    base_url: Option<String>,
}

impl AnthropicPlanner {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    /// Read the key from `ANTHROPIC_API_KEY`
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::config(format!("{} is not set", API_KEY_ENV)))?;
        Ok(Self::new(api_key, model))
    }

    /// Override the endpoint (proxies, tests)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    fn build_request(&self, task: &str, context: &PlanContext) -> Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": SYSTEM_PROMPT,
            "messages": [
                {"role": "user", "content": context.user_message(task)}
            ],
        })
    }
}

#[async_trait]
impl Planner for AnthropicPlanner {
    async fn plan(&self, task: &str, context: &PlanContext) -> Result<Plan> {
        let url = self.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
        debug!(model = %self.model, files = context.files.len(), "Requesting plan");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_request(task, context))
            .send()
            .await
            .map_err(|e| Error::planner(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Anthropic API error");
            let status_code = status.as_u16();
            return Err(Error::planner(format!("HTTP {status_code}: {body}")));
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::planner(e.to_string()))?;
        let text = reply
            .content
            .into_iter()
            .find_map(|block| block.text)
            .unwrap_or_default();

        Ok(parse_plan_text(&text))
    }

    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }
}

impl std::fmt::Debug for AnthropicPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicPlanner")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Parse a planner reply, tolerating a surrounding markdown code fence.
///
/// Unparsable replies yield [`Plan::failed`].
pub fn parse_plan_text(reply: &str) -> Plan {
    let mut text = reply.trim();
    if text.starts_with("```") {
        text = text.split("```").nth(1).unwrap_or_default();
        text = text.strip_prefix("json").unwrap_or(text).trim();
    }

    match serde_json::from_str::<Plan>(text) {
        Ok(plan) => plan,
        Err(e) => {
            let preview: String = reply.chars().take(500).collect();
            warn!(error = %e, reply = %preview, "Failed to parse plan");
            Plan::failed()
        }
    }
}

/// Visible workspace files, `/`-separated and sorted, at most `limit`.
///
/// Hidden entries and dependency or cache directories are skipped.
pub fn workspace_files(root: &Path, limit: usize) -> Vec<String> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Skipping file context");
                continue;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            let path = entry.path();
            match entry.file_type() {
                Ok(kind) if kind.is_dir() => pending.push(path),
                Ok(kind) if kind.is_file() => {
                    if let Ok(relative) = path.strip_prefix(root) {
                        let parts: Vec<String> = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        files.push(parts.join("/"));
                    }
                }
                _ => {}
            }
        }
    }

    files.sort();
    files.truncate(limit);
    files
}
