//! Prompt Injection Scanner
//!
//! Scans the description and proposed content of a change for text that
//! tries to steer the agent (or a downstream reviewer model) away from its
//! instructions.
//!
//! Detection patterns cover:
//! - Direct instruction override attempts
//! - Role-playing/persona switching
//! - Jailbreak keywords
//! - System prompt extraction attempts
//! - Chat-template delimiter injection
//! - Requests to leak credentials
//!
//! Findings are advisory: they are reported on every governance event but
//! never decide an outcome on their own.

use aho_corasick::AhoCorasick;
use safe_agent_core::{ActionRequest, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Severity of a scanner finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Lowercase wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of prompt injection attacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectionCategory {
    /// Direct instruction override: "ignore previous instructions"
    InstructionOverride,
    /// Role switching: "you are now", "act as"
    RoleSwitching,
    /// Known jailbreak patterns: "DAN mode", "jailbreak"
    Jailbreak,
    /// System prompt extraction: "repeat your instructions"
    SystemExtraction,
    /// Chat-template markers smuggled into content
    DelimiterAttack,
    /// Requests to send or print key material
    SecretExfiltration,
}

impl InjectionCategory {
    /// Severity assigned to a finding in this category
    pub fn severity(&self) -> Severity {
        match self {
            Self::Jailbreak | Self::SecretExfiltration => Severity::Critical,
            Self::InstructionOverride | Self::SystemExtraction => Severity::High,
            Self::RoleSwitching | Self::DelimiterAttack => Severity::Medium,
        }
    }

    /// Reason id reported for findings in this category
    pub fn reason_id(&self) -> &'static str {
        match self {
            Self::InstructionOverride => "instruction_override",
            Self::RoleSwitching => "role_switching",
            Self::Jailbreak => "jailbreak",
            Self::SystemExtraction => "system_extraction",
            Self::DelimiterAttack => "delimiter_attack",
            Self::SecretExfiltration => "secret_exfiltration",
        }
    }

    fn patterns(&self) -> &'static [&'static str] {
        match self {
            Self::InstructionOverride => &[
                "ignore previous instructions",
                "ignore all previous instructions",
                "ignore your instructions",
                "ignore the above",
                "disregard previous",
                "disregard your system",
                "disregard all prior",
                "forget your instructions",
                "forget everything above",
                "override your instructions",
                "new instructions:",
                "your new instructions are",
                "instead, do the following",
                "do not follow your",
            ],
            Self::RoleSwitching => &[
                "you are now",
                "you're now",
                "pretend to be",
                "pretend you're",
                "pretend you are",
                "roleplay as",
                "play the role of",
                "assume the role",
                "from now on you are",
                "from now on, you are",
                "imagine you are",
            ],
            Self::Jailbreak => &[
                "dan mode",
                "jailbreak",
                "jailbroken",
                "developer mode enabled",
                "god mode",
                "unrestricted mode",
                "without restrictions",
                "bypass your",
                "disable all safety",
                "ignore safety",
                "remove all filters",
            ],
            Self::SystemExtraction => &[
                "repeat your instructions",
                "repeat your system",
                "show your system prompt",
                "print your instructions",
                "print your system",
                "what is your system prompt",
                "reveal your instructions",
                "reveal your system",
                "output your instructions",
            ],
            Self::DelimiterAttack => &[
                "<|system|>",
                "<|im_start|>",
                "<<SYS>>",
                "<</SYS>>",
                "[INST]",
                "[/INST]",
                "end of user input",
                "begin system prompt",
            ],
            Self::SecretExfiltration => &[
                "exfiltrate",
                "send the api key",
                "send your api key",
                "post the token to",
                "upload the credentials",
                "print the secret",
                "print all environment variables",
                "cat ~/.ssh",
                "cat ~/.aws/credentials",
                "base64 ~/.ssh",
            ],
        }
    }

    const ALL: [InjectionCategory; 6] = [
        Self::Jailbreak,
        Self::SecretExfiltration,
        Self::InstructionOverride,
        Self::SystemExtraction,
        Self::RoleSwitching,
        Self::DelimiterAttack,
    ];
}

/// Which part of the request a finding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanField {
    Description,
    Content,
}

/// A single pattern hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFinding {
    pub reason_id: String,
    pub severity: Severity,
    pub pattern: String,
    pub field: ScanField,
    /// Byte span within the scanned field
    pub span: (usize, usize),
}

/// Findings for one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub findings: Vec<ScanFinding>,
}

impl ScanResult {
    /// Highest finding severity, `None` when clean
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// Distinct reason ids, sorted
    pub fn reason_ids(&self) -> Vec<String> {
        self.findings
            .iter()
            .map(|f| f.reason_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether no pattern matched
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Scans a request for injection attempts
pub trait Scanner: Send + Sync {
    /// Scan a validated request
    fn scan(&self, request: &ActionRequest) -> ScanResult;
}

/// Pattern-based prompt injection scanner
pub struct PromptInjectionScanner {
    matchers: Vec<(InjectionCategory, AhoCorasick)>,
}

impl PromptInjectionScanner {
    /// Create a scanner with the default pattern set
    pub fn new() -> Result<Self> {
        let matchers = InjectionCategory::ALL
            .iter()
            .map(|category| Ok((*category, Self::build_matcher(category.patterns())?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { matchers })
    }

    /// Build an Aho-Corasick matcher from patterns
    fn build_matcher(patterns: &[&str]) -> Result<AhoCorasick> {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(patterns)
            .map_err(|e| {
                Error::internal(format!(
                    "Failed to build prompt injection pattern matcher: {}",
                    e
                ))
            })
    }

    /// Scan a single piece of text
    pub fn scan_text(&self, text: &str, field: ScanField) -> Vec<ScanFinding> {
        let mut findings = Vec::new();

        for (category, matcher) in &self.matchers {
            let patterns = category.patterns();
            for m in matcher.find_iter(text) {
                // Only count hits that start a word ("exact as" is not "act as")
                if !starts_word(text, m.start()) {
                    continue;
                }
                findings.push(ScanFinding {
                    reason_id: category.reason_id().to_string(),
                    severity: category.severity(),
                    pattern: patterns[m.pattern().as_usize()].to_string(),
                    field,
                    span: (m.start(), m.end()),
                });
            }
        }

        findings
    }
}

impl Scanner for PromptInjectionScanner {
    fn scan(&self, request: &ActionRequest) -> ScanResult {
        let mut findings = self.scan_text(&request.description, ScanField::Description);
        findings.extend(self.scan_text(&request.content, ScanField::Content));

        if !findings.is_empty() {
            debug!(
                path = %request.relative_path,
                findings = findings.len(),
                "Prompt injection patterns found"
            );
        }

        ScanResult { findings }
    }
}

fn starts_word(text: &str, start: usize) -> bool {
    text[..start]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric())
}
