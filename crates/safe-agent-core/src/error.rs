//! Error types for Safe Agent

/// Result type alias using Safe Agent's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Safe Agent operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Policy loading or evaluation errors
    #[error("policy error: {0}")]
    Policy(String),

    /// Configuration errors (bad flag combinations, unknown presets)
    #[error("configuration error: {0}")]
    Config(String),

    /// A configured path escapes the working directory
    #[error("unsafe path: {0}")]
    UnsafePath(String),

    /// A git ref that could be used for argument injection
    #[error("invalid diff ref: {0}")]
    InvalidDiffRef(String),

    /// A git invocation exited non-zero
    #[error("git command failed ({command}): {detail}")]
    Git { command: String, detail: String },

    /// Planner (LLM) errors
    #[error("planner error: {0}")]
    Planner(String),

    /// Approval prompt errors
    #[error("approval error: {0}")]
    Approval(String),

    /// The operator cancelled the run (Ctrl-C at a prompt)
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new policy error
    pub fn policy(msg: impl Into<String>) -> Self {
        Self::Policy(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new unsafe path error
    pub fn unsafe_path(msg: impl Into<String>) -> Self {
        Self::UnsafePath(msg.into())
    }

    /// Create a new invalid diff ref error
    pub fn invalid_diff_ref(msg: impl Into<String>) -> Self {
        Self::InvalidDiffRef(msg.into())
    }

    /// Create a new git error
    pub fn git(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Git {
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// Create a new planner error
    pub fn planner(msg: impl Into<String>) -> Self {
        Self::Planner(msg.into())
    }

    /// Create a new approval error
    pub fn approval(msg: impl Into<String>) -> Self {
        Self::Approval(msg.into())
    }

    /// Create a new interrupted error
    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::Interrupted(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error should be reported before any change is processed.
    ///
    /// Configuration errors map to exit code 1 and never produce an audit artifact.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnsafePath(_) | Self::InvalidDiffRef(_) | Self::Policy(_)
        )
    }

    /// Whether the operator cancelled the run; the run must stop, not continue
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}
