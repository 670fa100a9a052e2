//! Applies approved changes to the working directory

use safe_agent_core::{Change, ChangeAction, PathSafetyResolver, Result};
use tracing::{info, warn};

/// Writes approved changes to disk
#[derive(Debug, Clone)]
pub struct ChangeExecutor {
    resolver: PathSafetyResolver,
}

impl ChangeExecutor {
    pub fn new(resolver: PathSafetyResolver) -> Self {
        Self { resolver }
    }

    /// Apply one change.
    ///
    /// The path is resolved again right before writing; a path that no longer
    /// resolves inside the working directory is skipped. I/O errors propagate.
    pub async fn apply(&self, change: &Change) -> Result<()> {
        let Some(resolved) = self.resolver.resolve(&change.path) else {
            warn!(path = %change.path, "Refusing to execute unsafe path");
            return Ok(());
        };
        let Some(action) = change.action_kind() else {
            warn!(path = %change.path, action = %change.action, "Refusing to execute unknown action");
            return Ok(());
        };

        match action {
            ChangeAction::Create | ChangeAction::Modify => {
                if let Some(parent) = resolved.absolute.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&resolved.absolute, change.content_str()).await?;
                info!(path = %resolved.relative, action = %action, "Change applied");
            }
            ChangeAction::Delete => {
                if tokio::fs::try_exists(&resolved.absolute).await? {
                    tokio::fs::remove_file(&resolved.absolute).await?;
                    info!(path = %resolved.relative, "File deleted");
                } else {
                    warn!(path = %resolved.relative, "File to delete not found");
                }
            }
        }
        Ok(())
    }
}
