//! Safe Agent Core
//!
//! Core types, traits, and utilities shared across Safe Agent components.
//!
//! This crate provides:
//! - Risk levels and the proposed-change model
//! - Error types and result handling
//! - Working-directory path safety

pub mod error;
pub mod path;
pub mod types;

pub use error::{Error, Result};
pub use path::{PathSafetyResolver, ResolvedPath};
pub use types::{ActionRequest, Change, ChangeAction, FileChange, MaxRisk, Preview, RiskLevel};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::path::{PathSafetyResolver, ResolvedPath};
    pub use crate::types::{ActionRequest, Change, ChangeAction, MaxRisk, Preview, RiskLevel};
}
