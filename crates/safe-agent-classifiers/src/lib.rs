//! Safe Agent Classifiers
//!
//! Governance collaborators consulted for every proposed change:
//! - [`Analyzer`]: assigns a risk level and a line-level preview
//! - [`Scanner`]: flags prompt-injection text in descriptions and content
//!
//! Both are traits so the decision engine can be driven by fixed or scripted
//! implementations in tests.

pub mod analyzer;
pub mod scanner;

pub use analyzer::{line_summary, Analyzer, ImpactAnalyzer};
pub use scanner::{
    InjectionCategory, PromptInjectionScanner, ScanField, ScanFinding, ScanResult, Scanner,
    Severity,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::analyzer::{Analyzer, ImpactAnalyzer};
    pub use crate::scanner::{PromptInjectionScanner, ScanResult, Scanner, Severity};
}
