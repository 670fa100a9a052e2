//! Report artifacts

use anyhow::{Context, Result};
use safe_agent_telemetry::ReportBuilder;
use serde::Serialize;
use std::path::Path;

use crate::cli::ReportArgs;

/// Write `contents` to `path` with a trailing newline, creating parent directories
pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut text = contents.to_string();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

/// Pretty-printed JSON artifact
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_text(path, &json)
}

/// Print and write every report the flags ask for
pub fn emit_reports(reports: &ReportBuilder<'_>, success: bool, args: &ReportArgs) -> Result<()> {
    if args.ci_summary || args.ci_summary_file.is_some() {
        let summary = reports.ci_summary();
        if args.ci_summary {
            println!("{}", summary);
        }
        if let Some(path) = &args.ci_summary_file {
            write_text(path, &summary)?;
            tracing::info!(path = %path.display(), "Wrote CI summary");
        }
    }

    if let Some(path) = &args.policy_report {
        write_json(path, &reports.policy_report())?;
        tracing::info!(path = %path.display(), "Wrote policy report");
    }

    if args.safety_scorecard || args.safety_scorecard_file.is_some() {
        let scorecard = reports.safety_scorecard();
        if args.safety_scorecard {
            println!("{}", scorecard);
        }
        if let Some(path) = &args.safety_scorecard_file {
            write_text(path, &scorecard)?;
            tracing::info!(path = %path.display(), "Wrote safety scorecard");
        }
    }

    if let Some(path) = &args.machine_report {
        write_json(path, &reports.machine_report(success))?;
        tracing::info!(path = %path.display(), "Wrote machine report");
    }

    Ok(())
}
