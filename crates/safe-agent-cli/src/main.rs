//! Safe Agent CLI
//!
//! Exit codes: 0 success, 1 configuration or runtime error (including an
//! interrupted run), 2 the run completed but failed its gates, 3 an
//! adversarial suite had failing cases.

mod cli;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use safe_agent_core::Error;
use safe_agent_gate::{
    AdversarialSuite, AnthropicPlanner, Collaborators, DiffGateRunner, GateConfig, PlannedChanges,
    Planner, SafeAgent, TerminalApprover,
};
use safe_agent_telemetry::MachineReport;
use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{AdversarialArgs, Cli, Command, DiffGateArgs, GateArgs, RunArgs};

const EXIT_ERROR: u8 = 1;
const EXIT_GATE_FAILED: u8 = 2;
const EXIT_ADVERSARIAL_FAILED: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose);
    safe_agent_telemetry::metrics::describe();

    let result = match cli.command {
        Command::Run(args) => run_task(&cli.working_directory, args).await,
        Command::DiffGate(args) => run_diff_gate(&cli.working_directory, args).await,
        Command::Adversarial(args) => run_adversarial(args).await,
        Command::Presets => {
            list_presets();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("safe_agent=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("safe_agent=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn list_presets() {
    println!("Available policy presets:");
    for preset in safe_agent_policy::list_presets() {
        println!("- {}: {} ({})", preset.id, preset.name, preset.description);
    }
}

/// Report a configuration error and pick the exit code
fn configuration_failure(err: &Error, gate: &GateArgs) -> ExitCode {
    eprintln!("Configuration error: {}", err);
    if gate.policy_preset.is_some() {
        eprintln!("Use `safe-agent presets` to list valid preset IDs.");
    }
    ExitCode::from(EXIT_ERROR)
}

/// CI runners and pipes never get a prompt
fn detect_non_interactive(flag: bool) -> bool {
    flag || std::env::var_os("CI").is_some_and(|v| !v.is_empty())
        || !std::io::stdin().is_terminal()
        || !std::io::stdout().is_terminal()
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_GATE_FAILED)
    }
}

fn read_task(args: &RunArgs) -> Result<Option<String>> {
    let task = match (&args.task, &args.file) {
        (Some(task), _) => task.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read task file {}", path.display()))?,
        (None, None) => return Ok(None),
    };
    let task = task.trim().to_string();
    Ok((!task.is_empty()).then_some(task))
}

async fn run_task(working_directory: &Path, args: RunArgs) -> Result<ExitCode> {
    let Some(task) = read_task(&args)? else {
        eprintln!("Error: no task provided (pass TASK or --file)");
        return Ok(ExitCode::from(EXIT_ERROR));
    };

    let mut config = match GateConfig::load(working_directory) {
        Ok(config) => config,
        Err(e) => return Ok(configuration_failure(&e, &args.gate)),
    };
    args.apply(&mut config);
    config.non_interactive = detect_non_interactive(config.non_interactive);
    let config = config.normalized();

    let planner: Arc<dyn Planner> = match &args.plan {
        Some(path) => match PlannedChanges::from_file(path) {
            Ok(plan) => Arc::new(plan),
            Err(e) => return Ok(configuration_failure(&e, &args.gate)),
        },
        None => match AnthropicPlanner::from_env(config.model.clone()) {
            Ok(planner) => Arc::new(planner),
            Err(e) => {
                eprintln!("Error: {}", e);
                return Ok(ExitCode::from(EXIT_ERROR));
            }
        },
    };

    let mut collaborators = Collaborators::standard()?;
    if !config.non_interactive {
        collaborators = collaborators.with_approver(Arc::new(TerminalApprover::new()));
    }

    let mut agent = match SafeAgent::new(config, planner, collaborators) {
        Ok(agent) => agent,
        Err(e) if e.is_configuration() => return Ok(configuration_failure(&e, &args.gate)),
        Err(e) => return Err(e.into()),
    };
    info!(
        policy = agent.policy_source(),
        non_interactive = agent.config().non_interactive,
        dry_run = agent.config().dry_run,
        "Starting task run"
    );

    let outcome = tokio::select! {
        result = agent.run(&task) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let result = match outcome {
        Some(Ok(result)) => result,
        Some(Err(e)) if e.is_interrupted() => {
            warn!("Interrupted at approval prompt, exporting partial audit trail");
            export_partial(&mut agent);
            return Ok(ExitCode::from(EXIT_ERROR));
        }
        Some(Err(e)) => {
            error!(error = %e, "Run failed");
            export_partial(&mut agent);
            return Err(e.into());
        }
        None => {
            warn!("Interrupted, exporting partial audit trail");
            export_partial(&mut agent);
            return Ok(ExitCode::from(EXIT_ERROR));
        }
    };

    eprintln!(
        "Applied {} change(s), rejected {}{}",
        result.changes_made.len(),
        result.changes_rejected.len(),
        if agent.config().dry_run { " (dry run)" } else { "" }
    );
    output::emit_reports(&agent.reports(), result.success, &args.reports)?;

    Ok(exit_for(result.success))
}

fn export_partial(agent: &mut SafeAgent) {
    agent.finalize_audit_trail();
    match agent.export_audit_trail(None) {
        Ok(true) => info!("Partial audit trail exported"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "Failed to export partial audit trail"),
    }
}

async fn run_diff_gate(working_directory: &Path, args: DiffGateArgs) -> Result<ExitCode> {
    let mut config = match GateConfig::load_for_diff_gate(working_directory, args.config.as_deref())
    {
        Ok(config) => config,
        Err(e) => return Ok(configuration_failure(&e, &args.gate)),
    };
    args.apply(&mut config);
    let config = config.normalized();

    let runner = match DiffGateRunner::new(&config) {
        Ok(runner) => runner,
        Err(e) if e.is_configuration() => return Ok(configuration_failure(&e, &args.gate)),
        Err(e) => return Err(e.into()),
    };
    info!(
        policy = %runner.policy_source(),
        base_ref = config.diff_ref.as_deref().unwrap_or("working tree"),
        "Starting diff gate"
    );

    let report = match runner.run().await {
        Ok(report) => report,
        Err(e) if e.is_configuration() => return Ok(configuration_failure(&e, &args.gate)),
        Err(e) => {
            error!(error = %e, "Diff gate failed");
            if let Some(path) = &args.reports.machine_report {
                output::write_json(path, &MachineReport::error(e.to_string()))?;
            }
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(EXIT_ERROR));
        }
    };

    let success = report.result.success;
    output::emit_reports(&report.reports(), success, &args.reports)?;
    if !args.reports.ci_summary {
        eprintln!(
            "Diff gate {}: {} change(s) passed, {} blocked",
            if success { "passed" } else { "failed" },
            report.result.changes_made.len(),
            report.result.changes_rejected.len()
        );
    }

    Ok(exit_for(success))
}

async fn run_adversarial(args: AdversarialArgs) -> Result<ExitCode> {
    let suite = match AdversarialSuite::from_file(&args.suite) {
        Ok(suite) => suite,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(EXIT_ERROR));
        }
    };
    let report = suite.run(None).await?;
    let markdown = report.to_markdown();

    println!("{}", markdown);
    if let Some(path) = &args.json_out {
        output::write_json(path, &report)?;
    }
    if let Some(path) = &args.markdown_out {
        output::write_text(path, &markdown)?;
    }

    if report.all_passed {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(failed = report.failed_cases, "Adversarial suite has failing cases");
        Ok(ExitCode::from(EXIT_ADVERSARIAL_FAILED))
    }
}
