//! CLI command handling
//!
//! Starts the worker, dispatches CLI commands to it and formats output.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::commands::{Commands, WorkerArgs};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::run::SessionRegistry;
use crate::runner::{RunOutcome, RunReport, Runner};
use crate::worker::{TestSuite, WorkerEvent, WorkerProcessManager};

/// Dispatch a CLI command
///
/// Returns `false` when the command ran but tests failed.
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            sources,
            browsers,
            debug,
            worker,
        } => {
            let mut config = load_config(&worker)?;
            if debug {
                config.debugger.enabled = true;
            }
            let registry = SessionRegistry::new();
            let mut manager = start_worker(config, registry.clone(), &worker).await?;

            if let Some(info) = manager.debug_info() {
                println!(
                    "{} {}:{}",
                    "Debugger attached to".cyan(),
                    info.host,
                    info.port
                );
            }

            let result = async {
                let suite = compile(&mut manager, &sources).await?;
                let report = Runner::new(registry).run(&suite, &browsers).await;
                manager.clean_up().await?;
                Ok::<_, Error>(report)
            }
            .await;

            shutdown(&mut manager).await;
            let report = result?;
            print_report(&report);
            Ok(report.is_success())
        }

        Commands::List { sources, worker } => {
            let config = load_config(&worker)?;
            let mut manager = start_worker(config, SessionRegistry::new(), &worker).await?;

            let result = compile(&mut manager, &sources).await;
            shutdown(&mut manager).await;

            print_suite(&result?);
            Ok(true)
        }
    }
}

fn load_config(args: &WorkerArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.worker.flags.extend(args.flags.iter().cloned());
    Ok(config)
}

async fn start_worker(
    config: Config,
    registry: SessionRegistry,
    args: &WorkerArgs,
) -> Result<WorkerProcessManager> {
    let mut manager = WorkerProcessManager::new(config, registry);
    if let Some(executable) = &args.executable {
        manager = manager.with_executable(executable);
    }

    if let Err(e) = manager.init().await {
        shutdown(&mut manager).await;
        return Err(e);
    }
    Ok(manager)
}

async fn compile(manager: &mut WorkerProcessManager, sources: &[String]) -> Result<TestSuite> {
    let sources: Vec<String> = sources
        .iter()
        .map(|source| {
            let path = PathBuf::from(source);
            path.canonicalize()
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned()
        })
        .collect();

    let suite = manager.get_tests(&sources).await?;
    drain_events(manager);
    Ok(suite)
}

fn drain_events(manager: &mut WorkerProcessManager) {
    let Some(mut events) = manager.take_event_receiver() else {
        return;
    };
    while let Ok(event) = events.try_recv() {
        match event {
            WorkerEvent::TestFileAdded(filename) => {
                println!("  {} {}", "+".green(), display_path(&filename).dimmed());
            }
        }
    }
}

async fn shutdown(manager: &mut WorkerProcessManager) {
    if let Err(e) = manager.stop().await {
        tracing::warn!(error = %e, "Failed to stop worker cleanly");
    }
}

fn print_suite(suite: &TestSuite) {
    if suite.is_empty() {
        println!("No tests found");
        return;
    }

    for fixture in &suite.fixtures {
        println!("{} {}", "Fixture:".blue().bold(), fixture.name.white().bold());
        if !fixture.path.is_empty() {
            println!("  {}", display_path(&fixture.path).dimmed());
        }
        for test in suite.tests.iter().filter(|t| t.fixture_id == fixture.id) {
            println!("  - {}", test.name);
        }
    }
}

fn print_report(report: &RunReport) {
    let mut fixture = None;
    for outcome in &report.outcomes {
        if fixture != Some(outcome.fixture_name.as_str()) {
            fixture = Some(outcome.fixture_name.as_str());
            println!("\n{} {}", "Fixture:".blue().bold(), outcome.fixture_name.white().bold());
        }
        print_outcome(outcome);
    }

    println!();
    if let Some(fatal) = &report.fatal {
        println!("{} {}", "✗".red().bold(), fatal.to_string().red());
    }
    if report.aborted && report.skipped > 0 {
        println!("  {} test runs not started", report.skipped);
    }

    let summary = format!("{} passed, {} failed", report.passed(), report.failed());
    if report.is_success() {
        println!("{} {}", "✓".green().bold(), summary.green().bold());
    } else {
        println!("{} {}", "✗".red().bold(), summary.red().bold());
    }
}

fn print_outcome(outcome: &RunOutcome) {
    let elapsed = format!("({} ms)", outcome.duration.as_millis());
    if outcome.passed() {
        println!(
            "  {} {} {} {}",
            "✓".green(),
            outcome.test_name,
            format!("[{}]", outcome.browser).dimmed(),
            elapsed.dimmed()
        );
    } else {
        println!(
            "  {} {} {}",
            "✗".red(),
            outcome.test_name.red(),
            format!("[{}]", outcome.browser).dimmed()
        );
        for error in &outcome.errors {
            println!("      {}", error);
        }
    }

    for callsite in &outcome.missing_awaits {
        println!(
            "    {} {} was not awaited at {}",
            "!".yellow(),
            callsite.method().yellow(),
            callsite
        );
    }
}

/// Show paths relative to the working directory when possible
fn display_path(path: &str) -> String {
    let Ok(cwd) = std::env::current_dir() else {
        return path.to_string();
    };
    Path::new(path)
        .strip_prefix(&cwd)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.to_string())
}
