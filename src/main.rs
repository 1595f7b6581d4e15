//! Conductor - orchestrator for browser end-to-end tests
//!
//! Compiles test files in a separate worker process and drives each test's
//! browser actions through a serialized per-run command chain.

use clap::Parser;
use conductor::common::logging;
use conductor::{cli, commands};
use commands::Commands;

#[derive(Parser)]
#[command(name = "conductor", about = "Browser end-to-end test orchestrator")]
#[command(version, long_about = None)]
struct Cli {
    /// Log orchestration details to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    match cli::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}
