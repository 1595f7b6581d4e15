//! CLI command definitions
//!
//! Defines the clap commands for the conductor CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Compile test files in a worker and run them
    Run {
        /// Test files to compile
        #[arg(required = true)]
        sources: Vec<String>,

        /// Browser to run every test in. Can be specified multiple times:
        /// --browser chrome --browser firefox
        #[arg(long = "browser", short = 'b', default_value = "chrome")]
        browsers: Vec<String>,

        /// Attach the step debugger to the worker
        #[arg(long)]
        debug: bool,

        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Compile test files and list the tests they declare
    #[command(alias = "ls")]
    List {
        /// Test files to compile
        #[arg(required = true)]
        sources: Vec<String>,

        #[command(flatten)]
        worker: WorkerArgs,
    },
}

/// Options that control how the worker process is started
#[derive(Args, Debug, Default)]
pub struct WorkerArgs {
    /// Worker executable (overrides [worker] path in the config)
    #[arg(long = "worker")]
    pub executable: Option<PathBuf>,

    /// Extra flag for the worker runtime, e.g. --flag=--inspect-brk=127.0.0.1:9229
    #[arg(long = "flag", allow_hyphen_values = true)]
    pub flags: Vec<String>,

    /// Config file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,
}
