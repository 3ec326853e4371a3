//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Grouped parallel test-suite orchestrator
#[derive(Parser, Debug)]
#[command(name = "suite-orchestrator")]
#[command(version = "0.1.0")]
#[command(about = "Discover, schedule and report test units; reconcile coverage")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run test units group by group
    Run(RunArgs),

    /// List discovered units by group
    List(ListArgs),

    /// Reconcile direct-linked and full-binary coverage
    Coverage(CoverageArgs),

    /// Wait for a log pattern, process exit, or file (for test units)
    Wait(WaitArgs),

    /// Report one subtest result from inside a unit
    Subtest(SubtestArgs),

    /// Write the current unit's result record
    Record(RecordArgs),

    /// Drive an application instance
    App(AppArgs),

    /// Configuration management
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Run only these units (file name, stem, or identifier); always sequential
    pub units: Vec<String>,

    /// Discover and report without executing anything
    #[arg(long)]
    pub skip_tests: bool,

    /// Disable all parallelism
    #[arg(long)]
    pub sequential: bool,

    /// Groups to run sequentially (comma-separated group ids)
    #[arg(long, value_delimiter = ',')]
    pub sequential_groups: Vec<u32>,

    /// Unit directory
    #[arg(long)]
    pub unit_dir: Option<PathBuf>,

    /// Results directory
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Report document to update in place
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Maximum concurrent background units
    #[arg(short = 'j', long)]
    pub max_parallel: Option<usize>,

    /// Per-unit timeout in seconds (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Reconcile coverage after the run
    #[arg(long)]
    pub coverage: bool,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Unit directory
    #[arg(long)]
    pub unit_dir: Option<PathBuf>,
}

/// Arguments for coverage command
#[derive(Parser, Debug)]
pub struct CoverageArgs {
    /// Direct-linked coverage artifact directory
    #[arg(long)]
    pub direct: Option<PathBuf>,

    /// Full-binary coverage artifact directory
    #[arg(long)]
    pub full: Option<PathBuf>,

    /// Do not append to the coverage history files
    #[arg(long)]
    pub no_history: bool,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for wait command
#[derive(Parser, Debug)]
pub struct WaitArgs {
    /// Log file to watch
    #[arg(long, requires = "pattern", conflicts_with_all = ["gone", "path"])]
    pub log: Option<PathBuf>,

    /// Pattern the log must contain
    #[arg(short, long, requires = "log")]
    pub pattern: Option<String>,

    /// Minimum number of matching lines
    #[arg(long, default_value = "1")]
    pub count: usize,

    /// Treat the pattern as a regular expression
    #[arg(long)]
    pub regex: bool,

    /// Stop early if this process exits before the pattern appears
    #[arg(long)]
    pub pid: Option<u32>,

    /// Wait until this process no longer exists
    #[arg(long, conflicts_with = "path")]
    pub gone: Option<u32>,

    /// Wait until this path exists
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Timeout in seconds
    #[arg(short, long, default_value = "15")]
    pub timeout: f64,

    /// Poll interval in seconds
    #[arg(long, default_value = "0.1")]
    pub interval: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Verdict {
    Pass,
    Fail,
}

/// Arguments for subtest command
#[derive(Parser, Debug)]
pub struct SubtestArgs {
    pub verdict: Verdict,

    /// Subtest name
    pub name: String,
}

/// Arguments for record command
#[derive(Parser, Debug)]
pub struct RecordArgs {
    /// Subtest count (default: from the tally)
    #[arg(long, requires = "passed")]
    pub total: Option<u32>,

    /// Passed subtests (default: from the tally)
    #[arg(long, requires = "total")]
    pub passed: Option<u32>,

    /// Elapsed seconds
    #[arg(long, default_value = "0")]
    pub elapsed: f64,

    /// Display name (default: from the environment)
    #[arg(long)]
    pub name: Option<String>,

    /// Result file (default: from the environment)
    #[arg(long)]
    pub result_file: Option<PathBuf>,
}

/// Arguments for app command
#[derive(Parser, Debug)]
pub struct AppArgs {
    #[command(subcommand)]
    pub action: AppAction,
}

#[derive(Subcommand, Debug)]
pub enum AppAction {
    /// Start, wait for readiness, shut down gracefully
    Smoke,

    /// Start, then trigger a deliberate fault and wait for the core file
    Crash,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "suite-orchestrator.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,

    /// List supported environment variables
    Env,
}
