//! Clap derive structures for the `resilink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use resilink_core::Platform;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// resilink -- health checks and support tooling for a resilink backend
#[derive(Debug, Parser)]
#[command(
    name = "resilink",
    version,
    about = "Check, diagnose and probe a resilink backend from the command line",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, env = "RESILINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Backend project URL (overrides settings)
    #[arg(long, short = 'u', global = true)]
    pub backend_url: Option<String>,

    /// Public anon key (overrides settings)
    #[arg(long, global = true)]
    pub anon_key: Option<String>,

    /// Platform whose retry policy and diagnostics path to use
    #[arg(long, global = true)]
    pub platform: Option<Platform>,

    /// Start in fallback mode
    #[arg(long, global = true)]
    pub fallback: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "RESILINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Probe the backend once and report reachability
    Ping,

    /// Aggregate environment, retry settings, connectivity and session
    #[command(alias = "diag")]
    Diagnose,

    /// Perform one resilient request against any URL
    Fetch(FetchArgs),

    /// Inspect and simulate client-side rate limits
    Limits(LimitsArgs),

    /// Manage the settings file
    Config(ConfigArgs),
}

// ── Fetch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Target URL
    pub url: String,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "get")]
    pub method: HttpMethod,

    /// JSON request body
    #[arg(long, short = 'd')]
    pub data: Option<String>,

    /// Single attempt, no retries
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

// ── Limits ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LimitsArgs {
    #[command(subcommand)]
    pub command: Option<LimitsCommand>,
}

#[derive(Debug, Subcommand)]
pub enum LimitsCommand {
    /// List every throttled action and its window (default)
    #[command(alias = "ls")]
    List,

    /// Run repeated checks against a fresh limiter
    Simulate {
        /// Action name, e.g. `login` or `messagePost`
        action: String,

        /// Identifier the checks are counted against
        #[arg(long, default_value = "anonymous")]
        id: String,

        /// Number of checks
        #[arg(long, short = 'n', default_value_t = 1)]
        count: usize,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the settings file path
    Path,

    /// Show resolved settings (secrets redacted)
    Show,

    /// Write a settings file from --backend-url, --anon-key and --platform
    Init {
        /// Environment variable holding the anon key (instead of plaintext)
        #[arg(long)]
        anon_key_env: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
