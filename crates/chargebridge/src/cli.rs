//! Clap derive structures for the `chargebridge` CLI.
//!
//! Defines the command tree, global flags, and shared argument types.
//! Also compiled by `build.rs` for man pages, so it only depends on clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// chargebridge -- keep a Smappee EV wallbox in sync and under control
#[derive(Debug, Parser)]
#[command(
    name = "chargebridge",
    version,
    about = "Control Smappee EV wallboxes from the command line",
    long_about = "Reconciles the state of a Smappee EV wallbox from the vendor cloud API\n\
        and its MQTT realtime feed, and issues charging commands against it.\n\n\
        Run `chargebridge run` as a daemon, or use the one-shot commands.",
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
    /// Station profile to use
    #[arg(long, short = 'p', env = "CHARGEBRIDGE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (overrides the platform default)
    #[arg(long, env = "CHARGEBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CHARGEBRIDGE_OUTPUT",
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

    /// Log line format
    #[arg(
        long,
        env = "CHARGEBRIDGE_LOG_FORMAT",
        default_value = "text",
        global = true
    )]
    pub log_format: LogFormat,

    /// HTTP request timeout in seconds (overrides profile)
    #[arg(long, env = "CHARGEBRIDGE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Give up on a one-shot command after this many seconds
    #[arg(
        long,
        env = "CHARGEBRIDGE_DEADLINE",
        default_value = "120",
        global = true
    )]
    pub deadline: u64,
}

// ── Output, Color & Log Enums ────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect and keep connector state reconciled until interrupted
    Run(RunArgs),

    /// Poll once and print every connector
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Set the charging mode
    Mode(ModeArgs),

    /// Pause the running session
    Pause(ConnectorArg),

    /// Stop the running session
    Stop(ConnectorArg),

    /// Start (or resume) charging
    Start(StartArgs),

    /// Make the connector available for charging
    Available(ConnectorArg),

    /// Take the connector out of service
    Unavailable(ConnectorArg),

    /// Set the station LED brightness
    Brightness(PercentArgs),

    /// Set the minimum solar surplus percentage
    MinSurplus(PercentArgs),

    /// Set the charging current limit in amps
    CurrentLimit(AmpsArgs),

    /// Set the charging limit as a percentage of the device range
    PercentageLimit(PercentArgs),

    /// Manage configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Shared argument groups ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Args)]
pub struct ConnectorArg {
    /// Connector number on the station (1-based)
    #[arg(long, short = 'n', default_value_t = 1)]
    pub connector: u32,
}

#[derive(Debug, Args)]
pub struct PercentArgs {
    /// Value in percent (0-100)
    pub value: u32,

    #[command(flatten)]
    pub target: ConnectorArg,
}

#[derive(Debug, Args)]
pub struct AmpsArgs {
    /// Current in amps, within the device bounds
    pub amps: u32,

    #[command(flatten)]
    pub target: ConnectorArg,
}

// ── run / status ─────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Poll interval in seconds (overrides profile, floor 10)
    #[arg(long, env = "CHARGEBRIDGE_POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Poll only; do not subscribe to the realtime feed
    #[arg(long)]
    pub no_realtime: bool,

    /// Warn when a connector has not been confirmed for this many seconds
    #[arg(long, default_value_t = 300)]
    pub stale_after: u64,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "CHARGEBRIDGE_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Warn about connectors not confirmed for this many seconds
    #[arg(long, default_value_t = 300)]
    pub stale_after: u64,
}

// ── Charging commands ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ModeArgs {
    /// Charging mode
    #[arg(ignore_case = true)]
    pub mode: ModeArg,

    /// Amps in NORMAL, percent in NORMAL_PERCENTAGE
    #[arg(long)]
    pub limit: Option<u32>,

    #[command(flatten)]
    pub target: ConnectorArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Fixed current
    #[value(name = "NORMAL")]
    Normal,
    /// Schedules first, then surplus
    #[value(name = "SMART")]
    Smart,
    /// Solar surplus only
    #[value(name = "SOLAR")]
    Solar,
    /// Fixed percentage of the device range (legacy firmware)
    #[value(name = "NORMAL_PERCENTAGE", alias = "normal-percentage")]
    NormalPercentage,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Current in amps; defaults to the current limit, else the device max
    #[arg(long)]
    pub limit: Option<u32>,

    #[command(flatten)]
    pub target: ConnectorArg,
}

// ── config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Print the loaded configuration, secrets redacted
    Show,

    /// Store the account password (or client secret) in the OS keyring
    SetPassword {
        /// Store the OAuth client secret instead of the password
        #[arg(long)]
        client_secret: bool,
    },
}

// ── completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
