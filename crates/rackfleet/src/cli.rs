//! Clap derive structures for the `rackfleet` CLI.
//!
//! Also compiled by `build.rs` for man pages, so it only depends on clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// rackfleet -- rack controller daemon and topology tools
#[derive(Debug, Parser)]
#[command(
    name = "rackfleet",
    version,
    about = "Run a rack controller and inspect DHCP topology",
    long_about = "Keeps a rack controller registered with its region and serving DHCP.\n\n\
        The offline commands reconcile interface reports into a topology\n\
        snapshot and show the DHCP configuration a rack would be sent.",
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
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, env = "RACKFLEET_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "RACKFLEET_OUTPUT",
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

#[derive(Debug, Clone, ValueEnum)]
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

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FamilyArg {
    /// DHCPv4 (dhcpd)
    V4,
    /// DHCPv6 (dhcpd6)
    V6,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the rack controller: connect to the region and serve DHCP
    Run(RunArgs),

    /// Merge an interface report into a topology snapshot
    #[command(alias = "rec")]
    Reconcile(ReconcileArgs),

    /// Show the DHCP configuration a rack would be sent
    #[command(alias = "dhcp")]
    DhcpConfig(DhcpConfigArgs),

    /// Manage the rack configuration and shared secret
    #[command(alias = "cfg")]
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// JSON interface report sent at registration; re-read on every
    /// registration
    #[arg(long, env = "RACKFLEET_INTERFACES")]
    pub interfaces: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

// ── Reconcile ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReconcileArgs {
    /// Topology snapshot (JSON)
    #[arg(long, short = 't')]
    pub topology: PathBuf,

    /// Node to reconcile, by system id or hostname
    #[arg(long, short = 'n')]
    pub node: String,

    /// Interface report (JSON object keyed by interface name)
    #[arg(long, short = 'r')]
    pub report: PathBuf,

    /// Beacon hints (JSON array)
    #[arg(long)]
    pub hints: Option<PathBuf>,

    /// Write the updated topology back to the snapshot file
    #[arg(long, short = 'w')]
    pub write: bool,
}

// ── DHCP config ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DhcpConfigArgs {
    /// Topology snapshot (JSON)
    #[arg(long, short = 't')]
    pub topology: PathBuf,

    /// Rack controller, by system id or hostname
    #[arg(long, short = 'r')]
    pub rack: String,

    /// Only show one address family
    #[arg(long, short = 'f')]
    pub family: Option<FamilyArg>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Interactive setup wizard
    Init,

    /// Print the configuration file path
    Path,

    /// Store the shared secret (hex) in the keyring or the secret file
    SetSecret {
        /// Write the secret file instead of the system keyring
        #[arg(long)]
        file: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
