use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cmdvault::config::default_config_dir;
use cmdvault::utils;

mod cmd;

use cmd::{AddArgs, CategoryArgs, ExecArgs, GetArgs, GroupArgs, ListArgs, ParamArgs, RemoveArgs};

/// cmdvault - named, templated commands grouped by category and group.
///
/// Command layout:
///   cmdvault list [categories|groups|commands] [-c CATEGORY] [--json]
///   cmdvault get  <category> <group> <name> [--render] [--param k=v ...] [--json]
///   cmdvault exec <category> <group> <name> [--param k=v ...] [--param-file F] [--sink console|file|quiet] [--json]
///   cmdvault add  <category> <group> --file record.json
///   cmdvault remove <category> <group> <name>
///   cmdvault group add|remove <category> <group>
///   cmdvault category add|remove <category>
///   cmdvault param set|unset|list <category> <group> ...
///
/// Global flags / env:
///   -v / -vv          Increase verbosity
///   -q / --quiet      Errors only
///   --config-dir DIR  Storage directory (else CMDVAULT_HOME, else the platform data dir)
///   RUST_LOG          Overrides the log filter
///
/// Examples:
///   cmdvault add dev db --file tunnel.yaml
///   cmdvault param set dev db host db.internal
///   cmdvault exec dev db tunnel            (Ctrl-C closes the tunnel)
///   cmdvault exec dev api login --param user=alice --json
#[derive(Parser, Debug)]
#[command(
    name = "cmdvault",
    version,
    author,
    about = "cmdvault - named, templated and toggleable command runner",
    propagate_version = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Directory holding commands.json, parameters.json and logs/
    #[arg(long = "config-dir", global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List categories, groups or commands
    List(ListArgs),

    /// Show one stored command and its placeholders
    Get(GetArgs),

    /// Execute a stored command
    Exec(ExecArgs),

    /// Add or replace command records from a file
    Add(AddArgs),

    /// Remove a command
    Remove(RemoveArgs),

    /// Manage groups
    Group(GroupArgs),

    /// Manage categories
    Category(CategoryArgs),

    /// Manage group parameters
    Param(ParamArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = utils::derive_level(cli.verbose, cli.quiet);
    utils::init_logging(level);

    let config_dir = cli.config_dir.unwrap_or_else(default_config_dir);
    tracing::debug!(dir = %config_dir.display(), "config directory");

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(run(cli.command, config_dir))
}

async fn run(command: Commands, config_dir: PathBuf) -> Result<()> {
    let open = || cmd::shared::open_registry(&config_dir, None);
    match command {
        // exec picks its own sink, so it builds its own registry
        Commands::Exec(args) => cmd::execute_exec(args, &config_dir).await,
        Commands::List(args) => cmd::execute_list(args, &open()?),
        Commands::Get(args) => cmd::execute_get(args, &open()?),
        Commands::Add(args) => cmd::execute_add(args, &open()?),
        Commands::Remove(args) => cmd::execute_remove(args, &open()?),
        Commands::Group(args) => cmd::execute_group(args, &open()?),
        Commands::Category(args) => cmd::execute_category(args, &open()?),
        Commands::Param(args) => cmd::execute_param(args, &open()?),
    }
}
