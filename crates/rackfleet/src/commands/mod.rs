//! Command handlers.

pub mod config_cmd;
pub mod dhcp_config;
pub mod reconcile;
pub mod run;
pub mod util;

use clap::CommandFactory;

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;

/// Route a parsed command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(args, global).await,
        Command::Reconcile(args) => reconcile::handle(&args, global),
        Command::DhcpConfig(args) => dhcp_config::handle(&args, global),
        Command::Config(args) => config_cmd::handle(args, global),
        Command::Completions(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "rackfleet", &mut std::io::stdout());
            Ok(())
        }
    }
}
