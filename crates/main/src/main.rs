mod admin;
mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use utils::Config;

#[derive(Parser)]
#[command(name = "listmgr-server", about = "LMTP mailing-list engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/listmgr/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the LMTP and socketmap listeners until interrupted. Default
    /// when no subcommand is given.
    Serve,
    /// Manages mailing lists.
    List {
        #[command(subcommand)]
        action: admin::ListAction,
    },
    /// Manages list membership.
    Member {
        #[command(subcommand)]
        action: admin::MemberAction,
    },
}

fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(daemon::serve(config))
        }
        Command::List { action } => admin::run_list_command(&config, action, &mta::Sendmail::default()),
        Command::Member { action } => admin::run_member_command(&config, action),
    }
}

fn load_config(path: &PathBuf) -> Config {
    match Config::from_file(path) {
        Ok(config) => config,
        Err(_) => Config::parse("").expect("an empty document is always valid TOML"),
    }
}
