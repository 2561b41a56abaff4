use crate::admin::{self, CheckArgs, ExportArgs, PendingArgs, PurgeArgs, RconArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use gatekeeper::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Gatekeeper",
    about = "Membership applications with moderator review and RCON whitelisting",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Show the stored status of an application
    Check(CheckArgs),
    /// Delete an application regardless of its status
    Purge(PurgeArgs),
    /// List applications awaiting a decision
    Pending(PendingArgs),
    /// Write every application to CSV
    Export(ExportArgs),
    /// Run a single console command against the game server
    Rcon(RconArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Check(args) => admin::check(args).await,
        Command::Purge(args) => admin::purge(args).await,
        Command::Pending(args) => admin::pending(args).await,
        Command::Export(args) => admin::export(args).await,
        Command::Rcon(args) => admin::rcon(args).await,
    }
}
