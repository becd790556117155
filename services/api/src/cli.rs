use crate::demo::{run_calculate, run_demo, CalculateArgs, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use rent_payouts::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Rental Payouts",
    about = "Run or demonstrate the rental marketplace payout engine",
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
    /// Preview pending payouts for the seeded demo recipients
    Calculate(CalculateArgs),
    /// Calculate and pay a sandboxed set of owners end to end
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// JSON file with the service configurations (providers, platform account, payout settings)
    #[arg(long)]
    pub(crate) services: Option<PathBuf>,
    /// Call the real provider APIs instead of the in-process sandboxes
    #[arg(long)]
    pub(crate) live: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Calculate(args) => run_calculate(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}
