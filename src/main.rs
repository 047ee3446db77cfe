mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::down::DownArgs;
use cli::logs::LogsArgs;
use cli::up::UpArgs;
use cli::validate::ValidateArgs;
use dockyard::infra::config::{self, load_settings};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "dockyard",
    version,
    about = "Deploy and supervise multi-container applications"
)]
struct Cli {
    /// Configuration directory (default: ~/.config/dockyard)
    #[arg(long, env = "DOCKYARD_CONFIG_DIR", default_value_os_t = config::default_config_dir())]
    config_dir: std::path::PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a descriptor without deploying it
    Validate(ValidateArgs),
    /// Deploy an application and follow it until its main goal finishes
    Up(UpArgs),
    /// Remove the containers and descriptor of a deployed application
    Down(DownArgs),
    /// List deployed applications and their containers
    Status,
    /// Print the recent output of a goal's container
    Logs(LogsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli.config_dir)?;

    init_logging(if cli.verbose {
        "debug"
    } else {
        settings.log_level()
    });

    match cli.command {
        Commands::Validate(args) => cli::validate::run(args),
        Commands::Up(args) => cli::up::run(args, &cli.config_dir, &settings).await,
        Commands::Down(args) => cli::down::run(args, &cli.config_dir, &settings),
        Commands::Status => cli::status::run(&cli.config_dir, &settings),
        Commands::Logs(args) => cli::logs::run(args, &cli.config_dir, &settings),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dockyard={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
