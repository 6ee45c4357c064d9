//! relstat CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;
mod output;

use commands::{Commands, ConfigCommands};
use config::{CliConfig, LogFormat};

#[derive(Parser)]
#[command(name = "relstat")]
#[command(version, about = "Runs the release-SDK status pipeline", long_about = None)]
struct Cli {
    /// Log format (defaults to the configured one)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(format: LogFormat, verbose: u8) {
    let default = match verbose {
        0 => "relstat=info",
        1 => "relstat=debug",
        _ => "relstat=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load().unwrap_or_default();
    init_tracing(cli.log_format.unwrap_or(config.log_format), cli.verbose);

    match cli.command {
        Commands::Run(args) => handlers::run(&config, args).await?,
        Commands::Plan(args) => handlers::plan(&config, args).await?,
        Commands::Validate { path } => handlers::validate(&config, path.as_deref())?,
        Commands::Trigger { branch, pipeline } => {
            handlers::trigger(&config, &branch, pipeline.as_deref())?
        }
        Commands::Init { path, force } => handlers::init(&path, force)?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(())
}
