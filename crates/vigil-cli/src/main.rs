//! Vigil entrypoint.

use clap::Parser;
use vigil_cli::commands::{Commands, ConfigCommands};
use vigil_cli::config::{CliConfig, LogFormat, ServerConfig};
use vigil_cli::{handlers, server, telemetry};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(author, version, about = "Vigil cache lifecycle orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let config = ServerConfig::load(&config)?;
            telemetry::init(config.log_format);
            server::serve(config).await?;
        }
        Commands::Caches { command } => {
            telemetry::init(LogFormat::Text);
            let config = CliConfig::load().unwrap_or_default();
            handlers::cache_command(&config, command).await?;
        }
        Commands::Config { command } => {
            let config = CliConfig::load().unwrap_or_default();
            match command {
                ConfigCommands::Show => handlers::show_config(&config)?,
                ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
            }
        }
    }

    Ok(())
}
