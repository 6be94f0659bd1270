//! Main entry point for the operator-kernel CLI.

use anyhow::Result;
use clap::Parser;
use operator_kernel::{cli, server, settings::Settings, telemetry};
use serde_json::Map;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    telemetry::init(&settings.logging)?;

    match args.command {
        cli::Commands::Serve { addr } => {
            if let Some(addr) = addr {
                settings.server.host = addr.ip().to_string();
                settings.server.port = addr.port();
                settings.validate()?;
            }
            server::serve(&settings).await
        }
        cli::Commands::Status => {
            let kernel = server::bootstrap_kernel(&settings)?;
            println!("{}", serde_json::to_string_pretty(&kernel.status())?);
            Ok(())
        }
        cli::Commands::Run { prompt, agent } => {
            let kernel = server::bootstrap_kernel(&settings)?;
            let outcome = kernel.run(&agent, &prompt, Map::new()).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
    }
}
