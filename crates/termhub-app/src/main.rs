use anyhow::{Context, Result};
use clap::Parser;

use termhub::{attach, logging, server};
use termhub::{ClientSettings, Cli, Commands, FileConfig, ServerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let work_dir = std::env::current_dir().context("Failed to read current directory")?;
    let file = FileConfig::discover(cli.config.as_deref(), &work_dir)?;

    match cli.command {
        Commands::Attach(args) => {
            let settings = ClientSettings::resolve(file.client, &args);
            log::debug!("Attaching to {} endpoint {}", settings.host, settings.endpoint);
            attach::run(settings).await
        }
        Commands::Serve(args) => {
            let settings = ServerSettings::resolve(file.server, &args)?;
            log::debug!("Serving {} on {}", settings.shell, settings.bind);
            server::serve(settings).await
        }
    }
}
