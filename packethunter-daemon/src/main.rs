use anyhow::Result;
use clap::Parser;

use packethunter_daemon::cli::{self, DaemonCli};
use packethunter_daemon::logging;
use packethunter_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    let config = cli::load_config(&cli).await?;

    if cli.validate {
        println!("configuration is valid: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        interface = %config.capture.interface_name,
        "packethunter-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await
}
