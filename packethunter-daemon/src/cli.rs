//! CLI argument definitions for packethunter-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use packethunter_core::config::PacketHunterConfig;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/packethunter/packethunter.toml";

/// PacketHunter capture daemon.
///
/// Attaches to a TUN interface, forwards every frame back onto it and
/// analyzes copies of the forwarded traffic off the forwarding path.
#[derive(Parser, Debug)]
#[command(name = "packethunter-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to packethunter.toml configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the TUN interface name.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Apply CLI overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut PacketHunterConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(interface) = &self.interface {
            config.capture.interface_name.clone_from(interface);
        }
    }
}

/// Load configuration for the daemon.
///
/// Order: defaults, then the file, then `PACKETHUNTER_*` environment
/// variables, then CLI flags. A missing file is only tolerated when the
/// default path was not overridden.
pub async fn load_config(cli: &DaemonCli) -> Result<PacketHunterConfig> {
    let mut config = if cli.config.exists() || cli.config != Path::new(DEFAULT_CONFIG_PATH) {
        PacketHunterConfig::from_file(&cli.config)
            .await
            .with_context(|| format!("failed to load config from {}", cli.config.display()))?
    } else {
        PacketHunterConfig::default()
    };

    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config.validate().context("config validation failed")?;
    Ok(config)
}
