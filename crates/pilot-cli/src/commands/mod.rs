use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pilot_config::ConfigLoader;

mod lark;
mod run;
mod telegram;

/// Phonepilot — drive an Android phone agent from Telegram, Lark, or the terminal
#[derive(Parser)]
#[command(name = "pilot", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to pilot.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Telegram bot
    Telegram,
    /// Start the Lark bot (webhook server)
    Lark,
    /// Run one task from the terminal
    Run {
        /// Task description, e.g. "Open WeChat and send a message"
        task: String,
    },
    /// Show connected devices
    Status,
    /// Write a default pilot.toml
    Init,
}

impl Cli {
    pub async fn run(self) -> pilot_core::Result<()> {
        let loader = ConfigLoader::load(self.config.as_deref())?;
        let config = loader.get();

        let log_level = self
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone());

        if config.logging.format == "json" {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
                )
                .json()
                .with_target(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
                )
                .with_target(false)
                .init();
        }

        match self.command {
            Commands::Telegram => telegram::cmd_telegram(config).await,
            Commands::Lark => lark::cmd_lark(config).await,
            Commands::Run { task } => run::cmd_run(config, task).await,
            Commands::Status => Self::cmd_status(config).await,
            Commands::Init => Self::cmd_init(&loader),
        }
    }

    async fn cmd_status(config: pilot_config::PilotConfig) -> pilot_core::Result<()> {
        if !pilot_device::adb_available().await {
            println!("ADB is not available — install android-platform-tools first.");
            return Ok(());
        }

        let adb = pilot_device::AdbBridge::new(config.agent.device_id.clone());
        let devices = adb.list_devices().await?;
        if devices.is_empty() {
            println!("No devices connected");
            return Ok(());
        }

        println!("Connected devices:");
        for device in devices {
            match device.model {
                Some(model) => println!("  {} ({}) — {}", device.serial, device.state, model),
                None => println!("  {} ({})", device.serial, device.state),
            }
        }
        Ok(())
    }

    fn cmd_init(loader: &ConfigLoader) -> pilot_core::Result<()> {
        let path = loader.path();
        if path.exists() {
            println!("Config already exists: {}", path.display());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, ConfigLoader::default_toml())?;
        println!("Wrote default config to {}", path.display());
        Ok(())
    }
}
