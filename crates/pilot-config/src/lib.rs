//! # pilot-config
//!
//! Configuration for the Phonepilot bots and CLI, loaded from `pilot.toml`.
//!
//! Resolution order for the config path: explicit `--config` flag,
//! `PILOT_CONFIG` env var, then `~/.phonepilot/pilot.toml`. Missing file
//! falls back to defaults; individual secrets can be supplied through
//! environment variables (`TELEGRAM_BOT_TOKEN`, `LARK_APP_ID`,
//! `LARK_APP_SECRET`, `PILOT_API_KEY`).

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{AgentConfig, LarkConfig, LoggingConfig, ModelConfig, PilotConfig, TelegramConfig};
