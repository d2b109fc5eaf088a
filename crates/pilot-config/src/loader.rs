use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::PilotConfig;

/// Loads the Phonepilot configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<PilotConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > PILOT_CONFIG env > ~/.phonepilot/pilot.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("PILOT_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".phonepilot")
            .join("pilot.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> pilot_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<PilotConfig>(&raw).map_err(|e| {
                pilot_core::PilotError::Config(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            PilotConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(pilot_core::PilotError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> PilotConfig {
        self.config.read().clone()
    }

    /// Path the config was loaded from (or would be written to).
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides. Secrets fall back to the environment when the
    /// config file leaves them unset, so tokens can stay out of the file.
    fn apply_env_overrides(mut config: PilotConfig) -> PilotConfig {
        if let Ok(v) = std::env::var("PILOT_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("PILOT_MODEL_BASE_URL") {
            config.model.base_url = v;
        }
        if config.telegram.token.is_empty() {
            if let Ok(v) = std::env::var("TELEGRAM_BOT_TOKEN") {
                config.telegram.token = v;
            }
        }
        if config.lark.app_id.is_empty() {
            if let Ok(v) = std::env::var("LARK_APP_ID") {
                config.lark.app_id = v;
            }
        }
        if config.lark.app_secret.is_empty() {
            if let Ok(v) = std::env::var("LARK_APP_SECRET") {
                config.lark.app_secret = v;
            }
        }
        if config.model.api_key == "EMPTY" {
            if let Ok(v) = std::env::var("PILOT_API_KEY") {
                config.model.api_key = v;
            }
        }
        config
    }

    /// Render the default config as TOML (for `pilot init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&PilotConfig::default())
            .expect("default config serializes")
    }
}
