use serde::{Deserialize, Serialize};

/// Root configuration — maps to `pilot.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub telegram: TelegramConfig,
    pub lark: LarkConfig,
    pub logging: LoggingConfig,
}

// ── Model endpoint ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible endpoint serving the phone-use VLM.
    pub base_url: String,
    /// Model name passed on every request.
    pub model_name: String,
    /// API key; local deployments usually accept any value.
    pub api_key: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/v1".into(),
            model_name: "glm-4v-phone".into(),
            api_key: "EMPTY".into(),
        }
    }
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Step budget per task.
    pub max_steps: u32,
    /// ADB serial of the target device (None = auto-select single device).
    pub device_id: Option<String>,
    /// Capture and attach a screenshot to every progress update.
    pub verbose: bool,
    /// Prompt language, "cn" or "en".
    pub lang: String,
    /// Seconds to wait for a confirmation/takeover reply before the gate
    /// resolves as a denial and the task is cancelled. 0 = wait forever.
    pub interaction_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            device_id: None,
            verbose: true,
            lang: "cn".into(),
            interaction_timeout_secs: 600,
        }
    }
}

// ── Telegram ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub token: String,
    /// The single user allowed to drive the bot.
    pub allowed_user_id: i64,
}

// ── Lark ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LarkConfig {
    pub app_id: String,
    pub app_secret: String,
    /// open_ids allowed to drive the bot.
    pub allowed_users: Vec<String>,
    /// Webhook listen address.
    pub listen: String,
    /// Open-platform base URL (switch for Feishu vs Lark international).
    pub base_url: String,
}

impl Default for LarkConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            allowed_users: vec![],
            listen: "0.0.0.0:8080".into(),
            base_url: "https://open.feishu.cn".into(),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl PilotConfig {
    /// Validate the configuration. Returns warnings for suspicious-but-usable
    /// settings; errors for settings that cannot work.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.agent.max_steps == 0 {
            return Err("agent.max_steps must be at least 1".into());
        }
        if self.agent.lang != "cn" && self.agent.lang != "en" {
            return Err(format!(
                "agent.lang must be \"cn\" or \"en\", got \"{}\"",
                self.agent.lang
            ));
        }
        if self.model.base_url.is_empty() {
            return Err("model.base_url must not be empty".into());
        }

        if self.telegram.token.is_empty() {
            warnings.push("telegram.token is not set — the telegram command will refuse to start".into());
        }
        if self.telegram.allowed_user_id == 0 && !self.telegram.token.is_empty() {
            warnings.push("telegram.allowed_user_id is 0 — every sender will be rejected".into());
        }
        if self.lark.app_id.is_empty() || self.lark.app_secret.is_empty() {
            warnings.push("lark credentials are not set — the lark command will refuse to start".into());
        }
        if self.agent.interaction_timeout_secs == 0 {
            warnings.push(
                "agent.interaction_timeout_secs is 0 — an unanswered confirmation will hang its task forever".into(),
            );
        }

        Ok(warnings)
    }
}
