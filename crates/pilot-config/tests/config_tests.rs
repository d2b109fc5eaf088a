#[cfg(test)]
mod tests {
    use pilot_config::schema::*;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_steps, 100);
        assert!(config.device_id.is_none());
        assert!(config.verbose);
        assert_eq!(config.lang, "cn");
        assert_eq!(config.interaction_timeout_secs, 600);
    }

    #[test]
    fn test_model_config_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:8000/v1");
        assert_eq!(config.api_key, "EMPTY");
    }

    #[test]
    fn test_lark_config_defaults() {
        let config = LarkConfig::default();
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.base_url, "https://open.feishu.cn");
        assert!(config.allowed_users.is_empty());
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = PilotConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: PilotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.model.base_url, config.model.base_url);
        assert_eq!(restored.agent.max_steps, config.agent.max_steps);
        assert_eq!(restored.lark.listen, config.lark.listen);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[telegram]
token = "123:abc"
allowed_user_id = 42

[agent]
max_steps = 25
"#;
        let config: PilotConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.telegram.token, "123:abc");
        assert_eq!(config.telegram.allowed_user_id, 42);
        assert_eq!(config.agent.max_steps, 25);
        // Defaults should fill in
        assert!(config.agent.verbose);
        assert_eq!(config.agent.lang, "cn");
        assert_eq!(config.logging.level, "info");
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_validate_rejects_zero_max_steps() {
        let mut config = PilotConfig::default();
        config.agent.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_lang() {
        let mut config = PilotConfig::default();
        config.agent.lang = "fr".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_warns_on_missing_credentials() {
        let config = PilotConfig::default();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("telegram.token")));
        assert!(warnings.iter().any(|w| w.contains("lark credentials")));
    }

    #[test]
    fn test_validate_warns_on_disabled_timeout() {
        let mut config = PilotConfig::default();
        config.agent.interaction_timeout_secs = 0;
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("interaction_timeout_secs")));
    }
}
