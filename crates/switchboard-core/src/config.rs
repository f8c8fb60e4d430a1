use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SwitchboardError};

/// Registered action names, the only valid `timeout_overrides_ms` keys.
pub const ACTION_NAMES: [&str; 7] = [
    "start_stream",
    "stop_stream",
    "set_title",
    "set_game",
    "send_chat",
    "create_clip",
    "create_marker",
];

/// Top-level configuration for the Switchboard gateway.
///
/// Loaded from `~/.switchboard/config.toml` by default. Every section falls
/// back to its defaults, so a partial file only overrides what it names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

impl SwitchboardConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SwitchboardConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let actions = &self.actions;
        if actions.rate_limit_per_minute == 0 {
            return Err(SwitchboardError::Config(
                "actions.rate_limit_per_minute must be >= 1".to_string(),
            ));
        }
        if actions.retry_attempts == 0 {
            return Err(SwitchboardError::Config(
                "actions.retry_attempts must be >= 1".to_string(),
            ));
        }
        if actions.poll_interval_ms == 0 {
            return Err(SwitchboardError::Config(
                "actions.poll_interval_ms must be >= 1".to_string(),
            ));
        }
        if actions.job_ttl_secs == 0 {
            return Err(SwitchboardError::Config(
                "actions.job_ttl_secs must be >= 1".to_string(),
            ));
        }
        if actions.sweep_interval_secs == 0 {
            return Err(SwitchboardError::Config(
                "actions.sweep_interval_secs must be >= 1".to_string(),
            ));
        }
        if actions.default_timeout_ms == 0 {
            return Err(SwitchboardError::Config(
                "actions.default_timeout_ms must be >= 1".to_string(),
            ));
        }
        if let Some(action) = actions
            .timeout_overrides_ms
            .keys()
            .find(|k| !ACTION_NAMES.contains(&k.as_str()))
        {
            return Err(SwitchboardError::Config(format!(
                "actions.timeout_overrides_ms.{action} is not a registered action"
            )));
        }
        if let Some((action, _)) = actions.timeout_overrides_ms.iter().find(|(_, ms)| **ms == 0) {
            return Err(SwitchboardError::Config(format!(
                "actions.timeout_overrides_ms.{action} must be >= 1"
            )));
        }
        if self.encoder.mode == ExecutorMode::Http && self.encoder.base_url.is_none() {
            return Err(SwitchboardError::Config(
                "encoder.base_url is required when encoder.mode = \"http\"".to_string(),
            ));
        }
        if self.platform.mode == ExecutorMode::Http && self.platform.base_url.is_none() {
            return Err(SwitchboardError::Config(
                "platform.base_url is required when platform.mode = \"http\"".to_string(),
            ));
        }
        Ok(())
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Address the HTTP surface binds to.
    pub bind_addr: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Dispatch engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Admissions per action name per 60 second window. Must be at least 1.
    pub rate_limit_per_minute: u32,
    /// Timeout applied to an action when no override exists.
    pub default_timeout_ms: u64,
    /// Jobs older than this (measured from creation) are evicted.
    pub job_ttl_secs: u64,
    /// How often the background sweep runs.
    pub sweep_interval_secs: u64,
    /// Attempts for the command issuance step of start/stop.
    pub retry_attempts: u32,
    /// First backoff delay; doubled after each failed attempt.
    pub retry_base_delay_ms: u64,
    /// Delay between encoder state polls.
    pub poll_interval_ms: u64,
    /// How long the poll loop waits for the target state.
    pub poll_timeout_ms: u64,
    /// Reject async actions that carry no request/mission/correlation id.
    pub require_request_identity: bool,
    /// Per-action timeout overrides keyed by action name.
    pub timeout_overrides_ms: BTreeMap<String, u64>,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        let mut timeout_overrides_ms = BTreeMap::new();
        timeout_overrides_ms.insert("start_stream".to_string(), 60_000);
        timeout_overrides_ms.insert("stop_stream".to_string(), 60_000);
        Self {
            rate_limit_per_minute: 30,
            default_timeout_ms: 15_000,
            job_ttl_secs: 3_600,
            sweep_interval_secs: 60,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            poll_interval_ms: 1_000,
            poll_timeout_ms: 30_000,
            require_request_identity: true,
            timeout_overrides_ms,
        }
    }
}

impl ActionsConfig {
    /// Effective timeout for an action: its override, else the default.
    pub fn timeout_for(&self, action: &str) -> Duration {
        let ms = self
            .timeout_overrides_ms
            .get(action)
            .copied()
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }
}

/// How an external executor is provided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    /// Not configured; actions routed here fail as not configured.
    #[default]
    Disabled,
    /// In-process simulation, useful for dry runs.
    Simulated,
    /// JSON over HTTP.
    Http,
}

/// Streaming encoder controller connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub mode: ExecutorMode,
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::Disabled,
            base_url: None,
            api_token: None,
            request_timeout_ms: 5_000,
        }
    }
}

/// Broadcast platform API connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub mode: ExecutorMode,
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    /// Channel used when an action does not name one.
    pub default_channel: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::Disabled,
            base_url: None,
            api_token: None,
            default_channel: None,
            request_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = SwitchboardConfig::default();
        assert_eq!(config.general.bind_addr, "127.0.0.1:8787");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.actions.rate_limit_per_minute, 30);
        assert_eq!(config.actions.retry_attempts, 3);
        assert_eq!(config.actions.retry_base_delay_ms, 500);
        assert!(config.actions.require_request_identity);
        assert_eq!(config.encoder.mode, ExecutorMode::Disabled);
        assert_eq!(config.platform.mode, ExecutorMode::Disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "debug"

[actions]
rate_limit_per_minute = 5
"#;
        let file = create_temp_config(content);
        let config = SwitchboardConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.actions.rate_limit_per_minute, 5);
        assert_eq!(config.actions.job_ttl_secs, 3_600);
        assert_eq!(config.general.bind_addr, "127.0.0.1:8787");
    }

    #[test]
    fn test_load_executor_sections() {
        let content = r#"
[encoder]
mode = "http"
base_url = "http://127.0.0.1:4455"
api_token = "secret"

[platform]
mode = "simulated"
default_channel = "main"
"#;
        let file = create_temp_config(content);
        let config = SwitchboardConfig::load(file.path()).unwrap();
        assert_eq!(config.encoder.mode, ExecutorMode::Http);
        assert_eq!(config.encoder.base_url.as_deref(), Some("http://127.0.0.1:4455"));
        assert_eq!(config.encoder.request_timeout_ms, 5_000);
        assert_eq!(config.platform.mode, ExecutorMode::Simulated);
        assert_eq!(config.platform.default_channel.as_deref(), Some("main"));
    }

    #[test]
    fn test_timeout_overrides() {
        let content = r#"
[actions]
default_timeout_ms = 2000

[actions.timeout_overrides_ms]
start_stream = 9000
"#;
        let file = create_temp_config(content);
        let config = SwitchboardConfig::load(file.path()).unwrap();
        assert_eq!(
            config.actions.timeout_for("start_stream"),
            Duration::from_millis(9_000)
        );
        assert_eq!(
            config.actions.timeout_for("set_title"),
            Duration::from_millis(2_000)
        );
    }

    #[test]
    fn test_default_timeouts_cover_process_actions() {
        let actions = ActionsConfig::default();
        assert_eq!(actions.timeout_for("stop_stream"), Duration::from_secs(60));
        assert_eq!(actions.timeout_for("send_chat"), Duration::from_secs(15));
    }

    #[test]
    fn test_validate_rejects_zero_retry_attempts() {
        let file = create_temp_config("[actions]\nretry_attempts = 0\n");
        let err = SwitchboardConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, SwitchboardError::Config(_)));
        assert!(err.to_string().contains("retry_attempts"));
    }

    #[test]
    fn test_validate_rejects_zero_override() {
        let mut config = SwitchboardConfig::default();
        config
            .actions
            .timeout_overrides_ms
            .insert("set_title".to_string(), 0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_overrides_ms.set_title"));
    }

    #[test]
    fn test_validate_rejects_zero_rate_limit() {
        let file = create_temp_config("[actions]\nrate_limit_per_minute = 0\n");
        let err = SwitchboardConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, SwitchboardError::Config(_)));
        assert!(err.to_string().contains("rate_limit_per_minute"));
    }

    #[test]
    fn test_validate_rejects_unknown_override_key() {
        let content = r#"
[actions.timeout_overrides_ms]
start_steam = 5000
"#;
        let file = create_temp_config(content);
        let err = SwitchboardConfig::load(file.path()).unwrap_err();
        assert!(err
            .to_string()
            .contains("timeout_overrides_ms.start_steam is not a registered action"));
    }

    #[test]
    fn test_validate_accepts_every_action_override() {
        let mut config = SwitchboardConfig::default();
        for action in ACTION_NAMES {
            config
                .actions
                .timeout_overrides_ms
                .insert(action.to_string(), 1_000);
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_http_without_base_url() {
        let file = create_temp_config("[platform]\nmode = \"http\"\n");
        let err = SwitchboardConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("platform.base_url"));
    }

    #[test]
    fn test_load_invalid_mode_fails() {
        let file = create_temp_config("[encoder]\nmode = \"carrier-pigeon\"\n");
        assert!(SwitchboardConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = SwitchboardConfig::default();
        config.actions.rate_limit_per_minute = 7;
        config.platform.default_channel = Some("main".to_string());
        config.save(&path).unwrap();

        let reloaded = SwitchboardConfig::load(&path).unwrap();
        assert_eq!(reloaded.actions.rate_limit_per_minute, 7);
        assert_eq!(reloaded.platform.default_channel.as_deref(), Some("main"));
        assert_eq!(
            reloaded.actions.timeout_overrides_ms,
            config.actions.timeout_overrides_ms
        );
    }
}
