//! Configuration management for the cognitive loop runner
//!
//! A single TOML document with `[loop]`, `[policy]`, `[control]`, `[hitl]`
//! and `[logging]` sections, optional environment overrides, and
//! validation before anything is wired.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::hitl::policy::PolicyConfig;
use crate::reasoning::control::{ControlConfig, ForbiddenRule};
use crate::reasoning::loop_types::LoopConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// How human decisions are obtained for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitlMode {
    /// Prompt on the console.
    #[default]
    Interactive,
    /// Approve every frozen action.
    Auto,
    /// Never freeze; the policy engine always yields `NONE`.
    Disabled,
}

impl FromStr for HitlMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "auto" => Ok(Self::Auto),
            "disabled" => Ok(Self::Disabled),
            other => Err(ConfigError::invalid(
                "hitl.mode",
                format!("unknown mode '{other}', expected interactive, auto or disabled"),
            )),
        }
    }
}

impl fmt::Display for HitlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interactive => "interactive",
            Self::Auto => "auto",
            Self::Disabled => "disabled",
        })
    }
}

/// `[hitl]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitlConfig {
    pub mode: HitlMode,
}

/// Log format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Main runner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SclConfig {
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    pub policy: PolicyConfig,
    pub control: ControlConfig,
    pub hitl: HitlConfig,
    pub logging: LoggingConfig,
}

const VALID_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

impl SclConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `SCL_MAX_LOOPS`, `SCL_HITL_MODE` and `LOG_LEVEL` on top of
    /// whatever was loaded.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(max_loops) = env::var("SCL_MAX_LOOPS") {
            self.loop_config.max_loops = max_loops
                .parse()
                .map_err(|_| ConfigError::invalid("SCL_MAX_LOOPS", "Invalid loop count"))?;
        }

        if let Ok(mode) = env::var("SCL_HITL_MODE") {
            self.hitl.mode = mode.parse()?;
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.logging.level = log_level;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_config.max_loops == 0 {
            return Err(ConfigError::invalid("loop.max_loops", "Must be > 0"));
        }

        if self.loop_config.tool_timeout.is_zero() {
            return Err(ConfigError::invalid("loop.tool_timeout", "Must be > 0"));
        }

        if self.policy.confirm_after_n_loops == 0 {
            return Err(ConfigError::invalid(
                "policy.confirm_after_n_loops",
                "Must be > 0",
            ));
        }

        let threshold = self.policy.confirm_on_confidence_below;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::invalid(
                "policy.confirm_on_confidence_below",
                format!("{threshold} is outside [0, 1]"),
            ));
        }

        if !VALID_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("Must be one of: {}", VALID_LEVELS.join(", ")),
            ));
        }

        for (tool, rules) in &self.control.tools {
            for rule in &rules.forbidden {
                ForbiddenRule::compile(rule).map_err(|e| {
                    ConfigError::invalid(format!("control.tools.{tool}.forbidden"), e.to_string())
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitl::policy::InterventionLevel;
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = SclConfig::default();
        assert_eq!(config.loop_config.max_loops, 20);
        assert_eq!(config.hitl.mode, HitlMode::Interactive);
        assert_eq!(config.logging.level, "info");
        assert!(config.policy.high_risk_tools.contains("send_email"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[loop]
max_loops = 10
decision_timeout = "2m"

[policy]
high_risk_tools = ["send_email"]
always_confirm_tools = []
confirm_on_confidence_below = 0.5
blocked_tools = ["delete_data"]

[control]
reject_redundant_calls = true

[control.tools.send_email]
required = ["to"]
forbidden = [{{ argument = "to", pattern = "@competitor\\.com$", reason = "external" }}]

[hitl]
mode = "auto"

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = SclConfig::from_file(file.path()).unwrap();
        assert_eq!(config.loop_config.max_loops, 10);
        assert_eq!(config.loop_config.tool_timeout, Duration::from_secs(30));
        assert_eq!(
            config.loop_config.decision_timeout,
            Some(Duration::from_secs(120))
        );
        assert!(config.policy.always_confirm_tools.is_empty());
        assert!(config.policy.blocked_tools.contains("delete_data"));
        assert!(config.policy.confirm_on_final_action);
        assert!(config.control.reject_redundant_calls);
        assert_eq!(config.control.tools["send_email"].required, vec!["to"]);
        assert_eq!(config.hitl.mode, HitlMode::Auto);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
        assert!(InterventionLevel::Block > InterventionLevel::Approve);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SclConfig::from_file("/nonexistent/scl.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = SclConfig::from_toml("[loop\nmax_loops = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        env::set_var("SCL_MAX_LOOPS", "7");
        env::set_var("SCL_HITL_MODE", "disabled");
        env::set_var("LOG_LEVEL", "debug");

        let config = SclConfig::from_env().unwrap();
        assert_eq!(config.loop_config.max_loops, 7);
        assert_eq!(config.hitl.mode, HitlMode::Disabled);
        assert_eq!(config.logging.level, "debug");

        env::remove_var("SCL_MAX_LOOPS");
        env::remove_var("SCL_HITL_MODE");
        env::remove_var("LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_invalid_env_values() {
        env::set_var("SCL_MAX_LOOPS", "many");
        assert!(matches!(
            SclConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));
        env::remove_var("SCL_MAX_LOOPS");

        env::set_var("SCL_HITL_MODE", "sometimes");
        assert!(SclConfig::from_env().is_err());
        env::remove_var("SCL_HITL_MODE");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = SclConfig::default();
        config.loop_config.max_loops = 0;
        assert!(config.validate().is_err());

        let mut config = SclConfig::default();
        config.policy.confirm_on_confidence_below = 1.5;
        assert!(config.validate().is_err());

        let mut config = SclConfig::default();
        config.logging.level = "verbose".into();
        assert!(config.validate().is_err());

        let config = SclConfig::from_toml(
            r#"
[control.tools.send_email]
forbidden = [{ argument = "to", pattern = "([", reason = "broken" }]
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("control.tools.send_email"));
    }

    #[test]
    fn test_hitl_mode_round_trips_through_display() {
        for mode in [HitlMode::Interactive, HitlMode::Auto, HitlMode::Disabled] {
            assert_eq!(mode.to_string().parse::<HitlMode>().unwrap(), mode);
        }
    }
}
