//! Settings loading.
//!
//! Settings come from an optional TOML file plus environment overrides of the
//! form `FAILGUARD__<SECTION>__<KEY>`, for example
//! `FAILGUARD__ARBITER__TIE_BREAK=prefer_cleanup`.
//!
//! ```toml
//! [arbiter]
//! tie_break = "prefer_action"
//!
//! [logging]
//! level = "debug"
//! with_thread_ids = true
//! ```

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::arbiter::{Arbiter, TieBreak};
use crate::classify::Classifier;
use crate::logging::LoggingConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "FAILGUARD";

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file was not found.
    #[error("settings file not found: {0}")]
    FileNotFound(String),

    /// The settings path is not valid UTF-8.
    #[error("invalid settings path: {0}")]
    InvalidPath(String),

    /// The settings could not be parsed.
    #[error("failed to parse settings: {0}")]
    Config(#[from] ConfigError),
}

/// Arbiter policy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ArbiterSettings {
    pub tie_break: TieBreak,
}

/// Root settings structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub arbiter: ArbiterSettings,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads settings from a TOML file, with environment overrides applied
    /// on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not valid UTF-8, the file does not
    /// exist, or the merged settings cannot be deserialised.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| SettingsError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(SettingsError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(env_source())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Loads settings from environment overrides alone.
    pub fn from_env() -> Result<Self, SettingsError> {
        let config = Config::builder().add_source(env_source()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Builds an arbiter with the built-in classifier and these settings.
    pub fn arbiter(&self) -> Arbiter {
        self.arbiter_with(Classifier::new())
    }

    /// Builds an arbiter with a custom classifier and these settings.
    pub fn arbiter_with(&self, classifier: Classifier) -> Arbiter {
        Arbiter::new(classifier).with_tie_break(self.arbiter.tie_break)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use serial_test::serial;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TIE_BREAK_VAR: &str = "FAILGUARD__ARBITER__TIE_BREAK";

    fn settings_file(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_load_full_settings() {
        let file = settings_file(
            r#"
[arbiter]
tie_break = "prefer_cleanup"

[logging]
level = "debug"
with_thread_ids = true
"#,
        );

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.arbiter.tie_break, TieBreak::PreferCleanup);
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert!(settings.logging.with_thread_ids);
        assert!(settings.logging.with_timestamps);
    }

    #[test]
    #[serial]
    fn test_missing_sections_use_defaults() {
        let file = settings_file("[logging]\nlevel = \"warn\"\n");
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.arbiter.tie_break, TieBreak::PreferAction);
        assert_eq!(settings.arbiter().tie_break(), TieBreak::PreferAction);
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file() {
        let err = Settings::load("/nonexistent/failguard.toml").unwrap_err();
        assert!(matches!(err, SettingsError::FileNotFound(_)));
    }

    #[test]
    #[serial]
    fn test_invalid_tie_break_is_rejected() {
        let file = settings_file("[arbiter]\ntie_break = \"prefer_nobody\"\n");
        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Config(_)));
    }

    #[test]
    #[serial]
    fn test_env_overrides_tie_break() {
        let file = settings_file("[arbiter]\ntie_break = \"prefer_action\"\n");
        env::set_var(TIE_BREAK_VAR, "prefer_cleanup");

        let from_env = Settings::from_env();
        let layered = Settings::load(file.path());
        env::remove_var(TIE_BREAK_VAR);

        let from_env = from_env.unwrap();
        assert_eq!(from_env.arbiter.tie_break, TieBreak::PreferCleanup);
        assert_eq!(from_env.logging, LoggingConfig::default());

        let layered = layered.unwrap();
        assert_eq!(layered.arbiter.tie_break, TieBreak::PreferCleanup);
        assert_eq!(layered.arbiter().tie_break(), TieBreak::PreferCleanup);
    }

    #[test]
    #[serial]
    fn test_from_env_without_overrides_uses_defaults() {
        env::remove_var(TIE_BREAK_VAR);
        assert_eq!(Settings::from_env().unwrap(), Settings::default());
    }

    #[test]
    fn test_arbiter_with_custom_classifier() {
        let settings = Settings {
            arbiter: ArbiterSettings {
                tie_break: TieBreak::PreferCleanup,
            },
            ..Settings::default()
        };
        let arbiter = settings.arbiter_with(Classifier::bare());
        assert_eq!(arbiter.tie_break(), TieBreak::PreferCleanup);
        assert_eq!(arbiter.classifier().matcher_count(), 0);
    }

    #[test]
    fn test_settings_error_display() {
        let err = SettingsError::FileNotFound("test.toml".to_string());
        assert_eq!(err.to_string(), "settings file not found: test.toml");

        let err = SettingsError::InvalidPath("bad".to_string());
        assert_eq!(err.to_string(), "invalid settings path: bad");
    }
}
