use anyhow::{Context, Result};
use batchguard_db::ConnectionSettings;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Tunables that are not part of a single run's parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub connect_timeout_secs: u64,
    pub application_name: String,
    /// Lengthen `deadlock_timeout` before each call so the other session is
    /// picked as the deadlock victim. PostgreSQL only lets superusers (or
    /// roles granted `SET` on the parameter) change it; other logins get a
    /// warning on every run unless this is turned off.
    pub raise_deadlock_priority: bool,
    pub deadlock_timeout_ms: u64,
    /// Schema searched for issuer routines.
    pub routine_schema: String,
    pub log_format: LogFormat,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            application_name: "batchguard".to_string(),
            raise_deadlock_priority: true,
            deadlock_timeout_ms: 10_000,
            routine_schema: "public".to_string(),
            log_format: LogFormat::Text,
            // notices are reported by the engine from the capture layer
            log_filter: "batchguard=info,sqlx=warn,sqlx::postgres::notice=off".to_string(),
        }
    }
}

impl Settings {
    /// Load from the given file (or an optional `batchguard.toml`), then apply
    /// `BATCHGUARD__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("batchguard").required(false),
        };

        let builder = Config::builder().add_source(file).add_source(
            Environment::with_prefix("BATCHGUARD")
                .prefix_separator("__")
                .separator("__"),
        );

        Self::build(builder).context("Failed to load settings")
    }

    fn build(
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        builder.build()?.try_deserialize()
    }

    pub fn connection(&self) -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            application_name: self.application_name.clone(),
        }
    }

    /// `None` when the deadlock priority step is disabled.
    pub fn deadlock_timeout(&self) -> Option<Duration> {
        self.raise_deadlock_priority
            .then(|| Duration::from_millis(self.deadlock_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<Settings, config::ConfigError> {
        Settings::build(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    #[test]
    fn test_empty_source_gives_defaults() {
        assert_eq!(from_toml("").unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_overrides() {
        let settings = from_toml(
            r#"
            connect_timeout_secs = 5
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(settings.connection().connect_timeout, Duration::from_secs(5));
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.application_name, "batchguard");
        assert_eq!(settings.deadlock_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_deadlock_priority_can_be_disabled() {
        let settings = from_toml(
            r#"
            raise_deadlock_priority = false
            deadlock_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(settings.deadlock_timeout(), None);
    }

    #[test]
    fn test_default_filter_silences_driver_notices() {
        let settings = Settings::default();
        assert!(settings.log_filter.contains("sqlx::postgres::notice=off"));
        assert!(settings.log_filter.parse::<tracing_subscriber::EnvFilter>().is_ok());
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(from_toml(r#"log_format = "xml""#).is_err());
    }
}
