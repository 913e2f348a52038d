//! Client configuration shared by hosts.
//!
//! Values come from a JSON profile, then `FALIMY_*` environment variables,
//! then the defaults below.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{normalize_server_url, normalize_text_option};

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_LOCATION_RETENTION_DAYS: u64 = 30;

const MIN_SYNC_INTERVAL_SECS: u64 = 5;

pub const ENV_SERVER_URL: &str = "FALIMY_SERVER_URL";
pub const ENV_DATABASE_PATH: &str = "FALIMY_DATABASE_PATH";
pub const ENV_SYNC_INTERVAL_SECS: &str = "FALIMY_SYNC_INTERVAL_SECS";
pub const ENV_LOCATION_RETENTION_DAYS: &str = "FALIMY_LOCATION_RETENTION_DAYS";
pub const ENV_REALTIME: &str = "FALIMY_REALTIME";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// PocketBase base URL
    #[serde(default)]
    pub server_url: Option<String>,
    /// Replica database file; hosts pick a platform default when unset
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_location_retention_days")]
    pub location_retention_days: u64,
    #[serde(default = "default_realtime_enabled")]
    pub realtime_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            database_path: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            location_retention_days: DEFAULT_LOCATION_RETENTION_DAYS,
            realtime_enabled: true,
        }
    }
}

impl ClientConfig {
    pub fn from_json(payload: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(payload).map_err(|error| format!("invalid config JSON: {error}"))?;
        config.validated()
    }

    /// Overlay `FALIMY_*` variables from the process environment.
    pub fn apply_env(self) -> Result<Self, String> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        let read = |key: &str| normalize_text_option(lookup(key));

        if let Some(url) = read(ENV_SERVER_URL) {
            self.server_url = Some(url);
        }
        if let Some(path) = read(ENV_DATABASE_PATH) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(value) = read(ENV_SYNC_INTERVAL_SECS) {
            self.sync_interval_secs = parse_number(ENV_SYNC_INTERVAL_SECS, &value)?;
        }
        if let Some(value) = read(ENV_LOCATION_RETENTION_DAYS) {
            self.location_retention_days = parse_number(ENV_LOCATION_RETENTION_DAYS, &value)?;
        }
        if let Some(value) = read(ENV_REALTIME) {
            self.realtime_enabled = parse_flag(ENV_REALTIME, &value)?;
        }

        self.validated()
    }

    pub fn validated(mut self) -> Result<Self, String> {
        if let Some(url) = normalize_text_option(self.server_url.take()) {
            let normalized = normalize_server_url(&url)
                .ok_or_else(|| "server_url must include http:// or https://".to_string())?;
            self.server_url = Some(normalized);
        }
        if self.sync_interval_secs < MIN_SYNC_INTERVAL_SECS {
            return Err(format!(
                "sync_interval_secs must be at least {MIN_SYNC_INTERVAL_SECS}"
            ));
        }
        if self.location_retention_days == 0 {
            return Err("location_retention_days must be at least 1".to_string());
        }
        Ok(self)
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn location_retention(&self) -> Duration {
        Duration::from_secs(self.location_retention_days * 24 * 60 * 60)
    }
}

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

const fn default_location_retention_days() -> u64 {
    DEFAULT_LOCATION_RETENTION_DAYS
}

const fn default_realtime_enabled() -> bool {
    true
}

fn parse_number(key: &str, value: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("{key} must be a whole number, got {value:?}"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("{key} must be true or false, got {value:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config = ClientConfig::from_json(r#"{"server_url":"https://pb.example.com/"}"#).unwrap();
        assert_eq!(config.server_url.as_deref(), Some("https://pb.example.com"));
        assert_eq!(config.sync_interval(), Duration::from_secs(300));
        assert_eq!(config.location_retention(), Duration::from_secs(30 * 86_400));
        assert!(config.realtime_enabled);
    }

    #[test]
    fn rejects_unknown_fields() {
        let error = ClientConfig::from_json(r#"{"api_key":"x"}"#).unwrap_err();
        assert!(error.contains("unknown field"));
    }

    #[test]
    fn environment_overrides_profile() {
        let config = ClientConfig::default()
            .apply_env_from(env(&[
                (ENV_SERVER_URL, "http://localhost:8090"),
                (ENV_SYNC_INTERVAL_SECS, "60"),
                (ENV_LOCATION_RETENTION_DAYS, "7"),
                (ENV_REALTIME, "off"),
                (ENV_DATABASE_PATH, "  "),
            ]))
            .unwrap();

        assert_eq!(config.server_url.as_deref(), Some("http://localhost:8090"));
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.location_retention_days, 7);
        assert!(!config.realtime_enabled);
        assert_eq!(config.database_path, None);
    }

    #[test]
    fn invalid_values_are_reported() {
        let error = ClientConfig::default()
            .apply_env_from(env(&[(ENV_SYNC_INTERVAL_SECS, "soon")]))
            .unwrap_err();
        assert!(error.contains(ENV_SYNC_INTERVAL_SECS));

        let error = ClientConfig::default()
            .apply_env_from(env(&[(ENV_SERVER_URL, "pb.example.com")]))
            .unwrap_err();
        assert!(error.contains("http://"));

        let error = ClientConfig::from_json(r#"{"sync_interval_secs":1}"#).unwrap_err();
        assert!(error.contains("at least"));
    }
}
