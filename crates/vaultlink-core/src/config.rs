//! Configuration resolution for `VaultLink`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/vaultlink/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// API version spoken to the appliance when nothing else is configured.
pub const DEFAULT_API_VERSION: u32 = 3;

/// Complete `VaultLink` configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub appliance: ApplianceConfig,
}

/// Settings for the local broker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Location of the configuration store.
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
    /// Exit the process after a full configuration reset so the supervisor
    /// restarts it with a clean state.
    pub restart_on_reset: bool,
    pub restart_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: "info".to_string(),
            log_json: false,
            restart_on_reset: true,
            restart_delay_ms: 1000,
        }
    }
}

/// Settings for talking to the PAM appliance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplianceConfig {
    pub default_api_version: u32,
    pub request_timeout_secs: u64,
    /// Source addresses allowed to retrieve accounts added to a registration.
    pub ip_restrictions: Vec<String>,
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            default_api_version: DEFAULT_API_VERSION,
            request_timeout_secs: 30,
            ip_restrictions: Vec::new(),
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit_file: Option<&Path>) -> Result<Config> {
    let mut layers = Vec::new();
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            layers.push(global_path);
        }
    }
    if let Some(path) = explicit_file {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        layers.push(path.to_path_buf());
    }

    let mut config = load_layers(&layers)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Merge config files in order, later files winning key by key, then fill
/// whatever none of them set from the defaults.
fn load_layers(paths: &[PathBuf]) -> Result<Config> {
    let mut merged = Value::Object(Map::new());
    for path in paths {
        merge_values(&mut merged, read_config_value(path)?);
    }
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))
}

/// Directory holding `VaultLink` state for the current user.
pub fn state_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("vaultlink"))
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    state_dir().map(|d| d.join("settings.json"))
}

/// Get the default configuration store path.
pub fn database_path() -> Option<PathBuf> {
    state_dir().map(|d| d.join("vaultlink.db"))
}

impl Config {
    /// Resolved path of the configuration store.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        self.broker
            .database_path
            .clone()
            .or_else(database_path)
            .ok_or_else(|| Error::Config("Cannot determine the database location".into()))
    }
}

fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(Error::Config(format!(
            "Config file {} must hold a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

/// Objects merge recursively; any other overlay value replaces the base.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("VAULTLINK_DB_PATH") {
        config.broker.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("VAULTLINK_LOG_LEVEL") {
        config.broker.log_level = val;
    }
    if let Ok(val) = std::env::var("VAULTLINK_API_VERSION") {
        if let Ok(n) = val.parse() {
            config.appliance.default_api_version = n;
        }
    }
    if let Ok(val) = std::env::var("VAULTLINK_REQUEST_TIMEOUT") {
        if let Ok(n) = val.parse() {
            config.appliance.request_timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("VAULTLINK_IP_RESTRICTIONS") {
        config.appliance.ip_restrictions = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_api_v3() {
        let config = Config::default();
        assert_eq!(config.appliance.default_api_version, 3);
        assert!(config.broker.restart_on_reset);
        assert_eq!(config.broker.restart_delay_ms, 1000);
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "settings.json", r#"{"appliance":{"request_timeout_secs":5}}"#);

        let config = load_layers(&[path]).unwrap();
        assert_eq!(config.appliance.request_timeout_secs, 5);
        assert_eq!(config.appliance.default_api_version, DEFAULT_API_VERSION);
        assert_eq!(config.broker.log_level, "info");
    }

    #[test]
    fn explicit_file_only_overrides_the_keys_it_sets() {
        let dir = tempfile::tempdir().unwrap();
        let global = write(
            dir.path(),
            "global.json",
            r#"{
                "broker": {
                    "database_path": "/var/lib/vaultlink.db",
                    "log_level": "debug",
                    "restart_on_reset": false,
                    "restart_delay_ms": 250
                },
                "appliance": { "ip_restrictions": ["10.0.0.1"] }
            }"#,
        );
        let explicit = write(
            dir.path(),
            "explicit.json",
            r#"{"appliance":{"request_timeout_secs":5}}"#,
        );

        let config = load_layers(&[global, explicit]).unwrap();
        assert_eq!(config.appliance.request_timeout_secs, 5);
        assert_eq!(config.broker.log_level, "debug");
        assert!(!config.broker.restart_on_reset);
        assert_eq!(config.broker.restart_delay_ms, 250);
        assert_eq!(
            config.broker.database_path.as_deref(),
            Some(Path::new("/var/lib/vaultlink.db"))
        );
        assert_eq!(config.appliance.ip_restrictions, vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn later_file_wins_for_keys_both_set() {
        let dir = tempfile::tempdir().unwrap();
        let global = write(
            dir.path(),
            "global.json",
            r#"{"broker":{"log_level":"debug"},"appliance":{"ip_restrictions":["10.0.0.1"]}}"#,
        );
        let explicit = write(
            dir.path(),
            "explicit.json",
            r#"{"broker":{"log_level":"warn"},"appliance":{"ip_restrictions":[]}}"#,
        );

        let config = load_layers(&[global, explicit]).unwrap();
        assert_eq!(config.broker.log_level, "warn");
        assert!(config.appliance.ip_restrictions.is_empty());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/vaultlink.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "settings.json", "{ nope");
        assert!(matches!(load_layers(&[path]), Err(Error::Config(_))));
    }

    #[test]
    fn wrongly_typed_value_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let array = write(dir.path(), "array.json", "[]");
        assert!(matches!(load_layers(&[array]), Err(Error::Config(_))));
        let typed = write(dir.path(), "typed.json", r#"{"broker":{"restart_delay_ms":"soon"}}"#);
        assert!(matches!(load_layers(&[typed]), Err(Error::Config(_))));
    }
}
