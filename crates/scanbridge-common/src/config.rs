//! Configuration for scanbridge

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::LocalScanCode;

const DEFAULT_PATHS: [&str; 2] = ["./scanbridge.toml", "/etc/scanbridge/config.toml"];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bridge configuration
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scan bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Name of the builtin module scripts import for host access
    #[serde(default = "default_builtin_module")]
    pub builtin_module: String,

    /// Name of the user policy module
    #[serde(default = "default_user_module")]
    pub user_module: String,

    /// Entry point function inside the user module
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    /// Disposition returned whenever the bridge itself fails
    #[serde(default = "default_failure_disposition")]
    pub failure_disposition: i32,

    /// Directories searched for the user module
    #[serde(default = "default_script_paths")]
    pub script_paths: Vec<PathBuf>,

    /// Include the script's error text in the host log on invocation failure
    #[serde(default = "default_log_script_errors")]
    pub log_script_errors: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            builtin_module: default_builtin_module(),
            user_module: default_user_module(),
            entry_point: default_entry_point(),
            failure_disposition: default_failure_disposition(),
            script_paths: default_script_paths(),
            log_script_errors: default_log_script_errors(),
        }
    }
}

fn default_builtin_module() -> String {
    "exim".to_string()
}

fn default_user_module() -> String {
    "exim_local_scan".to_string()
}

fn default_entry_point() -> String {
    "local_scan".to_string()
}

fn default_failure_disposition() -> i32 {
    LocalScanCode::Accept.code()
}

fn default_script_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("/etc/scanbridge/scripts")]
}

fn default_log_script_errors() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// First existing file among the default locations
    pub fn default_path() -> Option<PathBuf> {
        DEFAULT_PATHS.iter().map(PathBuf::from).find(|path| path.exists())
    }

    /// Load an optional file with `SCANBRIDGE__SECTION__KEY` environment
    /// overrides layered on top
    pub fn layered(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("SCANBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the bridge cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let bridge = &self.bridge;

        for (field, value) in [
            ("builtin_module", &bridge.builtin_module),
            ("user_module", &bridge.user_module),
            ("entry_point", &bridge.entry_point),
        ] {
            if value.trim().is_empty() {
                return Err(crate::Error::Config(format!(
                    "bridge.{} must not be empty",
                    field
                )));
            }
        }

        if bridge.builtin_module == bridge.user_module {
            return Err(crate::Error::Config(
                "bridge.builtin_module and bridge.user_module must differ".to_string(),
            ));
        }

        if LocalScanCode::from_code(bridge.failure_disposition).is_none() {
            tracing::warn!(
                code = bridge.failure_disposition,
                "failure_disposition is not a documented local-scan code"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let bridge = BridgeConfig::default();
        assert_eq!(bridge.builtin_module, "exim");
        assert_eq!(bridge.user_module, "exim_local_scan");
        assert_eq!(bridge.entry_point, "local_scan");
        assert_eq!(bridge.failure_disposition, 0);
        assert!(bridge.log_script_errors);

        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, "text");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[bridge]
user_module = "policy"
failure_disposition = 9
script_paths = ["/srv/policy", "/usr/share/policy"]

[logging]
format = "json"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.bridge.user_module, "policy");
        assert_eq!(config.bridge.entry_point, "local_scan");
        assert_eq!(config.bridge.failure_disposition, 9);
        assert_eq!(config.bridge.script_paths.len(), 2);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let mut config = Config::default();
        config.bridge.entry_point = "  ".to_string();
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = Config::default();
        config.bridge.user_module = config.bridge.builtin_module.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[bridge]\nentry_point = \"scan\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bridge.entry_point, "scan");
        assert_eq!(config.bridge.user_module, "exim_local_scan");
    }

    #[test]
    fn test_layered_environment_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[bridge]\nuser_module = \"from_file\"").unwrap();

        std::env::set_var("SCANBRIDGE__BRIDGE__ENTRY_POINT", "from_env");
        let config = Config::layered(Some(file.path()));
        std::env::remove_var("SCANBRIDGE__BRIDGE__ENTRY_POINT");

        let config = config.unwrap();
        assert_eq!(config.bridge.user_module, "from_file");
        assert_eq!(config.bridge.entry_point, "from_env");
    }
}
