//! Process configuration loaded from the environment
//!
//! Credentials for the remote file transfer and the control panel are required
//! at startup. Storage location and retention limits are fixed constants.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Bucket holding every world archive
pub const BACKUP_BUCKET: &str = "mc-js-backups";

/// Key prefix shared by all world archives in [`BACKUP_BUCKET`]
pub const BACKUP_PREFIX: &str = "world";

/// Region the bucket lives in
pub const BACKUP_REGION: &str = "sa-east-1";

/// Maximum number of archives kept under [`BACKUP_PREFIX`]
pub const MAX_BACKUPS: usize = 10;

/// Lifetime of every download link handed to users
pub const LINK_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Delay after the force-save so the server can flush region files
pub const SETTLE_INTERVAL: Duration = Duration::from_secs(5);

/// Remote world folder pulled when `WORLD_PATH` is unset
pub const DEFAULT_WORLD_PATH: &str = "/world";

/// Configuration errors are fatal at startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Credentials for the SFTP session that pulls the world folder
#[derive(Clone)]
pub struct SftpCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

// Keep the secret out of logs
impl std::fmt::Debug for SftpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Control panel endpoint and bearer token
#[derive(Clone)]
pub struct PanelConfig {
    pub base_url: String,
    pub api_key: String,
    pub server_id: String,
}

impl std::fmt::Debug for PanelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("server_id", &self.server_id)
            .finish()
    }
}

/// Object store location
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub bucket: String,
    pub prefix: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack)
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket: BACKUP_BUCKET.to_string(),
            prefix: BACKUP_PREFIX.to_string(),
            region: BACKUP_REGION.to_string(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

/// Everything the backup pipeline needs to start
#[derive(Debug, Clone)]
pub struct Config {
    pub sftp: SftpCredentials,
    pub panel: PanelConfig,
    pub store: StoreConfig,
    /// Remote folder pulled on every run
    pub world_path: String,
    /// Local directory under which scratch folders and archives are created
    pub temp_root: PathBuf,
    pub debug: bool,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };

        let port_raw = required("SFTP_PORT")?;
        let port = port_raw
            .trim()
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue {
                name: "SFTP_PORT".to_string(),
                reason: format!("{} ({})", e, port_raw),
            })?;

        let sftp = SftpCredentials {
            host: required("SFTP_LINK")?,
            port,
            username: required("SFTP_USERNAME")?,
            password: required("SFTP_PASSWORD")?,
        };

        let panel = PanelConfig {
            base_url: required("SERVER_URL")?,
            api_key: required("SERVER_API_KEY")?,
            server_id: required("SERVER_ID")?,
        };

        let store = StoreConfig {
            endpoint_url: lookup("S3_ENDPOINT_URL").filter(|v| !v.is_empty()),
            force_path_style: is_truthy(lookup("S3_FORCE_PATH_STYLE")),
            ..StoreConfig::default()
        };

        let world_path = lookup("WORLD_PATH")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_WORLD_PATH.to_string());

        let temp_root = lookup("BACKUP_TEMP_ROOT")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Ok(Self {
            sftp,
            panel,
            store,
            world_path,
            temp_root,
            debug: is_truthy(lookup("SHOULD_DEBUG")),
        })
    }
}

fn is_truthy(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::trim),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SFTP_LINK", "sftp.example.net"),
            ("SFTP_PORT", "2022"),
            ("SFTP_USERNAME", "steve"),
            ("SFTP_PASSWORD", "hunter2"),
            ("SERVER_URL", "https://panel.example.net/api/"),
            ("SERVER_API_KEY", "ptlc_key"),
            ("SERVER_ID", "abc123"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn test_loads_required_values_and_defaults() {
        let config = load(&full_env()).unwrap();

        assert_eq!(config.sftp.host, "sftp.example.net");
        assert_eq!(config.sftp.port, 2022);
        assert_eq!(config.panel.server_id, "abc123");
        assert_eq!(config.world_path, "/world");
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.store.bucket, "mc-js-backups");
        assert_eq!(config.store.prefix, "world");
        assert!(!config.debug);
    }

    #[test]
    fn test_missing_credential_is_fatal() {
        for name in ["SFTP_LINK", "SFTP_PASSWORD", "SERVER_API_KEY"] {
            let mut env = full_env();
            env.remove(name);
            assert_eq!(
                load(&env).unwrap_err(),
                ConfigError::MissingEnvVar(name.to_string())
            );
        }
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut env = full_env();
        env.insert("SFTP_USERNAME", "   ");
        assert!(matches!(load(&env), Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn test_non_numeric_port_rejected() {
        let mut env = full_env();
        env.insert("SFTP_PORT", "twenty-two");
        assert!(matches!(
            load(&env),
            Err(ConfigError::InvalidValue { ref name, .. }) if name == "SFTP_PORT"
        ));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let config = load(&full_env()).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("ptlc_key"));
    }

    #[test]
    fn test_optional_overrides() {
        let mut env = full_env();
        env.insert("WORLD_PATH", "/survival");
        env.insert("S3_ENDPOINT_URL", "http://localhost:9000");
        env.insert("S3_FORCE_PATH_STYLE", "true");
        env.insert("SHOULD_DEBUG", "true");
        env.insert("BACKUP_TEMP_ROOT", "/var/tmp/backups");

        let config = load(&env).unwrap();
        assert_eq!(config.world_path, "/survival");
        assert_eq!(config.store.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(config.store.force_path_style);
        assert!(config.debug);
        assert_eq!(config.temp_root, PathBuf::from("/var/tmp/backups"));
    }
}
