//! Configuration for Spamgate

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Message storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Anti-spam configuration
    #[serde(default)]
    pub antispam: AntiSpamConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base path for local filesystem storage
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/spamgate/mail")
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

/// Anti-spam configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AntiSpamConfig {
    /// SpamAssassin (spamd) test configuration
    #[serde(default)]
    pub spamassassin: SpamAssassinConfig,
}

/// SpamAssassin (spamd) test configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamAssassinConfig {
    /// Enable the SpamAssassin test
    #[serde(default)]
    pub enabled: bool,

    /// spamd host name or address
    #[serde(default = "default_spamd_host")]
    pub host: String,

    /// spamd port
    #[serde(default = "default_spamd_port")]
    pub port: u16,

    /// Use the score reported by spamd instead of the fixed score
    #[serde(default)]
    pub merge_score: bool,

    /// Fixed score added when spamd tags a message as spam
    #[serde(default = "default_spam_score")]
    pub score: i32,

    /// User name passed to spamd for per-user preferences
    pub user: Option<String>,

    /// Messages larger than this (in bytes) are not scanned
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Timeout for TCP connect and TLS handshake, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound on waiting for the scan to finish, in seconds.
    /// Unset means wait until spamd answers or disconnects.
    pub wait_timeout_secs: Option<u64>,

    /// TLS settings; plain TCP when absent
    pub tls: Option<SpamdTlsConfig>,
}

impl Default for SpamAssassinConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_spamd_host(),
            port: default_spamd_port(),
            merge_score: false,
            score: default_spam_score(),
            user: None,
            max_message_size: default_max_message_size(),
            connect_timeout_secs: default_connect_timeout(),
            wait_timeout_secs: None,
            tls: None,
        }
    }
}

fn default_spamd_host() -> String {
    "127.0.0.1".to_string()
}

fn default_spamd_port() -> u16 {
    783
}

fn default_spam_score() -> i32 {
    5
}

fn default_max_message_size() -> usize {
    500 * 1024 // spamc default
}

fn default_connect_timeout() -> u64 {
    10
}

/// TLS settings for the spamd connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamdTlsConfig {
    /// PEM bundle with the CA certificates trusted for spamd
    pub ca_path: PathBuf,

    /// Server name to verify; defaults to the configured host
    pub server_name: Option<String>,
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./spamgate.toml"),
            PathBuf::from("/etc/spamgate/spamgate.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let sa = SpamAssassinConfig::default();
        assert!(!sa.enabled);
        assert_eq!(sa.host, "127.0.0.1");
        assert_eq!(sa.port, 783);
        assert_eq!(sa.score, 5);
        assert!(!sa.merge_score);
        assert!(sa.wait_timeout_secs.is_none());

        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[logging]
level = "debug"
format = "json"

[storage]
path = "/data/mail"

[antispam.spamassassin]
enabled = true
host = "spamd.example.com"
port = 7830
merge_score = true
user = "mail"

[antispam.spamassassin.tls]
ca_path = "/etc/ssl/spamd-ca.pem"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        let sa = &config.antispam.spamassassin;
        assert!(sa.enabled);
        assert_eq!(sa.host, "spamd.example.com");
        assert_eq!(sa.port, 7830);
        assert!(sa.merge_score);
        assert_eq!(sa.score, 5);
        assert_eq!(sa.user.as_deref(), Some("mail"));
        assert_eq!(
            sa.tls.as_ref().map(|t| t.ca_path.clone()),
            Some(PathBuf::from("/etc/ssl/spamd-ca.pem"))
        );
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.storage.path, PathBuf::from("/data/mail"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.antispam.spamassassin, SpamAssassinConfig::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[antispam.spamassassin]\nenabled = true\nscore = 7").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.antispam.spamassassin.enabled);
        assert_eq!(config.antispam.spamassassin.score, 7);
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[antispam.spamassassin\nenabled = ").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
