//! Library configuration
//!
//! Loaded from TOML, every section optional:
//!
//! ```toml
//! [encrypt]
//! segment_size = 1048576
//! byte_limit = 5368709120
//! zip64 = "auto"
//!
//! [decrypt]
//! verify_before_emit = true
//!
//! [kas]
//! timeout_secs = 30
//! upsert_path = "/v2/upsert"
//! rewrap_path = "/v2/rewrap"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! Environment variables override the file: `TDF3_SEGMENT_SIZE`,
//! `TDF3_BYTE_LIMIT`, `TDF3_KAS_TIMEOUT_SECS`, `TDF3_LOG_LEVEL`,
//! `TDF3_LOG_FORMAT`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tdf3_crypto::IntegrityAlgorithm;
use tdf3_protocol::manifest::DEFAULT_SEGMENT_SIZE;
use thiserror::Error;

use crate::archive::Zip64Mode;

/// Largest accepted segment window
pub const MAX_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;
/// Default tail window read when locating the central directory
pub const DEFAULT_TAIL_WINDOW: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to install tracing subscriber: {0}")]
    Logging(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TdfConfig {
    pub encrypt: EncryptConfig,
    pub decrypt: DecryptConfig,
    pub kas: KasConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptConfig {
    /// Plaintext window per segment in bytes (default: 1 MiB)
    pub segment_size: u64,
    /// Refuse to write containers larger than this many bytes
    pub byte_limit: Option<u64>,
    /// Root signature algorithm: "HS256" or "GMAC"
    pub integrity_algorithm: String,
    /// Segment hash algorithm: "HS256" or "GMAC"
    pub segment_integrity_algorithm: String,
    /// "auto" or "always"
    pub zip64: Zip64Mode,
    pub mime_type: Option<String>,
}

impl Default for EncryptConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            byte_limit: None,
            integrity_algorithm: IntegrityAlgorithm::Hs256.to_string(),
            segment_integrity_algorithm: IntegrityAlgorithm::Hs256.to_string(),
            zip64: Zip64Mode::Auto,
            mime_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptConfig {
    /// Authenticate every segment before emitting any plaintext
    pub verify_before_emit: bool,
    /// Bytes read from the end of the container to find the central directory
    pub tail_window: u64,
}

impl Default for DecryptConfig {
    fn default() -> Self {
        Self {
            verify_before_emit: true,
            tail_window: DEFAULT_TAIL_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KasConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    pub upsert_path: String,
    pub rewrap_path: String,
    pub public_key_path: String,
    /// Lifetime of signed request tokens in seconds
    pub token_ttl_secs: u64,
}

impl Default for KasConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            upsert_path: "/v2/upsert".into(),
            rewrap_path: "/v2/rewrap".into(),
            public_key_path: "/kas_public_key".into(),
            token_ttl_secs: 60,
        }
    }
}

impl KasConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Invalid {
                field: "logging.format",
                reason: format!("unknown format '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Install a global fmt subscriber; `RUST_LOG` wins over `level`
    pub fn init(&self) -> Result<(), ConfigError> {
        use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let result = match self.format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Text => tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .try_init(),
        };
        result.map_err(|e| ConfigError::Logging(e.to_string()))
    }
}

impl TdfConfig {
    /// Parse TOML text, without environment overrides
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: TdfConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: TdfConfig = toml::from_str(&text)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = TdfConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TDF3_SEGMENT_SIZE") {
            self.encrypt.segment_size = parse_number("TDF3_SEGMENT_SIZE", &v)?;
        }
        if let Some(v) = lookup("TDF3_BYTE_LIMIT") {
            self.encrypt.byte_limit = Some(parse_number("TDF3_BYTE_LIMIT", &v)?);
        }
        if let Some(v) = lookup("TDF3_KAS_TIMEOUT_SECS") {
            self.kas.timeout_secs = parse_number("TDF3_KAS_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("TDF3_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("TDF3_LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encrypt.segment_size == 0 || self.encrypt.segment_size > MAX_SEGMENT_SIZE {
            return Err(ConfigError::Invalid {
                field: "encrypt.segment_size",
                reason: format!(
                    "{} is outside 1..={}",
                    self.encrypt.segment_size, MAX_SEGMENT_SIZE
                ),
            });
        }
        for (field, value) in [
            ("encrypt.integrity_algorithm", &self.encrypt.integrity_algorithm),
            (
                "encrypt.segment_integrity_algorithm",
                &self.encrypt.segment_integrity_algorithm,
            ),
        ] {
            value
                .parse::<IntegrityAlgorithm>()
                .map_err(|e| ConfigError::Invalid {
                    field,
                    reason: e.to_string(),
                })?;
        }
        if self.decrypt.tail_window < 22 {
            return Err(ConfigError::Invalid {
                field: "decrypt.tail_window",
                reason: "must hold at least an end of central directory record".into(),
            });
        }
        if self.kas.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "kas.timeout_secs",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        field,
        reason: format!("'{value}' is not a number"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = TdfConfig::default();
        assert_eq!(config.encrypt.segment_size, 1024 * 1024);
        assert!(config.decrypt.verify_before_emit);
        assert_eq!(config.decrypt.tail_window, 1000);
        assert_eq!(config.kas.upsert_path, "/v2/upsert");
        assert_eq!(config.kas.token_ttl_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = TdfConfig::from_toml_str(
            r#"
            [encrypt]
            segment_size = 4096
            zip64 = "always"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.encrypt.segment_size, 4096);
        assert_eq!(config.encrypt.zip64, Zip64Mode::Always);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.kas.timeout_secs, 30);
    }

    #[test]
    fn test_segment_size_bounds() {
        assert!(TdfConfig::from_toml_str("[encrypt]\nsegment_size = 0").is_err());
        let too_big = format!("[encrypt]\nsegment_size = {}", MAX_SEGMENT_SIZE + 1);
        assert!(matches!(
            TdfConfig::from_toml_str(&too_big),
            Err(ConfigError::Invalid {
                field: "encrypt.segment_size",
                ..
            })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TDF3_SEGMENT_SIZE", "2048"),
            ("TDF3_BYTE_LIMIT", "100000"),
            ("TDF3_LOG_FORMAT", "JSON"),
        ]
        .into_iter()
        .collect();

        let mut config = TdfConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.encrypt.segment_size, 2048);
        assert_eq!(config.encrypt.byte_limit, Some(100_000));
        assert_eq!(config.logging.format, LogFormat::Json);

        let bad = |k: &str| (k == "TDF3_KAS_TIMEOUT_SECS").then(|| "soon".to_string());
        assert!(TdfConfig::default().apply_env_overrides(bad).is_err());
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let text = "[encrypt]\nintegrity_algorithm = \"SHA1\"";
        assert!(TdfConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_logging_installs_once() {
        let logging = LoggingConfig {
            level: "debug".into(),
            format: LogFormat::Json,
        };
        logging.init().unwrap();
        assert!(matches!(logging.init(), Err(ConfigError::Logging(_))));
    }
}
