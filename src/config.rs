//! Configuration file parser for ~/.config/tubefeed/config.toml.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`; unknown keys are accepted and logged as warnings so
//! typos are visible.
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid bind address '{0}'")]
    InvalidBind(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Server and engine configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub bind: String,

    /// Directory holding subscription-lists.json. `None` means
    /// ~/.local/share/tubefeed.
    pub data_dir: Option<PathBuf>,

    /// Channels fetched at once during an aggregation round.
    pub concurrency: usize,

    /// How long a merged feed is reused for identical requests.
    pub cache_ttl_ms: u64,

    pub feed_timeout_secs: u64,

    pub resolve_timeout_secs: u64,

    pub avatar_timeout_ms: u64,

    /// Origin serving feeds, channel pages and handle pages.
    pub upstream_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            data_dir: None,
            concurrency: 4,
            cache_ttl_ms: 1000,
            feed_timeout_secs: 30,
            resolve_timeout_secs: 10,
            avatar_timeout_ms: 1500,
            upstream_base_url: "https://www.youtube.com".to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 8] = [
        "bind",
        "data_dir",
        "concurrency",
        "cache_ttl_ms",
        "feed_timeout_secs",
        "resolve_timeout_secs",
        "avatar_timeout_ms",
        "upstream_base_url",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            bind = %config.bind,
            concurrency = config.concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.bind.clone()))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn avatar_timeout(&self) -> Duration {
        Duration::from_millis(self.avatar_timeout_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind, "127.0.0.1:3000");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.cache_ttl(), Duration::from_secs(1));
        assert_eq!(config.avatar_timeout(), Duration::from_millis(1500));
        assert_eq!(config.feed_timeout(), Duration::from_secs(30));
        assert_eq!(config.resolve_timeout(), Duration::from_secs(10));
        assert!(config.data_dir.is_none());
        assert_eq!(config.upstream_base_url, "https://www.youtube.com");
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("concurrency = 8\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.cache_ttl_ms, 1000);
        assert_eq!(config.bind, "127.0.0.1:3000");
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
bind = "0.0.0.0:8080"
data_dir = "/srv/tubefeed"
concurrency = 2
cache_ttl_ms = 250
feed_timeout_secs = 5
resolve_timeout_secs = 3
avatar_timeout_ms = 900
upstream_base_url = "http://localhost:9000"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);
        assert_eq!(config.data_dir.as_deref(), Some(Path::new("/srv/tubefeed")));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.cache_ttl(), Duration::from_millis(250));
        assert_eq!(config.feed_timeout(), Duration::from_secs(5));
        assert_eq!(config.resolve_timeout(), Duration::from_secs(3));
        assert_eq!(config.avatar_timeout(), Duration::from_millis(900));
        assert_eq!(config.upstream_base_url, "http://localhost:9000");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("concurrency = 3\ntotally_fake_key = \"x\"\n");
        assert_eq!(Config::load(&path).unwrap().concurrency, 3);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("concurrency = \"many\"\n");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = Config {
            bind: "not-an-address".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.bind_addr(), Err(ConfigError::InvalidBind(_))));
    }
}
