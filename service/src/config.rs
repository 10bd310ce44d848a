//! Service configuration loading
//!
//! Loads `~/.config/ledger/ledger.toml` (or the file named by `LEDGER_CONFIG`).
//! A missing file is not an error: every key has a default.
//!
//! ```toml
//! db_path = "~/.local/share/ledger/ledger.db"
//! socket_path = "/run/user/1000/ledger.sock"
//!
//! [engine]
//! max_commit_attempts = 3
//! percentage_tolerance = 1e-9
//!
//! [cache]
//! gate_cache_enabled = true
//! ```

use std::path::{Path, PathBuf};

use ledger_engine::EngineConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// SQLite database file; `~/` is expanded
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Unix socket to listen on; defaults to the runtime dir
    #[serde(default)]
    pub socket_path: Option<String>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("ledger").join("ledger.db").to_string_lossy().into_owned())
        .unwrap_or_else(|| "ledger.db".to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Keep gates in memory after first read
    #[serde(default = "default_gate_cache_enabled")]
    pub gate_cache_enabled: bool,
}

fn default_gate_cache_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            gate_cache_enabled: default_gate_cache_enabled(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            socket_path: None,
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub const ENV_CONFIG_PATH: &'static str = "LEDGER_CONFIG";
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "ledger.toml";

    /// Load from the resolved config path, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Ledger config not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&contents)?;
        tracing::info!(path = %path.display(), "Ledger config loaded");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|d| d.join("ledger").join(Self::DEFAULT_CONFIG_FILENAME))
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(ConfigError::Invalid("db_path must not be empty".to_string()));
        }
        self.engine
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Database path with `~/` expanded
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.db_path)
    }

    /// Socket path with `~/` expanded, or the runtime-dir default
    pub fn resolved_socket_path(&self) -> PathBuf {
        self.socket_path
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(crate::default_socket_path)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ServiceConfig::parse("").expect("parse");
        assert_eq!(config.engine.max_commit_attempts, 3);
        assert_eq!(config.engine.percentage_tolerance, 1e-9);
        assert!(config.cache.gate_cache_enabled);
        assert!(config.socket_path.is_none());
        assert!(config.db_path.ends_with("ledger.db"));
    }

    #[test]
    fn full_document_parses() {
        let config = ServiceConfig::parse(
            r#"
            db_path = "/var/lib/ledger/ledger.db"
            socket_path = "/run/ledger.sock"

            [engine]
            max_commit_attempts = 5
            percentage_tolerance = 0.0001

            [cache]
            gate_cache_enabled = false
            "#,
        )
        .expect("parse");

        assert_eq!(config.resolved_db_path(), PathBuf::from("/var/lib/ledger/ledger.db"));
        assert_eq!(config.resolved_socket_path(), PathBuf::from("/run/ledger.sock"));
        assert_eq!(config.engine.max_commit_attempts, 5);
        assert!(!config.cache.gate_cache_enabled);
    }

    #[test]
    fn zero_commit_attempts_is_invalid() {
        let err = ServiceConfig::parse("[engine]\nmax_commit_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn oversized_tolerance_is_invalid() {
        let err = ServiceConfig::parse("[engine]\npercentage_tolerance = 0.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = ServiceConfig::parse("db_path = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn tilde_is_expanded() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_tilde("~/ledger.db"), home.join("ledger.db"));
        assert_eq!(expand_tilde("/abs/ledger.db"), PathBuf::from("/abs/ledger.db"));
    }

    #[test]
    fn load_from_path_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "[cache]\ngate_cache_enabled = false\n").expect("write");
        let config = ServiceConfig::load_from_path(&path).expect("load");
        assert!(!config.cache.gate_cache_enabled);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ServiceConfig::load_from_path(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
