//! Runtime configuration for docstore-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Every component takes its own section, so a service can build one cache per
//! entity type from the same [`Config`].

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Command-line arguments for the demo driver.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "docstore-cache",
    about = "Exercise the cached document-store access layer against an in-memory store"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Number of documents to seed into the demo collection.
    #[arg(short, long, default_value_t = 1234)]
    pub documents: usize,

    /// Page size override for the paginated loader.
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TTL cache settings.
    pub cache: CacheConfig,

    /// Prefetch scheduler settings.
    pub prefetch: PrefetchConfig,

    /// Paginated loader settings.
    pub pagination: PaginationConfig,

    /// Batch executor settings.
    pub batch: BatchConfig,
}

/// TTL cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds an entry stays live after it was stored.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Prefetch scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Default per-task timeout in milliseconds.
    pub timeout_ms: u64,

    /// Remove a buffered result the first time a demand read takes it.
    pub consume_on_read: bool,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            consume_on_read: true,
        }
    }
}

impl PrefetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Paginated loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Items requested per page.
    pub page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { page_size: 20 }
    }
}

/// Batch executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum operations per committed transaction.
    pub max_chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: crate::batch::DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the components cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.pagination.page_size == 0 {
            return Err(Error::InvalidConfig(
                "pagination.page_size must be at least 1".into(),
            ));
        }
        if self.batch.max_chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "batch.max_chunk_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(300));
        assert_eq!(cfg.prefetch.timeout(), Duration::from_secs(10));
        assert!(cfg.prefetch.consume_on_read);
        assert_eq!(cfg.pagination.page_size, 20);
        assert_eq!(cfg.batch.max_chunk_size, 500);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cache": {{ "ttl_secs": 30 }}, "batch": {{ "max_chunk_size": 100 }} }}"#)
            .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.cache.ttl_secs, 30);
        assert_eq!(cfg.batch.max_chunk_size, 100);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.pagination.page_size, 20);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.cache.ttl_secs, 300);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut cfg = Config::default();
        cfg.batch.max_chunk_size = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }
}
