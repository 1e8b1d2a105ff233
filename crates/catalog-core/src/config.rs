//! Layered, immutable startup configuration.
//!
//! All thresholds the components consult (scanner weights, fusion
//! coefficients, cache TTLs, retry policy) live in one `CoreConfig` built
//! once at startup and passed by reference — no process-wide mutable
//! singletons, per the "Global configuration" design note.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub fenced_code_discount: f64,
    pub table_discount: f64,
    pub block_confidence_threshold: f64,
    pub block_high_weight_threshold: f64,
    pub review_weight_threshold: f64,
    pub user_pattern_max_len: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            fenced_code_discount: 0.4,
            table_discount: 0.6,
            block_confidence_threshold: 0.6,
            block_high_weight_threshold: 40.0,
            review_weight_threshold: 25.0,
            user_pattern_max_len: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub lexical_weight: f64,
    pub semantic_weight: f64,
    pub quality_weight: f64,
    pub recency_weight: f64,
    pub k_lex: usize,
    pub k_sem: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            lexical_weight: 0.4,
            semantic_weight: 0.4,
            quality_weight: 0.15,
            recency_weight: 0.05,
            k_lex: 200,
            k_sem: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub search_ttl: Duration,
    pub recommend_ttl: Duration,
    pub skill_detail_ttl: Duration,
    pub compare_ttl: Duration,
    pub l1_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl: Duration::from_secs(15 * 60),
            recommend_ttl: Duration::from_secs(15 * 60),
            skill_detail_ttl: Duration::from_secs(60 * 60),
            compare_ttl: Duration::from_secs(60 * 60),
            l1_max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_secs: u64,
    pub factor: f64,
    pub cap_secs: u64,
    pub jitter_pct: f64,
    pub max_consecutive_failures: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { base_delay_secs: 1, factor: 2.0, cap_secs: 300, jitter_pct: 0.2, max_consecutive_failures: 10 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    pub ttl_days: i64,
    pub required_approvals_critical: u32,
    pub required_approvals_default: u32,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self { ttl_days: 30, required_approvals_critical: 2, required_approvals_default: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_readers: u32,
    pub max_writers: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { database_url: "sqlite::memory:".to_string(), max_readers: 16, max_writers: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { provider: "fastembed".to_string(), dimensions: 384 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_sources: usize,
    pub per_source_queue_capacity: usize,
    pub interactive_overload_wait_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_concurrent_sources: 4, per_source_queue_capacity: 64, interactive_overload_wait_ms: 2_000 }
    }
}

/// Single immutable configuration value, assembled once at startup from
/// defaults layered with an optional TOML file and environment overrides,
/// then passed by `Arc` to every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub scanner: ScannerConfig,
    pub fusion: FusionConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub quarantine: QuarantineConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub concurrency: ConcurrencyConfig,
}

impl CoreConfig {
    /// Layer: defaults, then an optional TOML file, then environment
    /// variables prefixed `CATALOG_`. Mirrors the runtime's own
    /// defaults-then-file-then-env precedence for job configuration.
    pub fn load(toml_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
                config = toml::from_str(&raw).map_err(ConfigError::Toml)?;
            }
        }

        if let Ok(url) = std::env::var("CATALOG_DATABASE_URL") {
            config.store.database_url = url;
        }
        if let Ok(dim) = std::env::var("CATALOG_EMBEDDING_DIMENSIONS") {
            config.embedding.dimensions = dim.parse().map_err(|_| ConfigError::InvalidValue("CATALOG_EMBEDDING_DIMENSIONS"))?;
        }

        Ok(config)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_coefficients() {
        let config = CoreConfig::default();
        assert_eq!(config.fusion.lexical_weight, 0.4);
        assert_eq!(config.fusion.semantic_weight, 0.4);
        assert_eq!(config.fusion.quality_weight, 0.15);
        assert_eq!(config.fusion.recency_weight, 0.05);
        assert_eq!(config.quarantine.required_approvals_critical, 2);
        assert_eq!(config.quarantine.required_approvals_default, 1);
        assert_eq!(config.retry.base_delay_secs, 1);
        assert_eq!(config.retry.factor, 2.0);
    }

    #[test]
    fn load_without_file_returns_defaults() {
        let config = CoreConfig::load(None).unwrap();
        assert_eq!(config.embedding.dimensions, 384);
    }
}
