use crate::error::{ConfigError, CoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Run configuration. One explicit structure with an enumerated option set:
/// unknown keys in a config file are a startup error, not silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Upper bound on comments selected for enrichment
    pub max_comments_process: usize,
    /// Minimum quality score (0-10) for the retained set
    pub comment_quality_threshold: f64,
    /// Cache entry lifetime in hours; 0 disables reuse, at most one year
    pub cache_ttl_hours: f64,
    /// Comments per enrichment request
    pub enrichment_batch_size: usize,
    /// Time budget for the enrichment phase, at most one day. Synthesis
    /// gets its own equal allowance.
    pub run_timeout_seconds: f64,
    /// Similarity (0-1) at which two bodies count as near-duplicates
    pub similarity_threshold: f64,
    /// Word count past which longer comments stop scoring higher
    pub length_ceiling_words: usize,
    /// Concurrent enrichment batches in flight
    pub enrichment_concurrency: usize,
    /// Number of top clusters reported as insights
    pub max_insights: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_comments_process: 100,
            comment_quality_threshold: 2.0,
            cache_ttl_hours: 24.0,
            enrichment_batch_size: 20,
            run_timeout_seconds: 300.0,
            similarity_threshold: 0.8,
            length_ceiling_words: 120,
            enrichment_concurrency: 3,
            max_insights: 5,
        }
    }
}

/// Upper bound on `cache_ttl_hours` (one year).
const MAX_CACHE_TTL_HOURS: f64 = 8760.0;

/// Upper bound on `run_timeout_seconds` (one day).
const MAX_RUN_TIMEOUT_SECONDS: f64 = 86_400.0;

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_comments_process == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_comments_process".to_string(),
                value: "0".to_string(),
            });
        }
        if !(0.0..=10.0).contains(&self.comment_quality_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "comment_quality_threshold".to_string(),
                value: self.comment_quality_threshold.to_string(),
            });
        }
        // Both duration fields must stay convertible to std::time::Duration,
        // so NaN, infinities, and oversized finite values are all rejected
        if !(0.0..=MAX_CACHE_TTL_HOURS).contains(&self.cache_ttl_hours) {
            return Err(ConfigError::InvalidValue {
                field: "cache_ttl_hours".to_string(),
                value: self.cache_ttl_hours.to_string(),
            });
        }
        if self.enrichment_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "enrichment_batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        if !(self.run_timeout_seconds > 0.0
            && self.run_timeout_seconds <= MAX_RUN_TIMEOUT_SECONDS)
        {
            return Err(ConfigError::InvalidValue {
                field: "run_timeout_seconds".to_string(),
                value: self.run_timeout_seconds.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "similarity_threshold".to_string(),
                value: self.similarity_threshold.to_string(),
            });
        }
        if self.length_ceiling_words == 0 {
            return Err(ConfigError::InvalidValue {
                field: "length_ceiling_words".to_string(),
                value: "0".to_string(),
            });
        }
        if self.enrichment_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "enrichment_concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        if self.max_insights == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_insights".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.cache_ttl_hours * 3600.0)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.run_timeout_seconds)
    }

    /// Load and validate a configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, CoreError> {
        let contents =
            std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                path: path.display().to_string(),
            })?;
        let config: AnalysisConfig =
            toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let config = AnalysisConfig {
            comment_quality_threshold: 11.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "comment_quality_threshold"
        ));
    }

    #[test]
    fn test_similarity_threshold_range() {
        let config = AnalysisConfig {
            similarity_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = AnalysisConfig {
            enrichment_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let parsed: Result<AnalysisConfig, _> =
            toml::from_str("max_comments_process = 50\nshiny_new_option = true\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AnalysisConfig = toml::from_str("max_comments_process = 50\n").unwrap();
        assert_eq!(config.max_comments_process, 50);
        assert_eq!(config.enrichment_batch_size, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_ttl_rejected() {
        let config = AnalysisConfig {
            cache_ttl_hours: 1e30,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "cache_ttl_hours"
        ));
    }

    #[test]
    fn test_oversized_run_timeout_rejected() {
        let config = AnalysisConfig {
            run_timeout_seconds: 1e30,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "run_timeout_seconds"
        ));
    }

    #[test]
    fn test_maximal_durations_validate_and_convert() {
        let config = AnalysisConfig {
            cache_ttl_hours: 8760.0,
            run_timeout_seconds: 86_400.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), Duration::from_secs(8760 * 3600));
        assert_eq!(config.run_timeout(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_cache_ttl_conversion() {
        let config = AnalysisConfig {
            cache_ttl_hours: 0.5,
            ..Default::default()
        };
        assert_eq!(config.cache_ttl(), Duration::from_secs(1800));
    }
}
