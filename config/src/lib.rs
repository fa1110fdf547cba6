//! Centralized configuration
//!
//! One typed `AppConfig` assembled from serde defaults and environment
//! overrides, validated before any service starts.

use audit_relay_archival::ArchiveConfig;
use audit_relay_delivery_health::HealthThresholds;
use audit_relay_dlq::DlqSettings;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {variable}: {value}")]
    InvalidEnvValue { variable: String, value: String },

    #[error("health thresholds must be ordered: degraded ({degraded}) <= unhealthy ({unhealthy}) <= disable ({disable})")]
    UnorderedThresholds {
        degraded: u32,
        unhealthy: u32,
        disable: u32,
    },

    #[error("compression level must be 0..=9, got {0}")]
    CompressionLevelOutOfRange(u32),

    #[error("dlq archive_after_days ({archive_after}) must not exceed max_retention_days ({max_retention})")]
    DlqWindowsInverted {
        archive_after: i64,
        max_retention: i64,
    },
}

/// Full application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database URL; absent means storage-backed commands cannot run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default)]
    pub health: HealthThresholds,
    #[serde(default)]
    pub dlq: DlqSettings,
    #[serde(default)]
    pub archival: ArchiveConfig,
}

impl AppConfig {
    /// Build from the environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            database_url: std::env::var("POSTGRES_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .ok(),
            ..Self::default()
        };

        if let Some(threshold) = read_env("AUDIT_RELAY_DLQ_ALERT_THRESHOLD")? {
            config.dlq.alert_threshold = threshold;
        }
        if let Some(days) = read_env("AUDIT_RELAY_DLQ_MAX_RETENTION_DAYS")? {
            config.dlq.max_retention_days = days;
        }
        if let Some(level) = read_env("AUDIT_RELAY_COMPRESSION_LEVEL")? {
            config.archival.compression_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let h = &self.health;
        if !(h.degraded_threshold <= h.unhealthy_threshold
            && h.unhealthy_threshold <= h.disable_threshold)
        {
            return Err(ConfigError::UnorderedThresholds {
                degraded: h.degraded_threshold,
                unhealthy: h.unhealthy_threshold,
                disable: h.disable_threshold,
            });
        }
        if self.archival.compression_level > 9 {
            return Err(ConfigError::CompressionLevelOutOfRange(
                self.archival.compression_level,
            ));
        }
        if let Some(archive_after) = self.dlq.archive_after_days {
            if archive_after > self.dlq.max_retention_days {
                return Err(ConfigError::DlqWindowsInverted {
                    archive_after,
                    max_retention: self.dlq.max_retention_days,
                });
            }
        }
        Ok(())
    }
}

fn read_env<T: FromStr>(variable: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(variable) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue {
                variable: variable.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
