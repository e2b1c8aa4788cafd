//! Client configuration loaded from TOML

use crate::error::{SyncError, SyncResult};
use crate::reconcile::SettlePolicy;
use crate::repository::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the sync layer and the CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub images: ImageCacheConfig,
    pub seats: SeatSyncConfig,
}

/// REST endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every endpoint path is resolved against
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/".to_string(),
            request_timeout_ms: 10_000,
            user_agent: format!("studycafe-sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Image cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageCacheConfig {
    /// Upper bound on image fetches running at the same time
    pub max_concurrent_fetches: usize,
    /// Decoded images larger than this on either side are scaled down
    pub max_dimension: u32,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            max_dimension: 1024,
        }
    }
}

/// How the reconciler waits between the delete phase and the rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SettleMode {
    /// Sleep for `settle_delay_ms`
    #[default]
    Delay,
    /// Poll the seat list until deleted seats are gone
    Confirm,
}

/// Seat layout saving settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeatSyncConfig {
    pub settle: SettleMode,
    pub settle_delay_ms: u64,
    pub confirm_poll_interval_ms: u64,
    pub confirm_max_polls: u32,
}

impl Default for SeatSyncConfig {
    fn default() -> Self {
        Self {
            settle: SettleMode::Delay,
            settle_delay_ms: 500,
            confirm_poll_interval_ms: 200,
            confirm_max_polls: 10,
        }
    }
}

impl SeatSyncConfig {
    pub fn settle_policy(&self) -> SettlePolicy {
        match self.settle {
            SettleMode::Delay => SettlePolicy::Delay(Duration::from_millis(self.settle_delay_ms)),
            SettleMode::Confirm => SettlePolicy::ConfirmDeletes {
                poll_interval: Duration::from_millis(self.confirm_poll_interval_ms),
                max_polls: self.confirm_max_polls,
            },
        }
    }
}

impl ClientConfig {
    /// Default location: `<config dir>/studycafe/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("studycafe")
            .join("config.toml")
    }

    /// Load configuration from file, falling back to defaults when it is missing
    pub async fn load_from_file(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SyncError::config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> SyncResult<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| SyncError::config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> SyncResult<()> {
        self.validate()?;

        let content = toml::to_string_pretty(self)
            .map_err(|e| SyncError::config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::config(format!("Failed to create config directory: {}", e)))?;
        }

        tokio::fs::write(path, content)
            .await
            .map_err(|e| SyncError::config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Validate configuration settings
    pub fn validate(&self) -> SyncResult<()> {
        url::Url::parse(&self.api.base_url)
            .map_err(|e| SyncError::config(format!("Invalid base_url '{}': {}", self.api.base_url, e)))?;

        if self.api.request_timeout_ms == 0 {
            return Err(SyncError::config("Request timeout must be greater than 0"));
        }

        if self.retry.max_attempts == 0 {
            return Err(SyncError::config("Retry max_attempts must be at least 1"));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(SyncError::config("Retry backoff_multiplier must be >= 1.0"));
        }

        if self.images.max_concurrent_fetches == 0 {
            return Err(SyncError::config("images.max_concurrent_fetches must be at least 1"));
        }

        if self.images.max_dimension == 0 {
            return Err(SyncError::config("images.max_dimension must be greater than 0"));
        }

        if self.seats.settle == SettleMode::Confirm && self.seats.confirm_max_polls == 0 {
            return Err(SyncError::config("seats.confirm_max_polls must be at least 1"));
        }

        Ok(())
    }
}
