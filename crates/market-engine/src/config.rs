//! # Engine Configuration
//!
//! `market.toml`, overlaid with `MARKET_*` environment variables, over
//! built-in defaults.
//!
//! ```text
//!   defaults ──► market.toml ──► MARKET_DB_PATH, MARKET_POINTS_RATE,
//!                (platform config dir,   MARKET_REFERRAL_BONUS,
//!                 or an explicit path)   MARKET_MAX_COMMIT_ATTEMPTS
//!                                        (last one wins)
//! ```
//!
//! The `[store]` section only seeds the `site_settings` row of a fresh
//! database. Once the row exists, it is the source of truth and every
//! operation reads it inside its own transaction.
//!
//! ## Example
//! ```toml
//! [database]
//! path = "/var/lib/market/market.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [checkout]
//! max_commit_attempts = 3
//! retry_backoff_ms = 25
//!
//! [store]
//! company_name = "Fresh Market"
//! points_to_currency_rate = "0.10"
//! referral_bonus_amount = 50
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use market_core::{PointsRate, StoreSettings};
use market_db::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

/// Where and how to open the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Lock wait before a write reports busy (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Checkout Settings
// =============================================================================

/// Retry policy for atomic units that lose a lock race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSettings {
    /// Attempts before giving up with `ConcurrentUpdateConflict`.
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,

    /// Base pause before the first retry; grows exponentially with jitter.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_max_commit_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    25
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        CheckoutSettings {
            max_commit_attempts: default_max_commit_attempts(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

// =============================================================================
// Store Section
// =============================================================================

/// Initial store settings written to a fresh database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_company_name")]
    pub company_name: String,

    #[serde(default)]
    pub bank_name: String,

    #[serde(default)]
    pub bank_account_name: String,

    #[serde(default)]
    pub bank_account_number: String,

    /// Currency value of one point, as a decimal string ("0.10").
    #[serde(default = "default_points_rate")]
    pub points_to_currency_rate: String,

    #[serde(default = "default_referral_bonus")]
    pub referral_bonus_amount: i64,

    #[serde(default = "default_currency_code")]
    pub currency_code: String,
}

fn default_company_name() -> String {
    "Fresh Market".to_string()
}

fn default_points_rate() -> String {
    "0.10".to_string()
}

fn default_referral_bonus() -> i64 {
    market_core::DEFAULT_REFERRAL_BONUS
}

fn default_currency_code() -> String {
    "THB".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        StoreSection {
            company_name: default_company_name(),
            bank_name: String::new(),
            bank_account_name: String::new(),
            bank_account_number: String::new(),
            points_to_currency_rate: default_points_rate(),
            referral_bonus_amount: default_referral_bonus(),
            currency_code: default_currency_code(),
        }
    }
}

impl StoreSection {
    /// Converts to the settings structure passed to operations.
    pub fn to_settings(&self) -> EngineResult<StoreSettings> {
        let rate: PointsRate = self.points_to_currency_rate.parse().map_err(|e| {
            EngineError::Config(format!(
                "points_to_currency_rate '{}': {}",
                self.points_to_currency_rate, e
            ))
        })?;

        Ok(StoreSettings {
            company_name: self.company_name.clone(),
            bank_name: self.bank_name.clone(),
            bank_account_name: self.bank_account_name.clone(),
            bank_account_number: self.bank_account_number.clone(),
            points_to_currency_rate: rate,
            referral_bonus_amount: self.referral_bonus_amount,
            currency_code: self.currency_code.clone(),
        })
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub checkout: CheckoutSettings,

    #[serde(default)]
    pub store: StoreSection,
}

impl MarketConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (market.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading market config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
                config = toml::from_str(&contents)
                    .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load market config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Config(e.to_string()))?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(&path, contents).map_err(|e| EngineError::Config(e.to_string()))?;

        info!(?path, "Market config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.checkout.max_commit_attempts == 0 {
            return Err(EngineError::Config(
                "checkout.max_commit_attempts must be greater than 0".into(),
            ));
        }

        if self.store.referral_bonus_amount < 0 {
            return Err(EngineError::Config(
                "store.referral_bonus_amount must not be negative".into(),
            ));
        }

        self.store.to_settings()?;

        Ok(())
    }

    /// Applies overrides from a key lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("MARKET_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(rate) = lookup("MARKET_POINTS_RATE") {
            debug!(rate = %rate, "Overriding points rate from environment");
            self.store.points_to_currency_rate = rate;
        }

        if let Some(bonus) = lookup("MARKET_REFERRAL_BONUS") {
            match bonus.parse::<i64>() {
                Ok(b) => self.store.referral_bonus_amount = b,
                Err(_) => warn!(value = %bonus, "Ignoring non-numeric MARKET_REFERRAL_BONUS"),
            }
        }

        if let Some(attempts) = lookup("MARKET_MAX_COMMIT_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(a) => self.checkout.max_commit_attempts = a,
                Err(_) => {
                    warn!(value = %attempts, "Ignoring non-numeric MARKET_MAX_COMMIT_ATTEMPTS")
                }
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "freshmarket", "points")
            .map(|dirs| dirs.config_dir().join("market.toml"))
    }

    /// Resolves the database file path.
    ///
    /// ## Platform-Specific Defaults
    /// - **macOS**: `~/Library/Application Support/com.freshmarket.points/market.db`
    /// - **Linux**: `~/.local/share/points/market.db`
    pub fn database_path(&self) -> EngineResult<PathBuf> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }

        let dirs = directories::ProjectDirs::from("com", "freshmarket", "points")
            .ok_or_else(|| EngineError::Config("Could not determine app data directory".into()))?;
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).map_err(|e| EngineError::Config(e.to_string()))?;

        Ok(data_dir.join("market.db"))
    }

    /// Builds the pool configuration.
    pub fn db_config(&self) -> EngineResult<DbConfig> {
        Ok(DbConfig::new(self.database_path()?)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms)))
    }
}
