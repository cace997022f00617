//! Configuration management for the strategy scheduler.
//!
//! Loads settings from environment variables and config files.

use crate::calendar::TradingCalendar;
use crate::model::{Destination, PayloadMode};
use crate::timing::WorkflowTier;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity (owner id) this process discovers and dispatches for.
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Store location settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Window discovery parameters
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Dispatch and workflow parameters
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Holiday calendar
    #[serde(default)]
    pub calendar: CalendarConfig,
    /// Ranked downstream destinations
    #[serde(default = "default_destinations")]
    pub destinations: Vec<Destination>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Budget for one store call, in seconds
    #[serde(default = "default_store_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Minutes ahead of the trigger time to discover, half-open window
    #[serde(default = "default_lookahead_minutes")]
    pub lookahead_minutes: u32,
    /// Retry attempts for transient minute-lookup failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Backoff between retries in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Workflow runtime tier: "standard" (24h waits) or "fast" (260s waits)
    #[serde(default = "default_tier")]
    pub tier: WorkflowTier,
    /// Payload strategy: "heavy" embeds strategies, "jit" passes ids
    #[serde(default = "default_payload_mode")]
    pub payload_mode: PayloadMode,
    /// Budget for one workflow start call, in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Holiday dates, `YYYY-MM-DD`
    #[serde(default)]
    pub holidays: Vec<String>,
}

// Default value functions
fn default_identity() -> String {
    "default".to_string()
}

fn default_db_path() -> String {
    "scheduler.db".to_string()
}

fn default_store_call_timeout_secs() -> u64 {
    5
}

fn default_lookahead_minutes() -> u32 {
    5
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_tier() -> WorkflowTier {
    WorkflowTier::Standard
}

fn default_payload_mode() -> PayloadMode {
    PayloadMode::JustInTime
}

fn default_call_timeout_secs() -> u64 {
    10
}

fn default_destinations() -> Vec<Destination> {
    vec![
        Destination {
            destination_id: "broker-a".to_string(),
            priority: 1,
            capacity: 100,
        },
        Destination {
            destination_id: "broker-b".to_string(),
            priority: 2,
            capacity: 75,
        },
        Destination {
            destination_id: "broker-c".to_string(),
            priority: 3,
            capacity: 50,
        },
    ]
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            call_timeout_secs: default_store_call_timeout_secs(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lookahead_minutes: default_lookahead_minutes(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tier: default_tier(),
            payload_mode: default_payload_mode(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            store: StoreConfig::default(),
            discovery: DiscoveryConfig::default(),
            dispatch: DispatchConfig::default(),
            calendar: CalendarConfig::default(),
            destinations: default_destinations(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("SCHED"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.identity.is_empty(), "identity must not be empty");

        anyhow::ensure!(
            self.discovery.lookahead_minutes >= 1,
            "lookahead_minutes must be at least 1"
        );

        anyhow::ensure!(
            self.discovery.retry_attempts >= 1,
            "retry_attempts must be at least 1"
        );

        anyhow::ensure!(
            self.store.call_timeout_secs >= 1,
            "store call_timeout_secs must be at least 1"
        );

        anyhow::ensure!(
            !self.destinations.is_empty(),
            "at least one destination is required"
        );

        for holiday in &self.calendar.holidays {
            anyhow::ensure!(
                NaiveDate::parse_from_str(holiday, "%Y-%m-%d").is_ok(),
                "holiday {:?} is not a YYYY-MM-DD date",
                holiday
            );
        }

        Ok(())
    }

    /// Build the trading calendar from the configured holiday list.
    /// Call [`validate`](Config::validate) first; unparseable dates are
    /// dropped here.
    pub fn trading_calendar(&self) -> TradingCalendar {
        TradingCalendar::with_holidays(
            self.calendar
                .holidays
                .iter()
                .filter_map(|h| NaiveDate::parse_from_str(h, "%Y-%m-%d").ok()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.discovery.lookahead_minutes, 5);
        assert_eq!(config.dispatch.payload_mode, PayloadMode::JustInTime);
        assert_eq!(config.destinations.len(), 3);
    }

    #[test]
    fn test_bad_holiday_rejected() {
        let mut config = Config::default();
        config.calendar.holidays.push("26-01-2024".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_store_timeout_rejected() {
        let mut config = Config::default();
        assert_eq!(config.store.call_timeout_secs, 5);
        config.store.call_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_destinations_rejected() {
        let mut config = Config::default();
        config.destinations.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_calendar_built_from_holidays() {
        let mut config = Config::default();
        config.calendar.holidays.push("2024-01-26".to_string());
        let calendar = config.trading_calendar();
        assert_eq!(calendar.holiday_count(), 1);
        assert!(!calendar.is_trading_day(NaiveDate::from_ymd_opt(2024, 1, 26).unwrap()));
    }

    #[test]
    fn test_config_deserializes_from_toml_fragment() {
        let raw = r#"
            identity = "desk-7"

            [dispatch]
            tier = "fast"
            payload_mode = "heavy"

            [[destinations]]
            destination_id = "zerodha-main"
            priority = 1
            capacity = 200
        "#;
        let config: Config = toml_from_str(raw);
        assert_eq!(config.identity, "desk-7");
        assert_eq!(config.dispatch.tier, WorkflowTier::Fast);
        assert_eq!(config.dispatch.payload_mode, PayloadMode::Heavy);
        assert_eq!(config.destinations.len(), 1);
    }

    fn toml_from_str(raw: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
