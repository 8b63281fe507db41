//! Application settings loading from config.toml
//!
//! Every section and key is optional; anything left out falls back to the
//! defaults below. The file itself is optional too.

use crate::core::{reservation::ReservationSettings, sweeper::SweeperSettings};
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `[database]` section
    pub database: DatabaseSection,
    /// `[reservations]` section
    pub reservations: ReservationSection,
    /// `[sweeper]` section
    pub sweeper: SweeperSection,
}

/// `[database]` section
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Connection URL; `DATABASE_URL` wins when set
    pub url: Option<String>,
}

/// `[reservations]` section
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReservationSection {
    /// Prefix of generated order codes
    pub order_code_prefix: String,
    /// Upper bound on a single service call, in seconds
    pub request_timeout_secs: u64,
}

impl Default for ReservationSection {
    fn default() -> Self {
        let defaults = ReservationSettings::default();
        Self {
            order_code_prefix: defaults.order_code_prefix,
            request_timeout_secs: defaults.request_timeout.as_secs(),
        }
    }
}

/// `[sweeper]` section
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SweeperSection {
    /// Seconds between sweeps
    pub interval_secs: u64,
    /// Age after which an unpaid reservation is reclaimed, in seconds
    pub staleness_threshold_secs: u64,
}

impl Default for SweeperSection {
    fn default() -> Self {
        let defaults = SweeperSettings::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            staleness_threshold_secs: defaults.staleness_threshold.as_secs(),
        }
    }
}

impl Config {
    /// Checks values that would make the engine misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.reservations.order_code_prefix.trim().is_empty() {
            return Err(Error::Config {
                message: "reservations.order_code_prefix cannot be empty".to_string(),
            });
        }
        if self.reservations.request_timeout_secs == 0 {
            return Err(Error::Config {
                message: "reservations.request_timeout_secs must be positive".to_string(),
            });
        }
        if self.sweeper.interval_secs == 0 || self.sweeper.staleness_threshold_secs == 0 {
            return Err(Error::Config {
                message: "sweeper intervals must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Runtime settings for the reservation service.
    #[must_use]
    pub fn reservation_settings(&self) -> ReservationSettings {
        ReservationSettings {
            order_code_prefix: self.reservations.order_code_prefix.trim().to_uppercase(),
            request_timeout: Duration::from_secs(self.reservations.request_timeout_secs),
        }
    }

    /// Runtime settings for the expiration sweeper.
    #[must_use]
    pub const fn sweeper_settings(&self) -> SweeperSettings {
        SweeperSettings {
            interval: Duration::from_secs(self.sweeper.interval_secs),
            staleness_threshold: Duration::from_secs(self.sweeper.staleness_threshold_secs),
        }
    }
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file exists but cannot be read
/// - The TOML syntax is invalid
/// - A value fails [`Config::validate`]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse {}: {e}", path.display()),
    })?;
    config.validate()?;
    debug!(?config, "Loaded configuration");
    Ok(config)
}

/// Loads configuration from the default location (./config.toml)
pub fn load_default_config() -> Result<Config> {
    load_config("config.toml")
}
