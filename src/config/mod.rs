/// Database configuration and connection management
pub mod database;

/// Application settings loading from config.toml
pub mod settings;

use crate::core::{reservation::ReservationSettings, sweeper::SweeperSettings};
use crate::errors::Result;

/// Fully resolved configuration for the service process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,
    /// Reservation service settings
    pub reservations: ReservationSettings,
    /// Expiration sweeper settings
    pub sweeper: SweeperSettings,
}

/// Loads `config.toml` (if present) and applies environment overrides.
pub fn load_app_configuration() -> Result<AppConfig> {
    let file = settings::load_default_config()?;
    Ok(AppConfig {
        database_url: database::get_database_url(file.database.url.as_deref()),
        reservations: file.reservation_settings(),
        sweeper: file.sweeper_settings(),
    })
}
