//! Unified error type for the reservation engine.
//!
//! Every buyer- and business-facing operation returns [`Result`]. The variants map
//! one-to-one onto stable machine codes (see [`Error::code`]) so callers can branch
//! on "sold out" versus "already cancelled" without parsing messages.

use thiserror::Error;

/// All errors produced by the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed input.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// The entity is absent or does not match the state the operation requires.
    #[error("Not found: {message}")]
    NotFound {
        /// What could not be found
        message: String,
    },

    /// The lot does not hold enough units for the requested quantity.
    #[error("Insufficient stock for package {package_id}: requested {requested}")]
    InsufficientStock {
        /// Package that ran out
        package_id: i64,
        /// Quantity the buyer asked for
        requested: i32,
    },

    /// The pickup PIN did not match the order.
    #[error("Invalid pin code for order {order_code}")]
    InvalidPin {
        /// Order whose PIN was checked
        order_code: String,
    },

    /// The order was already processed or is being finalized concurrently.
    #[error("Order {order_code} not found, already processed, or locked by system")]
    Conflict {
        /// Order that could not be transitioned
        order_code: String,
    },

    /// The operation did not finish within the request timeout.
    #[error("Operation `{operation}` timed out after {seconds}s")]
    Timeout {
        /// Name of the operation that timed out
        operation: &'static str,
        /// Configured timeout in seconds
        seconds: u64,
    },

    /// Another writer held the database lock past the driver's busy timeout.
    #[error("Operation `{operation}` could not acquire the database lock")]
    Busy {
        /// Name of the operation that gave up
        operation: &'static str,
    },

    /// No unused order code or PIN could be drawn.
    #[error("Could not generate a unique {what} after {attempts} attempts")]
    CodeGeneration {
        /// Which code kind was being generated
        what: &'static str,
        /// How many draws were made
        attempts: usize,
    },

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem
        message: String,
    },

    /// Failure reported by the database driver.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O failure (config file, signal handling).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required environment variable was missing or not unicode.
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::NotFound`] error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Stable error code surfaced to clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::InvalidPin { .. } => "INVALID_PIN",
            Self::Conflict { .. } => "ORDER_CONFLICT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Busy { .. } => "DATABASE_BUSY",
            Self::CodeGeneration { .. } => "CODE_GENERATION_FAILED",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Database(_) | Self::Io(_) | Self::EnvVar(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether repeating the same call unchanged may succeed.
    ///
    /// Stock, PIN and validation failures need different input; conflicts need a
    /// fresh read of the order first.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Busy { .. } | Self::CodeGeneration { .. }
        )
    }

    /// Turns `SQLite` lock contention reported by the driver into [`Error::Busy`].
    #[must_use]
    pub fn with_contention(self, operation: &'static str) -> Self {
        match self {
            Self::Database(ref e) if is_lock_contention(e) => Self::Busy { operation },
            other => other,
        }
    }
}

/// `SQLITE_BUSY` and `SQLITE_LOCKED` messages as surfaced through sqlx.
const LOCK_CONTENTION_MESSAGES: &[&str] = &[
    "database is locked",
    "database table is locked",
    "database schema is locked",
];

fn is_lock_contention(err: &sea_orm::DbErr) -> bool {
    let message = err.to_string();
    LOCK_CONTENTION_MESSAGES
        .iter()
        .any(|needle| message.contains(needle))
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
