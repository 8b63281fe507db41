//! Order code and pickup PIN generation.
//!
//! Generation is behind the [`CodeGenerator`] trait so tests can inject
//! predictable codes. Uniqueness is checked against existing orders and the
//! disposition archive and retried a bounded number of times.

use crate::{
    core::{archive, orders},
    errors::{Error, Result},
};
use rand::{Rng, distributions::Alphanumeric, rngs::OsRng};
use sea_orm::ConnectionTrait;
use tracing::debug;

/// Number of random characters after the order code prefix.
pub const ORDER_CODE_LENGTH: usize = 10;

/// Draws attempted before giving up on finding an unused code.
pub const MAX_CODE_ATTEMPTS: usize = 5;

/// Source of order codes and pickup PINs.
pub trait CodeGenerator: Send + Sync {
    /// A candidate order code such as `KAM-7GQ2XK4P1Z`.
    fn order_code(&self, prefix: &str) -> String;

    /// A candidate six-digit PIN in `100000..=999999`.
    fn pin_code(&self) -> String;
}

/// Default generator backed by the operating system's CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn order_code(&self, prefix: &str) -> String {
        let suffix: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(ORDER_CODE_LENGTH)
            .map(char::from)
            .collect();
        format!("{prefix}-{}", suffix.to_uppercase())
    }

    fn pin_code(&self) -> String {
        OsRng.gen_range(100_000..=999_999_u32).to_string()
    }
}

/// Draws an order code and a PIN that no existing order uses.
///
/// # Errors
/// Returns [`Error::CodeGeneration`] after [`MAX_CODE_ATTEMPTS`] collisions.
pub async fn unique_codes<C>(
    db: &C,
    generator: &dyn CodeGenerator,
    prefix: &str,
) -> Result<(String, String)>
where
    C: ConnectionTrait,
{
    let order_code = unique_order_code(db, generator, prefix).await?;
    let pin_code = unique_pin_code(db, generator).await?;
    Ok((order_code, pin_code))
}

async fn unique_order_code<C>(db: &C, generator: &dyn CodeGenerator, prefix: &str) -> Result<String>
where
    C: ConnectionTrait,
{
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let candidate = generator.order_code(prefix);
        let taken = orders::order_code_in_use(db, &candidate).await?
            || archive::find_by_code(db, &candidate).await?.is_some();
        if !taken {
            return Ok(candidate);
        }
        debug!(attempt, "Order code collision, drawing again");
    }
    Err(Error::CodeGeneration {
        what: "order code",
        attempts: MAX_CODE_ATTEMPTS,
    })
}

async fn unique_pin_code<C>(db: &C, generator: &dyn CodeGenerator) -> Result<String>
where
    C: ConnectionTrait,
{
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let candidate = generator.pin_code();
        if !orders::pin_code_in_use(db, &candidate).await? {
            return Ok(candidate);
        }
        debug!(attempt, "PIN collision, drawing again");
    }
    Err(Error::CodeGeneration {
        what: "pin code",
        attempts: MAX_CODE_ATTEMPTS,
    })
}
