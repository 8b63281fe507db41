//! Inventory ledger - The single source of truth for lot stock.
//!
//! Stock is only changed with single conditional `UPDATE` statements
//! (`quantity_available = quantity_available - n WHERE quantity_available >= n`),
//! never by reading a value and writing it back. Two callers racing for the last
//! unit therefore cannot both succeed: the second update matches zero rows.
//!
//! All functions are generic over [`ConnectionTrait`] so they can run inside the
//! caller's transaction.

use crate::{
    entities::{Package, package},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{Set, prelude::*, sea_query::Expr};
use tracing::{debug, warn};

/// Input for creating a new lot.
#[derive(Debug, Clone)]
pub struct NewPackage {
    /// Owning business
    pub business_id: String,
    /// Display title
    pub title: String,
    /// Price before discount
    pub original_price: f64,
    /// Discounted unit price
    pub offer_price: f64,
    /// Initial stock
    pub quantity_available: i32,
    /// Pickup window start
    pub pickup_start: DateTime<Utc>,
    /// Pickup window end
    pub pickup_end: DateTime<Utc>,
}

impl NewPackage {
    fn validate(&self) -> Result<()> {
        if self.business_id.trim().is_empty() {
            return Err(Error::validation("business_id is required"));
        }
        if self.title.trim().is_empty() {
            return Err(Error::validation("Package title cannot be empty"));
        }
        if !self.original_price.is_finite() || self.original_price < 0.0 {
            return Err(Error::validation("original_price must be a non-negative amount"));
        }
        if !self.offer_price.is_finite() || self.offer_price < 0.0 {
            return Err(Error::validation("offer_price must be a non-negative amount"));
        }
        if self.offer_price > self.original_price {
            return Err(Error::validation(
                "offer_price cannot exceed original_price",
            ));
        }
        if self.quantity_available < 0 {
            return Err(Error::validation("quantity_available cannot be negative"));
        }
        if self.pickup_start >= self.pickup_end {
            return Err(Error::validation("pickup_start must be before pickup_end"));
        }
        Ok(())
    }
}

/// Creates a new, active lot after validating prices, stock and pickup window.
pub async fn create_package<C>(db: &C, new_package: NewPackage) -> Result<package::Model>
where
    C: ConnectionTrait,
{
    new_package.validate()?;

    let now = Utc::now();
    let package = package::ActiveModel {
        business_id: Set(new_package.business_id.trim().to_string()),
        title: Set(new_package.title.trim().to_string()),
        original_price: Set(new_package.original_price),
        offer_price: Set(new_package.offer_price),
        quantity_available: Set(new_package.quantity_available),
        total_orders: Set(0),
        pickup_start: Set(new_package.pickup_start),
        pickup_end: Set(new_package.pickup_end),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    package.insert(db).await.map_err(Into::into)
}

/// Finds a lot by its ID.
pub async fn get_package<C>(db: &C, package_id: i64) -> Result<Option<package::Model>>
where
    C: ConnectionTrait,
{
    Package::find_by_id(package_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Takes `quantity` units out of an active lot.
///
/// The check and the decrement are one statement, so concurrent callers are
/// serialized by the database. Returns the lot as it looks after the decrement.
///
/// # Errors
/// - [`Error::NotFound`] if the lot does not exist or is inactive
/// - [`Error::InsufficientStock`] if fewer than `quantity` units are left
pub async fn reserve_stock<C>(db: &C, package_id: i64, quantity: i32) -> Result<package::Model>
where
    C: ConnectionTrait,
{
    if quantity < 1 {
        return Err(Error::validation("Quantity must be at least 1"));
    }

    let result = Package::update_many()
        .col_expr(
            package::Column::QuantityAvailable,
            Expr::col(package::Column::QuantityAvailable).sub(quantity),
        )
        .col_expr(package::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(package::Column::Id.eq(package_id))
        .filter(package::Column::IsActive.eq(true))
        .filter(package::Column::QuantityAvailable.gte(quantity))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return match get_package(db, package_id).await? {
            Some(package) if package.is_active => {
                debug!(
                    package_id,
                    available = package.quantity_available,
                    requested = quantity,
                    "Reservation rejected for insufficient stock"
                );
                Err(Error::InsufficientStock {
                    package_id,
                    requested: quantity,
                })
            }
            _ => Err(Error::not_found(format!(
                "Package {package_id} not found or inactive"
            ))),
        };
    }

    get_package(db, package_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Package {package_id} not found")))
}

/// Returns `quantity` units to a lot.
///
/// # Errors
/// Returns [`Error::NotFound`] if the lot no longer exists.
pub async fn restore_stock<C>(db: &C, package_id: i64, quantity: i32) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Package::update_many()
        .col_expr(
            package::Column::QuantityAvailable,
            Expr::col(package::Column::QuantityAvailable).add(quantity),
        )
        .col_expr(package::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(package::Column::Id.eq(package_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        warn!(package_id, quantity, "Cannot restore stock to a missing package");
        return Err(Error::not_found(format!(
            "Associated package {package_id} not found"
        )));
    }
    Ok(())
}

/// Adds `quantity` to the lot's lifetime handed-over counter.
///
/// Stock is untouched: completion consumes units that were already reserved.
pub async fn record_completion<C>(db: &C, package_id: i64, quantity: i32) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Package::update_many()
        .col_expr(
            package::Column::TotalOrders,
            Expr::col(package::Column::TotalOrders).add(quantity),
        )
        .col_expr(package::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(package::Column::Id.eq(package_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(Error::not_found(format!(
            "Associated package {package_id} not found"
        )));
    }
    Ok(())
}

/// Activates or deactivates a lot. Inactive lots cannot be reserved.
pub async fn set_package_active<C>(db: &C, package_id: i64, is_active: bool) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Package::update_many()
        .col_expr(package::Column::IsActive, Expr::value(is_active))
        .col_expr(package::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(package::Column::Id.eq(package_id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(Error::not_found(format!("Package {package_id} not found")));
    }
    Ok(())
}
