//! Package entity - A business's lot of surplus inventory offered at a discount.
//!
//! `quantity_available` is the single source of truth for stock. It is only ever
//! changed through the conditional updates in [`crate::core::ledger`].

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Package lot database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "packages")]
pub struct Model {
    /// Unique identifier for the lot
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Identifier of the owning business
    #[sea_orm(indexed)]
    pub business_id: String,
    /// Display title (e.g., "Bakery Bundle")
    pub title: String,
    /// Price before discount
    pub original_price: f64,
    /// Discounted price charged per unit
    pub offer_price: f64,
    /// Units that can still be reserved, never negative
    pub quantity_available: i32,
    /// Lifetime count of units handed over through completed orders
    pub total_orders: i32,
    /// Start of the pickup window (inclusive)
    pub pickup_start: DateTimeUtc,
    /// End of the pickup window (exclusive)
    pub pickup_end: DateTimeUtc,
    /// Whether the lot is listed
    pub is_active: bool,
    /// When the lot was created
    pub created_at: DateTimeUtc,
    /// When the lot was last modified
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// True once every unit is reserved.
    #[must_use]
    pub const fn is_sold_out(&self) -> bool {
        self.quantity_available <= 0
    }

    /// Discount as a whole percentage of the original price.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn discount_percent(&self) -> u32 {
        if self.original_price <= 0.0 {
            return 0;
        }
        let percent = (self.original_price - self.offer_price) / self.original_price * 100.0;
        percent.round().max(0.0) as u32
    }
}

/// Orders reference lots by id only; a lot may be removed while orders
/// against it still exist.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
