//! Order entity - One buyer's reservation of units from a package lot.
//!
//! Orders start as `RESERVED`/`PENDING`. Buyer cancellations and system expiry
//! delete the row (the audit copy lives in the disposition archive), while
//! completed and business-cancelled orders stay here permanently.

use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Units are held, payment not yet confirmed
    #[sea_orm(string_value = "RESERVED")]
    Reserved,
    /// Payment confirmed, awaiting pickup
    #[sea_orm(string_value = "PAID")]
    Paid,
    /// Business has packed the order
    #[sea_orm(string_value = "READY_FOR_PICKUP")]
    ReadyForPickup,
    /// Handed over to the buyer
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    /// Reclaimed by the sweeper
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
    /// Cancelled after payment
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

/// Payment state that moves together with [`OrderStatus`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// No payment confirmation yet
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Payment confirmation recorded
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    /// Money returned after a business cancellation
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
}

/// Frozen copy of the lot as it looked when the order was reserved.
///
/// Written once at reservation time and never updated, so history keeps showing
/// the price and pickup window the buyer agreed to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct PackageSnapshot {
    /// Lot title at reservation time
    pub title: String,
    /// Units reserved
    pub quantity: i32,
    /// Price before discount
    pub original_price: f64,
    /// Discounted unit price charged
    pub offer_price: f64,
    /// Pickup window start
    pub pickup_start: DateTimeUtc,
    /// Pickup window end
    pub pickup_end: DateTimeUtc,
}

impl PackageSnapshot {
    /// Money saved against the original price for the whole order.
    #[must_use]
    pub fn saved_amount(&self) -> f64 {
        (self.original_price - self.offer_price) * f64::from(self.quantity)
    }
}

/// Order database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    /// Internal row identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Human-readable order code shown to buyers (e.g., `KAM-7GQ2XK4P1Z`)
    #[sea_orm(unique)]
    pub order_code: String,
    /// Six-digit PIN checked at pickup
    #[sea_orm(unique)]
    pub pin_code: String,
    /// Buyer who made the reservation
    #[sea_orm(indexed)]
    pub buyer_id: String,
    /// Buyer phone number at reservation time
    pub buyer_phone: String,
    /// Business that owns the lot
    #[sea_orm(indexed)]
    pub business_id: String,
    /// Reserved lot
    pub package_id: i64,
    /// Lot details frozen at reservation time
    #[sea_orm(column_type = "Json")]
    pub package_snapshot: PackageSnapshot,
    /// Units reserved, at least 1
    pub quantity: i32,
    /// `offer_price * quantity`
    pub amount: f64,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Payment channel reported by the payment confirmation
    pub payment_method: Option<String>,
    /// External payment reference
    pub payment_intent_id: Option<String>,
    /// Set while the order is being finalized; blocks expiry and buyer cancellation
    pub locked: bool,
    /// When the units were reserved
    pub reserved_at: DateTimeUtc,
    /// When payment was confirmed
    pub paid_at: Option<DateTimeUtc>,
    /// When the order was handed over
    pub completed_at: Option<DateTimeUtc>,
    /// When the order was cancelled by the business
    pub cancelled_at: Option<DateTimeUtc>,
    /// Reason given by the business for cancelling
    pub cancellation_reason: Option<String>,
    /// Staff member who completed the pickup
    pub completed_by: Option<String>,
    /// Last write to this row
    pub updated_at: DateTimeUtc,
}

/// No foreign key to `packages`; release paths tolerate a missing lot
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
