//! Disposition entity - Append-only archive of orders that ended without pickup.
//!
//! A row is written exactly once per cancelled or expired order. Rows are never
//! updated or deleted; `order_code` is unique so a second write for the same
//! order fails at the store.

use super::order::{PackageSnapshot, PaymentStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Who ended the order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispositionActor {
    /// The expiration sweeper reclaimed a stale reservation
    #[sea_orm(string_value = "SYSTEM")]
    System,
    /// The buyer cancelled before paying
    #[sea_orm(string_value = "BUYER")]
    Buyer,
    /// The business or an admin cancelled a paid order
    #[sea_orm(string_value = "BUSINESS")]
    Business,
}

/// Disposition database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dispositions")]
pub struct Model {
    /// Internal row identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Code of the order that was archived
    #[sea_orm(unique)]
    pub order_code: String,
    /// Buyer of the archived order
    #[sea_orm(indexed)]
    pub buyer_id: String,
    /// Business that owned the lot
    #[sea_orm(indexed)]
    pub business_id: String,
    /// Lot the units were returned to
    pub package_id: i64,
    /// Lot details frozen at reservation time
    #[sea_orm(column_type = "Json")]
    pub package_snapshot: PackageSnapshot,
    /// Order amount
    pub amount: f64,
    /// Units returned to the lot
    pub quantity: i32,
    /// Payment state at archive time
    pub payment_status: PaymentStatus,
    /// When the order was originally reserved
    pub reserved_at: DateTimeUtc,
    /// When this record was written
    pub archived_at: DateTimeUtc,
    /// Human-readable reason
    pub reason: String,
    /// Who ended the order
    pub actor: DispositionActor,
}

impl Model {
    /// True when the buyer cancelled the reservation themselves.
    #[must_use]
    pub fn cancelled_by_user(&self) -> bool {
        self.actor == DispositionActor::Buyer
    }

    /// True when the sweeper expired the reservation.
    #[must_use]
    pub fn expired_by_system(&self) -> bool {
        self.actor == DispositionActor::System
    }
}

/// Dispositions are standalone audit records
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
