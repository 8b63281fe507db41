//! Disposition archive - Append-only audit trail of orders that ended without pickup.
//!
//! Records are inserted inside the same transaction that restores stock, so an
//! archive entry exists if and only if the units went back to the lot.

use crate::{
    entities::{Disposition, DispositionActor, PaymentStatus, disposition, order},
    errors::Result,
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};

/// Reason recorded when the sweeper reclaims a stale reservation.
pub const SYSTEM_EXPIRY_REASON: &str =
    "This reservation was automatically cancelled after exceeding the allowed time without confirmation.";

/// Reason recorded when the buyer cancels an unpaid reservation.
pub const BUYER_CANCEL_REASON: &str = "Cancelled by user";

/// Archives `order` as ended by `actor`.
///
/// The unique index on `order_code` rejects a second record for the same order.
pub async fn record<C>(
    db: &C,
    order: &order::Model,
    actor: DispositionActor,
    reason: &str,
    payment_status: PaymentStatus,
    archived_at: DateTime<Utc>,
) -> Result<disposition::Model>
where
    C: ConnectionTrait,
{
    let entry = disposition::ActiveModel {
        order_code: Set(order.order_code.clone()),
        buyer_id: Set(order.buyer_id.clone()),
        business_id: Set(order.business_id.clone()),
        package_id: Set(order.package_id),
        package_snapshot: Set(order.package_snapshot.clone()),
        amount: Set(order.amount),
        quantity: Set(order.quantity),
        payment_status: Set(payment_status),
        reserved_at: Set(order.reserved_at),
        archived_at: Set(archived_at),
        reason: Set(reason.to_string()),
        actor: Set(actor),
        ..Default::default()
    };
    entry.insert(db).await.map_err(Into::into)
}

/// Finds the archive record for an order code.
pub async fn find_by_code<C>(db: &C, order_code: &str) -> Result<Option<disposition::Model>>
where
    C: ConnectionTrait,
{
    Disposition::find()
        .filter(disposition::Column::OrderCode.eq(order_code))
        .one(db)
        .await
        .map_err(Into::into)
}

/// All archive records of a business, newest first.
pub async fn list_for_business<C>(db: &C, business_id: &str) -> Result<Vec<disposition::Model>>
where
    C: ConnectionTrait,
{
    Disposition::find()
        .filter(disposition::Column::BusinessId.eq(business_id))
        .order_by_desc(disposition::Column::ArchivedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// All archive records of a buyer, newest first.
pub async fn list_for_buyer<C>(db: &C, buyer_id: &str) -> Result<Vec<disposition::Model>>
where
    C: ConnectionTrait,
{
    Disposition::find()
        .filter(disposition::Column::BuyerId.eq(buyer_id))
        .order_by_desc(disposition::Column::ArchivedAt)
        .all(db)
        .await
        .map_err(Into::into)
}
