//! Order record store - Reads and conditional writes on the `orders` table.
//!
//! Every status-changing write goes through [`update_matching`], which applies
//! the change only where the full [`OrderMatch`] predicate still holds. A result
//! of zero rows means another operation got there first (or the order was never
//! in that state) and the caller must not continue.

use crate::{
    entities::{Order, OrderStatus, PackageSnapshot, PaymentStatus, order},
    errors::Result,
};
use chrono::{DateTime, Utc};
use sea_orm::{Condition, QueryOrder, Set, prelude::*};

/// Predicate an order must satisfy for an operation to apply to it.
#[derive(Debug, Clone, Copy)]
pub struct OrderMatch<'a> {
    /// Accepted lifecycle statuses
    pub statuses: &'a [OrderStatus],
    /// Required payment status
    pub payment_status: PaymentStatus,
    /// Only match orders that are not being finalized
    pub unlocked_only: bool,
    /// Only match orders owned by this buyer
    pub buyer_id: Option<&'a str>,
    /// Only match orders reserved and last touched before this instant
    pub stale_before: Option<DateTime<Utc>>,
}

impl OrderMatch<'static> {
    /// A reservation that has not been paid and is not being finalized.
    pub const UNPAID_RESERVATION: Self = Self {
        statuses: &[OrderStatus::Reserved],
        payment_status: PaymentStatus::Pending,
        unlocked_only: true,
        buyer_id: None,
        stale_before: None,
    };

    /// A paid order waiting to be handed over.
    pub const AWAITING_PICKUP: Self = Self {
        statuses: &[OrderStatus::Paid, OrderStatus::ReadyForPickup],
        payment_status: PaymentStatus::Confirmed,
        unlocked_only: false,
        buyer_id: None,
        stale_before: None,
    };

    /// A paid order the business has not yet packed.
    pub const PAID: Self = Self {
        statuses: &[OrderStatus::Paid],
        payment_status: PaymentStatus::Confirmed,
        unlocked_only: false,
        buyer_id: None,
        stale_before: None,
    };
}

impl<'a> OrderMatch<'a> {
    /// Restricts the match to one buyer's orders.
    #[must_use]
    pub const fn owned_by(self, buyer_id: &'a str) -> Self {
        Self {
            buyer_id: Some(buyer_id),
            ..self
        }
    }

    /// Restricts the match to orders untouched since `cutoff`.
    #[must_use]
    pub const fn stale_before(self, cutoff: DateTime<Utc>) -> Self {
        Self {
            stale_before: Some(cutoff),
            ..self
        }
    }

    fn condition(&self) -> Condition {
        let mut condition = Condition::all()
            .add(order::Column::Status.is_in(self.statuses.iter().copied()))
            .add(order::Column::PaymentStatus.eq(self.payment_status));
        if self.unlocked_only {
            condition = condition.add(order::Column::Locked.eq(false));
        }
        if let Some(buyer_id) = self.buyer_id {
            condition = condition.add(order::Column::BuyerId.eq(buyer_id));
        }
        if let Some(cutoff) = self.stale_before {
            condition = condition
                .add(order::Column::ReservedAt.lt(cutoff))
                .add(order::Column::UpdatedAt.lt(cutoff));
        }
        condition
    }
}

/// Everything needed to write a freshly reserved order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    /// Generated order code
    pub order_code: String,
    /// Generated pickup PIN
    pub pin_code: String,
    /// Buyer making the reservation
    pub buyer_id: String,
    /// Buyer phone at reservation time
    pub buyer_phone: String,
    /// Business owning the lot
    pub business_id: String,
    /// Reserved lot
    pub package_id: i64,
    /// Frozen lot details
    pub package_snapshot: PackageSnapshot,
    /// Units reserved
    pub quantity: i32,
    /// Total charged
    pub amount: f64,
    /// Reservation instant
    pub reserved_at: DateTime<Utc>,
}

/// Inserts a new order in `RESERVED`/`PENDING`, unlocked.
pub async fn insert_order<C>(db: &C, new_order: NewOrder) -> Result<order::Model>
where
    C: ConnectionTrait,
{
    let order = order::ActiveModel {
        order_code: Set(new_order.order_code),
        pin_code: Set(new_order.pin_code),
        buyer_id: Set(new_order.buyer_id),
        buyer_phone: Set(new_order.buyer_phone),
        business_id: Set(new_order.business_id),
        package_id: Set(new_order.package_id),
        package_snapshot: Set(new_order.package_snapshot),
        quantity: Set(new_order.quantity),
        amount: Set(new_order.amount),
        status: Set(OrderStatus::Reserved),
        payment_status: Set(PaymentStatus::Pending),
        payment_method: Set(None),
        payment_intent_id: Set(None),
        locked: Set(false),
        reserved_at: Set(new_order.reserved_at),
        paid_at: Set(None),
        completed_at: Set(None),
        cancelled_at: Set(None),
        cancellation_reason: Set(None),
        completed_by: Set(None),
        updated_at: Set(new_order.reserved_at),
        ..Default::default()
    };
    order.insert(db).await.map_err(Into::into)
}

/// Finds an order by its code regardless of state.
pub async fn find_by_code<C>(db: &C, order_code: &str) -> Result<Option<order::Model>>
where
    C: ConnectionTrait,
{
    Order::find()
        .filter(order::Column::OrderCode.eq(order_code))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Applies `changes` to the order with `order_code` if it still satisfies
/// `predicate`. Returns the number of rows changed (0 or 1).
pub async fn update_matching<C>(
    db: &C,
    order_code: &str,
    predicate: OrderMatch<'_>,
    changes: order::ActiveModel,
) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = Order::update_many()
        .set(changes)
        .filter(order::Column::OrderCode.eq(order_code))
        .filter(predicate.condition())
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Deletes an order row. Used only after its disposition has been archived.
pub async fn delete_order<C>(db: &C, order_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = Order::delete_by_id(order_id).exec(db).await?;
    Ok(result.rows_affected)
}

/// Lists every order matching `predicate`, oldest reservation first.
pub async fn list_matching<C>(db: &C, predicate: OrderMatch<'_>) -> Result<Vec<order::Model>>
where
    C: ConnectionTrait,
{
    Order::find()
        .filter(predicate.condition())
        .order_by_asc(order::Column::ReservedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Whether any order already uses `order_code`.
pub async fn order_code_in_use<C>(db: &C, order_code: &str) -> Result<bool>
where
    C: ConnectionTrait,
{
    Ok(find_by_code(db, order_code).await?.is_some())
}

/// Whether any order already uses `pin_code`.
pub async fn pin_code_in_use<C>(db: &C, pin_code: &str) -> Result<bool>
where
    C: ConnectionTrait,
{
    let existing = Order::find()
        .filter(order::Column::PinCode.eq(pin_code))
        .one(db)
        .await?;
    Ok(existing.is_some())
}

/// Orders of a business in the given statuses, newest first by `order_by`.
pub async fn list_for_business<C>(
    db: &C,
    business_id: &str,
    statuses: &[OrderStatus],
    payment_status: Option<PaymentStatus>,
    order_by: order::Column,
) -> Result<Vec<order::Model>>
where
    C: ConnectionTrait,
{
    let mut query = Order::find()
        .filter(order::Column::BusinessId.eq(business_id))
        .filter(order::Column::Status.is_in(statuses.iter().copied()));
    if let Some(payment_status) = payment_status {
        query = query.filter(order::Column::PaymentStatus.eq(payment_status));
    }
    query
        .order_by_desc(order_by)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Orders of a buyer in the given statuses, newest first by `order_by`.
pub async fn list_for_buyer<C>(
    db: &C,
    buyer_id: &str,
    statuses: &[OrderStatus],
    payment_status: Option<PaymentStatus>,
    order_by: order::Column,
) -> Result<Vec<order::Model>>
where
    C: ConnectionTrait,
{
    let mut query = Order::find()
        .filter(order::Column::BuyerId.eq(buyer_id))
        .filter(order::Column::Status.is_in(statuses.iter().copied()));
    if let Some(payment_status) = payment_status {
        query = query.filter(order::Column::PaymentStatus.eq(payment_status));
    }
    query
        .order_by_desc(order_by)
        .all(db)
        .await
        .map_err(Into::into)
}
