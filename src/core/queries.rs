//! Read-only projections of orders for business dashboards and buyer history.
//!
//! Nothing here mutates state. Derived display fields (time to pickup, order age)
//! are computed against a caller-supplied `now` so the formatting is deterministic
//! under test.

use crate::{
    core::{archive, orders, reviews::ReviewLookup},
    entities::{OrderStatus, PackageSnapshot, PaymentStatus, disposition, order},
    errors::Result,
};
use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

/// Pending orders at or below this many minutes to pickup are flagged urgent.
pub const URGENT_THRESHOLD_MINUTES: i64 = 15;

/// Statuses of a paid order that has not been picked up yet.
const AWAITING_PICKUP: &[OrderStatus] = &[OrderStatus::Paid, OrderStatus::ReadyForPickup];

/// Statuses counted towards a buyer's savings.
const SAVINGS_STATUSES: &[OrderStatus] = &[OrderStatus::Paid, OrderStatus::Completed];

/// Buyer details shown to the business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuyerSummary {
    /// Buyer who placed the order
    pub buyer_id: String,
    /// Phone captured at reservation; absent for archived orders
    pub buyer_phone: Option<String>,
}

/// Lot details as frozen on the order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageSummary {
    /// Lot the order was placed against
    pub package_id: i64,
    /// Lot title at reservation time
    pub title: String,
    /// Price before discount
    pub original_price: f64,
    /// Discounted unit price paid
    pub offer_price: f64,
    /// Pickup window start
    pub pickup_start: DateTime<Utc>,
    /// Pickup window end
    pub pickup_end: DateTime<Utc>,
}

impl PackageSummary {
    fn from_snapshot(package_id: i64, snapshot: &PackageSnapshot) -> Self {
        Self {
            package_id,
            title: snapshot.title.clone(),
            original_price: snapshot.original_price,
            offer_price: snapshot.offer_price,
            pickup_start: snapshot.pickup_start,
            pickup_end: snapshot.pickup_end,
        }
    }
}

/// A paid order waiting for pickup, as the business sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingOrderView {
    /// Public order code
    pub order_code: String,
    /// Units held
    pub quantity: i32,
    /// Total charged
    pub amount: f64,
    /// PIN the buyer presents at pickup
    pub pin_code: String,
    /// `PAID` or `READY_FOR_PICKUP`
    pub status: OrderStatus,
    /// Always `CONFIRMED` for pending orders
    pub payment_status: PaymentStatus,
    /// How the buyer paid
    pub payment_method: Option<String>,
    /// When the units were reserved
    pub reserved_at: DateTime<Utc>,
    /// Who is picking up
    pub buyer: BuyerSummary,
    /// What is being picked up
    pub package: PackageSummary,
    /// Whole minutes until the pickup window opens; negative once it has
    pub remaining_time_minutes: i64,
    /// `remaining_time_minutes` as display text
    pub readable_remaining: String,
    /// Whole minutes since reservation
    pub order_age_minutes: i64,
    /// `order_age_minutes` as display text
    pub order_age: String,
    /// Pickup opens within the urgency threshold, or already has
    pub is_urgent: bool,
}

/// A handed-over order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedOrderView {
    /// Public order code
    pub order_code: String,
    /// Units handed over
    pub quantity: i32,
    /// Total charged
    pub amount: f64,
    /// How the buyer paid
    pub payment_method: Option<String>,
    /// When the units were reserved
    pub reserved_at: DateTime<Utc>,
    /// When the order was handed over
    pub completed_at: Option<DateTime<Utc>>,
    /// Staff member who handed it over, or "System"
    pub completed_by: String,
    /// Who picked up
    pub buyer: BuyerSummary,
    /// What was picked up
    pub package: PackageSummary,
    /// Minutes from reservation to handover
    pub completion_duration_minutes: Option<i64>,
}

/// A cancelled or expired order, from either the order table or the archive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelledOrderView {
    /// Public order code
    pub order_code: String,
    /// Units that were held
    pub quantity: i32,
    /// Order total
    pub amount: f64,
    /// When the units were reserved
    pub reserved_at: DateTime<Utc>,
    /// When the order was cancelled or archived
    pub cancelled_at: DateTime<Utc>,
    /// `REFUNDED` for business cancellations, `PENDING` otherwise
    pub payment_status: PaymentStatus,
    /// Free-text reason, or "No reason provided"
    pub cancellation_reason: String,
    /// Who placed the order
    pub buyer: BuyerSummary,
    /// What was ordered
    pub package: PackageSummary,
    /// The buyer cancelled their own reservation
    pub cancelled_by_user: bool,
    /// The sweeper reclaimed the reservation
    pub expired_by_system: bool,
    /// Payment was refunded
    pub refund_processed: bool,
    /// Minutes from reservation to cancellation
    pub order_age_minutes: i64,
}

/// One order in a buyer's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserOrderView {
    /// Public order code
    pub order_code: String,
    /// Business selling the lot
    pub business_id: String,
    /// Units ordered
    pub quantity: i32,
    /// Total charged
    pub amount: f64,
    /// Current order status
    pub status: OrderStatus,
    /// PIN to present at pickup
    pub pin_code: String,
    /// How the buyer paid
    pub payment_method: Option<String>,
    /// When the units were reserved
    pub reserved_at: DateTime<Utc>,
    /// When the order was handed over
    pub completed_at: Option<DateTime<Utc>>,
    /// Empty unless the business cancelled
    pub cancellation_reason: String,
    /// What was ordered
    pub package: PackageSummary,
    /// The buyer already reviewed this business
    pub has_reviewed_business: bool,
}

/// A buyer's orders grouped by outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserOrders {
    /// Paid, awaiting pickup
    pub pending: Vec<UserOrderView>,
    /// Handed over
    pub completed: Vec<UserOrderView>,
    /// Cancelled by the business and refunded
    pub cancelled: Vec<UserOrderView>,
}

/// Aggregate of a buyer's paid orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SavingsSummary {
    /// Number of `PAID` and `COMPLETED` orders
    pub total_orders: u64,
    /// Sum of `(original_price - offer_price) * quantity` over those orders
    pub total_saved: f64,
}

/// Whole minutes from `from` to `to`, rounded down.
fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().div_euclid(60)
}

/// `minutes / 60` rounded half-up to one decimal, as tenths of an hour.
fn tenths_of_hour(minutes: i64) -> i64 {
    (minutes * 10 + 30).div_euclid(60)
}

/// Formats time left until the pickup window opens.
///
/// Hours drop a trailing `.0`, so 120 minutes reads "2 hrs left until pickup".
#[must_use]
pub fn readable_remaining(minutes: i64) -> String {
    if minutes <= 0 {
        return "Pickup time started".to_string();
    }
    if minutes < 60 {
        return format!("{minutes} min left until pickup");
    }
    let tenths = tenths_of_hour(minutes);
    if tenths % 10 == 0 {
        format!("{} hrs left until pickup", tenths / 10)
    } else {
        format!("{}.{} hrs left until pickup", tenths / 10, tenths % 10)
    }
}

/// Formats how long ago an order was reserved.
#[must_use]
pub fn readable_age(minutes: i64) -> String {
    if minutes < 60 {
        return format!("{minutes} mins ago");
    }
    let tenths = tenths_of_hour(minutes);
    format!("{}.{} hrs ago", tenths / 10, tenths % 10)
}

fn buyer_summary(order: &order::Model) -> BuyerSummary {
    BuyerSummary {
        buyer_id: order.buyer_id.clone(),
        buyer_phone: Some(order.buyer_phone.clone()),
    }
}

fn pending_view(order: order::Model, now: DateTime<Utc>) -> PendingOrderView {
    let remaining_time_minutes = minutes_between(now, order.package_snapshot.pickup_start);
    let order_age_minutes = minutes_between(order.reserved_at, now);
    PendingOrderView {
        buyer: buyer_summary(&order),
        package: PackageSummary::from_snapshot(order.package_id, &order.package_snapshot),
        readable_remaining: readable_remaining(remaining_time_minutes),
        order_age: readable_age(order_age_minutes),
        is_urgent: remaining_time_minutes <= URGENT_THRESHOLD_MINUTES,
        remaining_time_minutes,
        order_age_minutes,
        order_code: order.order_code,
        quantity: order.quantity,
        amount: order.amount,
        pin_code: order.pin_code,
        status: order.status,
        payment_status: order.payment_status,
        payment_method: order.payment_method,
        reserved_at: order.reserved_at,
    }
}

fn completed_view(order: order::Model) -> CompletedOrderView {
    CompletedOrderView {
        buyer: buyer_summary(&order),
        package: PackageSummary::from_snapshot(order.package_id, &order.package_snapshot),
        completion_duration_minutes: order
            .completed_at
            .map(|completed_at| minutes_between(order.reserved_at, completed_at)),
        completed_by: order.completed_by.unwrap_or_else(|| "System".to_string()),
        order_code: order.order_code,
        quantity: order.quantity,
        amount: order.amount,
        payment_method: order.payment_method,
        reserved_at: order.reserved_at,
        completed_at: order.completed_at,
    }
}

fn cancelled_view_from_order(order: order::Model) -> CancelledOrderView {
    let cancelled_at = order.cancelled_at.unwrap_or(order.updated_at);
    CancelledOrderView {
        buyer: buyer_summary(&order),
        package: PackageSummary::from_snapshot(order.package_id, &order.package_snapshot),
        order_age_minutes: minutes_between(order.reserved_at, cancelled_at),
        refund_processed: order.payment_status == PaymentStatus::Refunded,
        cancellation_reason: order
            .cancellation_reason
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| "No reason provided".to_string()),
        cancelled_by_user: false,
        expired_by_system: false,
        order_code: order.order_code,
        quantity: order.quantity,
        amount: order.amount,
        reserved_at: order.reserved_at,
        cancelled_at,
        payment_status: order.payment_status,
    }
}

fn cancelled_view_from_archive(entry: disposition::Model) -> CancelledOrderView {
    CancelledOrderView {
        buyer: BuyerSummary {
            buyer_id: entry.buyer_id.clone(),
            buyer_phone: None,
        },
        package: PackageSummary::from_snapshot(entry.package_id, &entry.package_snapshot),
        order_age_minutes: minutes_between(entry.reserved_at, entry.archived_at),
        refund_processed: entry.payment_status == PaymentStatus::Refunded,
        cancelled_by_user: entry.cancelled_by_user(),
        expired_by_system: entry.expired_by_system(),
        cancellation_reason: if entry.reason.is_empty() {
            "No reason provided".to_string()
        } else {
            entry.reason
        },
        order_code: entry.order_code,
        quantity: entry.quantity,
        amount: entry.amount,
        reserved_at: entry.reserved_at,
        cancelled_at: entry.archived_at,
        payment_status: entry.payment_status,
    }
}

fn user_order_view(order: order::Model, reviewed: &HashSet<String>) -> UserOrderView {
    UserOrderView {
        package: PackageSummary::from_snapshot(order.package_id, &order.package_snapshot),
        has_reviewed_business: reviewed.contains(&order.business_id),
        cancellation_reason: order.cancellation_reason.unwrap_or_default(),
        order_code: order.order_code,
        business_id: order.business_id,
        quantity: order.quantity,
        amount: order.amount,
        status: order.status,
        pin_code: order.pin_code,
        payment_method: order.payment_method,
        reserved_at: order.reserved_at,
        completed_at: order.completed_at,
    }
}

/// Paid orders of a business awaiting pickup, newest reservation first.
pub async fn pending_by_business<C>(
    db: &C,
    business_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<PendingOrderView>>
where
    C: ConnectionTrait,
{
    let rows = orders::list_for_business(
        db,
        business_id,
        AWAITING_PICKUP,
        Some(PaymentStatus::Confirmed),
        order::Column::ReservedAt,
    )
    .await?;
    Ok(rows.into_iter().map(|order| pending_view(order, now)).collect())
}

/// Completed orders of a business, most recent handover first.
pub async fn completed_by_business<C>(db: &C, business_id: &str) -> Result<Vec<CompletedOrderView>>
where
    C: ConnectionTrait,
{
    let rows = orders::list_for_business(
        db,
        business_id,
        &[OrderStatus::Completed],
        Some(PaymentStatus::Confirmed),
        order::Column::CompletedAt,
    )
    .await?;
    Ok(rows.into_iter().map(completed_view).collect())
}

/// Cancelled and expired orders of a business, most recent first.
///
/// Business cancellations stay in the order table while buyer cancellations and
/// expiries only survive in the archive, so both are read and merged. Business
/// cancellations appear in both; the order row wins.
pub async fn cancelled_by_business<C>(db: &C, business_id: &str) -> Result<Vec<CancelledOrderView>>
where
    C: ConnectionTrait,
{
    let live = orders::list_for_business(
        db,
        business_id,
        &[OrderStatus::Cancelled],
        None,
        order::Column::CancelledAt,
    )
    .await?;
    let archived = archive::list_for_business(db, business_id).await?;

    let mut seen = HashSet::new();
    let mut views: Vec<CancelledOrderView> = live
        .into_iter()
        .map(cancelled_view_from_order)
        .chain(archived.into_iter().map(cancelled_view_from_archive))
        .filter(|view| seen.insert(view.order_code.clone()))
        .collect();
    views.sort_by(|a, b| b.cancelled_at.cmp(&a.cancelled_at));
    Ok(views)
}

/// A buyer's paid, completed and refunded orders.
pub async fn user_orders<C>(db: &C, reviews: &dyn ReviewLookup, buyer_id: &str) -> Result<UserOrders>
where
    C: ConnectionTrait,
{
    let pending = orders::list_for_buyer(
        db,
        buyer_id,
        AWAITING_PICKUP,
        Some(PaymentStatus::Confirmed),
        order::Column::ReservedAt,
    )
    .await?;
    let completed = orders::list_for_buyer(
        db,
        buyer_id,
        &[OrderStatus::Completed],
        Some(PaymentStatus::Confirmed),
        order::Column::CompletedAt,
    )
    .await?;
    let cancelled = orders::list_for_buyer(
        db,
        buyer_id,
        &[OrderStatus::Cancelled],
        Some(PaymentStatus::Refunded),
        order::Column::CancelledAt,
    )
    .await?;

    let reviewed = reviews
        .reviewed_business_ids(buyer_id)
        .await
        .unwrap_or_else(|e| {
            warn!(buyer_id, error = %e, "Review lookup failed; orders shown as unreviewed");
            HashSet::new()
        });
    let format = |rows: Vec<order::Model>| -> Vec<UserOrderView> {
        rows.into_iter()
            .map(|order| user_order_view(order, &reviewed))
            .collect()
    };

    Ok(UserOrders {
        pending: format(pending),
        completed: format(completed),
        cancelled: format(cancelled),
    })
}

/// Counts a buyer's paid orders and sums what they saved against original prices.
pub async fn user_savings_summary<C>(db: &C, buyer_id: &str) -> Result<SavingsSummary>
where
    C: ConnectionTrait,
{
    let rows = orders::list_for_buyer(
        db,
        buyer_id,
        SAVINGS_STATUSES,
        None,
        order::Column::ReservedAt,
    )
    .await?;
    Ok(rows.iter().fold(SavingsSummary::default(), |mut summary, order| {
        summary.total_orders += 1;
        summary.total_saved += order.package_snapshot.saved_amount();
        summary
    }))
}
