//! Reservation service - Drives orders through their lifecycle.
//!
//! ```text
//!   reserve ──► RESERVED/PENDING ──mark_paid──► PAID/CONFIRMED ──mark_ready──► READY_FOR_PICKUP
//!                 │                                 │                              │
//!   cancel_by_buyer / sweeper                       └────────── complete ──────────┴──► COMPLETED
//!                 │                                 └──────── cancel_by_admin ─────┴──► CANCELLED/REFUNDED
//!                 ▼
//!   row deleted, disposition archived
//! ```
//!
//! Every state change runs in one database transaction covering the order, the
//! lot's stock and (where applicable) the disposition archive. Mutual exclusion
//! between concurrent operations on the same order comes from the conditional
//! `UPDATE` in [`orders::update_matching`]: whichever transaction changes the row
//! first wins, and the loser sees zero affected rows.

use crate::{
    core::{
        archive,
        codes::{self, CodeGenerator},
        ledger,
        orders::{self, NewOrder, OrderMatch},
        queries::{
            self, CancelledOrderView, CompletedOrderView, PendingOrderView, SavingsSummary,
            UserOrders,
        },
        reviews::ReviewLookup,
    },
    entities::{DispositionActor, OrderStatus, PackageSnapshot, PaymentStatus, disposition, order},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, Set, TransactionTrait};
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

/// Payment method recorded when the payment confirmation does not name one.
pub const DEFAULT_PAYMENT_METHOD: &str = "EVC";

/// Tunables for [`ReservationService`].
#[derive(Debug, Clone)]
pub struct ReservationSettings {
    /// Prefix of generated order codes
    pub order_code_prefix: String,
    /// Upper bound on a single service call, including lock waits
    pub request_timeout: Duration,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            order_code_prefix: "KAM".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A buyer's request to hold units of a lot.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    /// Buyer making the reservation
    pub buyer_id: String,
    /// Buyer phone, stored as a snapshot
    pub buyer_phone: String,
    /// Lot to reserve from
    pub package_id: i64,
    /// Units requested, at least 1
    pub quantity: i32,
}

/// Result of a successful payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentConfirmation {
    /// Order that was paid
    pub order_code: String,
    /// PIN the buyer shows at pickup
    pub pin_code: String,
    /// Whether the buyer has already reviewed this business
    pub has_reviewed_business: bool,
}

/// Orchestrates reservation, payment, pickup and cancellation.
#[derive(Clone)]
pub struct ReservationService {
    db: DatabaseConnection,
    codes: Arc<dyn CodeGenerator>,
    reviews: Arc<dyn ReviewLookup>,
    settings: ReservationSettings,
}

impl std::fmt::Debug for ReservationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ReservationService {
    /// Creates a service over `db` with explicit collaborators.
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        codes: Arc<dyn CodeGenerator>,
        reviews: Arc<dyn ReviewLookup>,
        settings: ReservationSettings,
    ) -> Self {
        Self {
            db,
            codes,
            reviews,
            settings,
        }
    }

    /// The underlying database connection.
    #[must_use]
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Runs `operation` under the configured request timeout.
    ///
    /// Lock contention the driver gave up on is reported as [`Error::Busy`].
    async fn with_timeout<T, F>(&self, name: &'static str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.settings.request_timeout, operation)
            .await
            .map_err(|_| {
                warn!(operation = name, "Request timed out");
                Error::Timeout {
                    operation: name,
                    seconds: self.settings.request_timeout.as_secs(),
                }
            })?
            .map_err(|e| e.with_contention(name))
    }

    /// Holds `quantity` units of a lot for the buyer and creates the order.
    ///
    /// # Errors
    /// - [`Error::Validation`] for missing fields or `quantity < 1`
    /// - [`Error::NotFound`] if the lot does not exist or is inactive
    /// - [`Error::InsufficientStock`] if the lot has fewer units left
    #[instrument(skip(self), fields(package_id = request.package_id, quantity = request.quantity))]
    pub async fn reserve(&self, request: ReserveRequest) -> Result<order::Model> {
        if request.buyer_id.trim().is_empty() {
            return Err(Error::validation("Missing required field: buyer_id"));
        }
        if request.buyer_phone.trim().is_empty() {
            return Err(Error::validation("Missing required field: buyer_phone"));
        }
        if request.quantity < 1 {
            return Err(Error::validation("Quantity must be at least 1"));
        }

        self.with_timeout("reserve", async {
            let txn = self.db.begin().await?;

            let package = ledger::reserve_stock(&txn, request.package_id, request.quantity).await?;
            let (order_code, pin_code) =
                codes::unique_codes(&txn, self.codes.as_ref(), &self.settings.order_code_prefix)
                    .await?;

            let package_snapshot = PackageSnapshot {
                title: package.title.clone(),
                quantity: request.quantity,
                original_price: package.original_price,
                offer_price: package.offer_price,
                pickup_start: package.pickup_start,
                pickup_end: package.pickup_end,
            };
            let order = orders::insert_order(
                &txn,
                NewOrder {
                    order_code,
                    pin_code,
                    buyer_id: request.buyer_id.trim().to_string(),
                    buyer_phone: request.buyer_phone.trim().to_string(),
                    business_id: package.business_id.clone(),
                    package_id: package.id,
                    package_snapshot,
                    quantity: request.quantity,
                    amount: package.offer_price * f64::from(request.quantity),
                    reserved_at: Utc::now(),
                },
            )
            .await?;

            txn.commit().await?;
            info!(
                order_code = %order.order_code,
                remaining = package.quantity_available,
                "Reserved units"
            );
            Ok::<_, Error>(order)
        })
        .await
    }

    /// Records payment confirmation for an unpaid, unlocked reservation.
    ///
    /// The order is locked in the same write so the sweeper can no longer
    /// reclaim it.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] if the order does not exist, was already
    /// processed, or is being finalized by another operation.
    #[instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_code: &str,
        payment_intent_id: Option<String>,
        payment_method: Option<String>,
    ) -> Result<PaymentConfirmation> {
        if order_code.trim().is_empty() {
            return Err(Error::validation("Order code is required"));
        }

        let order = self
            .with_timeout("mark_paid", async {
                let now = Utc::now();
                let txn = self.db.begin().await?;
                let changes = order::ActiveModel {
                    status: Set(OrderStatus::Paid),
                    payment_status: Set(PaymentStatus::Confirmed),
                    payment_intent_id: Set(payment_intent_id),
                    payment_method: Set(Some(
                        payment_method.unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string()),
                    )),
                    paid_at: Set(Some(now)),
                    locked: Set(true),
                    updated_at: Set(now),
                    ..Default::default()
                };

                let conflict = || Error::Conflict {
                    order_code: order_code.to_string(),
                };
                if orders::update_matching(&txn, order_code, OrderMatch::UNPAID_RESERVATION, changes)
                    .await?
                    == 0
                {
                    return Err(conflict());
                }
                let order = orders::find_by_code(&txn, order_code)
                    .await?
                    .ok_or_else(conflict)?;
                txn.commit().await?;
                Ok(order)
            })
            .await?;

        info!(order_code, "Payment confirmed");
        let has_reviewed_business = self
            .reviews
            .has_reviewed(&order.buyer_id, &order.business_id)
            .await
            .unwrap_or_else(|e| {
                warn!(order_code, error = %e, "Review lookup failed; reporting no review");
                false
            });

        Ok(PaymentConfirmation {
            order_code: order.order_code,
            pin_code: order.pin_code,
            has_reviewed_business,
        })
    }

    /// Marks a paid order as packed and ready for pickup.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] unless the order is `PAID`/`CONFIRMED`.
    #[instrument(skip(self))]
    pub async fn mark_ready(&self, order_code: &str) -> Result<order::Model> {
        self.with_timeout("mark_ready", async {
            let txn = self.db.begin().await?;
            let changes = order::ActiveModel {
                status: Set(OrderStatus::ReadyForPickup),
                updated_at: Set(Utc::now()),
                ..Default::default()
            };
            if orders::update_matching(&txn, order_code, OrderMatch::PAID, changes).await? == 0 {
                return Err(Error::not_found(
                    "Order not found or not awaiting preparation",
                ));
            }
            let order = orders::find_by_code(&txn, order_code)
                .await?
                .ok_or_else(|| Error::not_found("Order not found"))?;
            txn.commit().await?;
            info!(order_code, "Order ready for pickup");
            Ok(order)
        })
        .await
    }

    /// Hands a paid order over after checking the pickup PIN.
    ///
    /// Stock is not touched; the lot's lifetime counter grows by the order quantity.
    ///
    /// # Errors
    /// - [`Error::Validation`] for empty arguments
    /// - [`Error::NotFound`] unless the order is paid and awaiting pickup
    /// - [`Error::InvalidPin`] if `pin_code` does not match
    #[instrument(skip(self, pin_code))]
    pub async fn complete(&self, order_code: &str, pin_code: &str, completed_by: &str) -> Result<()> {
        if order_code.trim().is_empty() {
            return Err(Error::validation("Order code is required"));
        }
        if pin_code.trim().is_empty() {
            return Err(Error::validation("pin_code is required"));
        }
        if completed_by.trim().is_empty() {
            return Err(Error::validation("completed_by is required"));
        }

        self.with_timeout("complete", async {
            let txn = self.db.begin().await?;
            let not_found = || Error::not_found("Order not found or cannot be completed");

            // Claim the row before reading it; a wrong PIN rolls the claim back.
            let now = Utc::now();
            let changes = order::ActiveModel {
                status: Set(OrderStatus::Completed),
                completed_at: Set(Some(now)),
                completed_by: Set(Some(completed_by.to_string())),
                updated_at: Set(now),
                ..Default::default()
            };
            if orders::update_matching(&txn, order_code, OrderMatch::AWAITING_PICKUP, changes).await?
                == 0
            {
                return Err(not_found());
            }
            let order = orders::find_by_code(&txn, order_code)
                .await?
                .ok_or_else(not_found)?;
            if order.pin_code != pin_code.trim() {
                warn!(order_code, "Pickup attempted with wrong PIN");
                txn.rollback().await?;
                return Err(Error::InvalidPin {
                    order_code: order_code.to_string(),
                });
            }
            ledger::record_completion(&txn, order.package_id, order.quantity).await?;

            txn.commit().await?;
            info!(order_code, completed_by, "Order completed");
            Ok(())
        })
        .await
    }

    /// Cancels a paid order on behalf of the business and refunds it.
    ///
    /// Unlike buyer cancellation the order row is kept (as `CANCELLED`/`REFUNDED`)
    /// because money already moved; a disposition record is written as well.
    ///
    /// # Errors
    /// - [`Error::Validation`] if `reason` is empty
    /// - [`Error::NotFound`] unless the order is paid and awaiting pickup, or
    ///   if its lot no longer exists
    #[instrument(skip(self))]
    pub async fn cancel_by_admin(&self, order_code: &str, reason: &str) -> Result<()> {
        if order_code.trim().is_empty() {
            return Err(Error::validation("Order code is required"));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("Cancellation reason is required"));
        }

        self.with_timeout("cancel_by_admin", async {
            let txn = self.db.begin().await?;
            let not_found = || Error::not_found("Order not found or cannot be cancelled");

            let now = Utc::now();
            let changes = order::ActiveModel {
                status: Set(OrderStatus::Cancelled),
                payment_status: Set(PaymentStatus::Refunded),
                cancelled_at: Set(Some(now)),
                cancellation_reason: Set(Some(reason.to_string())),
                updated_at: Set(now),
                ..Default::default()
            };
            if orders::update_matching(&txn, order_code, OrderMatch::AWAITING_PICKUP, changes).await?
                == 0
            {
                return Err(not_found());
            }
            let order = orders::find_by_code(&txn, order_code)
                .await?
                .ok_or_else(not_found)?;
            ledger::restore_stock(&txn, order.package_id, order.quantity).await?;
            archive::record(
                &txn,
                &order,
                DispositionActor::Business,
                reason,
                PaymentStatus::Refunded,
                now,
            )
            .await?;

            txn.commit().await?;
            info!(order_code, quantity = order.quantity, "Order cancelled by business");
            Ok(())
        })
        .await
    }

    /// Cancels the buyer's own unpaid reservation and returns its units.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] unless the order is an unlocked, unpaid
    /// reservation owned by `buyer_id`.
    #[instrument(skip(self))]
    pub async fn cancel_by_buyer(&self, buyer_id: &str, order_code: &str) -> Result<()> {
        if buyer_id.trim().is_empty() || order_code.trim().is_empty() {
            return Err(Error::validation("buyer_id and order_code are required"));
        }

        self.with_timeout("cancel_by_buyer", async {
            let txn = self.db.begin().await?;
            let not_found = || Error::not_found("Reservation not found or cannot be cancelled");
            let predicate = OrderMatch::UNPAID_RESERVATION.owned_by(buyer_id);

            release_reservation(
                &txn,
                order_code,
                predicate,
                DispositionActor::Buyer,
                archive::BUYER_CANCEL_REASON,
                Utc::now(),
            )
            .await?
            .ok_or_else(not_found)?;

            txn.commit().await?;
            info!(order_code, "Reservation cancelled by buyer");
            Ok::<_, Error>(())
        })
        .await
    }

    /// Paid orders of a business waiting for pickup, newest first.
    pub async fn pending_by_business(&self, business_id: &str) -> Result<Vec<PendingOrderView>> {
        queries::pending_by_business(&self.db, business_id, Utc::now()).await
    }

    /// Completed orders of a business, most recently completed first.
    pub async fn completed_by_business(&self, business_id: &str) -> Result<Vec<CompletedOrderView>> {
        queries::completed_by_business(&self.db, business_id).await
    }

    /// Cancelled and expired orders of a business, most recent first.
    pub async fn cancelled_by_business(&self, business_id: &str) -> Result<Vec<CancelledOrderView>> {
        queries::cancelled_by_business(&self.db, business_id).await
    }

    /// A buyer's orders grouped by pending, completed and cancelled.
    pub async fn user_orders(&self, buyer_id: &str) -> Result<UserOrders> {
        queries::user_orders(&self.db, self.reviews.as_ref(), buyer_id).await
    }

    /// How many paid orders a buyer has and how much they saved.
    pub async fn user_savings_summary(&self, buyer_id: &str) -> Result<SavingsSummary> {
        queries::user_savings_summary(&self.db, buyer_id).await
    }
}

/// Shared release path for buyer cancellation and system expiry.
///
/// Locks the order (only if it still satisfies `predicate`), returns its units to
/// the lot, archives it under `actor` and deletes the row. Must run inside the
/// caller's transaction so the four writes commit or roll back together.
///
/// The lock must be the transaction's first statement: a deferred `SQLite`
/// transaction that has already read cannot become a writer after another
/// connection commits.
///
/// Returns `Ok(None)` when the order no longer satisfies `predicate`, meaning a
/// concurrent operation claimed it first.
pub async fn release_reservation<C>(
    txn: &C,
    order_code: &str,
    predicate: OrderMatch<'_>,
    actor: DispositionActor,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<disposition::Model>>
where
    C: ConnectionTrait,
{
    let lock = order::ActiveModel {
        locked: Set(true),
        updated_at: Set(now),
        ..Default::default()
    };
    if orders::update_matching(txn, order_code, predicate, lock).await? == 0 {
        return Ok(None);
    }
    let Some(order) = orders::find_by_code(txn, order_code).await? else {
        return Ok(None);
    };

    match ledger::restore_stock(txn, order.package_id, order.quantity).await {
        Ok(()) => {}
        // Lot was removed by its business; nothing left to return units to.
        Err(Error::NotFound { .. }) => warn!(
            order_code = %order.order_code,
            package_id = order.package_id,
            "Releasing reservation whose package no longer exists"
        ),
        Err(e) => return Err(e),
    }

    let entry = archive::record(txn, &order, actor, reason, PaymentStatus::Pending, now).await?;
    orders::delete_order(txn, order.id).await?;
    Ok(Some(entry))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::{core::reviews::SeaOrmReviewLookup, test_utils::*};

    fn request(package_id: i64, buyer_id: &str, quantity: i32) -> ReserveRequest {
        ReserveRequest {
            buyer_id: buyer_id.to_string(),
            buyer_phone: "+252610000001".to_string(),
            package_id,
            quantity,
        }
    }

    async fn stock(db: &DatabaseConnection, package_id: i64) -> Result<i32> {
        Ok(ledger::get_package(db, package_id)
            .await?
            .unwrap()
            .quantity_available)
    }

    #[tokio::test]
    async fn test_reserve_pay_and_complete() -> Result<()> {
        init_test_tracing();
        let (db, package) = setup_with_package(5, 80.0).await?;
        let service = test_service(db.clone());

        let order = service.reserve(request(package.id, "buyer-1", 2)).await?;
        assert_eq!(order.status, OrderStatus::Reserved);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.amount, 160.0);
        assert!(order.order_code.starts_with("KAM-"));
        assert_eq!(order.package_snapshot.quantity, 2);
        assert_eq!(stock(&db, package.id).await?, 3);

        let paid = service.mark_paid(&order.order_code, None, None).await?;
        assert_eq!(paid.pin_code.len(), 6);
        assert!(!paid.has_reviewed_business);
        let stored = orders::find_by_code(&db, &order.order_code).await?.unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.payment_status, PaymentStatus::Confirmed);
        assert_eq!(stored.payment_method.as_deref(), Some(DEFAULT_PAYMENT_METHOD));
        assert!(stored.locked);

        let wrong = if paid.pin_code == "111111" { "222222" } else { "111111" };
        assert!(matches!(
            service.complete(&order.order_code, wrong, "staff-1").await,
            Err(Error::InvalidPin { .. })
        ));

        service
            .complete(&order.order_code, &paid.pin_code, "staff-1")
            .await?;
        let stored = orders::find_by_code(&db, &order.order_code).await?.unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.completed_by.as_deref(), Some("staff-1"));

        let lot = ledger::get_package(&db, package.id).await?.unwrap();
        assert_eq!(lot.quantity_available, 3);
        assert_eq!(lot.total_orders, 2);

        // A second completion finds nothing to complete
        assert!(matches!(
            service
                .complete(&order.order_code, &paid.pin_code, "staff-1")
                .await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_validation_and_stock_errors() -> Result<()> {
        let (db, package) = setup_with_package(1, 80.0).await?;
        let service = test_service(db.clone());

        assert!(matches!(
            service.reserve(request(package.id, "buyer-1", 0)).await,
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            service.reserve(request(package.id, " ", 1)).await,
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            service.reserve(request(999, "buyer-1", 1)).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            service.reserve(request(package.id, "buyer-1", 2)).await,
            Err(Error::InsufficientStock { .. })
        ));
        // Failed attempts leave stock untouched
        assert_eq!(stock(&db, package.id).await?, 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_reservations_for_last_unit() -> Result<()> {
        let (_dir, db) = setup_shared_test_db().await?;
        let package = create_test_package(&db, 1, 80.0).await?;
        let service = test_service(db.clone());

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.reserve(request(package.id, "buyer-1", 1)).await }
        });
        let second = tokio::spawn({
            let service = service.clone();
            async move { service.reserve(request(package.id, "buyer-2", 1)).await }
        });
        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(Error::InsufficientStock { .. })))
                .count(),
            1
        );
        assert_eq!(stock(&db, package.id).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_retries_colliding_codes() -> Result<()> {
        let (db, package) = setup_with_package(5, 80.0).await?;
        let codes = Arc::new(ScriptedCodes::new(
            vec!["KAM-AAAAAAAAAA".to_string()],
            vec!["123456".to_string()],
        ));
        let service = test_service_with_codes(db.clone(), codes);

        let first = service.reserve(request(package.id, "buyer-1", 1)).await?;
        assert_eq!(first.order_code, "KAM-AAAAAAAAAA");

        // The generator keeps returning the taken code
        let second = service.reserve(request(package.id, "buyer-2", 1)).await;
        assert!(matches!(second, Err(Error::CodeGeneration { .. })));
        assert!(second.unwrap_err().is_retryable());
        // Rolled back with the rest of the transaction
        assert_eq!(stock(&db, package.id).await?, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_paid_conflicts() -> Result<()> {
        let (db, package) = setup_with_package(5, 80.0).await?;
        insert_review(&db, "buyer-1", &package.business_id).await?;
        let service = test_service(db.clone());
        let order = service.reserve(request(package.id, "buyer-1", 1)).await?;

        let paid = service
            .mark_paid(&order.order_code, Some("pi_123".to_string()), Some("CARD".to_string()))
            .await?;
        assert!(paid.has_reviewed_business);

        // Already paid
        assert!(matches!(
            service.mark_paid(&order.order_code, None, None).await,
            Err(Error::Conflict { .. })
        ));
        assert!(matches!(
            service.mark_paid("KAM-UNKNOWN000", None, None).await,
            Err(Error::Conflict { .. })
        ));

        // Locked by the sweeper or a cancellation in flight
        let locked = service.reserve(request(package.id, "buyer-2", 1)).await?;
        lock_test_order(&db, &locked.order_code).await?;
        assert!(matches!(
            service.mark_paid(&locked.order_code, None, None).await,
            Err(Error::Conflict { .. })
        ));

        let stored = orders::find_by_code(&db, &order.order_code).await?.unwrap();
        assert_eq!(stored.payment_method.as_deref(), Some("CARD"));
        assert_eq!(stored.payment_intent_id.as_deref(), Some("pi_123"));
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_paid_survives_review_lookup_failure() -> Result<()> {
        let (db, package) = setup_with_package(5, 80.0).await?;
        let service = ReservationService::new(
            db.clone(),
            Arc::new(crate::core::codes::RandomCodeGenerator),
            Arc::new(UnavailableReviews),
            ReservationSettings::default(),
        );
        let order = service.reserve(request(package.id, "buyer-1", 1)).await?;

        let paid = service.mark_paid(&order.order_code, None, None).await?;
        assert_eq!(paid.pin_code, order.pin_code);
        assert!(!paid.has_reviewed_business);

        let stored = orders::find_by_code(&db, &order.order_code).await?.unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_ready_then_complete() -> Result<()> {
        let (db, package) = setup_with_package(5, 80.0).await?;
        let service = test_service(db.clone());
        let order = service.reserve(request(package.id, "buyer-1", 1)).await?;

        // Unpaid orders cannot be packed
        assert!(matches!(
            service.mark_ready(&order.order_code).await,
            Err(Error::NotFound { .. })
        ));

        let paid = service.mark_paid(&order.order_code, None, None).await?;
        let ready = service.mark_ready(&order.order_code).await?;
        assert_eq!(ready.status, OrderStatus::ReadyForPickup);
        assert_eq!(ready.payment_status, PaymentStatus::Confirmed);

        service
            .complete(&order.order_code, &paid.pin_code, "staff-2")
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_by_buyer_releases_units() -> Result<()> {
        let (db, package) = setup_with_package(3, 80.0).await?;
        let service = test_service(db.clone());
        let order = service.reserve(request(package.id, "buyer-1", 1)).await?;
        assert_eq!(stock(&db, package.id).await?, 2);

        // Someone else's reservation
        assert!(matches!(
            service.cancel_by_buyer("buyer-2", &order.order_code).await,
            Err(Error::NotFound { .. })
        ));

        service.cancel_by_buyer("buyer-1", &order.order_code).await?;
        assert!(orders::find_by_code(&db, &order.order_code).await?.is_none());
        let entry = archive::find_by_code(&db, &order.order_code).await?.unwrap();
        assert!(entry.cancelled_by_user());
        assert_eq!(entry.reason, archive::BUYER_CANCEL_REASON);
        assert_eq!(stock(&db, package.id).await?, 3);

        // Units come back exactly once
        assert!(matches!(
            service.cancel_by_buyer("buyer-1", &order.order_code).await,
            Err(Error::NotFound { .. })
        ));
        assert_eq!(stock(&db, package.id).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_by_buyer_refuses_paid_or_locked() -> Result<()> {
        let (db, package) = setup_with_package(5, 80.0).await?;
        let service = test_service(db.clone());

        let paid = service.reserve(request(package.id, "buyer-1", 1)).await?;
        service.mark_paid(&paid.order_code, None, None).await?;
        assert!(matches!(
            service.cancel_by_buyer("buyer-1", &paid.order_code).await,
            Err(Error::NotFound { .. })
        ));

        let locked = service.reserve(request(package.id, "buyer-1", 1)).await?;
        lock_test_order(&db, &locked.order_code).await?;
        assert!(matches!(
            service.cancel_by_buyer("buyer-1", &locked.order_code).await,
            Err(Error::NotFound { .. })
        ));
        assert_eq!(stock(&db, package.id).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_by_admin_refunds_and_keeps_row() -> Result<()> {
        let (db, package) = setup_with_package(5, 80.0).await?;
        let service = test_service(db.clone());
        let order = service.reserve(request(package.id, "buyer-1", 2)).await?;

        // Unpaid reservations belong to the buyer and the sweeper
        assert!(matches!(
            service.cancel_by_admin(&order.order_code, "Closed early").await,
            Err(Error::NotFound { .. })
        ));

        service.mark_paid(&order.order_code, None, None).await?;
        assert!(matches!(
            service.cancel_by_admin(&order.order_code, "  ").await,
            Err(Error::Validation { .. })
        ));

        service
            .cancel_by_admin(&order.order_code, "Closed early")
            .await?;
        let stored = orders::find_by_code(&db, &order.order_code).await?.unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
        assert_eq!(stored.cancellation_reason.as_deref(), Some("Closed early"));
        assert_eq!(stock(&db, package.id).await?, 5);

        let entry = archive::find_by_code(&db, &order.order_code).await?.unwrap();
        assert_eq!(entry.actor, DispositionActor::Business);
        assert_eq!(entry.payment_status, PaymentStatus::Refunded);

        assert!(matches!(
            service.cancel_by_admin(&order.order_code, "Again").await,
            Err(Error::NotFound { .. })
        ));
        assert_eq!(stock(&db, package.id).await?, 5);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_complete_and_admin_cancel_race_for_same_order() -> Result<()> {
        let (_dir, db) = setup_shared_test_db().await?;
        let package = create_test_package(&db, 5, 80.0).await?;
        let service = test_service(db.clone());
        let order = service.reserve(request(package.id, "buyer-1", 2)).await?;
        let paid = service.mark_paid(&order.order_code, None, None).await?;

        let completing = tokio::spawn({
            let service = service.clone();
            let code = order.order_code.clone();
            async move { service.complete(&code, &paid.pin_code, "staff-1").await }
        });
        let cancelling = tokio::spawn({
            let service = service.clone();
            let code = order.order_code.clone();
            async move { service.cancel_by_admin(&code, "Closed early").await }
        });
        let outcomes = [completing.await.unwrap(), cancelling.await.unwrap()];

        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(Error::NotFound { .. })))
                .count(),
            1
        );

        let stored = orders::find_by_code(&db, &order.order_code).await?.unwrap();
        let lot = ledger::get_package(&db, package.id).await?.unwrap();
        if stored.status == OrderStatus::Completed {
            assert_eq!((lot.quantity_available, lot.total_orders), (3, 2));
            assert!(archive::find_by_code(&db, &order.order_code).await?.is_none());
        } else {
            assert_eq!(stored.status, OrderStatus::Cancelled);
            assert_eq!((lot.quantity_available, lot.total_orders), (5, 0));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_by_admin_rolls_back_without_lot() -> Result<()> {
        let (db, package) = setup_with_package(5, 80.0).await?;
        let service = test_service(db.clone());
        let order = service.reserve(request(package.id, "buyer-1", 1)).await?;
        service.mark_paid(&order.order_code, None, None).await?;
        delete_test_package(&db, package.id).await?;

        assert!(matches!(
            service.cancel_by_admin(&order.order_code, "Lot withdrawn").await,
            Err(Error::NotFound { .. })
        ));
        let stored = orders::find_by_code(&db, &order.order_code).await?.unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert!(archive::find_by_code(&db, &order.order_code).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_request_timeout() -> Result<()> {
        let (db, package) = setup_with_package(5, 80.0).await?;
        let service = ReservationService::new(
            db.clone(),
            Arc::new(crate::core::codes::RandomCodeGenerator),
            Arc::new(SeaOrmReviewLookup::new(db.clone())),
            ReservationSettings {
                request_timeout: Duration::from_millis(100),
                ..ReservationSettings::default()
            },
        );

        // Hold the only pooled connection so the service cannot start
        let blocker = db.begin().await?;
        let result = service.reserve(request(package.id, "buyer-1", 1)).await;
        assert!(matches!(
            result,
            Err(Error::Timeout {
                operation: "reserve",
                ..
            })
        ));
        blocker.rollback().await?;

        assert_eq!(stock(&db, package.id).await?, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_reservation_lost_race() -> Result<()> {
        let (db, package) = setup_with_package(5, 80.0).await?;
        let order = insert_test_order(&db, &package, "buyer-1", 2).await?;
        lock_test_order(&db, &order.order_code).await?;

        let txn = db.begin().await?;
        let released = release_reservation(
            &txn,
            &order.order_code,
            OrderMatch::UNPAID_RESERVATION,
            DispositionActor::System,
            archive::SYSTEM_EXPIRY_REASON,
            Utc::now(),
        )
        .await?;
        txn.commit().await?;

        assert!(released.is_none());
        assert_eq!(stock(&db, package.id).await?, 3);
        assert!(orders::find_by_code(&db, &order.order_code).await?.is_some());
        Ok(())
    }
}
