//! Shared test utilities for `SurplusOrders`.
//!
//! This module provides common helper functions for setting up test databases
//! and creating lots, orders and reviews with sensible defaults.

use crate::{
    core::{
        codes::{CodeGenerator, RandomCodeGenerator},
        ledger::{self, NewPackage},
        orders::{self, NewOrder},
        reservation::{ReservationService, ReservationSettings},
        reviews::{ReviewLookup, SeaOrmReviewLookup},
    },
    entities::{self, OrderStatus, PackageSnapshot, PaymentStatus},
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::{ConnectOptions, Set, prelude::*};
use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
};
use tempfile::TempDir;

/// Installs a test subscriber so `tracing` output shows up with `--nocapture`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("surplus_orders=debug")
        .with_test_writer()
        .try_init();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
///
/// The pool is capped at one connection; every new `SQLite` memory connection
/// would otherwise open its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = sea_orm::Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database behind a pool of several connections,
/// so concurrent transactions contend for the database lock as they would in
/// production.
///
/// The returned [`TempDir`] owns the database file and must outlive the test.
pub async fn setup_shared_test_db() -> Result<(TempDir, DatabaseConnection)> {
    let dir = TempDir::new()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("orders.db").display());
    let mut options = ConnectOptions::new(url);
    options.max_connections(4).sqlx_logging(false);
    let db = sea_orm::Database::connect(options).await?;
    db.execute_unprepared("PRAGMA journal_mode=WAL").await?;
    crate::config::database::create_tables(&db).await?;
    Ok((dir, db))
}

/// Creates a test lot with sensible defaults.
///
/// # Defaults
/// * `business_id`: "biz-1"
/// * `title`: "Bakery Bundle"
/// * `original_price`: 100.0
/// * pickup window: starts in one hour, lasts two hours
pub async fn create_test_package(
    db: &DatabaseConnection,
    quantity: i32,
    offer_price: f64,
) -> Result<entities::package::Model> {
    let start = Utc::now() + Duration::hours(1);
    ledger::create_package(
        db,
        NewPackage {
            business_id: "biz-1".to_string(),
            title: "Bakery Bundle".to_string(),
            original_price: 100.0,
            offer_price,
            quantity_available: quantity,
            pickup_start: start,
            pickup_end: start + Duration::hours(2),
        },
    )
    .await
}

/// Sets up a complete test environment with one lot.
/// Returns (db, package) for common test scenarios.
pub async fn setup_with_package(
    quantity: i32,
    offer_price: f64,
) -> Result<(DatabaseConnection, entities::package::Model)> {
    let db = setup_test_db().await?;
    let package = create_test_package(&db, quantity, offer_price).await?;
    Ok((db, package))
}

/// Reserves `quantity` units for `buyer_id` through the ledger and writes the
/// order directly, with random codes.
pub async fn insert_test_order(
    db: &DatabaseConnection,
    package: &entities::package::Model,
    buyer_id: &str,
    quantity: i32,
) -> Result<entities::order::Model> {
    let package = ledger::reserve_stock(db, package.id, quantity).await?;
    let generator = RandomCodeGenerator;
    orders::insert_order(
        db,
        NewOrder {
            order_code: generator.order_code("KAM"),
            pin_code: generator.pin_code(),
            buyer_id: buyer_id.to_string(),
            buyer_phone: "+252610000000".to_string(),
            business_id: package.business_id.clone(),
            package_id: package.id,
            package_snapshot: PackageSnapshot {
                title: package.title.clone(),
                quantity,
                original_price: package.original_price,
                offer_price: package.offer_price,
                pickup_start: package.pickup_start,
                pickup_end: package.pickup_end,
            },
            quantity,
            amount: package.offer_price * f64::from(quantity),
            reserved_at: Utc::now(),
        },
    )
    .await
}

/// Moves an order's reservation and last-update timestamps `age` into the past.
pub async fn backdate_order(db: &DatabaseConnection, order_code: &str, age: Duration) -> Result<()> {
    let at = Utc::now() - age;
    entities::Order::update_many()
        .set(entities::order::ActiveModel {
            reserved_at: Set(at),
            updated_at: Set(at),
            ..Default::default()
        })
        .filter(entities::order::Column::OrderCode.eq(order_code))
        .exec(db)
        .await?;
    Ok(())
}

/// Puts an order straight into `PAID`/`CONFIRMED`, bypassing the service.
pub async fn mark_test_order_paid(db: &DatabaseConnection, order_code: &str) -> Result<()> {
    let now = Utc::now();
    entities::Order::update_many()
        .set(entities::order::ActiveModel {
            status: Set(OrderStatus::Paid),
            payment_status: Set(PaymentStatus::Confirmed),
            payment_method: Set(Some("EVC".to_string())),
            paid_at: Set(Some(now)),
            locked: Set(true),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(entities::order::Column::OrderCode.eq(order_code))
        .exec(db)
        .await?;
    Ok(())
}

/// Sets the finalization lock on an order without changing its status.
pub async fn lock_test_order(db: &DatabaseConnection, order_code: &str) -> Result<()> {
    entities::Order::update_many()
        .set(entities::order::ActiveModel {
            locked: Set(true),
            ..Default::default()
        })
        .filter(entities::order::Column::OrderCode.eq(order_code))
        .exec(db)
        .await?;
    Ok(())
}

/// Removes a lot outright, as if its business deleted it.
pub async fn delete_test_package(db: &DatabaseConnection, package_id: i64) -> Result<()> {
    entities::Package::delete_by_id(package_id).exec(db).await?;
    Ok(())
}

/// Records that `buyer_id` reviewed `business_id`.
pub async fn insert_review(
    db: &DatabaseConnection,
    buyer_id: &str,
    business_id: &str,
) -> Result<entities::review::Model> {
    let review = entities::review::ActiveModel {
        buyer_id: Set(buyer_id.to_string()),
        business_id: Set(business_id.to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    Ok(review.insert(db).await?)
}

/// [`CodeGenerator`] returning predetermined codes in order.
///
/// Once a queue is down to its last value that value is repeated.
#[derive(Debug)]
pub struct ScriptedCodes {
    order_codes: Mutex<VecDeque<String>>,
    pins: Mutex<VecDeque<String>>,
}

impl ScriptedCodes {
    pub fn new(order_codes: Vec<String>, pins: Vec<String>) -> Self {
        Self {
            order_codes: Mutex::new(order_codes.into()),
            pins: Mutex::new(pins.into()),
        }
    }

    fn next(queue: &Mutex<VecDeque<String>>) -> String {
        let mut queue = queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }
}

impl CodeGenerator for ScriptedCodes {
    fn order_code(&self, _prefix: &str) -> String {
        Self::next(&self.order_codes)
    }

    fn pin_code(&self) -> String {
        Self::next(&self.pins)
    }
}

/// [`ReviewLookup`] whose backing store is unreachable.
#[derive(Debug)]
pub struct UnavailableReviews;

#[async_trait]
impl ReviewLookup for UnavailableReviews {
    async fn has_reviewed(&self, _buyer_id: &str, _business_id: &str) -> Result<bool> {
        Err(Error::Database(DbErr::Custom("review store offline".to_string())))
    }

    async fn reviewed_business_ids(&self, _buyer_id: &str) -> Result<HashSet<String>> {
        Err(Error::Database(DbErr::Custom("review store offline".to_string())))
    }
}

/// A service with random codes, table-backed reviews and default settings.
pub fn test_service(db: DatabaseConnection) -> ReservationService {
    ReservationService::new(
        db.clone(),
        Arc::new(RandomCodeGenerator),
        Arc::new(SeaOrmReviewLookup::new(db)),
        ReservationSettings::default(),
    )
}

/// Like [`test_service`] but with a caller-supplied code generator.
pub fn test_service_with_codes(
    db: DatabaseConnection,
    codes: Arc<dyn CodeGenerator>,
) -> ReservationService {
    ReservationService::new(
        db.clone(),
        codes,
        Arc::new(SeaOrmReviewLookup::new(db)),
        ReservationSettings::default(),
    )
}
