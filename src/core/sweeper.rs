//! Expiration sweeper - Reclaims reservations that were never paid.
//!
//! Runs on a fixed interval. Each tick selects unlocked `RESERVED`/`PENDING`
//! orders whose reservation and last update are both older than the staleness
//! threshold, then releases them one by one, each in its own transaction. A
//! failure on one order is logged and does not stop the rest of the sweep.

use crate::{
    core::{
        archive,
        orders::{self, OrderMatch},
        reservation::release_reservation,
    },
    entities::DispositionActor,
    errors::{Error, Result},
};
use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Sweeper schedule and staleness threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperSettings {
    /// Time between sweeps
    pub interval: Duration,
    /// Age after which an unpaid reservation is reclaimed
    pub staleness_threshold: Duration,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            staleness_threshold: Duration::from_secs(5 * 60),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Orders released and archived
    pub processed: usize,
    /// Orders claimed by a concurrent operation between selection and release
    pub skipped: usize,
    /// Orders whose release failed and was rolled back
    pub failed: usize,
}

/// Periodic job releasing stale reservations.
#[derive(Debug, Clone)]
pub struct Sweeper {
    db: DatabaseConnection,
    settings: SweeperSettings,
}

impl Sweeper {
    /// Creates a sweeper over `db`. Nothing runs until [`Sweeper::run`].
    #[must_use]
    pub const fn new(db: DatabaseConnection, settings: SweeperSettings) -> Self {
        Self { db, settings }
    }

    /// Runs sweeps until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            threshold_secs = self.settings.staleness_threshold.as_secs(),
            "Expiration sweeper started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_expired().await {
                        Ok(report) if report.processed + report.failed > 0 => {
                            info!(
                                processed = report.processed,
                                skipped = report.skipped,
                                failed = report.failed,
                                "Sweep finished"
                            );
                        }
                        Ok(_) => debug!("No stale reservations"),
                        Err(e) => error!(error = %e, "Sweep failed"),
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Expiration sweeper received shutdown signal");
                    return;
                }
            }
        }
    }

    /// Sweeps against the current time.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Releases every reservation that is stale as of `now`.
    ///
    /// # Errors
    /// Only fails if the stale orders cannot be listed; per-order failures are
    /// counted in [`SweepReport::failed`].
    #[instrument(skip(self))]
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let threshold = TimeDelta::from_std(self.settings.staleness_threshold).map_err(|_| {
            Error::Config {
                message: "Staleness threshold out of range".to_string(),
            }
        })?;
        let cutoff = now
            .checked_sub_signed(threshold)
            .ok_or_else(|| Error::Config {
                message: "Staleness threshold out of range".to_string(),
            })?;
        let predicate = OrderMatch::UNPAID_RESERVATION.stale_before(cutoff);

        let stale = orders::list_matching(&self.db, predicate).await?;
        let mut report = SweepReport::default();

        for order in stale {
            let released = async {
                let txn = self.db.begin().await?;
                let entry = release_reservation(
                    &txn,
                    &order.order_code,
                    predicate,
                    DispositionActor::System,
                    archive::SYSTEM_EXPIRY_REASON,
                    now,
                )
                .await?;
                txn.commit().await?;
                Ok::<_, Error>(entry.is_some())
            }
            .await
            .map_err(|e| e.with_contention("sweep_expired"));

            match released {
                Ok(true) => {
                    info!(
                        order_code = %order.order_code,
                        quantity = order.quantity,
                        "Expired stale reservation"
                    );
                    report.processed += 1;
                }
                Ok(false) => {
                    debug!(order_code = %order.order_code, "Reservation claimed before expiry");
                    report.skipped += 1;
                }
                Err(e) => {
                    error!(order_code = %order.order_code, error = %e, "Failed to expire reservation");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
