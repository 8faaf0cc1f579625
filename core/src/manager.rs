//! Booking Manager: creates and cancels reservations, enforcing per-user and
//! per-day limits, and sweeps stale holds back into the stock pool.
//!
//! The manager is a thin orchestration layer: every compound mutation is
//! delegated to one atomic [`CouponStore`] method, and the manager's only
//! added behavior is the bounded retry on storage contention plus telemetry.
//! Business-rule failures pass through untouched as typed results.

use crate::booking::{Booking, BookingStatus};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{BookingError, StoreError};
use crate::ledger::Promotion;
use crate::store::CouponStore;
use crate::types::{Actor, BookingId, PromotionId, UserId};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Reservation service over a [`CouponStore`].
pub struct BookingManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<S> std::fmt::Debug for BookingManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: CouponStore> BookingManager<S> {
    /// Creates a new `BookingManager`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Books one unit of `promotion_id` for `user_id`.
    ///
    /// Duplicate, limit, activity, and stock checks all run against a
    /// consistent snapshot inside the store; concurrent requests for the last
    /// unit resolve to exactly one success.
    ///
    /// # Errors
    ///
    /// The creation taxonomy of [`CouponStore::create_booking`];
    /// storage contention beyond the retry budget surfaces as
    /// [`BookingError::Unknown`].
    #[tracing::instrument(skip(self))]
    pub async fn create_booking(
        &self,
        user_id: UserId,
        promotion_id: PromotionId,
    ) -> Result<Booking, BookingError> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .store
                .create_booking(
                    user_id,
                    promotion_id,
                    self.clock.now(),
                    self.config.reservation_window,
                )
                .await;

            match result {
                Err(BookingError::Store(StoreError::Conflict))
                    if attempt < self.config.conflict_retries =>
                {
                    attempt += 1;
                    tracing::debug!(attempt, "storage contention on booking creation, retrying");
                }
                other => return Self::finish("create_booking", other),
            }
        }
    }

    /// Cancels a `Pending` booking and returns its unit to the pool.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`], [`BookingError::NotOwner`],
    /// [`BookingError::AlreadyTerminal`], or [`BookingError::Unknown`] after
    /// exhausted retries.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        actor: Actor,
    ) -> Result<Booking, BookingError> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .store
                .cancel_booking(booking_id, actor, self.clock.now())
                .await;

            match result {
                Err(BookingError::Store(StoreError::Conflict))
                    if attempt < self.config.conflict_retries =>
                {
                    attempt += 1;
                    tracing::debug!(attempt, "storage contention on cancellation, retrying");
                }
                other => return Self::finish("cancel_booking", other),
            }
        }
    }

    /// One sweep pass: marks `Active` promotions past their end date as
    /// `Finished`, then cancels `Pending` bookings whose hold elapsed, each
    /// through the same atomic cancel path. Returns how many bookings were
    /// expired.
    ///
    /// Bookings that lost a race with a user action (already terminal, or
    /// locked by a concurrent transaction) are skipped; the next pass picks
    /// up whatever remains.
    ///
    /// # Errors
    ///
    /// Propagates non-transient storage failures.
    #[tracing::instrument(skip(self))]
    pub async fn expire_stale_bookings(&self) -> Result<u32, BookingError> {
        let now = self.clock.now();

        let finished = self.store.finish_ended_promotions(now).await?;
        if finished > 0 {
            tracing::info!(finished, "promotions past their end date finished");
        }

        let stale = self
            .store
            .stale_pending_bookings(now, self.config.sweep_batch)
            .await?;

        let mut expired = 0u32;
        for booking_id in stale {
            match self
                .store
                .cancel_booking(booking_id, Actor::System, self.clock.now())
                .await
            {
                Ok(_) => expired += 1,
                Err(
                    BookingError::NotFound
                    | BookingError::AlreadyTerminal { .. }
                    | BookingError::Store(StoreError::Conflict),
                ) => {
                    tracing::debug!(%booking_id, "stale booking already handled elsewhere");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(expired)
    }

    /// Admin restock, routed through the ledger so it cannot race with
    /// reservations.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] or [`BookingError::Unknown`] after
    /// exhausted retries.
    #[tracing::instrument(skip(self))]
    pub async fn restock(
        &self,
        promotion_id: PromotionId,
        additional: u32,
    ) -> Result<Promotion, BookingError> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .store
                .restock_promotion(promotion_id, additional, self.clock.now())
                .await;

            match result {
                Err(BookingError::Store(StoreError::Conflict))
                    if attempt < self.config.conflict_retries =>
                {
                    attempt += 1;
                    tracing::debug!(attempt, "storage contention on restock, retrying");
                }
                other => return Self::finish("restock", other),
            }
        }
    }

    /// Current available stock for a promotion (read-only, for UI layers).
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] or a wrapped storage failure.
    pub async fn available_stock(&self, promotion_id: PromotionId) -> Result<u32, BookingError> {
        let promotion = self
            .store
            .promotion(promotion_id)
            .await?
            .ok_or(BookingError::NotFound)?;
        Ok(promotion.available_stock)
    }

    /// Current status of a booking (read-only, for UI layers).
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] or a wrapped storage failure.
    pub async fn booking_status(
        &self,
        booking_id: BookingId,
    ) -> Result<BookingStatus, BookingError> {
        let booking = self
            .store
            .booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound)?;
        Ok(booking.status)
    }

    /// Collapses exhausted-contention and transport failures into `Unknown`
    /// and gives integrity violations an error-level trace before they
    /// propagate.
    fn finish<T>(
        operation: &'static str,
        result: Result<T, BookingError>,
    ) -> Result<T, BookingError> {
        match result {
            Err(BookingError::Store(StoreError::Conflict)) => {
                tracing::info!(operation, "retry budget exhausted");
                Err(BookingError::Unknown)
            }
            Err(BookingError::Store(StoreError::Unavailable(detail))) => {
                tracing::warn!(operation, %detail, "storage unavailable");
                Err(BookingError::Unknown)
            }
            Err(BookingError::Store(StoreError::Integrity(detail))) => {
                tracing::error!(operation, %detail, "integrity violation, halting operation");
                Err(BookingError::Store(StoreError::Integrity(detail)))
            }
            other => other,
        }
    }
}

// ============================================================================
// Expiry sweep task
// ============================================================================

/// Handle to the background stale-booking sweep.
#[derive(Debug)]
pub struct ExpirySweep {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl ExpirySweep {
    /// Signals the sweep to stop and waits for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

impl<S: CouponStore + 'static> BookingManager<S> {
    /// Spawns the periodic sweep on the current tokio runtime.
    ///
    /// The sweep is not time-critical; a failed pass logs a warning and the
    /// next interval retries.
    #[must_use]
    pub fn spawn_expiry_sweep(self: &Arc<Self>) -> ExpirySweep {
        let manager = Arc::clone(self);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = manager.config.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match manager.expire_stale_bookings().await {
                            Ok(0) => {}
                            Ok(expired) => {
                                tracing::info!(expired, "expiry sweep returned stock to the pool");
                            }
                            Err(error) => {
                                tracing::warn!(%error, "expiry sweep pass failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        ExpirySweep { shutdown, handle }
    }
}
