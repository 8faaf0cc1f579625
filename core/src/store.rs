//! The store contract: the consistency discipline every write path obeys.
//!
//! Each method on [`CouponStore`] is one atomic unit. An implementation must
//! make the whole method linearizable with respect to the rows it touches:
//! either a transaction with row-level pessimistic locks (the Postgres
//! store), or a single lock around the dataset (the in-memory store). The
//! compound read-check-write sequences inside `create_booking`,
//! `cancel_booking` and `redeem` must never interleave with another caller's.
//!
//! Two schema-level invariants back the method contracts up:
//! at most one `Pending` booking per `(user_id, promotion_id)`, and nonce
//! uniqueness across redeemed coupons. Implementations surface violations of
//! those as [`BookingError::DuplicateBooking`] / [`RedemptionError::AlreadyUsed`],
//! which is what makes blind retries of timed-out requests safe.

use crate::booking::Booking;
use crate::error::{BookingError, RedemptionError, StoreError};
use crate::ledger::Promotion;
use crate::redemption::{RedeemedCoupon, RedemptionClaim};
use crate::types::{Actor, BookingId, BranchId, PromotionId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Transactional persistence for promotions, bookings, and redeemed coupons.
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Inserts a newly created promotion.
    ///
    /// # Errors
    ///
    /// [`StoreError`] on storage failure.
    async fn insert_promotion(&self, promotion: Promotion) -> Result<(), StoreError>;

    /// Reads a promotion without locking it.
    ///
    /// # Errors
    ///
    /// [`StoreError`] on storage failure.
    async fn promotion(&self, id: PromotionId) -> Result<Option<Promotion>, StoreError>;

    /// Reads a booking without locking it.
    ///
    /// # Errors
    ///
    /// [`StoreError`] on storage failure.
    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Atomic compound: duplicate/limit checks against a consistent snapshot,
    /// ledger reserve, and insert of the `Pending` row.
    ///
    /// # Errors
    ///
    /// The full creation taxonomy: [`BookingError::NotFound`] (promotion),
    /// [`BookingError::DuplicateBooking`], [`BookingError::LimitExceeded`],
    /// [`BookingError::PromotionNotActive`],
    /// [`BookingError::InsufficientStock`], or a wrapped [`StoreError`].
    async fn create_booking(
        &self,
        user_id: UserId,
        promotion_id: PromotionId,
        now: DateTime<Utc>,
        reservation_window: Duration,
    ) -> Result<Booking, BookingError>;

    /// Atomic compound: ownership check, `Pending -> Cancelled`, and ledger
    /// release, all in one transaction.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`], [`BookingError::NotOwner`],
    /// [`BookingError::AlreadyTerminal`], or a wrapped [`StoreError`].
    async fn cancel_booking(
        &self,
        booking_id: BookingId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError>;

    /// Atomic compound: locate the `Pending` booking for the claim's
    /// `(user_id, promotion_id)`, transition it to `Used`, and insert the
    /// coupon record with the claim's nonce, as one unit, never partial.
    ///
    /// # Errors
    ///
    /// [`RedemptionError::BookingNotFound`] when the pair has never booked,
    /// [`RedemptionError::AlreadyUsed`] when the booking is terminal or the
    /// nonce was already spent, or a wrapped [`StoreError`].
    async fn redeem(
        &self,
        claim: &RedemptionClaim,
        branch_id: BranchId,
        now: DateTime<Utc>,
    ) -> Result<RedeemedCoupon, RedemptionError>;

    /// Ids of `Pending` bookings whose hold elapsed before `now`, oldest
    /// first, at most `limit`. Read-only; each id is then cancelled through
    /// the normal atomic path.
    ///
    /// # Errors
    ///
    /// [`StoreError`] on storage failure.
    async fn stale_pending_bookings(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BookingId>, StoreError>;

    /// Persists the date-driven lifecycle transition: `Active` promotions
    /// whose end date passed before `now` become `Finished`. Returns how
    /// many rows changed.
    ///
    /// # Errors
    ///
    /// [`StoreError`] on storage failure.
    async fn finish_ended_promotions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Atomic admin restock routed through the ledger.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] or a wrapped [`StoreError`].
    async fn restock_promotion(
        &self,
        promotion_id: PromotionId,
        additional: u32,
        now: DateTime<Utc>,
    ) -> Result<Promotion, BookingError>;
}
