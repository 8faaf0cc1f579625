//! In-memory [`CouponStore`] for tests.
//!
//! A single async mutex around the whole dataset gives every store method the
//! same atomicity the Postgres implementation gets from transactions and row
//! locks: compound check-and-mutate sequences never interleave. The business
//! decisions run through the exact same pure functions from `promo-core`, so
//! the two implementations cannot drift apart on semantics.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use promo_core::booking::{
    Booking, BookingStatus, UserPromotionActivity, check_admission, day_start,
};
use promo_core::error::{BookingError, RedemptionError, StoreError};
use promo_core::ledger::Promotion;
use promo_core::redemption::{Nonce, RedeemedCoupon, RedemptionClaim};
use promo_core::store::CouponStore;
use promo_core::types::{Actor, BookingId, BranchId, PromotionId, RedemptionId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
struct Dataset {
    promotions: HashMap<PromotionId, Promotion>,
    bookings: HashMap<BookingId, Booking>,
    coupons: Vec<RedeemedCoupon>,
    spent_nonces: HashSet<Nonce>,
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryCouponStore {
    data: Mutex<Dataset>,
    injected_conflicts: AtomicU32,
}

impl std::fmt::Debug for MemoryCouponStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCouponStore").finish_non_exhaustive()
    }
}

impl MemoryCouponStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` mutating calls fail with
    /// [`StoreError::Conflict`], for exercising the services' retry budget.
    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Snapshot of all redeemed coupons, for assertions.
    pub async fn redeemed_coupons(&self) -> Vec<RedeemedCoupon> {
        self.data.lock().await.coupons.clone()
    }

    fn take_injected_conflict(&self) -> Result<(), StoreError> {
        let remaining = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });
        match remaining {
            Ok(_) => Err(StoreError::Conflict),
            Err(_) => Ok(()),
        }
    }
}

fn activity_snapshot(
    data: &Dataset,
    user_id: UserId,
    promotion_id: PromotionId,
    now: DateTime<Utc>,
) -> UserPromotionActivity {
    let today = day_start(now);
    let tomorrow = today + Duration::days(1);
    let mut activity = UserPromotionActivity::default();

    for booking in data.bookings.values() {
        if booking.user_id != user_id || booking.promotion_id != promotion_id {
            continue;
        }
        match booking.status {
            BookingStatus::Pending => {
                activity.has_pending = true;
                activity.active_bookings += 1;
            }
            BookingStatus::Used => activity.active_bookings += 1,
            BookingStatus::Cancelled => {}
        }
        if booking.booked_at >= today && booking.booked_at < tomorrow {
            activity.booked_today += 1;
        }
    }
    activity
}

#[async_trait]
impl CouponStore for MemoryCouponStore {
    async fn insert_promotion(&self, promotion: Promotion) -> Result<(), StoreError> {
        let mut data = self.data.lock().await;
        data.promotions.insert(promotion.id, promotion);
        Ok(())
    }

    async fn promotion(&self, id: PromotionId) -> Result<Option<Promotion>, StoreError> {
        Ok(self.data.lock().await.promotions.get(&id).cloned())
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.data.lock().await.bookings.get(&id).cloned())
    }

    async fn create_booking(
        &self,
        user_id: UserId,
        promotion_id: PromotionId,
        now: DateTime<Utc>,
        reservation_window: Duration,
    ) -> Result<Booking, BookingError> {
        self.take_injected_conflict()?;
        let mut data = self.data.lock().await;

        let promotion = data
            .promotions
            .get(&promotion_id)
            .ok_or(BookingError::NotFound)?;
        if let Some(detail) = promotion.invariant_violation() {
            return Err(StoreError::Integrity(detail).into());
        }

        let activity = activity_snapshot(&data, user_id, promotion_id, now);
        check_admission(promotion, &activity)?;

        let mut updated = promotion.clone();
        updated.reserve(now, 1)?;

        let booking = Booking::new(user_id, promotion_id, now, reservation_window);
        data.promotions.insert(promotion_id, updated);
        data.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn cancel_booking(
        &self,
        booking_id: BookingId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        self.take_injected_conflict()?;
        let mut data = self.data.lock().await;

        let mut booking = data
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(BookingError::NotFound)?;
        if !actor.may_cancel(booking.user_id) {
            return Err(BookingError::NotOwner);
        }
        booking.cancel(now)?;

        let mut promotion = data
            .promotions
            .get(&booking.promotion_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::Integrity(format!(
                    "booking {booking_id} references missing promotion {}",
                    booking.promotion_id
                ))
            })?;
        promotion.release(now, 1);

        data.promotions.insert(promotion.id, promotion);
        data.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn redeem(
        &self,
        claim: &RedemptionClaim,
        branch_id: BranchId,
        now: DateTime<Utc>,
    ) -> Result<RedeemedCoupon, RedemptionError> {
        self.take_injected_conflict()?;
        let mut data = self.data.lock().await;

        let pending_id = data
            .bookings
            .values()
            .find(|booking| {
                booking.user_id == claim.user_id
                    && booking.promotion_id == claim.promotion_id
                    && booking.status == BookingStatus::Pending
            })
            .map(|booking| booking.id);

        let Some(booking_id) = pending_id else {
            let has_history = data.bookings.values().any(|booking| {
                booking.user_id == claim.user_id && booking.promotion_id == claim.promotion_id
            });
            return Err(if has_history {
                RedemptionError::AlreadyUsed
            } else {
                RedemptionError::BookingNotFound
            });
        };

        if data.spent_nonces.contains(&claim.nonce) {
            return Err(RedemptionError::AlreadyUsed);
        }

        let mut booking = data
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(RedemptionError::BookingNotFound)?;
        booking.mark_used(now)?;

        let coupon = RedeemedCoupon {
            id: RedemptionId::new(),
            user_id: booking.user_id,
            branch_id,
            promotion_id: booking.promotion_id,
            used_at: now,
            nonce: claim.nonce.clone(),
            code_issued_at: claim.issued_at,
        };

        data.bookings.insert(booking.id, booking);
        data.spent_nonces.insert(claim.nonce.clone());
        data.coupons.push(coupon.clone());
        Ok(coupon)
    }

    async fn stale_pending_bookings(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BookingId>, StoreError> {
        let data = self.data.lock().await;
        let mut stale: Vec<&Booking> = data
            .bookings
            .values()
            .filter(|booking| booking.is_stale(now))
            .collect();
        stale.sort_by_key(|booking| booking.hold_until);
        Ok(stale
            .into_iter()
            .take(limit as usize)
            .map(|booking| booking.id)
            .collect())
    }

    async fn finish_ended_promotions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut data = self.data.lock().await;
        let mut finished = 0u64;
        for promotion in data.promotions.values_mut() {
            let before = promotion.state;
            promotion.refresh_state(now);
            if promotion.state != before {
                finished += 1;
            }
        }
        Ok(finished)
    }

    async fn restock_promotion(
        &self,
        promotion_id: PromotionId,
        additional: u32,
        now: DateTime<Utc>,
    ) -> Result<Promotion, BookingError> {
        self.take_injected_conflict()?;
        let mut data = self.data.lock().await;

        let mut promotion = data
            .promotions
            .get(&promotion_id)
            .cloned()
            .ok_or(BookingError::NotFound)?;
        promotion.restock(now, additional);
        data.promotions.insert(promotion_id, promotion.clone());
        Ok(promotion)
    }
}
