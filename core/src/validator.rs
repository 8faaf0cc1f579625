//! Redemption Validator: issues time-boxed codes for pending bookings and
//! validates them at the point of sale.
//!
//! Issuance never mutates booking state, so a user may request fresh codes
//! repeatedly; every non-expired nonce stays honorable until the first one
//! succeeds, at which point the `Pending -> Used` transition and the nonce
//! unique index decline the rest.

use crate::booking::BookingStatus;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{RedemptionError, StoreError};
use crate::redemption::{CodeSigner, Nonce, RedeemedCoupon, RedemptionClaim, RedemptionCode};
use crate::store::CouponStore;
use crate::types::{BookingId, BranchId};
use std::sync::Arc;

/// Redemption service over a [`CouponStore`].
pub struct RedemptionValidator<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    signer: CodeSigner,
    config: EngineConfig,
}

impl<S> std::fmt::Debug for RedemptionValidator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedemptionValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: CouponStore> RedemptionValidator<S> {
    /// Creates a new `RedemptionValidator`; the signing key comes from the
    /// config's shared secret.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let signer = CodeSigner::new(config.signing_secret.as_bytes());
        Self {
            store,
            clock,
            signer,
            config,
        }
    }

    /// Issues a signed redemption code for a `Pending`, unexpired booking.
    ///
    /// Idempotent with respect to booking state; each call yields a fresh
    /// nonce.
    ///
    /// # Errors
    ///
    /// [`RedemptionError::BookingNotFound`] for an unknown id,
    /// [`RedemptionError::AlreadyUsed`] for a terminal booking,
    /// [`RedemptionError::Expired`] once the reservation window elapsed.
    #[tracing::instrument(skip(self))]
    pub async fn begin_redemption(
        &self,
        booking_id: BookingId,
    ) -> Result<RedemptionCode, RedemptionError> {
        let booking = self
            .store
            .booking(booking_id)
            .await?
            .ok_or(RedemptionError::BookingNotFound)?;

        let now = self.clock.now();
        match booking.status {
            BookingStatus::Pending if booking.hold_until >= now => {}
            BookingStatus::Pending => return Err(RedemptionError::Expired),
            BookingStatus::Used | BookingStatus::Cancelled => {
                return Err(RedemptionError::AlreadyUsed);
            }
        }

        let claim = RedemptionClaim {
            promotion_id: booking.promotion_id,
            user_id: booking.user_id,
            nonce: Nonce::generate(),
            issued_at: now,
        };
        self.signer.sign(&claim)
    }

    /// Validates a scanned code and completes the redemption.
    ///
    /// Verification order: authenticity first, then code age against the
    /// trusted clock, then the atomic `Pending -> Used` + coupon insert in
    /// the store. A replayed nonce is declined as `AlreadyUsed` regardless of
    /// concurrency.
    ///
    /// # Errors
    ///
    /// [`RedemptionError::InvalidSignature`], [`RedemptionError::Expired`],
    /// [`RedemptionError::AlreadyUsed`],
    /// [`RedemptionError::BookingNotFound`], or
    /// [`RedemptionError::Unknown`] after exhausted retries.
    #[tracing::instrument(skip(self, code))]
    pub async fn complete_redemption(
        &self,
        branch_id: BranchId,
        code: &RedemptionCode,
    ) -> Result<RedeemedCoupon, RedemptionError> {
        let claim = self.signer.verify(code)?;

        let now = self.clock.now();
        if now - claim.issued_at > self.config.max_code_age {
            return Err(RedemptionError::Expired);
        }

        let mut attempt = 0u32;
        loop {
            let result = self.store.redeem(&claim, branch_id, self.clock.now()).await;

            match result {
                Err(RedemptionError::Store(StoreError::Conflict))
                    if attempt < self.config.conflict_retries =>
                {
                    attempt += 1;
                    tracing::debug!(attempt, "storage contention on redemption, retrying");
                }
                Err(RedemptionError::Store(StoreError::Conflict)) => {
                    tracing::info!("retry budget exhausted on redemption");
                    return Err(RedemptionError::Unknown);
                }
                Err(RedemptionError::Store(StoreError::Unavailable(detail))) => {
                    tracing::warn!(%detail, "storage unavailable during redemption");
                    return Err(RedemptionError::Unknown);
                }
                Err(RedemptionError::Store(StoreError::Integrity(detail))) => {
                    tracing::error!(%detail, "integrity violation, halting redemption");
                    return Err(RedemptionError::Store(StoreError::Integrity(detail)));
                }
                other => return other,
            }
        }
    }
}
