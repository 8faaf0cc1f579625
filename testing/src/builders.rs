//! Test data builders.

use chrono::{DateTime, Duration, Utc};
use promo_core::error::StoreError;
use promo_core::ledger::{Promotion, PromotionState};
use promo_core::store::CouponStore;
use promo_core::types::PromotionId;

/// Builder for [`Promotion`] fixtures.
///
/// Defaults to an unlimited, non-restockable, currently active promotion
/// whose window spans a day either side of `now`.
#[derive(Debug, Clone)]
pub struct PromotionBuilder {
    stock: u32,
    limit_per_user: Option<u32>,
    daily_limit_per_user: Option<u32>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    restockable: bool,
    state: PromotionState,
}

impl PromotionBuilder {
    /// Starts a builder for a promotion with `stock` units, active around
    /// `now`.
    #[must_use]
    pub fn new(stock: u32, now: DateTime<Utc>) -> Self {
        Self {
            stock,
            limit_per_user: None,
            daily_limit_per_user: None,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            restockable: false,
            state: PromotionState::Active,
        }
    }

    /// Caps non-cancelled bookings per user.
    #[must_use]
    pub const fn limit_per_user(mut self, limit: u32) -> Self {
        self.limit_per_user = Some(limit);
        self
    }

    /// Caps bookings per user per calendar day.
    #[must_use]
    pub const fn daily_limit_per_user(mut self, limit: u32) -> Self {
        self.daily_limit_per_user = Some(limit);
        self
    }

    /// Sets the bookable window explicitly.
    #[must_use]
    pub const fn window(mut self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        self.starts_at = starts_at;
        self.ends_at = ends_at;
        self
    }

    /// Marks stock exhaustion as temporary.
    #[must_use]
    pub const fn restockable(mut self) -> Self {
        self.restockable = true;
        self
    }

    /// Starts the promotion disabled.
    #[must_use]
    pub const fn inactive(mut self) -> Self {
        self.state = PromotionState::Inactive;
        self
    }

    /// Builds the promotion value.
    #[must_use]
    pub fn build(self) -> Promotion {
        Promotion {
            id: PromotionId::new(),
            total_stock: self.stock,
            available_stock: self.stock,
            limit_per_user: self.limit_per_user,
            daily_limit_per_user: self.daily_limit_per_user,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            restockable: self.restockable,
            state: self.state,
        }
    }

    /// Builds the promotion and inserts it into `store`, returning its id.
    ///
    /// # Errors
    ///
    /// [`StoreError`] on storage failure.
    pub async fn insert<S: CouponStore>(self, store: &S) -> Result<PromotionId, StoreError> {
        let promotion = self.build();
        let id = promotion.id;
        store.insert_promotion(promotion).await?;
        Ok(id)
    }
}
