//! `PostgreSQL`-backed [`CouponStore`] with row-level pessimistic locking.
//!
//! Each trait method runs as one transaction. Contended rows are taken with
//! `SELECT ... FOR UPDATE` before any check, so the check-and-mutate
//! sequences are serialized per promotion and per booking; lock order is
//! always booking first, promotion second, which rules out deadlocks between
//! creation, cancellation, and redemption. Serialization failures and
//! deadlocks surface as [`StoreError::Conflict`] for the services' bounded
//! retry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use promo_core::booking::{
    Booking, BookingStatus, UserPromotionActivity, check_admission, day_start,
};
use promo_core::error::{BookingError, RedemptionError, StoreError};
use promo_core::ledger::{Promotion, PromotionState};
use promo_core::redemption::{RedeemedCoupon, RedemptionClaim};
use promo_core::store::CouponStore;
use promo_core::types::{Actor, BookingId, BranchId, PromotionId, RedemptionId, UserId};
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use uuid::Uuid;

/// `PostgreSQL` implementation of the store contract.
#[derive(Clone)]
pub struct PostgresCouponStore {
    pool: Arc<PgPool>,
}

impl std::fmt::Debug for PostgresCouponStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCouponStore").finish_non_exhaustive()
    }
}

impl PostgresCouponStore {
    /// Creates a store over an existing pool.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct PromotionRow {
    id: Uuid,
    total_stock: i32,
    available_stock: i32,
    limit_per_user: Option<i32>,
    daily_limit_per_user: Option<i32>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    restockable: bool,
    state: String,
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    promotion_id: Uuid,
    booked_at: DateTime<Utc>,
    hold_until: DateTime<Utc>,
    status: String,
    used_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

fn stock_to_db(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Integrity(format!("stock value {value} exceeds storage range")))
}

fn stock_from_db(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Integrity(format!("negative stock value {value} in storage")))
}

fn limit_from_db(value: Option<i32>) -> Result<Option<u32>, StoreError> {
    value.map(stock_from_db).transpose()
}

fn limit_to_db(value: Option<u32>) -> Result<Option<i32>, StoreError> {
    value.map(stock_to_db).transpose()
}

impl TryFrom<PromotionRow> for Promotion {
    type Error = StoreError;

    fn try_from(row: PromotionRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: PromotionId::from_uuid(row.id),
            total_stock: stock_from_db(row.total_stock)?,
            available_stock: stock_from_db(row.available_stock)?,
            limit_per_user: limit_from_db(row.limit_per_user)?,
            daily_limit_per_user: limit_from_db(row.daily_limit_per_user)?,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            restockable: row.restockable,
            state: PromotionState::parse(&row.state).map_err(StoreError::Integrity)?,
        })
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, StoreError> {
        Ok(Self {
            id: BookingId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            promotion_id: PromotionId::from_uuid(row.promotion_id),
            booked_at: row.booked_at,
            hold_until: row.hold_until,
            status: BookingStatus::parse(&row.status).map_err(StoreError::Integrity)?,
            used_at: row.used_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

// ============================================================================
// Error mapping
// ============================================================================

// Retryable SQLSTATEs: serialization_failure, deadlock_detected,
// lock_not_available.
fn map_sqlx(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        match db.code().as_deref() {
            Some("40001" | "40P01" | "55P03") => return StoreError::Conflict,
            Some("23514") => return StoreError::Integrity(db.message().to_string()),
            _ => {}
        }
    }
    StoreError::Unavailable(error.to_string())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

// ============================================================================
// Shared queries
// ============================================================================

const SELECT_PROMOTION: &str = "SELECT id, total_stock, available_stock, limit_per_user, \
     daily_limit_per_user, starts_at, ends_at, restockable, state \
     FROM promotions WHERE id = $1";

const SELECT_BOOKING: &str = "SELECT id, user_id, promotion_id, booked_at, hold_until, status, \
     used_at, cancelled_at \
     FROM bookings WHERE id = $1";

/// Locks and loads a promotion row, failing fast on broken stock accounting.
async fn lock_promotion(
    conn: &mut PgConnection,
    promotion_id: PromotionId,
) -> Result<Option<Promotion>, StoreError> {
    let row: Option<PromotionRow> =
        sqlx::query_as(&format!("{SELECT_PROMOTION} FOR UPDATE"))
            .bind(promotion_id.as_uuid())
            .fetch_optional(conn)
            .await
            .map_err(map_sqlx)?;

    let Some(row) = row else {
        return Ok(None);
    };

    let promotion = Promotion::try_from(row)?;
    if let Some(detail) = promotion.invariant_violation() {
        return Err(StoreError::Integrity(detail));
    }
    Ok(Some(promotion))
}

/// Writes a mutated promotion back within the surrounding transaction.
async fn write_promotion(conn: &mut PgConnection, promotion: &Promotion) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE promotions SET total_stock = $2, available_stock = $3, state = $4 WHERE id = $1",
    )
    .bind(promotion.id.as_uuid())
    .bind(stock_to_db(promotion.total_stock)?)
    .bind(stock_to_db(promotion.available_stock)?)
    .bind(promotion.state.as_str())
    .execute(conn)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

// ============================================================================
// Store implementation
// ============================================================================

#[async_trait]
impl CouponStore for PostgresCouponStore {
    #[tracing::instrument(skip(self, promotion), fields(promotion_id = %promotion.id))]
    async fn insert_promotion(&self, promotion: Promotion) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO promotions (id, total_stock, available_stock, limit_per_user, \
             daily_limit_per_user, starts_at, ends_at, restockable, state) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(promotion.id.as_uuid())
        .bind(stock_to_db(promotion.total_stock)?)
        .bind(stock_to_db(promotion.available_stock)?)
        .bind(limit_to_db(promotion.limit_per_user)?)
        .bind(limit_to_db(promotion.daily_limit_per_user)?)
        .bind(promotion.starts_at)
        .bind(promotion.ends_at)
        .bind(promotion.restockable)
        .bind(promotion.state.as_str())
        .execute(self.pool.as_ref())
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn promotion(&self, id: PromotionId) -> Result<Option<Promotion>, StoreError> {
        let row: Option<PromotionRow> = sqlx::query_as(SELECT_PROMOTION)
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        row.map(Promotion::try_from).transpose()
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(SELECT_BOOKING)
            .bind(id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        row.map(Booking::try_from).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn create_booking(
        &self,
        user_id: UserId,
        promotion_id: PromotionId,
        now: DateTime<Utc>,
        reservation_window: Duration,
    ) -> Result<Booking, BookingError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        // Promotion row lock serializes every creation against this
        // promotion, including the limit checks below.
        let mut promotion = lock_promotion(&mut tx, promotion_id)
            .await?
            .ok_or(BookingError::NotFound)?;

        let (has_pending,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM bookings \
             WHERE user_id = $1 AND promotion_id = $2 AND status = 'PENDING')",
        )
        .bind(user_id.as_uuid())
        .bind(promotion_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let (active_bookings,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bookings \
             WHERE user_id = $1 AND promotion_id = $2 AND status IN ('PENDING', 'USED')",
        )
        .bind(user_id.as_uuid())
        .bind(promotion_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let today = day_start(now);
        let (booked_today,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM bookings \
             WHERE user_id = $1 AND promotion_id = $2 \
             AND booked_at >= $3 AND booked_at < $4",
        )
        .bind(user_id.as_uuid())
        .bind(promotion_id.as_uuid())
        .bind(today)
        .bind(today + Duration::days(1))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let activity = UserPromotionActivity {
            has_pending,
            active_bookings: u32::try_from(active_bookings).unwrap_or(u32::MAX),
            booked_today: u32::try_from(booked_today).unwrap_or(u32::MAX),
        };
        check_admission(&promotion, &activity)?;

        promotion.reserve(now, 1)?;
        write_promotion(&mut tx, &promotion).await?;

        let booking = Booking::new(user_id, promotion_id, now, reservation_window);
        let inserted = sqlx::query(
            "INSERT INTO bookings (id, user_id, promotion_id, booked_at, hold_until, status) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.user_id.as_uuid())
        .bind(booking.promotion_id.as_uuid())
        .bind(booking.booked_at)
        .bind(booking.hold_until)
        .bind(booking.status.as_str())
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            // Backstop: the partial unique index caught a pending duplicate
            // the snapshot missed.
            if is_unique_violation(&error) {
                return Err(BookingError::DuplicateBooking);
            }
            return Err(map_sqlx(error).into());
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(booking)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_booking(
        &self,
        booking_id: BookingId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Booking, BookingError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row: Option<BookingRow> = sqlx::query_as(&format!("{SELECT_BOOKING} FOR UPDATE"))
            .bind(booking_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let mut booking = Booking::try_from(row.ok_or(BookingError::NotFound)?)?;

        if !actor.may_cancel(booking.user_id) {
            return Err(BookingError::NotOwner);
        }
        booking.cancel(now)?;

        sqlx::query("UPDATE bookings SET status = $2, cancelled_at = $3 WHERE id = $1")
            .bind(booking.id.as_uuid())
            .bind(booking.status.as_str())
            .bind(booking.cancelled_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let mut promotion = lock_promotion(&mut tx, booking.promotion_id)
            .await?
            .ok_or_else(|| {
                StoreError::Integrity(format!(
                    "booking {booking_id} references missing promotion {}",
                    booking.promotion_id
                ))
            })?;
        promotion.release(now, 1);
        write_promotion(&mut tx, &promotion).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(booking)
    }

    #[tracing::instrument(skip(self, claim), fields(promotion_id = %claim.promotion_id))]
    async fn redeem(
        &self,
        claim: &RedemptionClaim,
        branch_id: BranchId,
        now: DateTime<Utc>,
    ) -> Result<RedeemedCoupon, RedemptionError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        // At most one row can match thanks to the partial unique index.
        let row: Option<BookingRow> = sqlx::query_as(
            "SELECT id, user_id, promotion_id, booked_at, hold_until, status, \
             used_at, cancelled_at \
             FROM bookings \
             WHERE user_id = $1 AND promotion_id = $2 AND status = 'PENDING' \
             FOR UPDATE",
        )
        .bind(claim.user_id.as_uuid())
        .bind(claim.promotion_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = row else {
            let (has_history,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM bookings \
                 WHERE user_id = $1 AND promotion_id = $2)",
            )
            .bind(claim.user_id.as_uuid())
            .bind(claim.promotion_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?;

            return Err(if has_history {
                RedemptionError::AlreadyUsed
            } else {
                RedemptionError::BookingNotFound
            });
        };

        let mut booking = Booking::try_from(row)?;
        booking.mark_used(now)?;

        sqlx::query("UPDATE bookings SET status = $2, used_at = $3 WHERE id = $1")
            .bind(booking.id.as_uuid())
            .bind(booking.status.as_str())
            .bind(booking.used_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let coupon = RedeemedCoupon {
            id: RedemptionId::new(),
            user_id: booking.user_id,
            branch_id,
            promotion_id: booking.promotion_id,
            used_at: now,
            nonce: claim.nonce.clone(),
            code_issued_at: claim.issued_at,
        };
        let inserted = sqlx::query(
            "INSERT INTO redeemed_coupons \
             (id, user_id, branch_id, promotion_id, used_at, nonce, code_issued_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(coupon.id.as_uuid())
        .bind(coupon.user_id.as_uuid())
        .bind(coupon.branch_id.as_uuid())
        .bind(coupon.promotion_id.as_uuid())
        .bind(coupon.used_at)
        .bind(coupon.nonce.as_str())
        .bind(coupon.code_issued_at)
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            // Nonce replay: a second scan of the same code lost the race.
            if is_unique_violation(&error) {
                return Err(RedemptionError::AlreadyUsed);
            }
            return Err(map_sqlx(error).into());
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(coupon)
    }

    async fn stale_pending_bookings(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BookingId>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM bookings \
             WHERE status = 'PENDING' AND hold_until < $1 \
             ORDER BY hold_until \
             LIMIT $2",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(map_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|(id,)| BookingId::from_uuid(id))
            .collect())
    }

    async fn finish_ended_promotions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE promotions SET state = $2 WHERE state = $3 AND ends_at < $1")
                .bind(now)
                .bind(PromotionState::Finished.as_str())
                .bind(PromotionState::Active.as_str())
                .execute(self.pool.as_ref())
                .await
                .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self))]
    async fn restock_promotion(
        &self,
        promotion_id: PromotionId,
        additional: u32,
        now: DateTime<Utc>,
    ) -> Result<Promotion, BookingError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let mut promotion = lock_promotion(&mut tx, promotion_id)
            .await?
            .ok_or(BookingError::NotFound)?;
        promotion.restock(now, additional);
        write_promotion(&mut tx, &promotion).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(promotion)
    }
}
