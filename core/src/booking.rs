//! Bookings: a user's reservation against a promotion's stock.
//!
//! State machine per booking: `Pending --redeem--> Used`,
//! `Pending --cancel--> Cancelled`. `Used` and `Cancelled` are terminal;
//! every transition site matches exhaustively so an unhandled state is a
//! compile-time error.

use crate::error::{BookingError, LimitScope, RedemptionError};
use crate::ledger::Promotion;
use crate::types::{BookingId, PromotionId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Status of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Reserved, awaiting redemption or cancellation
    Pending,
    /// Redeemed; terminal
    Used,
    /// Cancelled by the user, an admin, or the expiry sweep; terminal
    Cancelled,
}

impl BookingStatus {
    /// Storage representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Used => "USED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized input so the store can report it as an
    /// integrity problem rather than defaulting.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "USED" => Ok(Self::Used),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown booking status '{other}'")),
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reservation of one unit of a promotion's stock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Identity
    pub id: BookingId,
    /// Owning user
    pub user_id: UserId,
    /// Reserved promotion
    pub promotion_id: PromotionId,
    /// Creation time
    pub booked_at: DateTime<Utc>,
    /// End of the reservation window; past this the sweep cancels the booking
    pub hold_until: DateTime<Utc>,
    /// Current status
    pub status: BookingStatus,
    /// Set on the `Pending -> Used` transition
    pub used_at: Option<DateTime<Utc>>,
    /// Set on the `Pending -> Cancelled` transition
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// Creates a fresh `Pending` booking holding one unit until
    /// `now + reservation_window`.
    #[must_use]
    pub fn new(
        user_id: UserId,
        promotion_id: PromotionId,
        now: DateTime<Utc>,
        reservation_window: Duration,
    ) -> Self {
        Self {
            id: BookingId::new(),
            user_id,
            promotion_id,
            booked_at: now,
            hold_until: now + reservation_window,
            status: BookingStatus::Pending,
            used_at: None,
            cancelled_at: None,
        }
    }

    /// Whether the reservation window has elapsed without redemption.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, BookingStatus::Pending) && self.hold_until < now
    }

    /// `Pending -> Cancelled` transition.
    ///
    /// # Errors
    ///
    /// [`BookingError::AlreadyTerminal`] when the booking is `Used` or
    /// `Cancelled`; repeat attempts are rejected idempotently.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        match self.status {
            BookingStatus::Pending => {
                self.status = BookingStatus::Cancelled;
                self.cancelled_at = Some(now);
                Ok(())
            }
            BookingStatus::Used | BookingStatus::Cancelled => Err(BookingError::AlreadyTerminal {
                status: self.status,
            }),
        }
    }

    /// `Pending -> Used` transition.
    ///
    /// # Errors
    ///
    /// [`RedemptionError::AlreadyUsed`] when the booking is terminal.
    pub fn mark_used(&mut self, now: DateTime<Utc>) -> Result<(), RedemptionError> {
        match self.status {
            BookingStatus::Pending => {
                self.status = BookingStatus::Used;
                self.used_at = Some(now);
                Ok(())
            }
            BookingStatus::Used | BookingStatus::Cancelled => Err(RedemptionError::AlreadyUsed),
        }
    }
}

/// Snapshot of a user's history against one promotion, gathered inside the
/// same transaction that will insert the new booking.
#[derive(Clone, Copy, Debug, Default)]
pub struct UserPromotionActivity {
    /// A `Pending` booking already exists for this (user, promotion)
    pub has_pending: bool,
    /// Count of the user's `Used` + `Pending` bookings for this promotion
    pub active_bookings: u32,
    /// Count of the user's bookings for this promotion created today
    pub booked_today: u32,
}

/// Admission checks for a new booking, evaluated against a consistent
/// snapshot. Ordering matters: duplicates are reported before limits, limits
/// before stock (stock is checked by the ledger afterwards).
///
/// # Errors
///
/// [`BookingError::DuplicateBooking`] or [`BookingError::LimitExceeded`].
pub fn check_admission(
    promotion: &Promotion,
    activity: &UserPromotionActivity,
) -> Result<(), BookingError> {
    if activity.has_pending {
        return Err(BookingError::DuplicateBooking);
    }

    if let Some(limit) = promotion.limit_per_user {
        if activity.active_bookings >= limit {
            return Err(BookingError::LimitExceeded {
                limit,
                scope: LimitScope::PerUser,
            });
        }
    }

    if let Some(limit) = promotion.daily_limit_per_user {
        if activity.booked_today >= limit {
            return Err(BookingError::LimitExceeded {
                limit,
                scope: LimitScope::PerDay,
            });
        }
    }

    Ok(())
}

/// UTC start of the calendar day containing `now`, used for the daily-limit
/// window.
#[must_use]
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ledger::PromotionState;

    fn promotion(limit_per_user: Option<u32>, daily: Option<u32>) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: PromotionId::new(),
            total_stock: 10,
            available_stock: 10,
            limit_per_user,
            daily_limit_per_user: daily,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            restockable: false,
            state: PromotionState::Active,
        }
    }

    fn pending_booking() -> Booking {
        Booking::new(
            UserId::new(),
            PromotionId::new(),
            Utc::now(),
            Duration::hours(24),
        )
    }

    #[test]
    fn new_booking_is_pending_with_hold() {
        let now = Utc::now();
        let booking = Booking::new(UserId::new(), PromotionId::new(), now, Duration::hours(24));
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.hold_until, now + Duration::hours(24));
        assert!(!booking.is_stale(now));
        assert!(booking.is_stale(now + Duration::hours(25)));
    }

    #[test]
    fn cancel_is_terminal_and_idempotently_rejected() {
        let mut booking = pending_booking();
        booking.cancel(Utc::now()).unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert!(booking.cancelled_at.is_some());

        assert!(matches!(
            booking.cancel(Utc::now()),
            Err(BookingError::AlreadyTerminal {
                status: BookingStatus::Cancelled,
            })
        ));
    }

    #[test]
    fn used_booking_cannot_be_cancelled_or_reused() {
        let mut booking = pending_booking();
        booking.mark_used(Utc::now()).unwrap();
        assert_eq!(booking.status, BookingStatus::Used);

        assert!(matches!(
            booking.cancel(Utc::now()),
            Err(BookingError::AlreadyTerminal {
                status: BookingStatus::Used,
            })
        ));
        assert!(matches!(
            booking.mark_used(Utc::now()),
            Err(RedemptionError::AlreadyUsed)
        ));
    }

    #[test]
    fn terminal_bookings_are_never_stale() {
        let mut booking = pending_booking();
        let later = booking.hold_until + Duration::hours(1);
        booking.cancel(Utc::now()).unwrap();
        assert!(!booking.is_stale(later));
    }

    #[test]
    fn admission_rejects_duplicate_before_limits() {
        let promotion = promotion(Some(1), Some(1));
        let activity = UserPromotionActivity {
            has_pending: true,
            active_bookings: 5,
            booked_today: 5,
        };
        assert!(matches!(
            check_admission(&promotion, &activity),
            Err(BookingError::DuplicateBooking)
        ));
    }

    #[test]
    fn admission_enforces_per_user_limit() {
        let promotion = promotion(Some(2), None);
        let activity = UserPromotionActivity {
            has_pending: false,
            active_bookings: 2,
            booked_today: 0,
        };
        assert!(matches!(
            check_admission(&promotion, &activity),
            Err(BookingError::LimitExceeded {
                limit: 2,
                scope: LimitScope::PerUser,
            })
        ));
    }

    #[test]
    fn admission_enforces_daily_limit() {
        let promotion = promotion(None, Some(1));
        let activity = UserPromotionActivity {
            has_pending: false,
            active_bookings: 3,
            booked_today: 1,
        };
        assert!(matches!(
            check_admission(&promotion, &activity),
            Err(BookingError::LimitExceeded {
                limit: 1,
                scope: LimitScope::PerDay,
            })
        ));
    }

    #[test]
    fn admission_allows_unlimited_promotions() {
        let promotion = promotion(None, None);
        let activity = UserPromotionActivity {
            has_pending: false,
            active_bookings: 100,
            booked_today: 100,
        };
        assert!(check_admission(&promotion, &activity).is_ok());
    }

    #[test]
    fn day_start_truncates_to_midnight() {
        let now = Utc::now();
        let start = day_start(now);
        assert!(start <= now);
        assert!(now - start < Duration::hours(24));
        assert_eq!(start, day_start(start));
    }
}
