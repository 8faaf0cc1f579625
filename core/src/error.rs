//! Error taxonomy for the booking and redemption engine.
//!
//! Business-rule failures are expected outcomes and travel as typed values;
//! they are never logged as errors. Storage contention is retried a bounded
//! number of times by the services before collapsing into [`BookingError::Unknown`]
//! / [`RedemptionError::Unknown`], which a caller may safely retry. Integrity
//! violations are fatal for the affected operation and must be investigated,
//! never silently corrected.

use crate::booking::BookingStatus;
use thiserror::Error;

/// Storage-layer failures, shared by every store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transaction lost a lock/serialization race and can be retried.
    #[error("storage conflict, safe to retry")]
    Conflict,

    /// The store could not be reached or the query failed outright.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A core invariant was observed broken at the storage layer
    /// (for example negative available stock). Not retryable.
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Failures of the Promotion Ledger's atomic stock operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The promotion is inactive, finished, or outside its date window.
    #[error("promotion is not active")]
    PromotionNotActive,

    /// Not enough available stock to satisfy the reservation.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Units requested
        requested: u32,
        /// Units actually available
        available: u32,
    },
}

/// Failures of booking creation and cancellation.
#[derive(Debug, Error)]
pub enum BookingError {
    // ═══════════════════════════════════════════════════════════
    // Business-rule outcomes
    // ═══════════════════════════════════════════════════════════
    /// The promotion is inactive, finished, or outside its date window.
    #[error("promotion is not active")]
    PromotionNotActive,

    /// The promotion has no stock left.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Units requested
        requested: u32,
        /// Units actually available
        available: u32,
    },

    /// A per-user or per-day booking limit was reached.
    #[error("booking limit of {limit} reached ({scope})")]
    LimitExceeded {
        /// The configured ceiling that was hit
        limit: u32,
        /// Which limit was hit
        scope: LimitScope,
    },

    /// The user already holds a pending booking for this promotion.
    #[error("a pending booking already exists for this promotion")]
    DuplicateBooking,

    /// The promotion or booking does not exist.
    #[error("not found")]
    NotFound,

    /// The actor does not own the booking.
    #[error("booking belongs to another user")]
    NotOwner,

    /// The booking is already in a terminal state.
    #[error("booking is already {status}")]
    AlreadyTerminal {
        /// The terminal status the booking is in
        status: BookingStatus,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure outcomes
    // ═══════════════════════════════════════════════════════════
    /// A storage failure that is not a business outcome.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation failed for transport/contention reasons after the retry
    /// budget was exhausted. The request did not observably apply and may be
    /// retried; a retry after a hidden success is rejected as
    /// [`BookingError::DuplicateBooking`] or [`BookingError::AlreadyTerminal`].
    #[error("operation failed, safe to retry")]
    Unknown,
}

/// Which booking limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// Total non-cancelled bookings for the promotion
    PerUser,
    /// Bookings created on the current calendar day
    PerDay,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerUser => write!(f, "per user"),
            Self::PerDay => write!(f, "per day"),
        }
    }
}

impl From<LedgerError> for BookingError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::PromotionNotActive => Self::PromotionNotActive,
            LedgerError::InsufficientStock {
                requested,
                available,
            } => Self::InsufficientStock {
                requested,
                available,
            },
        }
    }
}

/// Failures of redemption-code issuance and validation.
///
/// Every variant except `Unknown` is reported to the terminal as a declined
/// redemption and is not retried automatically; only a fresh
/// `begin_redemption` is a valid user retry.
#[derive(Debug, Error)]
pub enum RedemptionError {
    /// The code (or the reservation backing it) is past its validity window.
    #[error("code expired, generate a new one")]
    Expired,

    /// The code's authentication tag did not verify or the payload is malformed.
    #[error("invalid code signature")]
    InvalidSignature,

    /// The booking was already redeemed or cancelled, or this nonce was
    /// already spent.
    #[error("coupon already used")]
    AlreadyUsed,

    /// No booking matches the identity embedded in the code.
    #[error("booking not found")]
    BookingNotFound,

    /// A storage failure that is not a business outcome.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport/contention failure after the retry budget; safe to retry at
    /// the terminal because a hidden success rejects the replayed nonce as
    /// [`RedemptionError::AlreadyUsed`].
    #[error("operation failed, safe to retry")]
    Unknown,
}
