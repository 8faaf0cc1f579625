//! # Promo Core
//!
//! The promotion stock and coupon-redemption consistency engine: the rules
//! that govern how a limited-stock promotion is reserved, how a reservation
//! is redeemed exactly once via a time-boxed replay-resistant code, and how
//! per-user/per-day limits and stock counters stay correct under concurrent
//! access.
//!
//! ## Components
//!
//! - [`ledger`]: atomic stock accounting owned by a single promotion row
//! - [`booking`]: the reservation state machine and admission checks
//! - [`manager`]: the booking service (create / cancel / expiry sweep)
//! - [`redemption`] + [`validator`]: signed single-use redemption codes
//! - [`store`]: the transactional contract every write path goes through
//!
//! ## Architecture
//!
//! Functional core, imperative shell: all business decisions are pure
//! functions over plain data records, and every read-check-write sequence is
//! executed by a [`store::CouponStore`] implementation as one atomic unit
//! (row-level locks in Postgres, a single mutex in the in-memory test
//! store). The services on top add only retry policy and telemetry.
//!
//! Everything around this crate (identity, promotion CRUD, branch
//! management, transports) is plumbing supplied by the wider platform; this
//! crate trusts the `UserId` it is handed and performs no authentication.

pub mod booking;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod manager;
pub mod redemption;
pub mod store;
pub mod types;
pub mod validator;

pub use booking::{Booking, BookingStatus, UserPromotionActivity, check_admission};
pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use error::{BookingError, LedgerError, LimitScope, RedemptionError, StoreError};
pub use ledger::{Promotion, PromotionState};
pub use manager::{BookingManager, ExpirySweep};
pub use redemption::{CodeSigner, Nonce, RedeemedCoupon, RedemptionClaim, RedemptionCode};
pub use store::CouponStore;
pub use types::{Actor, BookingId, BranchId, PromotionId, RedemptionId, UserId};
pub use validator::RedemptionValidator;

// Re-export commonly used types
pub use chrono::{DateTime, Duration, Utc};
