//! # Promo Testing
//!
//! Test support for the promotion engine: a deterministic clock, an
//! in-memory [`promo_core::store::CouponStore`] with the same atomicity
//! contract as the Postgres store, and fixture builders.
//!
//! The in-memory store also supports injected storage conflicts so the
//! services' retry behavior can be exercised without a contended database.

pub mod builders;
pub mod clock;
pub mod store;
pub mod telemetry;

pub use builders::PromotionBuilder;
pub use clock::{FixedClock, test_clock};
pub use store::MemoryCouponStore;
pub use telemetry::init_tracing;
