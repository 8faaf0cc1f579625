//! # Promo Postgres
//!
//! `PostgreSQL` persistence for the promotion/booking/redemption engine.
//!
//! Implements [`promo_core::store::CouponStore`] with one transaction per
//! operation and `SELECT ... FOR UPDATE` row locks on the contended rows.
//! The schema (see `migrations/`) backs the engine's two uniqueness
//! invariants: at most one `PENDING` booking per `(user, promotion)` and
//! nonce uniqueness across redeemed coupons.

pub mod config;
pub mod store;

pub use config::PostgresConfig;
pub use store::PostgresCouponStore;
