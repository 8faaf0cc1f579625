//! Engine configuration loaded from environment variables with sensible
//! defaults.

use chrono::Duration;
use std::env;

/// Tunables for the booking and redemption services.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a `Pending` booking holds its unit before the sweep returns
    /// it to the pool.
    pub reservation_window: Duration,
    /// Maximum accepted age of a redemption code at validation time.
    pub max_code_age: Duration,
    /// How often the stale-booking sweep runs.
    pub sweep_interval: std::time::Duration,
    /// Maximum bookings cancelled per sweep pass.
    pub sweep_batch: u32,
    /// Internal retries on storage contention before surfacing `Unknown`.
    pub conflict_retries: u32,
    /// Shared secret for the redemption-code HMAC.
    pub signing_secret: String,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            reservation_window: Duration::seconds(
                env::var("BOOKING_RESERVATION_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86_400), // 24 hours
            ),
            max_code_age: Duration::seconds(
                env::var("REDEMPTION_MAX_CODE_AGE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(90),
            ),
            sweep_interval: std::time::Duration::from_secs(
                env::var("BOOKING_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            sweep_batch: env::var("BOOKING_SWEEP_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            conflict_retries: env::var("STORE_CONFLICT_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            signing_secret: env::var("REDEMPTION_SIGNING_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-in-production".to_string()),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_window: Duration::seconds(86_400),
            max_code_age: Duration::seconds(90),
            sweep_interval: std::time::Duration::from_secs(60),
            sweep_batch: 500,
            conflict_retries: 3,
            signing_secret: "dev-secret-change-in-production".to_string(),
        }
    }
}
