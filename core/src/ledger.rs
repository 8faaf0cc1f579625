//! Promotion Ledger: atomic stock accounting for a promotion.
//!
//! The ledger exclusively owns `available_stock` mutation. Every method here
//! is a pure check-and-mutate over a single [`Promotion`] value; the store
//! that loaded the row is responsible for holding it exclusively (row lock or
//! equivalent) for the duration of the call and for persisting the result in
//! the same transaction. That discipline is what makes two `reserve` calls
//! racing for the last unit resolve to exactly one success.

use crate::error::LedgerError;
use crate::types::PromotionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a promotion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionState {
    /// Bookable while within the date window
    Active,
    /// Disabled by a collaborator; never auto-reactivated
    Inactive,
    /// Ended by date or by stock exhaustion (non-restockable)
    Finished,
}

impl PromotionState {
    /// Storage representation of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Finished => "FINISHED",
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
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "FINISHED" => Ok(Self::Finished),
            other => Err(format!("unknown promotion state '{other}'")),
        }
    }
}

impl std::fmt::Display for PromotionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A limited-stock promotion.
///
/// `total_stock` only changes through [`Promotion::restock`];
/// `available_stock` only changes through [`Promotion::reserve`] and
/// [`Promotion::release`]. Invariant: `available_stock <= total_stock`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Identity
    pub id: PromotionId,
    /// Ceiling for `available_stock`
    pub total_stock: u32,
    /// Units currently bookable
    pub available_stock: u32,
    /// Max non-cancelled bookings per user (None = unlimited)
    pub limit_per_user: Option<u32>,
    /// Max bookings per user per calendar day (None = unlimited)
    pub daily_limit_per_user: Option<u32>,
    /// Start of the bookable window
    pub starts_at: DateTime<Utc>,
    /// End of the bookable window
    pub ends_at: DateTime<Utc>,
    /// Whether stock exhaustion is expected to be temporary
    pub restockable: bool,
    /// Lifecycle state
    pub state: PromotionState,
}

impl Promotion {
    /// Whether `now` falls inside the promotion's date window.
    #[must_use]
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }

    /// Atomically check and decrement available stock.
    ///
    /// Fails without side effects when the promotion is not `Active`, the
    /// date window has not started or has passed, or fewer than `quantity`
    /// units remain. When the last unit goes and the promotion is not
    /// restockable, the state transitions to `Finished`; later in-window
    /// attempts still report the stock failure, so callers racing for the
    /// last unit all see the same outcome.
    ///
    /// # Errors
    ///
    /// [`LedgerError::PromotionNotActive`] or
    /// [`LedgerError::InsufficientStock`].
    pub fn reserve(&mut self, now: DateTime<Utc>, quantity: u32) -> Result<(), LedgerError> {
        match self.state {
            PromotionState::Active => {}
            // Exhaustion inside the date window is a stock outcome, not a
            // lifecycle one.
            PromotionState::Finished
                if self.is_within_window(now) && self.available_stock < quantity =>
            {
                return Err(LedgerError::InsufficientStock {
                    requested: quantity,
                    available: self.available_stock,
                });
            }
            PromotionState::Inactive | PromotionState::Finished => {
                return Err(LedgerError::PromotionNotActive);
            }
        }

        if !self.is_within_window(now) {
            return Err(LedgerError::PromotionNotActive);
        }

        if self.available_stock < quantity {
            return Err(LedgerError::InsufficientStock {
                requested: quantity,
                available: self.available_stock,
            });
        }

        self.available_stock -= quantity;

        if self.available_stock == 0 && !self.restockable {
            self.state = PromotionState::Finished;
        }

        Ok(())
    }

    /// Atomically increment available stock, capped at `total_stock`.
    ///
    /// A cancellation that returns stock while the date window is still open
    /// reverts `Finished` back to `Active` so the returned unit is bookable
    /// again. An explicit `Inactive` is never overridden.
    pub fn release(&mut self, now: DateTime<Utc>, quantity: u32) {
        self.available_stock = self
            .available_stock
            .saturating_add(quantity)
            .min(self.total_stock);

        if self.state == PromotionState::Finished
            && self.available_stock > 0
            && self.is_within_window(now)
        {
            self.state = PromotionState::Active;
        }
    }

    /// Admin restock: raises both the ceiling and the available count.
    ///
    /// Routed through the ledger so it cannot race with `reserve`/`release`.
    pub fn restock(&mut self, now: DateTime<Utc>, additional: u32) {
        self.total_stock = self.total_stock.saturating_add(additional);
        self.release(now, additional);
    }

    /// Date-driven lifecycle update: `Active` promotions past their end date
    /// become `Finished`.
    pub fn refresh_state(&mut self, now: DateTime<Utc>) {
        if self.state == PromotionState::Active && now > self.ends_at {
            self.state = PromotionState::Finished;
        }
    }

    /// Detects broken stock accounting on a loaded row.
    ///
    /// A `Some` here must be surfaced as a fatal integrity error by the
    /// store, never corrected in place.
    #[must_use]
    pub fn invariant_violation(&self) -> Option<String> {
        if self.available_stock > self.total_stock {
            return Some(format!(
                "promotion {}: available_stock {} exceeds total_stock {}",
                self.id, self.available_stock, self.total_stock
            ));
        }
        None
    }
}
