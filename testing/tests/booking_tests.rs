//! Booking lifecycle tests against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code uses unwrap/expect for clear failure messages

use chrono::Duration;
use promo_core::clock::Clock;
use promo_core::config::EngineConfig;
use promo_core::error::{BookingError, LimitScope};
use promo_core::ledger::PromotionState;
use promo_core::manager::BookingManager;
use promo_core::store::CouponStore;
use promo_core::types::{Actor, BranchId, UserId};
use promo_testing::{FixedClock, MemoryCouponStore, PromotionBuilder, test_clock};
use std::sync::Arc;

struct Harness {
    store: Arc<MemoryCouponStore>,
    clock: Arc<FixedClock>,
    manager: BookingManager<MemoryCouponStore>,
}

fn harness() -> Harness {
    promo_testing::init_tracing();
    let store = Arc::new(MemoryCouponStore::new());
    let clock = Arc::new(test_clock());
    let manager = BookingManager::new(
        Arc::clone(&store),
        clock.clone(),
        EngineConfig::default(),
    );
    Harness {
        store,
        clock,
        manager,
    }
}

#[tokio::test]
async fn concurrent_bookings_never_oversell() {
    let h = harness();
    let manager = Arc::new(h.manager);
    let promotion_id = PromotionBuilder::new(5, h.clock.now())
        .insert(h.store.as_ref())
        .await
        .unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        tasks.spawn(async move { manager.create_booking(UserId::new(), promotion_id).await });
    }

    let mut successes = 0;
    let mut out_of_stock = 0;
    while let Some(result) = tasks.join_next().await {
        match result.expect("booking task panicked") {
            Ok(_) => successes += 1,
            Err(BookingError::InsufficientStock { .. }) => out_of_stock += 1,
            Err(other) => panic!("unexpected booking failure: {other}"),
        }
    }

    assert_eq!(successes, 5);
    assert_eq!(out_of_stock, 11);
    assert_eq!(manager.available_stock(promotion_id).await.unwrap(), 0);
}

#[tokio::test]
async fn second_pending_booking_is_a_duplicate() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(10, h.clock.now())
        .insert(h.store.as_ref())
        .await
        .unwrap();
    let user = UserId::new();

    h.manager.create_booking(user, promotion_id).await.unwrap();
    let second = h.manager.create_booking(user, promotion_id).await;
    assert!(matches!(second, Err(BookingError::DuplicateBooking)));

    // Stock was only taken once.
    assert_eq!(h.manager.available_stock(promotion_id).await.unwrap(), 9);
}

#[tokio::test]
async fn per_user_limit_counts_redeemed_bookings() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(10, h.clock.now())
        .limit_per_user(1)
        .insert(h.store.as_ref())
        .await
        .unwrap();
    let user = UserId::new();

    let booking = h.manager.create_booking(user, promotion_id).await.unwrap();

    // Redeem the first booking so no Pending duplicate is in the way.
    let claim = promo_core::redemption::RedemptionClaim {
        promotion_id,
        user_id: user,
        nonce: promo_core::redemption::Nonce::generate(),
        issued_at: h.clock.now(),
    };
    h.store
        .redeem(&claim, BranchId::new(), h.clock.now())
        .await
        .unwrap();
    assert_eq!(
        h.manager.booking_status(booking.id).await.unwrap(),
        promo_core::booking::BookingStatus::Used
    );

    let second = h.manager.create_booking(user, promotion_id).await;
    assert!(matches!(
        second,
        Err(BookingError::LimitExceeded {
            limit: 1,
            scope: LimitScope::PerUser,
        })
    ));
}

#[tokio::test]
async fn daily_limit_resets_at_midnight() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(10, h.clock.now())
        .daily_limit_per_user(1)
        .insert(h.store.as_ref())
        .await
        .unwrap();
    let user = UserId::new();

    let booking = h.manager.create_booking(user, promotion_id).await.unwrap();
    h.manager
        .cancel_booking(booking.id, Actor::User(user))
        .await
        .unwrap();

    // Cancelled bookings still count toward today's quota.
    let same_day = h.manager.create_booking(user, promotion_id).await;
    assert!(matches!(
        same_day,
        Err(BookingError::LimitExceeded {
            limit: 1,
            scope: LimitScope::PerDay,
        })
    ));

    h.clock.advance(Duration::days(1));
    h.manager.create_booking(user, promotion_id).await.unwrap();
}

#[tokio::test]
async fn cancellation_returns_stock_and_is_owner_guarded() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(3, h.clock.now())
        .insert(h.store.as_ref())
        .await
        .unwrap();
    let owner = UserId::new();

    let booking = h.manager.create_booking(owner, promotion_id).await.unwrap();
    assert_eq!(h.manager.available_stock(promotion_id).await.unwrap(), 2);

    let stranger = h
        .manager
        .cancel_booking(booking.id, Actor::User(UserId::new()))
        .await;
    assert!(matches!(stranger, Err(BookingError::NotOwner)));

    let cancelled = h
        .manager
        .cancel_booking(booking.id, Actor::User(owner))
        .await
        .unwrap();
    assert_eq!(
        cancelled.status,
        promo_core::booking::BookingStatus::Cancelled
    );
    assert_eq!(h.manager.available_stock(promotion_id).await.unwrap(), 3);

    // A second cancel is rejected, not silently absorbed.
    let again = h
        .manager
        .cancel_booking(booking.id, Actor::Admin)
        .await;
    assert!(matches!(again, Err(BookingError::AlreadyTerminal { .. })));
}

#[tokio::test]
async fn admin_may_cancel_any_booking() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(1, h.clock.now())
        .insert(h.store.as_ref())
        .await
        .unwrap();

    let booking = h
        .manager
        .create_booking(UserId::new(), promotion_id)
        .await
        .unwrap();
    h.manager
        .cancel_booking(booking.id, Actor::Admin)
        .await
        .unwrap();
    assert_eq!(h.manager.available_stock(promotion_id).await.unwrap(), 1);
}

#[tokio::test]
async fn expiry_sweep_returns_stale_holds_to_the_pool() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(2, h.clock.now())
        .insert(h.store.as_ref())
        .await
        .unwrap();

    let stale = h
        .manager
        .create_booking(UserId::new(), promotion_id)
        .await
        .unwrap();
    h.clock.advance(Duration::hours(12));
    let fresh = h
        .manager
        .create_booking(UserId::new(), promotion_id)
        .await
        .unwrap();
    assert_eq!(h.manager.available_stock(promotion_id).await.unwrap(), 0);

    // Default reservation window is 24h; only the first hold has elapsed.
    h.clock.advance(Duration::hours(13));
    let expired = h.manager.expire_stale_bookings().await.unwrap();
    assert_eq!(expired, 1);

    assert_eq!(h.manager.available_stock(promotion_id).await.unwrap(), 1);
    assert_eq!(
        h.manager.booking_status(stale.id).await.unwrap(),
        promo_core::booking::BookingStatus::Cancelled
    );
    assert_eq!(
        h.manager.booking_status(fresh.id).await.unwrap(),
        promo_core::booking::BookingStatus::Pending
    );
}

#[tokio::test]
async fn sweep_finishes_promotions_past_their_end_date() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(5, h.clock.now())
        .insert(h.store.as_ref())
        .await
        .unwrap();

    h.clock.advance(Duration::days(30));
    h.manager.expire_stale_bookings().await.unwrap();

    let promotion = h.store.promotion(promotion_id).await.unwrap().unwrap();
    assert_eq!(promotion.state, PromotionState::Finished);
}

#[tokio::test]
async fn background_sweep_cancels_stale_holds_until_shutdown() {
    promo_testing::init_tracing();
    let store = Arc::new(MemoryCouponStore::new());
    let clock = Arc::new(test_clock());
    let config = EngineConfig {
        reservation_window: Duration::seconds(0),
        sweep_interval: std::time::Duration::from_millis(10),
        ..EngineConfig::default()
    };
    let manager = Arc::new(BookingManager::new(
        Arc::clone(&store),
        clock.clone(),
        config,
    ));

    let promotion_id = PromotionBuilder::new(1, clock.now())
        .insert(store.as_ref())
        .await
        .unwrap();
    let booking = manager
        .create_booking(UserId::new(), promotion_id)
        .await
        .unwrap();
    clock.advance(Duration::seconds(1));

    let sweep = manager.spawn_expiry_sweep();
    for _ in 0..100 {
        if manager.booking_status(booking.id).await.unwrap()
            == promo_core::booking::BookingStatus::Cancelled
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    sweep.shutdown().await;

    assert_eq!(
        manager.booking_status(booking.id).await.unwrap(),
        promo_core::booking::BookingStatus::Cancelled
    );
    assert_eq!(manager.available_stock(promotion_id).await.unwrap(), 1);
}

#[tokio::test]
async fn last_unit_finishes_promotion_and_cancellation_reopens_it() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(1, h.clock.now())
        .insert(h.store.as_ref())
        .await
        .unwrap();
    let user = UserId::new();

    let booking = h.manager.create_booking(user, promotion_id).await.unwrap();
    let exhausted = h
        .store
        .promotion(promotion_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exhausted.state, PromotionState::Finished);

    // Exhaustion is reported as a stock failure even though the promotion
    // transitioned to Finished.
    let declined = h
        .manager
        .create_booking(UserId::new(), promotion_id)
        .await;
    assert!(matches!(
        declined,
        Err(BookingError::InsufficientStock {
            requested: 1,
            available: 0,
        })
    ));

    h.manager
        .cancel_booking(booking.id, Actor::User(user))
        .await
        .unwrap();
    let reopened = h
        .store
        .promotion(promotion_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reopened.state, PromotionState::Active);
    h.manager
        .create_booking(UserId::new(), promotion_id)
        .await
        .unwrap();
}

#[tokio::test]
async fn inactive_and_out_of_window_promotions_are_not_bookable() {
    let h = harness();
    let now = h.clock.now();

    let inactive = PromotionBuilder::new(5, now)
        .inactive()
        .insert(h.store.as_ref())
        .await
        .unwrap();
    assert!(matches!(
        h.manager.create_booking(UserId::new(), inactive).await,
        Err(BookingError::PromotionNotActive)
    ));

    let not_started = PromotionBuilder::new(5, now)
        .window(now + Duration::days(1), now + Duration::days(2))
        .insert(h.store.as_ref())
        .await
        .unwrap();
    assert!(matches!(
        h.manager.create_booking(UserId::new(), not_started).await,
        Err(BookingError::PromotionNotActive)
    ));

    let ended = PromotionBuilder::new(5, now)
        .window(now - Duration::days(2), now - Duration::days(1))
        .insert(h.store.as_ref())
        .await
        .unwrap();
    assert!(matches!(
        h.manager.create_booking(UserId::new(), ended).await,
        Err(BookingError::PromotionNotActive)
    ));
}

#[tokio::test]
async fn restock_reopens_an_exhausted_promotion() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(1, h.clock.now())
        .insert(h.store.as_ref())
        .await
        .unwrap();

    h.manager
        .create_booking(UserId::new(), promotion_id)
        .await
        .unwrap();
    assert_eq!(h.manager.available_stock(promotion_id).await.unwrap(), 0);

    let restocked = h.manager.restock(promotion_id, 3).await.unwrap();
    assert_eq!(restocked.total_stock, 4);
    assert_eq!(restocked.available_stock, 3);
    assert_eq!(restocked.state, PromotionState::Active);

    h.manager
        .create_booking(UserId::new(), promotion_id)
        .await
        .unwrap();
}

#[tokio::test]
async fn transient_conflicts_are_retried_within_budget() {
    let h = harness();
    let promotion_id = PromotionBuilder::new(5, h.clock.now())
        .insert(h.store.as_ref())
        .await
        .unwrap();

    // Two injected conflicts fit inside the default budget of three retries.
    h.store.inject_conflicts(2);
    h.manager
        .create_booking(UserId::new(), promotion_id)
        .await
        .unwrap();

    // Four do not.
    h.store.inject_conflicts(4);
    let exhausted = h
        .manager
        .create_booking(UserId::new(), promotion_id)
        .await;
    assert!(matches!(exhausted, Err(BookingError::Unknown)));
}

#[tokio::test]
async fn unknown_promotion_and_booking_are_not_found() {
    let h = harness();
    assert!(matches!(
        h.manager
            .create_booking(UserId::new(), promo_core::types::PromotionId::new())
            .await,
        Err(BookingError::NotFound)
    ));
    assert!(matches!(
        h.manager
            .cancel_booking(promo_core::types::BookingId::new(), Actor::Admin)
            .await,
        Err(BookingError::NotFound)
    ));
}
