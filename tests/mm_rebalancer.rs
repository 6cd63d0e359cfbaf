//! Market-maker behaviour: seeding, top-ups, the four guards, the kill
//! switch, and settlement of platform positions.

mod common;

use std::sync::Arc;

use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use updown_backend::bet::{PlaceBetRequest, Rebalancer};
use updown_backend::domain::{Direction, DomainError};
use updown_backend::mm::MmService;
use updown_backend::store::mm_positions;

async fn place(
    app: &TestApp,
    user_id: uuid::Uuid,
    market_id: uuid::Uuid,
    direction: Direction,
    amount: Decimal,
) {
    app.bets
        .place_bet(PlaceBetRequest {
            user_id,
            market_id,
            direction,
            amount,
        })
        .await
        .unwrap();
}

// One-sided market: the empty side is seeded at 30 % of the other.
#[tokio::test]
async fn seeds_empty_side() {
    let app = TestApp::new().await;
    app.exchanges.set_all(dec!(90000));
    app.fund_platform(dec!(100000)).await;

    let alice = app.fund_user("alice", dec!(1000)).await;
    let market = app.create_open_market().await;
    place(&app, alice, market.id, Direction::Up, dec!(1000)).await;

    app.mm.rebalance(market.id).await.unwrap();

    let stored = app.markets.get_market(market.id).await.unwrap();
    assert_eq!(stored.pool_down, dec!(300));
    assert_eq!(app.platform_balance().await, dec!(99700));

    let conn = app.ledger.lock().await;
    let positions = mm_positions::open_by_market(&conn, market.id).unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].reason, "seed_down");
    assert_eq!(positions[0].amount, dec!(300));
}

// Thin side below the 0.8 trigger is topped up toward 20 % of the thick
// side; a balanced market is left alone.
#[tokio::test]
async fn tops_up_thin_side_and_leaves_balanced_pools() {
    let app = TestApp::new().await;
    app.exchanges.set_all(dec!(90000));
    app.fund_platform(dec!(100000)).await;

    let alice = app.fund_user("alice", dec!(1000)).await;
    let bob = app.fund_user("bob", dec!(1000)).await;
    let market = app.create_open_market().await;
    place(&app, alice, market.id, Direction::Up, dec!(1000)).await;
    place(&app, bob, market.id, Direction::Down, dec!(100)).await;

    // down/up = 0.1 < 0.8 → inject 0.2 × 1000 − 100 = 100 DOWN.
    app.mm.rebalance(market.id).await.unwrap();
    let stored = app.markets.get_market(market.id).await.unwrap();
    assert_eq!(stored.pool_down, dec!(200));

    // Now down/up = 0.2: under the trigger, but the gap to target is zero,
    // which is below MinMMBet — no further action.
    app.mm.rebalance(market.id).await.unwrap();
    let stored = app.markets.get_market(market.id).await.unwrap();
    assert_eq!(stored.pool_down, dec!(200));

    // Top bob up to balance; no injection either.
    place(&app, bob, market.id, Direction::Down, dec!(800)).await;
    app.mm.rebalance(market.id).await.unwrap();
    let stored = app.markets.get_market(market.id).await.unwrap();
    assert_eq!(stored.pool_down, dec!(1000));
}

// Guard: the reserve floor blocks injections that would dip below it.
#[tokio::test]
async fn reserve_floor_blocks_injection() {
    let app = TestApp::new().await;
    app.exchanges.set_all(dec!(90000));
    app.fund_platform(dec!(1200)).await; // floor is 1000 in the test config

    let alice = app.fund_user("alice", dec!(1000)).await;
    let market = app.create_open_market().await;
    place(&app, alice, market.id, Direction::Up, dec!(1000)).await;

    // Seed would be 300; 1200 − 300 < 1000.
    let err = app.mm.rebalance(market.id).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<DomainError>(),
        Some(&DomainError::MmReserveInsufficient)
    );
    assert_eq!(app.platform_balance().await, dec!(1200));
    assert_eq!(
        app.markets.get_market(market.id).await.unwrap().pool_down,
        Decimal::ZERO
    );
}

// Guard: the daily loss cap suspends the MM for the rest of the day.
#[tokio::test]
async fn daily_loss_cap_suspends_mm() {
    let app = TestApp::new().await;
    app.exchanges.set_all(dec!(90000));
    app.fund_platform(dec!(100000)).await;

    let mut cfg = common::test_config(&app.exchanges.base_url);
    cfg.mm.max_daily_loss = dec!(250);
    let capped = MmService::new(app.ledger.clone(), Arc::new(cfg)).await.unwrap();

    let alice = app.fund_user("alice", dec!(1000)).await;
    let market = app.create_open_market().await;
    place(&app, alice, market.id, Direction::Up, dec!(1000)).await;

    // Seed of 300 would exceed the 250 TRY daily budget.
    let err = capped.rebalance(market.id).await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<DomainError>(),
        Some(&DomainError::MmDailyLossExceeded)
    );
    assert_eq!(app.platform_balance().await, dec!(100000));
}

// Guard: the per-market exposure cap is a silent no-op.
#[tokio::test]
async fn exposure_cap_is_silent() {
    let app = TestApp::new().await;
    app.exchanges.set_all(dec!(90000));
    app.fund_platform(dec!(100000)).await;

    let mut cfg = common::test_config(&app.exchanges.base_url);
    cfg.mm.max_exposure_per_market = dec!(200);
    let capped = MmService::new(app.ledger.clone(), Arc::new(cfg)).await.unwrap();

    let alice = app.fund_user("alice", dec!(1000)).await;
    let market = app.create_open_market().await;
    place(&app, alice, market.id, Direction::Up, dec!(1000)).await;

    capped.rebalance(market.id).await.unwrap();
    assert_eq!(app.platform_balance().await, dec!(100000));
    let conn = app.ledger.lock().await;
    assert!(mm_positions::open_by_market(&conn, market.id)
        .unwrap()
        .is_empty());
}

// The kill switch short-circuits injections and survives a restart.
#[tokio::test]
async fn kill_switch_disables_and_persists() {
    let app = TestApp::new().await;
    app.exchanges.set_all(dec!(90000));
    app.fund_platform(dec!(100000)).await;

    app.mm.set_enabled(false).await.unwrap();

    let alice = app.fund_user("alice", dec!(1000)).await;
    let market = app.create_open_market().await;
    place(&app, alice, market.id, Direction::Up, dec!(1000)).await;

    app.mm.rebalance(market.id).await.unwrap();
    assert_eq!(app.platform_balance().await, dec!(100000));

    // A freshly constructed service over the same ledger restores the state.
    let restarted = MmService::new(app.ledger.clone(), app.cfg.clone()).await.unwrap();
    assert!(!restarted.is_enabled());

    app.mm.set_enabled(true).await.unwrap();
    app.mm.rebalance(market.id).await.unwrap();
    assert_eq!(app.platform_balance().await, dec!(99700));
}

// Platform position on the losing side: stake already left the wallet at
// injection, so settlement records the loss without touching balances.
#[tokio::test]
async fn losing_position_settles_without_wallet_movement() {
    let app = TestApp::new().await;
    app.exchanges.set_all(dec!(90000));
    app.fund_platform(dec!(100000)).await;

    let alice = app.fund_user("alice", dec!(1000)).await;
    let market = app.create_open_market().await;
    place(&app, alice, market.id, Direction::Up, dec!(1000)).await;
    app.mm.rebalance(market.id).await.unwrap(); // seeds DOWN 300
    assert_eq!(app.platform_balance().await, dec!(99700));

    app.exchanges.set_all(dec!(95000)); // UP wins, platform loses
    app.resolution.resolve_one(market.id).await.unwrap();

    assert_eq!(app.platform_balance().await, dec!(99700));
    // Winner takes stake + 97 % of the 300 TRY seed.
    assert_eq!(app.user_balance(alice).await, dec!(1291));

    let stats = app.mm.stats().await.unwrap();
    assert_eq!(stats.daily_pnl, dec!(-300));
}

// Platform position on the winning side is paid with the same parimutuel
// formula as user bets; conservation holds across the whole round.
#[tokio::test]
async fn winning_position_pays_platform_and_conserves() {
    let app = TestApp::new().await;
    app.exchanges.set_all(dec!(90000));
    app.fund_platform(dec!(100000)).await;

    let alice = app.fund_user("alice", dec!(1000)).await;
    let market = app.create_open_market().await;
    place(&app, alice, market.id, Direction::Down, dec!(1000)).await;
    app.mm.rebalance(market.id).await.unwrap(); // seeds UP 300

    app.exchanges.set_all(dec!(95000)); // UP wins: only the MM holds UP
    app.resolution.resolve_one(market.id).await.unwrap();

    // MM payout = 300 + (300/300) × 1000 × 0.97 = 1270; pnl = 970.
    assert_eq!(app.platform_balance().await, dec!(100970));
    assert_eq!(app.user_balance(alice).await, Decimal::ZERO);

    let stats = app.mm.stats().await.unwrap();
    assert_eq!(stats.daily_pnl, dec!(970));

    // Conservation: user −1000, platform +970, house absorbed 30
    // (3 % of the 1000 TRY loser pool).
    let user_delta = Decimal::ZERO - dec!(1000);
    let platform_delta = dec!(100970) - dec!(100000);
    assert_eq!(user_delta + platform_delta, -dec!(30));
}
