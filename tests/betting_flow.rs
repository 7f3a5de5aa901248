//! End-to-end tests for the betting core: participation, pool
//! aggregation, settlement, and the concurrency guarantees around them.
//!
//! Each test opens a fresh SQLite database in a temp directory and drives
//! the engine the way the API layer would.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use tempfile::TempDir;

use pollbet_backend::betting::db::{NewBettingPoll, NewPollOption};
use pollbet_backend::betting::money::Amount;
use pollbet_backend::betting::notify::TracingNotifier;
use pollbet_backend::betting::token_gate::{AllowAllGate, StaticGate, TokenGate};
use pollbet_backend::betting::{BettingDb, BettingEngine};
use pollbet_backend::models::{AssetStatus, BettingStatus};

fn setup() -> (BettingEngine, TempDir, String) {
    setup_with_gate(Arc::new(AllowAllGate))
}

fn setup_with_gate(gate: Arc<dyn TokenGate>) -> (BettingEngine, TempDir, String) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("pollbet.db").to_string_lossy().to_string();
    let db = BettingDb::new(&path).expect("open db");
    let engine = BettingEngine::new(db, gate, Arc::new(TracingNotifier));
    (engine, dir, path)
}

fn opt(id: &str, label: &str) -> NewPollOption {
    NewPollOption {
        option_id: id.to_string(),
        label: label.to_string(),
    }
}

fn poll_spec(id: &str, commission_bps: u32) -> NewBettingPoll {
    let now = Utc::now().timestamp();
    NewBettingPoll {
        id: Some(id.to_string()),
        options: vec![opt("a", "Alpha"), opt("b", "Bravo"), opt("c", "Charlie")],
        bet_asset_id: "coin".to_string(),
        min_bet: Amount::from_units(1),
        max_bet: Amount::from_units(1000),
        commission_bps,
        starts_at: now - 60,
        ends_at: now + 3600,
        allow_multiple_votes: false,
        required_token_id: None,
        betting_enabled: true,
    }
}

/// Move the poll's end time into the past so settlement is allowed.
/// Goes straight to SQLite; the engine sees the change on its next read.
fn end_poll(db_path: &str, poll_id: &str) {
    let conn = rusqlite::Connection::open(db_path).expect("open raw conn");
    let past = Utc::now().timestamp() - 30;
    conn.execute(
        "UPDATE polls SET ends_at = ?1 WHERE id = ?2",
        params![past, poll_id],
    )
    .expect("end poll");
}

async fn fund(engine: &BettingEngine, player: &str, units: i64) {
    engine
        .db()
        .deposit(player, "coin", Amount::from_units(units), "deposit")
        .await
        .expect("deposit");
}

async fn balance_of(engine: &BettingEngine, player: &str) -> Amount {
    engine
        .db()
        .find_balance(player, "coin")
        .await
        .expect("balance query")
        .map(|b| b.balance)
        .unwrap_or(Amount::ZERO)
}

async fn bet(
    engine: &BettingEngine,
    poll_id: &str,
    player: &str,
    option: &str,
    units: i64,
) -> pollbet_backend::models::ParticipationResult {
    engine
        .participate_poll(poll_id, player, option, Amount::from_units(units), None)
        .await
        .expect("participate call")
}

#[tokio::test]
async fn test_full_betting_and_settlement_flow() {
    let (engine, _dir, path) = setup();
    engine.db().create_poll(poll_spec("p1", 500)).await.unwrap();
    fund(&engine, "alice", 1000).await;
    fund(&engine, "bob", 1000).await;

    assert!(bet(&engine, "p1", "alice", "a", 100).await.success);
    assert!(bet(&engine, "p1", "bob", "b", 200).await.success);

    let poll = engine.db().find_poll("p1").await.unwrap().unwrap();
    assert_eq!(poll.pool_total(), Amount::from_units(300));
    assert_eq!(poll.total_votes, 2);
    assert_eq!(poll.unique_voters, 2);
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(900));

    end_poll(&path, "p1");
    let result = engine
        .settle_betting_poll("p1", &["a".to_string()])
        .await
        .unwrap();

    // Pool 300, 5% commission = 15, single winner takes 285.
    assert!(result.success, "settle failed: {:?}", result.error);
    assert!(!result.is_refund);
    assert_eq!(result.total_winners, 1);
    assert_eq!(result.total_payout, Amount::from_units(285));
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(1185));
    assert_eq!(balance_of(&engine, "bob").await, Amount::from_units(800));

    let poll = engine.db().find_poll("p1").await.unwrap().unwrap();
    assert_eq!(poll.betting_status, BettingStatus::Settled);
    assert!(poll.is_settled);
    assert!(poll.settled_at.is_some());
    assert_eq!(poll.answer_option_ids, Some(vec!["a".to_string()]));
    assert_eq!(poll.total_commission, Amount::from_units(15));
}

#[tokio::test]
async fn test_refund_when_no_bet_matches_winner() {
    let (engine, _dir, path) = setup();
    engine.db().create_poll(poll_spec("p1", 500)).await.unwrap();
    fund(&engine, "alice", 1000).await;
    fund(&engine, "bob", 1000).await;
    assert!(bet(&engine, "p1", "alice", "a", 100).await.success);
    assert!(bet(&engine, "p1", "bob", "b", 200).await.success);

    end_poll(&path, "p1");
    let result = engine
        .settle_betting_poll("p1", &["c".to_string()])
        .await
        .unwrap();

    // Nobody backed the winner: full refunds, no commission taken.
    assert!(result.success);
    assert!(result.is_refund);
    assert_eq!(result.total_winners, 2);
    assert_eq!(result.total_payout, Amount::from_units(300));
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(1000));
    assert_eq!(balance_of(&engine, "bob").await, Amount::from_units(1000));

    let poll = engine.db().find_poll("p1").await.unwrap().unwrap();
    assert_eq!(poll.total_commission, Amount::ZERO);
}

#[tokio::test]
async fn test_payouts_conserve_pool_with_fractional_commission() {
    // 3.33% of 400 leaves an amount that does not divide evenly across
    // the winners; every raw unit must still be accounted for.
    let (engine, _dir, path) = setup();
    engine.db().create_poll(poll_spec("p1", 333)).await.unwrap();
    for player in ["alice", "bob", "carol"] {
        fund(&engine, player, 1000).await;
    }
    assert!(bet(&engine, "p1", "alice", "a", 100).await.success);
    assert!(bet(&engine, "p1", "bob", "a", 150).await.success);
    assert!(bet(&engine, "p1", "carol", "b", 150).await.success);

    end_poll(&path, "p1");
    let result = engine
        .settle_betting_poll("p1", &["a".to_string()])
        .await
        .unwrap();
    assert!(result.success);

    let pool = Amount::from_units(400);
    let commission = pool.commission(333);
    let paid: i64 = result
        .payout_details
        .iter()
        .map(|d| d.payout_amount.raw())
        .sum();
    assert_eq!(paid + commission.raw(), pool.raw());
    assert_eq!(result.total_payout.raw(), paid);

    // Winners split proportionally to stake: bob staked 1.5x alice's bet.
    let alice_pay = result
        .payout_details
        .iter()
        .find(|d| d.player_id == "alice")
        .unwrap()
        .payout_amount;
    let bob_pay = result
        .payout_details
        .iter()
        .find(|d| d.player_id == "bob")
        .unwrap()
        .payout_amount;
    assert!(bob_pay > alice_pay);

    // System-wide conservation: balances plus commission equal deposits.
    let mut total = Amount::ZERO;
    for player in ["alice", "bob", "carol"] {
        total = total.checked_add(balance_of(&engine, player).await).unwrap();
    }
    assert_eq!(
        total.checked_add(commission).unwrap(),
        Amount::from_units(3000)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlements_pay_exactly_once() {
    let (engine, _dir, path) = setup();
    engine.db().create_poll(poll_spec("p1", 500)).await.unwrap();
    fund(&engine, "alice", 1000).await;
    fund(&engine, "bob", 1000).await;
    assert!(bet(&engine, "p1", "alice", "a", 100).await.success);
    assert!(bet(&engine, "p1", "bob", "b", 200).await.success);
    end_poll(&path, "p1");

    let before = engine.db().poll_update_count("p1").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .settle_betting_poll("p1", &["a".to_string()])
                .await
                .unwrap()
        }));
    }

    let mut successes = 0;
    for handle in handles {
        let result = handle.await.unwrap();
        if result.success {
            successes += 1;
        } else {
            let msg = result.error.unwrap();
            assert!(
                msg.contains("currently being settled or already settled")
                    || msg.contains("already been settled"),
                "unexpected race error: {}",
                msg
            );
        }
    }
    assert_eq!(successes, 1);

    // Winner credited exactly once despite eight racers.
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(1185));

    // The one successful settlement wrote the poll row exactly twice.
    let after = engine.db().poll_update_count("p1").await.unwrap();
    assert_eq!(after - before, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bets_cannot_overdraw_balance() {
    let (engine, _dir, _path) = setup();
    let mut spec = poll_spec("p1", 0);
    spec.allow_multiple_votes = true;
    engine.db().create_poll(spec).await.unwrap();

    // Balance covers one 100-unit bet but not two.
    fund(&engine, "alice", 150).await;

    let e1 = engine.clone();
    let e2 = engine.clone();
    let h1 = tokio::spawn(async move { bet(&e1, "p1", "alice", "a", 100).await });
    let h2 = tokio::spawn(async move { bet(&e2, "p1", "alice", "b", 100).await });
    let (r1, r2) = (h1.await.unwrap(), h2.await.unwrap());

    assert!(r1.success != r2.success, "exactly one bet must win the race");
    let loser = if r1.success { r2 } else { r1 };
    assert_eq!(loser.error.as_deref(), Some("Insufficient balance"));

    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(50));
    let poll = engine.db().find_poll("p1").await.unwrap().unwrap();
    assert_eq!(poll.pool_total(), Amount::from_units(100));
    assert_eq!(poll.total_votes, 1);
}

#[tokio::test]
async fn test_state_gating_around_settlement() {
    let (engine, _dir, path) = setup();
    engine.db().create_poll(poll_spec("p1", 500)).await.unwrap();
    fund(&engine, "alice", 1000).await;
    assert!(bet(&engine, "p1", "alice", "a", 100).await.success);

    // Settlement before the poll ends is refused.
    let early = engine
        .settle_betting_poll("p1", &["a".to_string()])
        .await
        .unwrap();
    assert!(!early.success);
    assert!(early.error.unwrap().contains("has not ended yet"));

    end_poll(&path, "p1");
    assert!(engine
        .settle_betting_poll("p1", &["a".to_string()])
        .await
        .unwrap()
        .success);

    // Once settled: no more bets, no second settlement.
    let late_bet = bet(&engine, "p1", "alice", "a", 10).await;
    assert!(!late_bet.success);
    assert!(late_bet.error.unwrap().contains("already been settled"));

    let again = engine
        .settle_betting_poll("p1", &["a".to_string()])
        .await
        .unwrap();
    assert!(!again.success);
    assert!(again.error.unwrap().contains("already been settled"));

    // Sole bettor wins her own pool minus 5% commission: 900 + 95.
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(995));
}

#[tokio::test]
async fn test_inconsistent_settlement_record_fails_closed() {
    let (engine, _dir, path) = setup();
    engine.db().create_poll(poll_spec("p1", 500)).await.unwrap();
    fund(&engine, "alice", 1000).await;
    assert!(bet(&engine, "p1", "alice", "a", 100).await.success);

    // Corrupt the record: legacy flag set, status still OPEN.
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute("UPDATE polls SET is_settled = 1 WHERE id = 'p1'", [])
        .unwrap();
    drop(conn);

    let rejected = bet(&engine, "p1", "alice", "b", 10).await;
    assert!(!rejected.success);
    assert!(rejected.error.unwrap().contains("already been settled"));

    end_poll(&path, "p1");
    let settle = engine
        .settle_betting_poll("p1", &["a".to_string()])
        .await
        .unwrap();
    assert!(!settle.success);

    // No payout leaked through the corrupt record.
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(900));
}

#[tokio::test]
async fn test_settlement_rolls_back_when_a_credit_fails() {
    let (engine, _dir, path) = setup();
    engine.db().create_poll(poll_spec("p1", 0)).await.unwrap();
    fund(&engine, "alice", 1000).await;
    fund(&engine, "bob", 1000).await;
    assert!(bet(&engine, "p1", "alice", "a", 100).await.success);
    assert!(bet(&engine, "p1", "bob", "a", 100).await.success);
    end_poll(&path, "p1");

    let before = engine.db().poll_update_count("p1").await.unwrap();
    engine
        .db()
        .set_asset_status("bob", "coin", AssetStatus::Frozen)
        .await
        .unwrap();

    let result = engine
        .settle_betting_poll("p1", &["a".to_string()])
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Asset is frozen"));

    // The whole transaction rolled back: poll back to OPEN, no partial
    // credits, no poll-row writes recorded.
    let poll = engine.db().find_poll("p1").await.unwrap().unwrap();
    assert_eq!(poll.betting_status, BettingStatus::Open);
    assert!(!poll.is_settled);
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(900));
    let after = engine.db().poll_update_count("p1").await.unwrap();
    assert_eq!(after, before);

    // Unfreeze and the same settlement goes through.
    engine
        .db()
        .set_asset_status("bob", "coin", AssetStatus::Active)
        .await
        .unwrap();
    let retry = engine
        .settle_betting_poll("p1", &["a".to_string()])
        .await
        .unwrap();
    assert!(retry.success);
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(1000));
    assert_eq!(balance_of(&engine, "bob").await, Amount::from_units(1000));
}

#[tokio::test]
async fn test_token_gated_poll_requires_holding() {
    let gate = Arc::new(StaticGate::new().grant("alice", "fan-token"));
    let (engine, _dir, _path) = setup_with_gate(gate);
    let mut spec = poll_spec("p1", 0);
    spec.required_token_id = Some("fan-token".to_string());
    engine.db().create_poll(spec).await.unwrap();
    fund(&engine, "alice", 1000).await;
    fund(&engine, "bob", 1000).await;

    // No proof supplied.
    let missing = engine
        .participate_poll("p1", "alice", "a", Amount::from_units(10), None)
        .await
        .unwrap();
    assert!(!missing.success);
    assert!(missing.error.unwrap().contains("proof is required"));

    // Proof supplied but the player does not hold the token.
    let denied = engine
        .participate_poll("p1", "bob", "a", Amount::from_units(10), Some("proof"))
        .await
        .unwrap();
    assert!(!denied.success);
    assert!(denied.error.unwrap().contains("does not hold"));

    let ok = engine
        .participate_poll("p1", "alice", "a", Amount::from_units(10), Some("proof"))
        .await
        .unwrap();
    assert!(ok.success);
}

#[tokio::test]
async fn test_duplicate_vote_rejected() {
    let (engine, _dir, _path) = setup();
    engine.db().create_poll(poll_spec("p1", 0)).await.unwrap();
    fund(&engine, "alice", 1000).await;

    assert!(bet(&engine, "p1", "alice", "a", 10).await.success);
    let second = bet(&engine, "p1", "alice", "b", 10).await;
    assert!(!second.success);
    assert!(second.error.unwrap().contains("Already voted on this poll"));

    // The rejected bet left the balance untouched.
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(990));
}

#[tokio::test]
async fn test_bet_validation_rejections() {
    let (engine, _dir, _path) = setup();
    engine.db().create_poll(poll_spec("p1", 0)).await.unwrap();
    fund(&engine, "alice", 5000).await;

    let unknown_poll = bet(&engine, "nope", "alice", "a", 10).await;
    assert!(!unknown_poll.success);
    assert!(unknown_poll.error.unwrap().contains("not found"));

    let bad_option = bet(&engine, "p1", "alice", "zzz", 10).await;
    assert!(!bad_option.success);
    assert!(bad_option.error.unwrap().contains("Invalid option"));

    let too_small = engine
        .participate_poll("p1", "alice", "a", Amount::from_f64(0.5).unwrap(), None)
        .await
        .unwrap();
    assert!(!too_small.success);
    assert!(too_small.error.unwrap().contains("Minimum bet amount"));

    let too_big = bet(&engine, "p1", "alice", "a", 2000).await;
    assert!(!too_big.success);
    assert!(too_big.error.unwrap().contains("Maximum bet amount"));

    // Nothing was debited along the way.
    assert_eq!(balance_of(&engine, "alice").await, Amount::from_units(5000));
    let poll = engine.db().find_poll("p1").await.unwrap().unwrap();
    assert_eq!(poll.pool_total(), Amount::ZERO);
    assert_eq!(poll.total_votes, 0);
}

#[tokio::test]
async fn test_settlement_rejects_invalid_winning_set() {
    let (engine, _dir, path) = setup();
    engine.db().create_poll(poll_spec("p1", 0)).await.unwrap();
    fund(&engine, "alice", 1000).await;
    assert!(bet(&engine, "p1", "alice", "a", 100).await.success);
    end_poll(&path, "p1");

    let empty = engine.settle_betting_poll("p1", &[]).await.unwrap();
    assert!(!empty.success);

    let unknown = engine
        .settle_betting_poll("p1", &["zzz".to_string()])
        .await
        .unwrap();
    assert!(!unknown.success);

    // Both rejections rolled back; the poll is still settleable.
    let poll = engine.db().find_poll("p1").await.unwrap().unwrap();
    assert_eq!(poll.betting_status, BettingStatus::Open);
    let ok = engine
        .settle_betting_poll("p1", &["a".to_string()])
        .await
        .unwrap();
    assert!(ok.success);
}
