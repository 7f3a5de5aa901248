//! SQLite store for polls, bet logs, and player balances.
//!
//! One connection guarded by an async mutex; multi-statement invariants
//! (bet placement, settlement) run inside explicit `rusqlite` transaction
//! scopes created by the engine while it holds the lock. Helper functions
//! here take `&Connection` so they work both standalone and inside a
//! transaction (`Transaction` derefs to `Connection`).

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::betting::ledger::{self, BalanceOp, DeltaLink};
use crate::betting::money::Amount;
use crate::models::{AssetStatus, BetLog, BettingPoll, BettingStatus, PlayerAsset, PollOption};

/// Input for creating a betting poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBettingPoll {
    #[serde(default)]
    pub id: Option<String>,
    pub options: Vec<NewPollOption>,
    pub bet_asset_id: String,
    pub min_bet: Amount,
    pub max_bet: Amount,
    #[serde(default)]
    pub commission_bps: u32,
    pub starts_at: i64,
    pub ends_at: i64,
    #[serde(default)]
    pub allow_multiple_votes: bool,
    #[serde(default)]
    pub required_token_id: Option<String>,
    #[serde(default = "default_true")]
    pub betting_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPollOption {
    pub option_id: String,
    pub label: String,
}

#[derive(Clone)]
pub struct BettingDb {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl BettingDb {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open betting db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn create_poll(&self, new: NewBettingPoll) -> Result<BettingPoll> {
        if new.options.is_empty() {
            return Err(anyhow!("poll requires at least one option"));
        }
        if new.commission_bps >= 10_000 {
            return Err(anyhow!("commission_bps must be below 10000"));
        }
        if new.min_bet > new.max_bet {
            return Err(anyhow!("min_bet exceeds max_bet"));
        }

        let id = new
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now().timestamp();

        let mut guard = self.conn.lock().await;
        let tx = guard.transaction()?;
        tx.execute(
            "INSERT INTO polls (
                id, betting_enabled, bet_asset_id, min_bet, max_bet, commission_bps,
                starts_at, ends_at, allow_multiple_votes, required_token_id,
                betting_status, total_votes, unique_voters, total_commission,
                is_settled, settled_at, answer_option_ids, update_count, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'OPEN', 0, 0, 0, 0, NULL, NULL, 0, ?11)",
            params![
                &id,
                new.betting_enabled as i64,
                &new.bet_asset_id,
                new.min_bet.raw(),
                new.max_bet.raw(),
                new.commission_bps as i64,
                new.starts_at,
                new.ends_at,
                new.allow_multiple_votes as i64,
                new.required_token_id.as_deref(),
                now,
            ],
        )?;
        for opt in &new.options {
            tx.execute(
                "INSERT INTO poll_options (poll_id, option_id, label, bet_amount)
                 VALUES (?1, ?2, ?3, 0)",
                params![&id, &opt.option_id, &opt.label],
            )?;
        }
        tx.commit()?;

        get_poll(&guard, &id)?.ok_or_else(|| anyhow!("poll {} vanished after insert", id))
    }

    pub async fn find_poll(&self, poll_id: &str) -> Result<Option<BettingPoll>> {
        let conn = self.conn.lock().await;
        get_poll(&conn, poll_id)
    }

    pub async fn find_bet_logs(&self, poll_id: &str) -> Result<Vec<BetLog>> {
        let conn = self.conn.lock().await;
        get_bet_logs(&conn, poll_id)
    }

    pub async fn find_balance(&self, player_id: &str, asset_id: &str) -> Result<Option<PlayerAsset>> {
        let conn = self.conn.lock().await;
        get_balance(&conn, player_id, asset_id)
    }

    /// Credit a player's balance outside any poll flow (funding glue).
    pub async fn deposit(
        &self,
        player_id: &str,
        asset_id: &str,
        amount: Amount,
        reason: &str,
    ) -> Result<PlayerAsset> {
        let mut guard = self.conn.lock().await;
        let tx = guard.transaction()?;
        ledger::apply_delta(
            &tx,
            player_id,
            asset_id,
            amount,
            BalanceOp::Add,
            reason,
            DeltaLink::none(),
        )?;
        tx.commit()?;
        get_balance(&guard, player_id, asset_id)?
            .ok_or_else(|| anyhow!("balance row missing after deposit"))
    }

    /// Flip an asset row's status (operational surface; used to freeze or
    /// retire balances).
    pub async fn set_asset_status(
        &self,
        player_id: &str,
        asset_id: &str,
        status: AssetStatus,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE player_assets SET status = ?1, updated_at = ?2
             WHERE player_id = ?3 AND asset_id = ?4",
            params![status.as_str(), now, player_id, asset_id],
        )?;
        if changed == 0 {
            return Err(anyhow!("no balance row for {}/{}", player_id, asset_id));
        }
        Ok(())
    }

    /// Number of writes applied to the poll row. A successful settlement
    /// contributes exactly two (SETTLING, then SETTLED); callers use the
    /// delta to detect double-processing.
    pub async fn poll_update_count(&self, poll_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count = conn
            .query_row(
                "SELECT update_count FROM polls WHERE id = ?1",
                [poll_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| anyhow!("poll {} not found", poll_id))?;
        Ok(count)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS polls (
            id TEXT PRIMARY KEY,
            betting_enabled INTEGER NOT NULL,
            bet_asset_id TEXT NOT NULL,
            min_bet INTEGER NOT NULL,
            max_bet INTEGER NOT NULL,
            commission_bps INTEGER NOT NULL,
            starts_at INTEGER NOT NULL,
            ends_at INTEGER NOT NULL,
            allow_multiple_votes INTEGER NOT NULL,
            required_token_id TEXT,
            betting_status TEXT NOT NULL,
            total_votes INTEGER NOT NULL,
            unique_voters INTEGER NOT NULL,
            total_commission INTEGER NOT NULL,
            is_settled INTEGER NOT NULL,
            settled_at INTEGER,
            answer_option_ids TEXT,
            update_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS poll_options (
            poll_id TEXT NOT NULL,
            option_id TEXT NOT NULL,
            label TEXT NOT NULL,
            bet_amount INTEGER NOT NULL,
            PRIMARY KEY (poll_id, option_id),
            FOREIGN KEY (poll_id) REFERENCES polls(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS bet_logs (
            id TEXT PRIMARY KEY,
            poll_id TEXT NOT NULL,
            player_id TEXT NOT NULL,
            option_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (poll_id) REFERENCES polls(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bet_logs_poll ON bet_logs(poll_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_bet_logs_poll_player ON bet_logs(poll_id, player_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS player_assets (
            player_id TEXT NOT NULL,
            asset_id TEXT NOT NULL,
            balance INTEGER NOT NULL,
            status TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (player_id, asset_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS asset_transactions (
            id TEXT PRIMARY KEY,
            player_id TEXT NOT NULL,
            asset_id TEXT NOT NULL,
            op TEXT NOT NULL,
            amount INTEGER NOT NULL,
            balance_before INTEGER NOT NULL,
            balance_after INTEGER NOT NULL,
            reason TEXT NOT NULL,
            poll_id TEXT,
            bet_log_id TEXT,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_asset_tx_player ON asset_transactions(player_id, asset_id, created_at)",
        [],
    )?;
    Ok(())
}

struct PollRow {
    id: String,
    betting_enabled: bool,
    bet_asset_id: String,
    min_bet: i64,
    max_bet: i64,
    commission_bps: i64,
    starts_at: i64,
    ends_at: i64,
    allow_multiple_votes: bool,
    required_token_id: Option<String>,
    betting_status: String,
    total_votes: i64,
    unique_voters: i64,
    total_commission: i64,
    is_settled: bool,
    settled_at: Option<i64>,
    answer_option_ids: Option<String>,
}

/// Load one poll with its options. Inconsistent settlement fields are
/// logged as a data-integrity alarm here, at the single load point.
pub fn get_poll(conn: &Connection, poll_id: &str) -> Result<Option<BettingPoll>> {
    let row = conn
        .query_row(
            "SELECT id, betting_enabled, bet_asset_id, min_bet, max_bet, commission_bps,
                    starts_at, ends_at, allow_multiple_votes, required_token_id,
                    betting_status, total_votes, unique_voters, total_commission,
                    is_settled, settled_at, answer_option_ids
             FROM polls WHERE id = ?1",
            [poll_id],
            |row| {
                Ok(PollRow {
                    id: row.get(0)?,
                    betting_enabled: row.get::<_, i64>(1)? != 0,
                    bet_asset_id: row.get(2)?,
                    min_bet: row.get(3)?,
                    max_bet: row.get(4)?,
                    commission_bps: row.get(5)?,
                    starts_at: row.get(6)?,
                    ends_at: row.get(7)?,
                    allow_multiple_votes: row.get::<_, i64>(8)? != 0,
                    required_token_id: row.get(9)?,
                    betting_status: row.get(10)?,
                    total_votes: row.get(11)?,
                    unique_voters: row.get(12)?,
                    total_commission: row.get(13)?,
                    is_settled: row.get::<_, i64>(14)? != 0,
                    settled_at: row.get(15)?,
                    answer_option_ids: row.get(16)?,
                })
            },
        )
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status = BettingStatus::parse(&row.betting_status)
        .ok_or_else(|| anyhow!("poll {} has unknown status {}", row.id, row.betting_status))?;

    let mut stmt = conn.prepare_cached(
        "SELECT option_id, label, bet_amount FROM poll_options
         WHERE poll_id = ?1 ORDER BY option_id ASC",
    )?;
    let options = stmt
        .query_map([poll_id], |r| {
            Ok(PollOption {
                option_id: r.get(0)?,
                label: r.get(1)?,
                bet_amount: Amount::from_raw(r.get(2)?),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let answer_option_ids = match row.answer_option_ids {
        Some(json) => Some(serde_json::from_str::<Vec<String>>(&json)?),
        None => None,
    };

    let poll = BettingPoll {
        id: row.id,
        betting_enabled: row.betting_enabled,
        bet_asset_id: row.bet_asset_id,
        options,
        min_bet: Amount::from_raw(row.min_bet),
        max_bet: Amount::from_raw(row.max_bet),
        commission_bps: row.commission_bps as u32,
        starts_at: row.starts_at,
        ends_at: row.ends_at,
        allow_multiple_votes: row.allow_multiple_votes,
        required_token_id: row.required_token_id,
        betting_status: status,
        total_votes: row.total_votes,
        unique_voters: row.unique_voters,
        total_commission: Amount::from_raw(row.total_commission),
        is_settled: row.is_settled,
        settled_at: row.settled_at,
        answer_option_ids,
    };

    if poll.has_inconsistent_settlement_fields() {
        warn!(
            poll_id = %poll.id,
            status = poll.betting_status.as_str(),
            is_settled = poll.is_settled,
            settled_at = ?poll.settled_at,
            "poll settlement fields disagree; treating as settled"
        );
    }

    Ok(Some(poll))
}

pub fn get_bet_logs(conn: &Connection, poll_id: &str) -> Result<Vec<BetLog>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, poll_id, player_id, option_id, amount, created_at
         FROM bet_logs WHERE poll_id = ?1 ORDER BY created_at ASC, id ASC",
    )?;
    let logs = stmt
        .query_map([poll_id], |r| {
            Ok(BetLog {
                id: r.get(0)?,
                poll_id: r.get(1)?,
                player_id: r.get(2)?,
                option_id: r.get(3)?,
                amount: Amount::from_raw(r.get(4)?),
                created_at: r.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(logs)
}

/// Timestamp of the player's earliest bet on this poll, if any. Used for
/// the duplicate-vote rejection message.
pub fn first_bet_at(conn: &Connection, poll_id: &str, player_id: &str) -> Result<Option<i64>> {
    let ts = conn
        .query_row(
            "SELECT MIN(created_at) FROM bet_logs WHERE poll_id = ?1 AND player_id = ?2",
            params![poll_id, player_id],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?
        .flatten();
    Ok(ts)
}

pub fn get_balance(conn: &Connection, player_id: &str, asset_id: &str) -> Result<Option<PlayerAsset>> {
    let row = conn
        .query_row(
            "SELECT player_id, asset_id, balance, status, updated_at
             FROM player_assets WHERE player_id = ?1 AND asset_id = ?2",
            params![player_id, asset_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((player_id, asset_id, balance, status, updated_at)) = row else {
        return Ok(None);
    };
    let status = AssetStatus::parse(&status)
        .ok_or_else(|| anyhow!("asset row {}/{} has unknown status {}", player_id, asset_id, status))?;
    Ok(Some(PlayerAsset {
        player_id,
        asset_id,
        balance: Amount::from_raw(balance),
        status,
        updated_at,
    }))
}

/// Advance the poll status, conditional on the expected current status.
/// Returns false when the row was not in `from` (a racer got there first
/// or the poll moved on). Backward transitions are refused outright.
pub fn advance_status(
    conn: &Connection,
    poll_id: &str,
    from: BettingStatus,
    to: BettingStatus,
) -> Result<bool> {
    if to.rank() < from.rank() {
        return Err(anyhow!(
            "refusing backward transition {} -> {} on poll {}",
            from.as_str(),
            to.as_str(),
            poll_id
        ));
    }
    let changed = conn.execute(
        "UPDATE polls SET betting_status = ?1, update_count = update_count + 1
         WHERE id = ?2 AND betting_status = ?3",
        params![to.as_str(), poll_id, from.as_str()],
    )?;
    Ok(changed == 1)
}

/// Final settlement write: answer set, settled flags, commission actually
/// reserved. Conditional on SETTLING so it can only follow `advance_status`.
pub fn finalize_settlement(
    conn: &Connection,
    poll_id: &str,
    winning_option_ids: &[String],
    total_commission: Amount,
    settled_at: i64,
) -> Result<bool> {
    let answers = serde_json::to_string(winning_option_ids)?;
    let changed = conn.execute(
        "UPDATE polls SET betting_status = 'SETTLED', is_settled = 1, settled_at = ?1,
                answer_option_ids = ?2, total_commission = ?3,
                update_count = update_count + 1
         WHERE id = ?4 AND betting_status = 'SETTLING'",
        params![settled_at, answers, total_commission.raw(), poll_id],
    )?;
    Ok(changed == 1)
}
