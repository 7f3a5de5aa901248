//! Balance ledger: signed deltas against (player, asset) rows.
//!
//! Every successful mutation writes the balance row and one append-only
//! `asset_transactions` entry in the same transaction scope the caller
//! opened. Failure modes are per-operation: Subtract guards against
//! overdraw, Add against the integer ceiling, and all operations refuse
//! non-active asset rows without touching anything.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::betting::error::BetError;
use crate::betting::money::Amount;
use crate::models::{AssetStatus, AssetTransaction};

/// Closed set of balance operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOp {
    Add,
    Subtract,
    Set,
}

impl BalanceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceOp::Add => "ADD",
            BalanceOp::Subtract => "SUBTRACT",
            BalanceOp::Set => "SET",
        }
    }
}

/// Optional linkage from a ledger entry back to the poll/bet that caused it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaLink<'a> {
    pub poll_id: Option<&'a str>,
    pub bet_log_id: Option<&'a str>,
}

impl<'a> DeltaLink<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn poll(poll_id: &'a str) -> Self {
        Self {
            poll_id: Some(poll_id),
            bet_log_id: None,
        }
    }

    pub fn bet(poll_id: &'a str, bet_log_id: &'a str) -> Self {
        Self {
            poll_id: Some(poll_id),
            bet_log_id: Some(bet_log_id),
        }
    }
}

/// Apply one delta. `amount` is always non-negative; the direction comes
/// from `op`, never from the sign. Missing rows are created at zero for
/// Add/Set; Subtract against a missing row is an overdraw.
pub fn apply_delta(
    conn: &Connection,
    player_id: &str,
    asset_id: &str,
    amount: Amount,
    op: BalanceOp,
    reason: &str,
    link: DeltaLink<'_>,
) -> Result<AssetTransaction> {
    let now = Utc::now().timestamp();

    let existing = conn
        .query_row(
            "SELECT balance, status FROM player_assets
             WHERE player_id = ?1 AND asset_id = ?2",
            params![player_id, asset_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    let (before, status) = match &existing {
        Some((raw, status)) => {
            let status = AssetStatus::parse(status).unwrap_or(AssetStatus::Deleted);
            (Amount::from_raw(*raw), status)
        }
        None => (Amount::ZERO, AssetStatus::Active),
    };

    match status {
        AssetStatus::Active => {}
        AssetStatus::Inactive => return Err(BetError::AssetInactive.into()),
        AssetStatus::Frozen => return Err(BetError::AssetFrozen.into()),
        AssetStatus::Deleted => return Err(BetError::AssetDeleted.into()),
    }

    let after = match op {
        BalanceOp::Add => before.checked_add(amount).ok_or(BetError::Overflow)?,
        BalanceOp::Subtract => before
            .checked_sub(amount)
            .ok_or(BetError::InsufficientBalance)?,
        BalanceOp::Set => amount,
    };

    if existing.is_some() {
        conn.execute(
            "UPDATE player_assets SET balance = ?1, updated_at = ?2
             WHERE player_id = ?3 AND asset_id = ?4",
            params![after.raw(), now, player_id, asset_id],
        )?;
    } else {
        conn.execute(
            "INSERT INTO player_assets (player_id, asset_id, balance, status, updated_at)
             VALUES (?1, ?2, ?3, 'ACTIVE', ?4)",
            params![player_id, asset_id, after.raw(), now],
        )?;
    }

    let entry = AssetTransaction {
        id: Uuid::new_v4().to_string(),
        player_id: player_id.to_string(),
        asset_id: asset_id.to_string(),
        op: op.as_str().to_string(),
        amount,
        balance_before: before,
        balance_after: after,
        reason: reason.to_string(),
        poll_id: link.poll_id.map(str::to_string),
        bet_log_id: link.bet_log_id.map(str::to_string),
        created_at: now,
    };
    conn.execute(
        "INSERT INTO asset_transactions (
            id, player_id, asset_id, op, amount, balance_before, balance_after,
            reason, poll_id, bet_log_id, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &entry.id,
            &entry.player_id,
            &entry.asset_id,
            &entry.op,
            entry.amount.raw(),
            entry.balance_before.raw(),
            entry.balance_after.raw(),
            &entry.reason,
            entry.poll_id.as_deref(),
            entry.bet_log_id.as_deref(),
            entry.created_at,
        ],
    )?;

    Ok(entry)
}
