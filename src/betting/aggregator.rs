//! Pool aggregate updates for one admitted bet.
//!
//! Runs inside the transaction the engine opened for the debit. The option
//! pool is read and written under the same write lock, with checked
//! arithmetic, and every poll-row update is conditional on the poll still
//! being OPEN so a settled poll's aggregates can never move.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::betting::error::BetError;
use crate::betting::money::Amount;
use crate::models::BetLog;

/// Increment the option pool, vote counters, and persist the bet log.
/// Commission is not deducted here; it is derived once at settlement.
pub fn apply_bet(
    conn: &Connection,
    poll_id: &str,
    player_id: &str,
    option_id: &str,
    amount: Amount,
    now: i64,
) -> Result<BetLog> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT bet_amount FROM poll_options WHERE poll_id = ?1 AND option_id = ?2",
            params![poll_id, option_id],
            |row| row.get(0),
        )
        .optional()?;
    let current = Amount::from_raw(
        current.ok_or_else(|| BetError::Validation(format!("Invalid option: {}", option_id)))?,
    );
    let updated = current.checked_add(amount).ok_or(BetError::Overflow)?;

    let changed = conn.execute(
        "UPDATE poll_options SET bet_amount = ?1
         WHERE poll_id = ?2 AND option_id = ?3
           AND (SELECT betting_status FROM polls WHERE id = ?2) = 'OPEN'",
        params![updated.raw(), poll_id, option_id],
    )?;
    if changed != 1 {
        return Err(BetError::currently_settling(poll_id).into());
    }

    let first_bet: bool = !conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM bet_logs WHERE poll_id = ?1 AND player_id = ?2)",
        params![poll_id, player_id],
        |row| row.get::<_, i64>(0).map(|v| v != 0),
    )?;

    let changed = conn.execute(
        "UPDATE polls SET total_votes = total_votes + 1,
                unique_voters = unique_voters + ?1,
                update_count = update_count + 1
         WHERE id = ?2 AND betting_status = 'OPEN'",
        params![first_bet as i64, poll_id],
    )?;
    if changed != 1 {
        return Err(BetError::currently_settling(poll_id).into());
    }

    let bet = BetLog {
        id: Uuid::new_v4().to_string(),
        poll_id: poll_id.to_string(),
        player_id: player_id.to_string(),
        option_id: option_id.to_string(),
        amount,
        created_at: now,
    };
    conn.execute(
        "INSERT INTO bet_logs (id, poll_id, player_id, option_id, amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &bet.id,
            &bet.poll_id,
            &bet.player_id,
            &bet.option_id,
            bet.amount.raw(),
            bet.created_at,
        ],
    )?;

    Ok(bet)
}
