//! Pure admission checks for a proposed wager.
//!
//! Everything here runs against an already-fetched poll snapshot before
//! any transactional scope is opened; an ineligible bet never touches the
//! ledger or the pool aggregates. The balance check at the end is advisory
//! only — the authoritative check is the Subtract inside the debit
//! transaction, which re-validates sufficiency at write time.

use chrono::DateTime;

use crate::betting::error::BetError;
use crate::betting::money::Amount;
use crate::models::{BettingPoll, BettingStatus};

/// Outcome of the token-gating consultation for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCheck {
    /// Poll is not token-gated; nothing to verify.
    NotRequired,
    /// Caller supplied no ownership proof.
    MissingProof,
    /// Oracle verdict for the supplied proof.
    Verified(bool),
}

/// Ordered short-circuit checks; the first failure wins.
pub fn validate_bet(
    poll: &BettingPoll,
    option_id: &str,
    amount: Amount,
    now: i64,
    gate: GateCheck,
    prior_vote_at: Option<i64>,
    balance: Option<Amount>,
) -> Result<(), BetError> {
    // 1. Betting state gate, fail-closed on inconsistent settlement fields.
    if poll.is_effectively_settled() {
        return Err(BetError::already_settled(&poll.id));
    }
    match poll.betting_status {
        BettingStatus::Open => {}
        BettingStatus::Settling => return Err(BetError::currently_settling(&poll.id)),
        _ => {
            return Err(BetError::StateConflict(format!(
                "Poll {} is not open for betting",
                poll.id
            )))
        }
    }

    // 2. Timing window.
    if now < poll.starts_at {
        return Err(BetError::Validation(format!(
            "Poll {} is not active yet",
            poll.id
        )));
    }
    if now > poll.ends_at {
        return Err(BetError::Validation(format!("Poll {} has ended", poll.id)));
    }

    // 3. Option must exist.
    if !poll.has_option(option_id) {
        return Err(BetError::Validation(format!("Invalid option: {}", option_id)));
    }

    // 4. Token gating.
    match gate {
        GateCheck::NotRequired => {}
        GateCheck::MissingProof => {
            return Err(BetError::Validation(
                "Token ownership proof is required for this poll".to_string(),
            ))
        }
        GateCheck::Verified(true) => {}
        GateCheck::Verified(false) => {
            return Err(BetError::Validation(
                "Player does not hold the required token".to_string(),
            ))
        }
    }

    // 5. Duplicate vote when multiple votes are disallowed.
    if !poll.allow_multiple_votes {
        if let Some(ts) = prior_vote_at {
            let when = DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| ts.to_string());
            return Err(BetError::Validation(format!(
                "Already voted on this poll at {}",
                when
            )));
        }
    }

    // 6. Bet size bounds.
    if amount < poll.min_bet {
        return Err(BetError::Validation(format!(
            "Minimum bet amount is {}",
            poll.min_bet
        )));
    }
    if amount > poll.max_bet {
        return Err(BetError::Validation(format!(
            "Maximum bet amount is {}",
            poll.max_bet
        )));
    }

    // 7. Advisory balance check.
    match balance {
        Some(b) if b >= amount => Ok(()),
        _ => Err(BetError::InsufficientBalance),
    }
}
