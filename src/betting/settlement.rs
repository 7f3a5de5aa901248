//! Payout computation for poll settlement.
//!
//! Pure over the poll snapshot and its bet logs, so the split math is
//! testable without a store. Two modes:
//!
//! - **Win**: at least one bet log sits on a winning option. The pool
//!   minus the house commission is redistributed across the winning bet
//!   logs in exact proportion to stake, integer-exact.
//! - **Refund**: no bet log matches any winning option. Every wager is
//!   returned in full; no commission is withheld.

use std::collections::HashSet;

use crate::betting::error::BetError;
use crate::betting::money::{proportional_split, Amount};
use crate::models::{BetLog, BettingPoll, PayoutDetail};

#[derive(Debug, Clone)]
pub struct PayoutPlan {
    pub is_refund: bool,
    pub total_payout: Amount,
    /// Win mode: one winner per winning bet log. Refund mode: distinct
    /// bettors refunded.
    pub total_winners: u64,
    /// Commission reserved for the house; zero in refund mode.
    pub commission: Amount,
    pub details: Vec<PayoutDetail>,
}

pub fn compute_payout_plan(
    poll: &BettingPoll,
    bets: &[BetLog],
    winning_option_ids: &[String],
) -> Result<PayoutPlan, BetError> {
    if winning_option_ids.is_empty() {
        return Err(BetError::Validation(
            "At least one winning option is required".to_string(),
        ));
    }
    for id in winning_option_ids {
        if !poll.has_option(id) {
            return Err(BetError::Validation(format!("Invalid option: {}", id)));
        }
    }

    let winning: HashSet<&str> = winning_option_ids.iter().map(String::as_str).collect();
    let winners: Vec<&BetLog> = bets
        .iter()
        .filter(|b| winning.contains(b.option_id.as_str()))
        .collect();

    if winners.is_empty() {
        return refund_plan(bets);
    }

    let pool = poll.pool_total();
    let commission = pool.commission(poll.commission_bps);
    let distributable = pool
        .checked_sub(commission)
        .ok_or(BetError::Overflow)?;

    if distributable.raw() < winners.len() as i64 {
        return Err(BetError::Validation(
            "Pool is too small to pay every winner".to_string(),
        ));
    }

    let stakes: Vec<Amount> = winners.iter().map(|w| w.amount).collect();
    let mut shares = proportional_split(distributable, &stakes);

    // A dust stake can floor to a zero share; every winning bet must pay
    // out. Bump zeros to one raw unit funded from the current largest
    // share. The size check above guarantees a donor holding at least two
    // units whenever a zero share exists, so conservation holds.
    for i in 0..shares.len() {
        if !shares[i].is_zero() {
            continue;
        }
        let mut donor = 0;
        for (j, share) in shares.iter().enumerate() {
            if share.raw() > shares[donor].raw() {
                donor = j;
            }
        }
        shares[donor] = Amount::from_raw(shares[donor].raw() - 1);
        shares[i] = Amount::from_raw(1);
    }

    let mut details = Vec::with_capacity(winners.len());
    let mut total_payout = Amount::ZERO;
    for (bet, share) in winners.iter().zip(shares) {
        total_payout = total_payout.checked_add(share).ok_or(BetError::Overflow)?;
        details.push(PayoutDetail {
            player_id: bet.player_id.clone(),
            bet_log_id: bet.id.clone(),
            bet_amount: bet.amount,
            payout_amount: share,
        });
    }

    Ok(PayoutPlan {
        is_refund: false,
        total_payout,
        total_winners: details.len() as u64,
        commission,
        details,
    })
}

fn refund_plan(bets: &[BetLog]) -> Result<PayoutPlan, BetError> {
    let mut details = Vec::with_capacity(bets.len());
    let mut total_payout = Amount::ZERO;
    let mut bettors: HashSet<&str> = HashSet::new();
    for bet in bets {
        total_payout = total_payout
            .checked_add(bet.amount)
            .ok_or(BetError::Overflow)?;
        bettors.insert(bet.player_id.as_str());
        details.push(PayoutDetail {
            player_id: bet.player_id.clone(),
            bet_log_id: bet.id.clone(),
            bet_amount: bet.amount,
            payout_amount: bet.amount,
        });
    }
    Ok(PayoutPlan {
        is_refund: true,
        total_payout,
        total_winners: bettors.len() as u64,
        commission: Amount::ZERO,
        details,
    })
}
