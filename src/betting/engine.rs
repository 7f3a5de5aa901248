//! Participation and settlement driver.
//!
//! The engine owns the admission → debit → aggregate flow for bets and
//! the SETTLING → SETTLED flow for settlement. Expected failures come
//! back as structured results with `success: false`; only infrastructure
//! faults propagate as errors.

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::TransactionBehavior;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::betting::aggregator;
use crate::betting::db::{
    advance_status, finalize_settlement, first_bet_at, get_balance, get_bet_logs, get_poll,
    BettingDb,
};
use crate::betting::error::BetError;
use crate::betting::ledger::{self, BalanceOp, DeltaLink};
use crate::betting::money::Amount;
use crate::betting::notify::{BetOutcome, BetSettledNotice, NotificationSink};
use crate::betting::settlement::compute_payout_plan;
use crate::betting::token_gate::TokenGate;
use crate::betting::validator::{validate_bet, GateCheck};
use crate::models::{
    BetLog, BettingStatus, ParticipationResult, SettlementResult,
};

#[derive(Clone)]
pub struct BettingEngine {
    db: BettingDb,
    gate: Arc<dyn TokenGate>,
    notifier: Arc<dyn NotificationSink>,
}

impl BettingEngine {
    pub fn new(db: BettingDb, gate: Arc<dyn TokenGate>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { db, gate, notifier }
    }

    pub fn db(&self) -> &BettingDb {
        &self.db
    }

    /// Place a wager against an open betting poll.
    pub async fn participate_poll(
        &self,
        poll_id: &str,
        player_id: &str,
        option_id: &str,
        amount: Amount,
        token_proof: Option<&str>,
    ) -> Result<ParticipationResult> {
        match self
            .participate_inner(poll_id, player_id, option_id, amount, token_proof)
            .await
        {
            Ok(bet) => Ok(ParticipationResult::ok(bet)),
            Err(e) => match e.downcast::<BetError>() {
                Ok(bet_err) => {
                    debug!(poll_id, player_id, error = %bet_err, "bet rejected");
                    Ok(ParticipationResult::fail(bet_err.to_string()))
                }
                Err(infra) => Err(infra),
            },
        }
    }

    async fn participate_inner(
        &self,
        poll_id: &str,
        player_id: &str,
        option_id: &str,
        amount: Amount,
        token_proof: Option<&str>,
    ) -> Result<BetLog> {
        let now = Utc::now().timestamp();

        // Admission phase: pure checks against a snapshot, no writes.
        let poll = self
            .db
            .find_poll(poll_id)
            .await?
            .ok_or_else(|| BetError::Validation(format!("Poll {} not found", poll_id)))?;
        if !poll.betting_enabled {
            return Err(BetError::NotBettingPoll(poll_id.to_string()).into());
        }

        let gate = match &poll.required_token_id {
            None => GateCheck::NotRequired,
            Some(token_id) => match token_proof {
                None => GateCheck::MissingProof,
                Some(_) => GateCheck::Verified(self.gate.holds_token(player_id, token_id).await?),
            },
        };

        let (prior_vote_at, balance) = {
            let conn = self.db.conn.lock().await;
            let prior = first_bet_at(&conn, poll_id, player_id)?;
            let balance = get_balance(&conn, player_id, &poll.bet_asset_id)?.map(|b| b.balance);
            (prior, balance)
        };
        validate_bet(&poll, option_id, amount, now, gate, prior_vote_at, balance)?;

        // Atomic write scope: debit, aggregates, bet log. Balance and
        // poll state are re-verified here; the admission reads above may
        // be stale by now.
        let mut guard = self.db.conn.lock().await;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let fresh = get_poll(&tx, poll_id)?
            .ok_or_else(|| BetError::Validation(format!("Poll {} not found", poll_id)))?;
        if fresh.is_effectively_settled() {
            return Err(BetError::already_settled(poll_id).into());
        }
        match fresh.betting_status {
            BettingStatus::Open => {}
            BettingStatus::Settling => return Err(BetError::currently_settling(poll_id).into()),
            _ => {
                return Err(BetError::StateConflict(format!(
                    "Poll {} is not open for betting",
                    poll_id
                ))
                .into())
            }
        }
        if !fresh.allow_multiple_votes {
            if let Some(ts) = first_bet_at(&tx, poll_id, player_id)? {
                let when = chrono::DateTime::from_timestamp(ts, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| ts.to_string());
                return Err(
                    BetError::Validation(format!("Already voted on this poll at {}", when)).into(),
                );
            }
        }

        ledger::apply_delta(
            &tx,
            player_id,
            &fresh.bet_asset_id,
            amount,
            BalanceOp::Subtract,
            "bet_place",
            DeltaLink::poll(poll_id),
        )?;
        let bet = aggregator::apply_bet(&tx, poll_id, player_id, option_id, amount, now)?;
        tx.commit()?;

        debug!(
            poll_id,
            player_id,
            option_id,
            amount = amount.to_f64(),
            bet_id = %bet.id,
            "bet placed"
        );
        Ok(bet)
    }

    /// Settle a betting poll against the given winning options, crediting
    /// payouts (or refunds) exactly once.
    pub async fn settle_betting_poll(
        &self,
        poll_id: &str,
        winning_option_ids: &[String],
    ) -> Result<SettlementResult> {
        match self.settle_inner(poll_id, winning_option_ids).await {
            Ok(result) => Ok(result),
            Err(e) => match e.downcast::<BetError>() {
                Ok(bet_err) => {
                    warn!(poll_id, error = %bet_err, "settlement rejected");
                    Ok(SettlementResult::fail(bet_err.to_string()))
                }
                Err(infra) => Err(infra),
            },
        }
    }

    async fn settle_inner(
        &self,
        poll_id: &str,
        winning_option_ids: &[String],
    ) -> Result<SettlementResult> {
        let now = Utc::now().timestamp();

        let poll = self
            .db
            .find_poll(poll_id)
            .await?
            .ok_or_else(|| BetError::NotBettingPoll(poll_id.to_string()))?;
        if !poll.betting_enabled {
            return Err(BetError::NotBettingPoll(poll_id.to_string()).into());
        }
        if poll.is_effectively_settled() {
            return Err(BetError::already_settled(poll_id).into());
        }
        if now < poll.ends_at {
            return Err(BetError::StateConflict(format!(
                "Poll {} has not ended yet",
                poll_id
            ))
            .into());
        }

        // Single atomic scope for the whole settlement: state transition,
        // payout computation, all credits, final transition. Of N racers
        // only one observes OPEN in here; the rest abort without effects.
        let mut guard = self.db.conn.lock().await;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let fresh = get_poll(&tx, poll_id)?
            .ok_or_else(|| BetError::NotBettingPoll(poll_id.to_string()))?;
        if fresh.is_effectively_settled() || fresh.betting_status != BettingStatus::Open {
            return Err(BetError::SettlementRace(poll_id.to_string()).into());
        }
        if !advance_status(&tx, poll_id, BettingStatus::Open, BettingStatus::Settling)? {
            return Err(BetError::SettlementRace(poll_id.to_string()).into());
        }

        let bets = get_bet_logs(&tx, poll_id)?;
        let plan = compute_payout_plan(&fresh, &bets, winning_option_ids)?;

        let reason = if plan.is_refund { "bet_refund" } else { "bet_win" };
        for detail in &plan.details {
            // Any single credit failure (e.g. frozen asset) aborts the
            // whole transaction; nothing stays applied.
            ledger::apply_delta(
                &tx,
                &detail.player_id,
                &fresh.bet_asset_id,
                detail.payout_amount,
                BalanceOp::Add,
                reason,
                DeltaLink::bet(poll_id, &detail.bet_log_id),
            )?;
        }

        if !finalize_settlement(&tx, poll_id, winning_option_ids, plan.commission, now)? {
            bail!("poll {} left SETTLING mid-settlement", poll_id);
        }
        tx.commit()?;
        drop(guard);

        let result = SettlementResult {
            success: true,
            total_payout: plan.total_payout,
            total_winners: plan.total_winners,
            is_refund: plan.is_refund,
            payout_details: plan.details,
            error: None,
        };
        info!(
            poll_id,
            total_payout = result.total_payout.to_f64(),
            total_winners = result.total_winners,
            is_refund = result.is_refund,
            "poll settled"
        );

        self.dispatch_notifications(poll_id, &bets, &result);
        Ok(result)
    }

    /// Best-effort side effects, decoupled from the financial transaction.
    fn dispatch_notifications(&self, poll_id: &str, bets: &[BetLog], result: &SettlementResult) {
        let mut notices = Vec::new();
        let outcome = if result.is_refund {
            BetOutcome::Refund
        } else {
            BetOutcome::Win
        };
        let mut paid_players: HashSet<&str> = HashSet::new();
        for detail in &result.payout_details {
            paid_players.insert(detail.player_id.as_str());
            notices.push(BetSettledNotice {
                poll_id: poll_id.to_string(),
                player_id: detail.player_id.clone(),
                outcome,
                amount: Some(detail.payout_amount),
            });
        }
        if !result.is_refund {
            let mut losers: HashSet<&str> = HashSet::new();
            for bet in bets {
                if !paid_players.contains(bet.player_id.as_str()) {
                    losers.insert(bet.player_id.as_str());
                }
            }
            for player in losers {
                notices.push(BetSettledNotice {
                    poll_id: poll_id.to_string(),
                    player_id: player.to_string(),
                    outcome: BetOutcome::Loss,
                    amount: None,
                });
            }
        }

        let notifier = Arc::clone(&self.notifier);
        let poll_id = poll_id.to_string();
        let result = result.clone();
        tokio::spawn(async move {
            for notice in notices {
                if let Err(e) = notifier.bet_settled(notice).await {
                    warn!(poll_id = %poll_id, error = %e, "bet notification failed");
                }
            }
            if let Err(e) = notifier.settlement_complete(&poll_id, &result).await {
                warn!(poll_id = %poll_id, error = %e, "completion notification failed");
            }
        });
    }
}
