//! Fire-and-forget settlement notifications.
//!
//! The engine spawns these after the financial transaction has committed;
//! a sink failure is logged and never propagated back into settlement.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::betting::money::Amount;
use crate::models::SettlementResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetOutcome {
    Win,
    Loss,
    Refund,
}

/// Per-bettor settlement notice.
#[derive(Debug, Clone, Serialize)]
pub struct BetSettledNotice {
    pub poll_id: String,
    pub player_id: String,
    pub outcome: BetOutcome,
    /// Amount credited; absent for losses.
    pub amount: Option<Amount>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn bet_settled(&self, notice: BetSettledNotice) -> Result<()>;
    async fn settlement_complete(&self, poll_id: &str, result: &SettlementResult) -> Result<()>;
}

/// Default sink: structured log lines only.
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn bet_settled(&self, notice: BetSettledNotice) -> Result<()> {
        info!(
            poll_id = %notice.poll_id,
            player_id = %notice.player_id,
            outcome = ?notice.outcome,
            amount = notice.amount.map(|a| a.to_f64()),
            "bet settled"
        );
        Ok(())
    }

    async fn settlement_complete(&self, poll_id: &str, result: &SettlementResult) -> Result<()> {
        info!(
            poll_id = %poll_id,
            total_payout = result.total_payout.to_f64(),
            total_winners = result.total_winners,
            is_refund = result.is_refund,
            "settlement complete"
        );
        Ok(())
    }
}
