//! Shared domain types for the poll betting backend.

use serde::{Deserialize, Serialize};

use crate::betting::money::Amount;

/// Lifecycle state of a betting poll. Transitions are forward-only:
/// once a poll leaves `Open` it can never return, and `Settled`,
/// `Closed`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BettingStatus {
    Open,
    Settling,
    Settled,
    Closed,
    Cancelled,
}

impl BettingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BettingStatus::Open => "OPEN",
            BettingStatus::Settling => "SETTLING",
            BettingStatus::Settled => "SETTLED",
            BettingStatus::Closed => "CLOSED",
            BettingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(BettingStatus::Open),
            "SETTLING" => Some(BettingStatus::Settling),
            "SETTLED" => Some(BettingStatus::Settled),
            "CLOSED" => Some(BettingStatus::Closed),
            "CANCELLED" => Some(BettingStatus::Cancelled),
            _ => None,
        }
    }

    /// Ordering rank used to enforce forward-only transitions.
    pub fn rank(&self) -> u8 {
        match self {
            BettingStatus::Open => 0,
            BettingStatus::Settling => 1,
            BettingStatus::Settled => 2,
            BettingStatus::Closed => 2,
            BettingStatus::Cancelled => 2,
        }
    }
}

/// Status of a (player, asset) balance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    Active,
    Inactive,
    Frozen,
    Deleted,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Active => "ACTIVE",
            AssetStatus::Inactive => "INACTIVE",
            AssetStatus::Frozen => "FROZEN",
            AssetStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(AssetStatus::Active),
            "INACTIVE" => Some(AssetStatus::Inactive),
            "FROZEN" => Some(AssetStatus::Frozen),
            "DELETED" => Some(AssetStatus::Deleted),
            _ => None,
        }
    }
}

/// One configured option on a betting poll, with its cumulative pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub option_id: String,
    pub label: String,
    pub bet_amount: Amount,
}

/// A betting poll snapshot: configuration, aggregates, settlement state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BettingPoll {
    pub id: String,
    pub betting_enabled: bool,
    pub bet_asset_id: String,
    pub options: Vec<PollOption>,
    pub min_bet: Amount,
    pub max_bet: Amount,
    pub commission_bps: u32,
    pub starts_at: i64,
    pub ends_at: i64,
    pub allow_multiple_votes: bool,
    pub required_token_id: Option<String>,
    pub betting_status: BettingStatus,
    pub total_votes: i64,
    pub unique_voters: i64,
    pub total_commission: Amount,
    pub is_settled: bool,
    pub settled_at: Option<i64>,
    pub answer_option_ids: Option<Vec<String>>,
}

impl BettingPoll {
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.option_id == option_id)
    }

    /// Sum of all option pools.
    pub fn pool_total(&self) -> Amount {
        self.options.iter().fold(Amount::ZERO, |acc, o| {
            acc.checked_add(o.bet_amount).unwrap_or(Amount::MAX)
        })
    }

    /// Fail-closed settled check: the status, the legacy flag, and the
    /// timestamp each individually imply "settled". A record where they
    /// disagree is still treated as settled.
    pub fn is_effectively_settled(&self) -> bool {
        self.is_settled
            || self.settled_at.is_some()
            || self.betting_status == BettingStatus::Settled
    }

    /// True when the settlement fields disagree with each other; such a
    /// record is a data-integrity alarm, not a supported state.
    pub fn has_inconsistent_settlement_fields(&self) -> bool {
        let fully_settled = self.is_settled
            && self.settled_at.is_some()
            && self.betting_status == BettingStatus::Settled;
        self.is_effectively_settled() && !fully_settled
    }
}

/// An immutable record of a single wager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetLog {
    pub id: String,
    pub poll_id: String,
    pub player_id: String,
    pub option_id: String,
    pub amount: Amount,
    pub created_at: i64,
}

/// A (player, asset) balance row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerAsset {
    pub player_id: String,
    pub asset_id: String,
    pub balance: Amount,
    pub status: AssetStatus,
    pub updated_at: i64,
}

/// Append-only ledger entry written alongside every balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetTransaction {
    pub id: String,
    pub player_id: String,
    pub asset_id: String,
    pub op: String,
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub reason: String,
    pub poll_id: Option<String>,
    pub bet_log_id: Option<String>,
    pub created_at: i64,
}

/// Settlement output line for one winning (or refunded) bet log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutDetail {
    pub player_id: String,
    pub bet_log_id: String,
    pub bet_amount: Amount,
    pub payout_amount: Amount,
}

/// Result of a participation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BetLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParticipationResult {
    pub fn ok(bet: BetLog) -> Self {
        Self {
            success: true,
            data: Some(bet),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Result of a settlement attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResult {
    pub success: bool,
    pub total_payout: Amount,
    pub total_winners: u64,
    pub is_refund: bool,
    pub payout_details: Vec<PayoutDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettlementResult {
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            total_payout: Amount::ZERO,
            total_winners: 0,
            is_refund: false,
            payout_details: Vec::new(),
            error: Some(error.into()),
        }
    }
}
