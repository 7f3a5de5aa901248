//! Error taxonomy for the betting core.
//!
//! Expected failures (validation, state conflicts, resource errors) are
//! expressed as `BetError` and surface to callers as structured results
//! with `success: false`. Infrastructure faults (store errors) stay on the
//! `anyhow` path and propagate with their underlying message preserved.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BetError {
    /// Bad input: invalid option, timing window, bet size, token gating,
    /// duplicate vote. Never retried automatically.
    #[error("{0}")]
    Validation(String),

    /// Poll is in a state that rejects the operation (settling, settled,
    /// closed, not yet ended). Idempotent-safe to stop retrying.
    #[error("{0}")]
    StateConflict(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Balance overflow")]
    Overflow,

    #[error("Asset is inactive")]
    AssetInactive,

    #[error("Asset is frozen")]
    AssetFrozen,

    #[error("Asset is deleted")]
    AssetDeleted,

    #[error("Poll {0} is not a betting poll")]
    NotBettingPoll(String),

    /// A concurrent settlement won the race; this attempt mutated nothing.
    #[error("Poll {0} is currently being settled or already settled")]
    SettlementRace(String),
}

impl BetError {
    pub fn already_settled(poll_id: &str) -> Self {
        BetError::StateConflict(format!("Poll {} has already been settled", poll_id))
    }

    pub fn currently_settling(poll_id: &str) -> Self {
        BetError::StateConflict(format!("Poll {} is currently being settled", poll_id))
    }
}
