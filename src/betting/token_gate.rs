//! Token-gating oracle, consulted only during bet admission.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait TokenGate: Send + Sync {
    /// Whether `player_id` holds `token_id`. Called only for gated polls
    /// and only when the caller supplied an ownership proof.
    async fn holds_token(&self, player_id: &str, token_id: &str) -> Result<bool>;
}

/// Gate for deployments without token-gated polls: always passes.
pub struct AllowAllGate;

#[async_trait]
impl TokenGate for AllowAllGate {
    async fn holds_token(&self, _player_id: &str, _token_id: &str) -> Result<bool> {
        Ok(true)
    }
}

/// In-memory holdings map, used by tests and local runs.
#[derive(Default)]
pub struct StaticGate {
    holdings: HashSet<(String, String)>,
}

impl StaticGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, player_id: &str, token_id: &str) -> Self {
        self.holdings
            .insert((player_id.to_string(), token_id.to_string()));
        self
    }
}

#[async_trait]
impl TokenGate for StaticGate {
    async fn holds_token(&self, player_id: &str, token_id: &str) -> Result<bool> {
        Ok(self
            .holdings
            .contains(&(player_id.to_string(), token_id.to_string())))
    }
}
