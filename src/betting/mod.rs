//! Pari-mutuel betting core.
//!
//! Flow: `validator` admits a bet, `ledger` moves the money, `aggregator`
//! folds it into the poll's pool, `settlement` computes the payout plan,
//! and `engine` drives all of it inside database transactions.

pub mod aggregator;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod money;
pub mod notify;
pub mod settlement;
pub mod token_gate;
pub mod validator;

pub use db::BettingDb;
pub use engine::BettingEngine;
pub use error::BetError;
pub use money::Amount;
