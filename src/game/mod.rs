//! Game Logic Module
//!
//! The round lifecycle engine and everything it owns.
//!
//! ## Module Structure
//!
//! - `state`: Round, bet and result state
//! - `crash`: Crash threshold sampling
//! - `clock`: Multiplier growth function
//! - `engine`: Round engine and background loop
//! - `leaderboard`: Cumulative per-player totals
//! - `history`: Finished-round record

pub mod clock;
pub mod crash;
pub mod engine;
pub mod history;
pub mod leaderboard;
pub mod state;

// Re-export key types
pub use engine::{BetReceipt, EngineConfig, GameSnapshot, RoundEngine, RoundEvent};
pub use history::HistoryLog;
pub use leaderboard::{LeaderboardEntry, LeaderboardRow, LeaderboardStore};
pub use state::{
    Bet, BetResult, CashOutReceipt, GameError, PlayerId, PlayerOutcome, Round, RoundId,
    RoundPhase, RoundResult,
};
