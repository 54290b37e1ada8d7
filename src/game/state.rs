//! Round State Definitions
//!
//! All state for a single wagering round: typed identifiers, bets,
//! phases and finalized results. Uses BTreeMap for deterministic
//! iteration order when building result lists.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique player identifier.
///
/// Client-assigned opaque string. Implements Ord for deterministic
/// BTreeMap ordering of per-round bets and result lists.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Create from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the identifier carries no content.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Monotonic round counter, unique per round, assigned at start.
pub type RoundId = u64;

// =============================================================================
// ROUND PHASE
// =============================================================================

/// Round lifecycle phase.
///
/// `Idle -> Active -> Ended -> (cooldown) -> Active`. Idle is transient:
/// the engine starts a fresh round on each cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// No round has started yet.
    Idle,
    /// Multiplier is climbing; bets and cash-outs accepted.
    Active,
    /// Crash happened; no mutations accepted.
    Ended,
}

// =============================================================================
// BETS
// =============================================================================

/// Final outcome of a bet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetResult {
    /// Cashed out before the crash.
    Win,
    /// Still riding when the round crashed.
    Loss,
}

/// A single player's bet within one round.
///
/// Created on a valid placement, mutated at most once by a cash-out
/// (player- or engine-initiated), finalized as a loss otherwise.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bet {
    /// Owning player.
    pub player_id: PlayerId,
    /// Display name captured at placement time.
    pub username: String,
    /// Wagered amount, always > 0.
    pub bet_amount: f64,
    /// Optional multiplier threshold for engine-initiated cash-out.
    pub auto_cash_out: Option<f64>,
    /// Whether the bet has been cashed out.
    pub cashed_out: bool,
    /// Multiplier locked in by the cash-out, if any.
    pub cash_out_multiplier: Option<f64>,
    /// Signed profit. Zero until settled.
    pub profit: f64,
    /// Resolved at cash-out (win) or at round end (loss).
    pub result: Option<BetResult>,
}

impl Bet {
    fn new(
        player_id: PlayerId,
        username: String,
        bet_amount: f64,
        auto_cash_out: Option<f64>,
    ) -> Self {
        Self {
            player_id,
            username,
            bet_amount,
            auto_cash_out,
            cashed_out: false,
            cash_out_multiplier: None,
            profit: 0.0,
            result: None,
        }
    }

    /// Settle this bet as a win at `multiplier`.
    fn settle_win(&mut self, multiplier: f64) -> CashOutReceipt {
        let profit = self.bet_amount * (multiplier - 1.0);
        self.cashed_out = true;
        self.cash_out_multiplier = Some(multiplier);
        self.profit = profit;
        self.result = Some(BetResult::Win);

        CashOutReceipt {
            player_id: self.player_id.clone(),
            username: self.username.clone(),
            multiplier,
            profit,
            total_return: self.bet_amount + profit,
        }
    }
}

/// Settlement data produced by a successful cash-out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CashOutReceipt {
    /// Player that cashed out.
    pub player_id: PlayerId,
    /// Display name of the player.
    pub username: String,
    /// Multiplier locked in.
    pub multiplier: f64,
    /// Profit above the stake.
    pub profit: f64,
    /// Stake plus profit.
    pub total_return: f64,
}

// =============================================================================
// RESULTS
// =============================================================================

/// Per-player outcome within a finalized round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerOutcome {
    /// Player the outcome belongs to.
    pub player_id: PlayerId,
    /// Display name captured at placement time.
    pub username: String,
    /// Wagered amount.
    pub bet_amount: f64,
    /// Cash-out multiplier, or 0.0 if the bet rode into the crash.
    pub multiplier: f64,
    /// Signed profit.
    pub profit: f64,
    /// Win or loss.
    pub result: BetResult,
}

/// Immutable record of a finished round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundResult {
    /// Round this result belongs to.
    pub round_id: RoundId,
    /// The threshold the round crashed at, revealed at end.
    pub crash_value: f64,
    /// Per-player outcomes in player-id order.
    pub results: Vec<PlayerOutcome>,
    /// Unix timestamp (seconds) of finalization.
    pub timestamp: f64,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Player-facing round mutation errors.
///
/// Reported as structured failure responses on the caller's channel,
/// never fatal to the round or the process.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Malformed bet: missing player id, non-positive amount, or an
    /// auto cash-out threshold at or below 1.0.
    #[error("invalid bet details")]
    InvalidBet,

    /// Action attempted outside the Active phase.
    #[error("round is not active")]
    RoundNotActive,

    /// Player already holds a bet this round.
    #[error("bet already placed this round")]
    DuplicateBet,

    /// Player holds no bet this round.
    #[error("no bet placed this round")]
    NoBet,

    /// Bet was already cashed out.
    #[error("already cashed out")]
    AlreadyCashedOut,
}

// =============================================================================
// ROUND
// =============================================================================

/// One play cycle from start to crash.
///
/// Pure state: all mutation methods are synchronous and lock-free. The
/// engine serializes access through its own exclusive lock.
#[derive(Clone, Debug)]
pub struct Round {
    /// Round identifier, 0 while Idle.
    pub round_id: RoundId,
    /// Current phase.
    pub phase: RoundPhase,
    /// Unix timestamp (seconds) the round started.
    pub start_time: f64,
    /// Hidden crash threshold, >= 1.01 once drawn.
    pub crash_value: f64,
    /// Client-visible multiplier. Never exceeds `crash_value`.
    pub current_multiplier: f64,
    /// Bets placed this round, at most one per player.
    pub players: BTreeMap<PlayerId, Bet>,
}

impl Round {
    /// The idle round that exists before the first start.
    pub fn idle() -> Self {
        Self {
            round_id: 0,
            phase: RoundPhase::Idle,
            start_time: 0.0,
            crash_value: 0.0,
            current_multiplier: 1.0,
            players: BTreeMap::new(),
        }
    }

    /// Begin a fresh Active round.
    pub fn start(round_id: RoundId, crash_value: f64, start_time: f64) -> Self {
        Self {
            round_id,
            phase: RoundPhase::Active,
            start_time,
            crash_value,
            current_multiplier: 1.0,
            players: BTreeMap::new(),
        }
    }

    /// True while bets and cash-outs are accepted.
    pub fn is_active(&self) -> bool {
        self.phase == RoundPhase::Active
    }

    /// Place a bet for `player_id`.
    ///
    /// The duplicate check and the insert happen in one call under the
    /// caller's lock, so two concurrent placements can never both land.
    pub fn place_bet(
        &mut self,
        player_id: PlayerId,
        username: String,
        bet_amount: f64,
        auto_cash_out: Option<f64>,
    ) -> Result<&Bet, GameError> {
        if player_id.is_empty() || bet_amount <= 0.0 {
            return Err(GameError::InvalidBet);
        }
        if matches!(auto_cash_out, Some(threshold) if threshold <= 1.0) {
            return Err(GameError::InvalidBet);
        }
        if !self.is_active() {
            return Err(GameError::RoundNotActive);
        }
        if self.players.contains_key(&player_id) {
            return Err(GameError::DuplicateBet);
        }

        let bet = Bet::new(player_id.clone(), username, bet_amount, auto_cash_out);
        Ok(self.players.entry(player_id).or_insert(bet))
    }

    /// Cash out `player_id` at the current multiplier.
    pub fn cash_out(&mut self, player_id: &PlayerId) -> Result<CashOutReceipt, GameError> {
        if !self.is_active() {
            return Err(GameError::RoundNotActive);
        }

        let multiplier = self.current_multiplier;
        let bet = self.players.get_mut(player_id).ok_or(GameError::NoBet)?;
        if bet.cashed_out {
            return Err(GameError::AlreadyCashedOut);
        }

        Ok(bet.settle_win(multiplier))
    }

    /// Fire engine-initiated cash-outs for every live bet whose
    /// `auto_cash_out` threshold has been reached by `multiplier`.
    ///
    /// Each triggered bet locks in its own threshold, not the tick
    /// multiplier: the threshold is the value the player asked for, and
    /// the growth function passed through it between ticks. Thresholds
    /// at or above the crash value never fire (the crash comes first).
    pub fn trigger_auto_cash_outs(&mut self, multiplier: f64) -> Vec<CashOutReceipt> {
        if !self.is_active() {
            return Vec::new();
        }

        let mut receipts = Vec::new();
        for bet in self.players.values_mut() {
            if bet.cashed_out {
                continue;
            }
            if let Some(threshold) = bet.auto_cash_out {
                if threshold <= multiplier && threshold < self.crash_value {
                    receipts.push(bet.settle_win(threshold));
                }
            }
        }
        receipts
    }

    /// End the round: every bet not cashed out becomes a loss.
    ///
    /// Transitions to Ended and produces the immutable result record.
    /// The engine's phase guard ensures this runs exactly once per round.
    pub fn finalize(&mut self, timestamp: f64) -> RoundResult {
        self.phase = RoundPhase::Ended;

        let mut results = Vec::with_capacity(self.players.len());
        for bet in self.players.values_mut() {
            if !bet.cashed_out {
                bet.result = Some(BetResult::Loss);
                bet.profit = -bet.bet_amount;
            }
            results.push(PlayerOutcome {
                player_id: bet.player_id.clone(),
                username: bet.username.clone(),
                bet_amount: bet.bet_amount,
                multiplier: bet.cash_out_multiplier.unwrap_or(0.0),
                profit: bet.profit,
                result: bet.result.unwrap_or(BetResult::Loss),
            });
        }

        RoundResult {
            round_id: self.round_id,
            crash_value: self.crash_value,
            results,
            timestamp,
        }
    }
}
