//! Round Engine
//!
//! Owns the live round and everything derived from it: phase
//! transitions, bet and cash-out mutation, crash detection, and the
//! background loop that drives rounds tick by tick.
//!
//! All round mutation serializes through one async mutex. Event
//! payloads are built while the lock is held and published to the
//! broadcast channel only after it is released, so the lock is never
//! held across delivery.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

use serde::{Deserialize, Serialize};

use crate::game::clock;
use crate::game::crash;
use crate::game::history::HistoryLog;
use crate::game::leaderboard::{LeaderboardRow, LeaderboardStore};
use crate::game::state::{
    CashOutReceipt, GameError, PlayerId, Round, RoundId, RoundResult,
};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Multiplier growth per second.
    pub growth_rate: f64,
    /// Interval between tick evaluations.
    pub tick_interval: Duration,
    /// Minimum spacing between multiplier_update broadcasts.
    pub multiplier_broadcast_interval: Duration,
    /// Pause between a round ending and the next one starting.
    pub cooldown: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            growth_rate: clock::DEFAULT_GROWTH_RATE,
            tick_interval: Duration::from_millis(50),
            multiplier_broadcast_interval: Duration::from_millis(100),
            cooldown: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Round lifecycle events published by the engine.
///
/// Request-scoped emissions (bet confirmations, player-initiated
/// cash-out announcements) are returned from the engine methods
/// instead, so the caller can route them relative to the originating
/// session.
#[derive(Clone, Debug)]
pub enum RoundEvent {
    /// A new round became Active.
    RoundStarted {
        /// Identifier of the new round.
        round_id: RoundId,
        /// Unix timestamp (seconds) of the start.
        start_time: f64,
    },

    /// The multiplier advanced (rate-limited).
    MultiplierChanged {
        /// Current client-visible multiplier.
        multiplier: f64,
        /// Seconds since round start.
        elapsed: f64,
    },

    /// An auto cash-out threshold fired.
    AutoCashedOut(CashOutReceipt),

    /// The round crashed and was finalized.
    RoundEnded(RoundResult),
}

/// Confirmation data for a successfully placed bet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BetReceipt {
    /// Betting player.
    pub player_id: PlayerId,
    /// Display name captured with the bet.
    pub username: String,
    /// Wagered amount.
    pub bet_amount: f64,
    /// Requested auto cash-out threshold, if any.
    pub auto_cash_out: Option<f64>,
}

/// Game state snapshot sent to newly connected clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Whether a round is currently Active.
    pub is_active: bool,
    /// Identifier of the current (or last) round.
    pub current_round: RoundId,
    /// Current client-visible multiplier.
    pub current_multiplier: f64,
    /// Unix timestamp (seconds) the current round started.
    pub round_start_time: f64,
    /// Recent crash values, oldest first.
    pub last_results: Vec<f64>,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Everything behind the engine's exclusive lock.
struct EngineState {
    round: Round,
    next_round_id: RoundId,
    leaderboard: LeaderboardStore,
    history: HistoryLog,
    /// Monotonic instant of the current round's start.
    started_at: Option<Instant>,
    /// When the last multiplier_update was emitted.
    last_multiplier_broadcast: Option<Instant>,
}

/// The round lifecycle engine.
///
/// Construct as many instances as needed (tests run several side by
/// side); nothing starts until [`RoundEngine::start`] is called, and
/// [`RoundEngine::stop`] shuts the loop down gracefully.
pub struct RoundEngine {
    config: EngineConfig,
    state: Mutex<EngineState>,
    event_tx: broadcast::Sender<RoundEvent>,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RoundEngine {
    /// Create an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: Mutex::new(EngineState {
                round: Round::idle(),
                next_round_id: 1,
                leaderboard: LeaderboardStore::new(),
                history: HistoryLog::new(),
                started_at: None,
                last_multiplier_broadcast: None,
            }),
            event_tx,
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    /// Subscribe to round lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.event_tx.subscribe()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Round operations
    // -------------------------------------------------------------------------

    /// Start a new round with a freshly drawn crash value.
    ///
    /// No-op returning `None` if a round is already Active.
    pub async fn start_round(&self) -> Option<RoundId> {
        let crash_value = crash::draw_crash_value(&mut rand::thread_rng());
        self.start_round_with(crash_value).await
    }

    /// Start a new round crashing at `crash_value`.
    ///
    /// Split out from [`RoundEngine::start_round`] so tests and
    /// external fairness hooks can fix the threshold.
    pub async fn start_round_with(&self, crash_value: f64) -> Option<RoundId> {
        let (round_id, start_time) = {
            let mut state = self.state.lock().await;
            if state.round.is_active() {
                return None;
            }

            let round_id = state.next_round_id;
            state.next_round_id += 1;

            let start_time = unix_now();
            state.round = Round::start(round_id, crash_value, start_time);
            state.started_at = Some(Instant::now());
            state.last_multiplier_broadcast = None;

            info!(round_id, crash_value, "round started");
            (round_id, start_time)
        };

        self.publish(RoundEvent::RoundStarted { round_id, start_time });
        Some(round_id)
    }

    /// Evaluate one clock tick.
    ///
    /// Advances the multiplier, fires auto cash-outs, detects the
    /// crash, and finalizes the round in the same lock acquisition that
    /// observed the crossing. Returns the events that were published.
    pub async fn tick(&self) -> Vec<RoundEvent> {
        let mut events = Vec::new();

        {
            let mut state = self.state.lock().await;
            if !state.round.is_active() {
                return events;
            }
            let started_at = match state.started_at {
                Some(t) => t,
                None => return events,
            };

            let elapsed = started_at.elapsed().as_secs_f64();
            let multiplier = clock::multiplier_at(elapsed, self.config.growth_rate);

            // Thresholds passed between ticks settle before the crash
            // check can end the round.
            for receipt in state.round.trigger_auto_cash_outs(multiplier) {
                debug!(player_id = %receipt.player_id, multiplier = receipt.multiplier,
                    "auto cash-out fired");
                events.push(RoundEvent::AutoCashedOut(receipt));
            }

            if multiplier >= state.round.crash_value {
                // Clients never see the overshot value.
                state.round.current_multiplier = state.round.crash_value;
                let result = finalize_locked(&mut state);
                events.push(RoundEvent::RoundEnded(result));
            } else {
                state.round.current_multiplier = multiplier;

                let due = state
                    .last_multiplier_broadcast
                    .map_or(true, |t| t.elapsed() >= self.config.multiplier_broadcast_interval);
                if due {
                    state.last_multiplier_broadcast = Some(Instant::now());
                    events.push(RoundEvent::MultiplierChanged { multiplier, elapsed });
                }
            }
        }

        for event in &events {
            self.publish(event.clone());
        }
        events
    }

    /// Place a bet in the current round.
    ///
    /// The duplicate check and insert are atomic under the engine lock.
    pub async fn place_bet(
        &self,
        player_id: PlayerId,
        username: String,
        bet_amount: f64,
        auto_cash_out: Option<f64>,
    ) -> Result<BetReceipt, GameError> {
        let mut state = self.state.lock().await;
        let bet = state
            .round
            .place_bet(player_id, username, bet_amount, auto_cash_out)?;

        debug!(player_id = %bet.player_id, bet_amount, "bet placed");
        Ok(BetReceipt {
            player_id: bet.player_id.clone(),
            username: bet.username.clone(),
            bet_amount: bet.bet_amount,
            auto_cash_out: bet.auto_cash_out,
        })
    }

    /// Cash out a player's bet at the current multiplier.
    ///
    /// Mutually exclusive with the crash transition: once a tick has
    /// moved the round to Ended this fails with `RoundNotActive`.
    pub async fn cash_out(&self, player_id: &PlayerId) -> Result<CashOutReceipt, GameError> {
        let mut state = self.state.lock().await;
        let receipt = state.round.cash_out(player_id)?;

        debug!(player_id = %receipt.player_id, multiplier = receipt.multiplier,
            profit = receipt.profit, "cash-out");
        Ok(receipt)
    }

    /// Finalize the current round if it is still Active.
    ///
    /// Idempotent: a second call (or a call racing a crash tick)
    /// returns `None` and leaves the leaderboard and history untouched.
    pub async fn finalize_round(&self) -> Option<RoundResult> {
        let result = {
            let mut state = self.state.lock().await;
            if !state.round.is_active() {
                return None;
            }
            finalize_locked(&mut state)
        };

        self.publish(RoundEvent::RoundEnded(result.clone()));
        Some(result)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Snapshot of the current game state for a connecting client.
    pub async fn snapshot(&self) -> GameSnapshot {
        let state = self.state.lock().await;
        GameSnapshot {
            is_active: state.round.is_active(),
            current_round: state.round.round_id,
            current_multiplier: state.round.current_multiplier,
            round_start_time: state.round.start_time,
            last_results: state.history.last_results(),
        }
    }

    /// Top `n` leaderboard rows by total profit, descending.
    pub async fn leaderboard_top(&self, n: usize) -> Vec<LeaderboardRow> {
        let state = self.state.lock().await;
        state.leaderboard.top(n)
    }

    /// Retained round history; non-positive `limit` returns everything.
    pub async fn round_history(&self, limit: i64) -> Vec<RoundResult> {
        let state = self.state.lock().await;
        state.history.recent(limit)
    }

    /// True while the current round accepts mutations.
    pub async fn is_round_active(&self) -> bool {
        self.state.lock().await.round.is_active()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Spawn the background round loop.
    ///
    /// Idempotent: a second call while the loop is running is a no-op.
    pub async fn start(self: Arc<Self>) {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            return;
        }

        let engine = Arc::clone(&self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        *handle = Some(tokio::spawn(async move {
            engine.run_round_loop(shutdown_rx).await;
        }));
    }

    /// Stop the background round loop and wait for it to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// The round loop: start a round, tick it to the crash, cool down,
    /// repeat until shutdown.
    async fn run_round_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("round loop started");

        loop {
            self.start_round().await;

            let mut ticker = interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                        if !self.is_round_active().await {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("round loop stopping");
                        return;
                    }
                }
            }

            tokio::select! {
                _ = sleep(self.config.cooldown) => {}
                _ = shutdown_rx.recv() => {
                    info!("round loop stopping");
                    return;
                }
            }
        }
    }

    fn publish(&self, event: RoundEvent) {
        // No subscribers is fine; delivery failures surface per-session
        // in the registry.
        let _ = self.event_tx.send(event);
    }
}

/// Settle the round under an already-held lock.
fn finalize_locked(state: &mut EngineState) -> RoundResult {
    let result = state.round.finalize(unix_now());

    for outcome in &result.results {
        state
            .leaderboard
            .record(&outcome.player_id, &outcome.username, outcome.profit);
    }
    state.history.push(result.clone());

    info!(
        round_id = result.round_id,
        crash_value = result.crash_value,
        players = result.results.len(),
        "round ended"
    );
    result
}

/// Current wall-clock time as fractional unix seconds.
fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::BetResult;

    fn test_engine() -> Arc<RoundEngine> {
        Arc::new(RoundEngine::new(EngineConfig::default()))
    }

    async fn advance(duration: Duration) {
        tokio::time::advance(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_lifecycle_with_cash_out() {
        let engine = test_engine();
        engine.start_round_with(2.5).await.unwrap();

        engine
            .place_bet(PlayerId::new("a"), "alice".into(), 100.0, None)
            .await
            .unwrap();

        // 0.07/s reaches 1.80 at t ≈ 11.43s
        advance(Duration::from_secs_f64(80.0 / 7.0)).await;
        let events = engine.tick().await;
        assert!(events
            .iter()
            .any(|e| matches!(e, RoundEvent::MultiplierChanged { multiplier, .. } if *multiplier == 1.8)));

        let receipt = engine.cash_out(&PlayerId::new("a")).await.unwrap();
        assert!((receipt.profit - 80.0).abs() < 1e-9);
        assert!((receipt.total_return - 180.0).abs() < 1e-9);

        // 2.50 is reached at t ≈ 21.43s and the round must end there
        advance(Duration::from_secs_f64(70.0 / 7.0)).await;
        let events = engine.tick().await;
        let result = events
            .iter()
            .find_map(|e| match e {
                RoundEvent::RoundEnded(r) => Some(r.clone()),
                _ => None,
            })
            .expect("round should end at the crash value");

        assert_eq!(result.crash_value, 2.5);
        assert_eq!(result.results[0].result, BetResult::Win);
        assert!(!engine.is_round_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiplier_never_exceeds_crash_value() {
        let engine = test_engine();
        engine.start_round_with(1.5).await.unwrap();

        // Way past the crash point in wall time
        advance(Duration::from_secs(60)).await;
        let events = engine.tick().await;

        assert!(events
            .iter()
            .any(|e| matches!(e, RoundEvent::RoundEnded(_))));
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.current_multiplier, 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_riders_lose_at_crash() {
        let engine = test_engine();
        engine.start_round_with(2.0).await.unwrap();
        engine
            .place_bet(PlayerId::new("b"), "bob".into(), 40.0, None)
            .await
            .unwrap();

        advance(Duration::from_secs(60)).await;
        let events = engine.tick().await;
        let result = events
            .iter()
            .find_map(|e| match e {
                RoundEvent::RoundEnded(r) => Some(r.clone()),
                _ => None,
            })
            .unwrap();

        assert_eq!(result.results[0].result, BetResult::Loss);
        assert_eq!(result.results[0].profit, -40.0);

        // Loss is folded into the leaderboard
        let top = engine.leaderboard_top(20).await;
        assert_eq!(top[0].total_profit, -40.0);
        assert_eq!(top[0].games_played, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cash_out_after_crash_fails() {
        let engine = test_engine();
        engine.start_round_with(1.2).await.unwrap();
        engine
            .place_bet(PlayerId::new("a"), "a".into(), 100.0, None)
            .await
            .unwrap();

        advance(Duration::from_secs(30)).await;
        engine.tick().await;

        let err = engine.cash_out(&PlayerId::new("a")).await.unwrap_err();
        assert_eq!(err, GameError::RoundNotActive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_round_is_idempotent() {
        let engine = test_engine();
        engine.start_round_with(2.5).await.unwrap();
        engine
            .place_bet(PlayerId::new("a"), "a".into(), 100.0, None)
            .await
            .unwrap();

        assert!(engine.finalize_round().await.is_some());
        assert!(engine.finalize_round().await.is_none());

        // No double-counted leaderboard, no duplicate history
        let top = engine.leaderboard_top(20).await;
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].games_played, 1);
        assert_eq!(engine.round_history(0).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiplier_broadcast_rate_limit() {
        let engine = test_engine();
        engine.start_round_with(100.0).await.unwrap();

        advance(Duration::from_secs(1)).await;
        let events = engine.tick().await;
        assert!(events
            .iter()
            .any(|e| matches!(e, RoundEvent::MultiplierChanged { .. })));

        // 50ms later: inside the 100ms window, no update
        advance(Duration::from_millis(50)).await;
        let events = engine.tick().await;
        assert!(!events
            .iter()
            .any(|e| matches!(e, RoundEvent::MultiplierChanged { .. })));

        // 60ms more: window elapsed, update flows again
        advance(Duration::from_millis(60)).await;
        let events = engine.tick().await;
        assert!(events
            .iter()
            .any(|e| matches!(e, RoundEvent::MultiplierChanged { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_cash_out_fires_before_crash() {
        let engine = test_engine();
        engine.start_round_with(3.0).await.unwrap();
        engine
            .place_bet(PlayerId::new("a"), "a".into(), 100.0, Some(1.5))
            .await
            .unwrap();

        // Advance past the threshold but not the crash
        advance(Duration::from_secs(10)).await;
        let events = engine.tick().await;
        let receipt = events
            .iter()
            .find_map(|e| match e {
                RoundEvent::AutoCashedOut(r) => Some(r.clone()),
                _ => None,
            })
            .expect("auto cash-out should fire");
        assert_eq!(receipt.multiplier, 1.5);
        assert!((receipt.profit - 50.0).abs() < 1e-9);

        advance(Duration::from_secs(60)).await;
        let events = engine.tick().await;
        let result = events
            .iter()
            .find_map(|e| match e {
                RoundEvent::RoundEnded(r) => Some(r.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(result.results[0].result, BetResult::Win);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_cash_out_beyond_crash_loses() {
        let engine = test_engine();
        engine.start_round_with(1.3).await.unwrap();
        engine
            .place_bet(PlayerId::new("a"), "a".into(), 100.0, Some(2.0))
            .await
            .unwrap();

        advance(Duration::from_secs(30)).await;
        let events = engine.tick().await;
        assert!(!events
            .iter()
            .any(|e| matches!(e, RoundEvent::AutoCashedOut(_))));

        let result = events
            .iter()
            .find_map(|e| match e {
                RoundEvent::RoundEnded(r) => Some(r.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(result.results[0].result, BetResult::Loss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_bet_rejected_through_engine() {
        let engine = test_engine();
        engine.start_round_with(2.0).await.unwrap();

        engine
            .place_bet(PlayerId::new("a"), "a".into(), 100.0, None)
            .await
            .unwrap();
        let err = engine
            .place_bet(PlayerId::new("a"), "a".into(), 10.0, None)
            .await
            .unwrap_err();
        assert_eq!(err, GameError::DuplicateBet);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_ids_are_monotonic() {
        let engine = test_engine();
        let first = engine.start_round_with(1.5).await.unwrap();
        engine.finalize_round().await.unwrap();
        let second = engine.start_round_with(1.5).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);

        // Starting while Active is refused
        assert!(engine.start_round_with(9.9).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_before_first_round_is_inert() {
        let engine = test_engine();
        assert!(engine.tick().await.is_empty());
        assert!(!engine.is_round_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaderboard_aggregates_across_rounds() {
        let engine = test_engine();

        // Round 1: lose 50
        engine.start_round_with(2.0).await.unwrap();
        engine
            .place_bet(PlayerId::new("b"), "bob".into(), 50.0, None)
            .await
            .unwrap();
        engine.finalize_round().await.unwrap();

        // Round 2: stake 150, cash out at 1.8, win 120
        engine.start_round_with(2.5).await.unwrap();
        engine
            .place_bet(PlayerId::new("b"), "bob".into(), 150.0, None)
            .await
            .unwrap();
        advance(Duration::from_secs_f64(80.0 / 7.0)).await;
        engine.tick().await;
        engine.cash_out(&PlayerId::new("b")).await.unwrap();
        engine.finalize_round().await.unwrap();

        let top = engine.leaderboard_top(20).await;
        assert_eq!(top.len(), 1);
        assert!((top[0].total_profit - 70.0).abs() < 1e-9);
        assert_eq!(top[0].games_played, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_start_stop() {
        let engine = Arc::new(RoundEngine::new(EngineConfig {
            cooldown: Duration::from_millis(100),
            ..EngineConfig::default()
        }));

        let mut events = engine.subscribe();
        Arc::clone(&engine).start().await;

        // The loop begins with a round start
        let event = events.recv().await.unwrap();
        assert!(matches!(event, RoundEvent::RoundStarted { round_id: 1, .. }));

        engine.stop().await;
    }
}
