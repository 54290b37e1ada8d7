//! # Crashpoint Server
//!
//! Authoritative round server for a multiplier-based wagering game.
//! A round starts, a hidden crash threshold is drawn, the multiplier
//! climbs, players bet and cash out, and the round ends distributing
//! results to every connected client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASHPOINT SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/            - Round lifecycle (lock-serialized)        │
//! │  ├── state.rs     - Round, bet and result state              │
//! │  ├── crash.rs     - Crash threshold sampling                 │
//! │  ├── clock.rs     - Multiplier growth function               │
//! │  ├── engine.rs    - Round engine and background loop         │
//! │  ├── leaderboard.rs - Cumulative per-player totals           │
//! │  └── history.rs   - Finished-round record                    │
//! │                                                              │
//! │  network/         - Networking (fan-out, backlog)            │
//! │  ├── server.rs    - WebSocket server                         │
//! │  ├── protocol.rs  - Message types                            │
//! │  └── registry.rs  - Sessions and pending queues              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Guarantee
//!
//! Every round mutation — bet placement, cash-out, tick-driven crash
//! detection — serializes through the engine's single exclusive lock,
//! so a cash-out can never observe a multiplier inconsistent with the
//! phase it also observes. Event payloads are copied out of the lock
//! before delivery; socket writes happen in per-connection tasks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::crash::MIN_CRASH_VALUE;
pub use game::engine::{EngineConfig, GameSnapshot, RoundEngine, RoundEvent};
pub use game::state::{Bet, BetResult, GameError, PlayerId, Round, RoundId, RoundResult};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
