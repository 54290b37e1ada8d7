//! Network Layer
//!
//! WebSocket server for real-time client communication.
//! All game logic runs through `game/`; this layer only moves
//! messages.

pub mod protocol;
pub mod registry;
pub mod server;

pub use protocol::{
    BetData, BetRequest, CashOutData, CashOutRequest, ClientMessage, ProtocolError,
    ServerMessage,
};
pub use registry::{ConnectionRegistry, SessionId, PENDING_QUEUE_LIMIT};
pub use server::{GameServer, GameServerError, ServerConfig, StatusReport};
