//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON for debugging ease,
//! with optional binary (bincode) for payload structs.

use serde::{Deserialize, Serialize};

use crate::game::engine::{BetReceipt, GameSnapshot};
use crate::game::state::{CashOutReceipt, PlayerId, PlayerOutcome, RoundId};

/// Protocol decode/encode errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Undecodable or unencodable JSON payload.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// Undecodable or unencodable binary payload.
    #[error("malformed binary message: {0}")]
    Binary(#[from] bincode::Error),
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Place a bet in the current round.
    PlaceBet(BetRequest),

    /// Cash out the caller's bet at the current multiplier.
    CashOut(CashOutRequest),

    /// Ping for latency measurement / keep-alive.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

impl ClientMessage {
    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the JSON wire form.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Bet placement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRequest {
    /// Betting player.
    pub player_id: PlayerId,
    /// Display name; a placeholder is derived when absent.
    #[serde(default)]
    pub username: Option<String>,
    /// Wagered amount.
    pub bet_amount: f64,
    /// Optional engine-initiated cash-out threshold.
    #[serde(default)]
    pub auto_cash_out: Option<f64>,
}

impl BetRequest {
    /// Display name to record with the bet.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("player_{}", self.player_id),
        }
    }

    /// Binary wire form for payload structs.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Parse the binary wire form.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Cash-out request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashOutRequest {
    /// Player cashing out.
    pub player_id: PlayerId,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the socket is accepted.
    ConnectionEstablished {
        /// Registry session identifier.
        session_id: String,
    },

    /// Current game state, sent on connect.
    GameState(GameSnapshot),

    /// A new round became Active.
    RoundStart {
        /// Identifier of the new round.
        round_id: RoundId,
        /// Unix timestamp (seconds) of the start.
        start_time: f64,
    },

    /// Rate-limited multiplier progress.
    MultiplierUpdate {
        /// Current client-visible multiplier.
        multiplier: f64,
        /// Seconds since round start.
        elapsed: f64,
    },

    /// Another player placed a bet.
    NewBet {
        /// Betting player.
        player_id: PlayerId,
        /// Display name.
        username: String,
        /// Wagered amount.
        bet_amount: f64,
    },

    /// A player locked in a multiplier.
    PlayerCashedOut {
        /// Player that cashed out.
        player_id: PlayerId,
        /// Display name.
        username: String,
        /// Locked multiplier.
        multiplier: f64,
        /// Profit above the stake.
        profit: f64,
    },

    /// The round crashed; full results attached.
    RoundEnd {
        /// Finished round.
        round_id: RoundId,
        /// Revealed crash threshold.
        crash_value: f64,
        /// Per-player outcomes.
        results: Vec<PlayerOutcome>,
        /// Unix timestamp (seconds) of finalization.
        timestamp: f64,
    },

    /// Direct reply to a bet placement.
    BetResponse {
        /// Whether the bet landed.
        success: bool,
        /// Human-readable confirmation or error.
        message: String,
        /// Present on success.
        #[serde(skip_serializing_if = "Option::is_none")]
        bet_data: Option<BetData>,
    },

    /// Direct reply to a cash-out.
    CashOutResponse {
        /// Whether the cash-out landed.
        success: bool,
        /// Human-readable confirmation or error.
        message: String,
        /// Present on success.
        #[serde(skip_serializing_if = "Option::is_none")]
        cash_out_data: Option<CashOutData>,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server unix time in milliseconds.
        server_time: u64,
    },

    /// Structured failure for undecodable or unroutable input.
    Error {
        /// What went wrong.
        message: String,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason shown to the client.
        reason: String,
    },
}

impl ServerMessage {
    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the JSON wire form.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Confirmation payload inside a successful bet_response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetData {
    /// Betting player.
    pub player_id: PlayerId,
    /// Wagered amount.
    pub bet_amount: f64,
    /// Requested auto cash-out threshold, if any.
    pub auto_cash_out: Option<f64>,
}

impl From<&BetReceipt> for BetData {
    fn from(receipt: &BetReceipt) -> Self {
        Self {
            player_id: receipt.player_id.clone(),
            bet_amount: receipt.bet_amount,
            auto_cash_out: receipt.auto_cash_out,
        }
    }
}

/// Settlement payload inside a successful cash_out_response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashOutData {
    /// Player that cashed out.
    pub player_id: PlayerId,
    /// Locked multiplier.
    pub multiplier: f64,
    /// Profit above the stake.
    pub profit: f64,
    /// Stake plus profit.
    pub total_return: f64,
}

impl From<&CashOutReceipt> for CashOutData {
    fn from(receipt: &CashOutReceipt) -> Self {
        Self {
            player_id: receipt.player_id.clone(),
            multiplier: receipt.multiplier,
            profit: receipt.profit,
            total_return: receipt.total_return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::PlaceBet(BetRequest {
            player_id: PlayerId::new("p1"),
            username: Some("alice".into()),
            bet_amount: 100.0,
            auto_cash_out: Some(2.0),
        });

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"place_bet\""));

        let parsed = ClientMessage::from_json(&json).unwrap();
        match parsed {
            ClientMessage::PlaceBet(req) => {
                assert_eq!(req.player_id, PlayerId::new("p1"));
                assert_eq!(req.bet_amount, 100.0);
                assert_eq!(req.auto_cash_out, Some(2.0));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{"type":"place_bet","player_id":"p1","bet_amount":50.0}"#;
        let parsed = ClientMessage::from_json(json).unwrap();
        match parsed {
            ClientMessage::PlaceBet(req) => {
                assert_eq!(req.username, None);
                assert_eq!(req.auto_cash_out, None);
                assert_eq!(req.display_name(), "player_p1");
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_message_is_an_error() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"warp_drive"}"#).is_err());
    }

    #[test]
    fn test_server_message_tags() {
        let msg = ServerMessage::MultiplierUpdate {
            multiplier: 1.42,
            elapsed: 6.0,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"multiplier_update\""));

        let msg = ServerMessage::RoundStart {
            round_id: 7,
            start_time: 1_700_000_000.0,
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"round_start\""));
    }

    #[test]
    fn test_failure_response_omits_data() {
        let msg = ServerMessage::BetResponse {
            success: false,
            message: "round is not active".into(),
            bet_data: None,
        };
        let json = msg.to_json().unwrap();
        assert!(!json.contains("bet_data"));
    }

    #[test]
    fn test_bet_request_binary_roundtrip() {
        // Tagged enums (#[serde(tag = "type")]) are not supported by
        // bincode, so the binary form applies to payload structs.
        let req = BetRequest {
            player_id: PlayerId::new("p1"),
            username: None,
            bet_amount: 25.0,
            auto_cash_out: None,
        };
        let bytes = req.to_bytes().unwrap();
        let parsed = BetRequest::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.player_id, req.player_id);
        assert_eq!(parsed.bet_amount, req.bet_amount);
    }
}
