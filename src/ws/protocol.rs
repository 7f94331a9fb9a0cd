//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lobby::LobbyError;
use crate::race::{RaceError, RaceView};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter the caller's active racer into the watched race
    Join,

    /// Wager on a racer of the watched race
    Bet {
        /// Racer index in join order
        racer_index: usize,
        amount: u64,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        user_id: Uuid,
        race_id: String,
        /// Current balance, when the account exists
        balance: Option<u64>,
        server_time: u64,
    },

    /// Race snapshot, sent on every stage change and every tick
    RaceUpdate {
        race: RaceView,
        track: Vec<String>,
    },

    /// A join or bet went through
    CommandAccepted {
        command: String,
        message: String,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn race_update(race: RaceView) -> Self {
        let track = race.track_lines();
        Self::RaceUpdate { race, track }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn lobby_error(e: &LobbyError) -> Self {
        Self::error(error_code(e), e.to_string())
    }
}

/// Stable machine-readable code for a command failure
pub fn error_code(e: &LobbyError) -> &'static str {
    match e {
        LobbyError::RaceNotFound(_) => "race_not_found",
        LobbyError::AccountNotFound(_) => "account_not_found",
        LobbyError::NoActiveRacer(_) => "no_active_racer",
        LobbyError::InsufficientFunds { .. } => "insufficient_funds",
        LobbyError::Store(_) => "internal",
        LobbyError::Race(race) => match race {
            RaceError::RaceClosed => "race_closed",
            RaceError::AlreadyJoined => "already_joined",
            RaceError::RaceFull(_) => "race_full",
            RaceError::BetsClosed => "bets_closed",
            RaceError::InvalidRacer(_) => "invalid_racer",
            RaceError::InsufficientField => "insufficient_field",
            RaceError::InvalidAmount => "invalid_amount",
            RaceError::RaceConcluded => "race_concluded",
        },
    }
}
