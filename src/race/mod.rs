//! Race engine: racers, odds, wagers, the lifecycle state machine and the
//! registry of active races

pub mod names;
pub mod odds;
pub mod racer;
pub mod registry;
pub mod state;
pub mod view;
pub mod wager;
pub mod worker;

pub use racer::{Racer, StatTier};
pub use registry::{RaceHandle, RaceRegistry};
pub use state::Race;
pub use view::{BroadcastRenderer, RaceView};
pub use worker::RaceWorker;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Short identifier of an active race
pub type RaceId = String;

/// Lifecycle phase of a race. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Accepting joins
    Open,
    /// Field is fixed, odds are published and wagers accepted
    Betting,
    /// Simulation is ticking
    Running,
    /// Results are final and payouts are done
    Finished,
}

/// Flags chosen by the host when the race is created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceFlags {
    /// Skip the wagering window
    #[serde(default)]
    pub no_bets: bool,
    /// Do not pad small fields with synthetic racers
    #[serde(default)]
    pub no_autofill: bool,
    /// Re-run tied races until a single winner emerges, up to the retry cap
    #[serde(default)]
    pub only_one_winner: bool,
}

/// How many finishers end a running attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishPolicy {
    /// First three finishers, or the whole field when smaller
    #[default]
    Podium,
    /// Every racer has to cross the line
    All,
}

impl FinishPolicy {
    pub const PODIUM_SIZE: usize = 3;

    pub fn required_finishers(self, field_size: usize) -> usize {
        match self {
            FinishPolicy::Podium => field_size.min(Self::PODIUM_SIZE),
            FinishPolicy::All => field_size,
        }
    }
}

/// Creation-time options for a race
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaceOptions {
    pub flags: RaceFlags,
    pub finish_policy: FinishPolicy,
}

/// Host of a race
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub user_id: Uuid,
    pub display_name: String,
}

/// One racer crossing the finish line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceResult {
    /// Index of the racer in join order
    pub racer_index: usize,
    pub racer_id: Uuid,
    /// 1-based, shared by racers finishing on the same tick
    pub rank: u32,
    /// Tick of the attempt on which the racer finished
    pub tick: u64,
}

/// Validation and stage errors reported to callers. None of these stop the
/// race worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RaceError {
    #[error("Race is no longer open for joins")]
    RaceClosed,

    #[error("Already entered in this race")]
    AlreadyJoined,

    #[error("Race is full ({0} entrants)")]
    RaceFull(usize),

    #[error("Bets are closed")]
    BetsClosed,

    #[error("No racer at index {0}")]
    InvalidRacer(usize),

    #[error("At least two racers are needed to place bets")]
    InsufficientField,

    #[error("Bet amount must be positive")]
    InvalidAmount,

    #[error("Race has already concluded")]
    RaceConcluded,
}
