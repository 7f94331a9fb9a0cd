//! Time utilities and race phase timings

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Phase timing defaults
pub const OPEN_TIMEOUT_SECS: u64 = 10;
pub const BETTING_TIMEOUT_SECS: u64 = 30;
pub const NO_BETS_TIMEOUT_SECS: u64 = 10;
pub const TICK_INTERVAL_MILLIS: u64 = 1_000;
pub const MAX_RUNNING_SECS: u64 = 600;

/// Durations that bound each race phase.
///
/// Every worker gets its own copy, so tests can shrink them or run the
/// whole lifecycle on a paused tokio clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceTimings {
    /// How long the race accepts joins
    pub open: Duration,
    /// Wagering window
    pub betting: Duration,
    /// Breather used instead of the wagering window when bets are disabled
    pub no_bets: Duration,
    /// Interval between simulation ticks
    pub tick: Duration,
    /// Upper bound on a single running attempt
    pub max_running: Duration,
}

impl RaceTimings {
    /// Betting-phase duration for a race with the given no-bets flag
    pub fn betting_window(&self, no_bets: bool) -> Duration {
        if no_bets {
            self.no_bets
        } else {
            self.betting
        }
    }

    /// Maximum number of ticks a single running attempt may take
    pub fn max_ticks(&self) -> u64 {
        let tick = self.tick.as_millis().max(1);
        (self.max_running.as_millis() / tick).max(1) as u64
    }
}

impl Default for RaceTimings {
    fn default() -> Self {
        Self {
            open: Duration::from_secs(OPEN_TIMEOUT_SECS),
            betting: Duration::from_secs(BETTING_TIMEOUT_SECS),
            no_bets: Duration::from_secs(NO_BETS_TIMEOUT_SECS),
            tick: Duration::from_millis(TICK_INTERVAL_MILLIS),
            max_running: Duration::from_secs(MAX_RUNNING_SECS),
        }
    }
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
