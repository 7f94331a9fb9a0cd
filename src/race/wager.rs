//! Wager validation and settlement

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RaceError, RaceFlags, RaceResult, Stage};

/// Fewest entrants a race needs before it can be wagered on
pub const MIN_BETTING_FIELD: usize = 2;

/// A bettor's stake on one racer to finish first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    pub bettor_id: Uuid,
    pub amount: u64,
    pub racer_index: usize,
}

/// Amount owed to a bettor after the race resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub bettor_id: Uuid,
    pub amount: u64,
}

/// Wagers recorded against a single race.
///
/// The book only records intent. Balances belong to the account store, and
/// the caller moves currency before and after.
#[derive(Debug, Clone, Default)]
pub struct WagerBook {
    wagers: Vec<Wager>,
}

impl WagerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and record a wager
    pub fn place_bet(
        &mut self,
        stage: Stage,
        flags: &RaceFlags,
        field_size: usize,
        racer_index: usize,
        amount: u64,
        bettor_id: Uuid,
    ) -> Result<(), RaceError> {
        validate_bet(stage, flags, field_size, racer_index, amount)?;
        self.wagers.push(Wager {
            bettor_id,
            amount,
            racer_index,
        });
        Ok(())
    }

    pub fn wagers(&self) -> &[Wager] {
        &self.wagers
    }

    /// Total staked across every wager
    pub fn pool(&self) -> u64 {
        self.wagers.iter().map(|w| w.amount).sum()
    }
}

/// Check a wager against the race's stage, flags and field
pub fn validate_bet(
    stage: Stage,
    flags: &RaceFlags,
    field_size: usize,
    racer_index: usize,
    amount: u64,
) -> Result<(), RaceError> {
    if stage == Stage::Finished {
        return Err(RaceError::RaceConcluded);
    }
    if stage != Stage::Betting || flags.no_bets {
        return Err(RaceError::BetsClosed);
    }
    if field_size < MIN_BETTING_FIELD {
        return Err(RaceError::InsufficientField);
    }
    if racer_index >= field_size {
        return Err(RaceError::InvalidRacer(racer_index));
    }
    if amount == 0 {
        return Err(RaceError::InvalidAmount);
    }
    Ok(())
}

/// Compute payouts for every wager whose racer finished first.
///
/// Ties for first all pay. Losing wagers pay nothing.
pub fn settle(wagers: &[Wager], results: &[RaceResult], odds: &[f64]) -> Vec<Payout> {
    wagers
        .iter()
        .filter(|wager| {
            results
                .iter()
                .any(|r| r.racer_index == wager.racer_index && r.rank == 1)
        })
        .map(|wager| {
            let odd = odds.get(wager.racer_index).copied().unwrap_or(1.0);
            Payout {
                bettor_id: wager.bettor_id,
                amount: (wager.amount as f64 * odd).floor() as u64,
            }
        })
        .collect()
}
