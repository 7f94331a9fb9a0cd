//! Account store: balances, experience and racer records

pub mod accounts;
pub mod memory;
pub mod supabase;

pub use accounts::SupabaseStore;
pub use memory::MemoryStore;
pub use supabase::{SupabaseClient, SupabaseError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::race::Racer;

/// Player account as stored in the `accounts` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub balance: u64,
    #[serde(default)]
    pub level: u64,
    #[serde(default)]
    pub xp: u64,
    /// Races entered by any of the account's racers
    #[serde(default)]
    pub races: u64,
    #[serde(default)]
    pub wins: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(id: Uuid, balance: u64) -> Self {
        Self {
            id,
            balance,
            level: 0,
            xp: 0,
            races: 0,
            wins: 0,
            created_at: Some(Utc::now()),
        }
    }

    /// Add experience, levelling up once `xp` reaches `(level + 1) * 100`
    pub fn gain_experience(&mut self, amount: u64) {
        self.xp += amount;
        let threshold = (self.level + 1) * 100;
        if self.xp >= threshold {
            self.xp -= threshold;
            self.level += 1;
        }
    }

    pub fn record_race(&mut self, won: bool) {
        self.races += 1;
        if won {
            self.wins += 1;
        }
    }

    /// Whole-percent share of races won, 0 before the first race
    pub fn win_rate_percent(&self) -> u64 {
        if self.races == 0 {
            return 0;
        }
        self.wins * 100 / self.races
    }
}

/// Everything the race engine needs from the account store.
///
/// Each call is a full round trip; nothing is cached between calls.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// The racer an account enters races with
    async fn active_racer(&self, owner_id: Uuid) -> Result<Option<Racer>, StoreError>;

    /// Take `amount` from the balance, returning the new balance
    async fn debit(&self, account_id: Uuid, amount: u64) -> Result<u64, StoreError>;

    /// Add `amount` to the balance, returning the new balance
    async fn credit(&self, account_id: Uuid, amount: u64) -> Result<u64, StoreError>;

    async fn add_experience(&self, account_id: Uuid, amount: u64) -> Result<(), StoreError>;

    /// Bump an account's lifetime race and win counters
    async fn record_account_race(&self, account_id: Uuid, won: bool) -> Result<(), StoreError>;

    /// Every racer an account owns
    async fn racers(&self, owner_id: Uuid) -> Result<Vec<Racer>, StoreError>;

    /// Make one of the owner's racers the one it enters races with
    async fn set_active_racer(&self, owner_id: Uuid, racer_id: Uuid) -> Result<Racer, StoreError>;

    /// Bump a racer's lifetime counters and experience after a race
    async fn record_race(&self, racer_id: Uuid, won: bool, experience: u64)
        -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Racer {0} not found")]
    RacerNotFound(Uuid),

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },

    #[error(transparent)]
    Supabase(#[from] SupabaseError),
}
