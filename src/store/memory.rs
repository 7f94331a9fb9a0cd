//! In-process account store for local runs and tests

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{Account, AccountStore, StoreError};
use crate::race::{Racer, StatTier};

/// Balance given to auto-provisioned accounts
pub const STARTING_BALANCE: u64 = 10;

/// Account store kept in memory.
///
/// With auto-provisioning enabled, unknown accounts are created on first
/// lookup with a starting balance and a starting-tier racer.
pub struct MemoryStore {
    accounts: DashMap<Uuid, Account>,
    racers: DashMap<Uuid, Racer>,
    /// owner -> active racer
    active: DashMap<Uuid, Uuid>,
    auto_provision: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            racers: DashMap::new(),
            active: DashMap::new(),
            auto_provision: false,
        }
    }

    pub fn with_auto_provision() -> Self {
        Self {
            auto_provision: true,
            ..Self::new()
        }
    }

    pub fn insert_account(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    /// Store a racer and make it its owner's active racer
    pub fn insert_racer(&self, racer: Racer) {
        if let Some(owner_id) = racer.owner_id {
            self.active.insert(owner_id, racer.id);
        }
        self.racers.insert(racer.id, racer);
    }

    pub fn balance(&self, account_id: Uuid) -> Option<u64> {
        self.accounts.get(&account_id).map(|a| a.balance)
    }

    pub fn racer(&self, racer_id: Uuid) -> Option<Racer> {
        self.racers.get(&racer_id).map(|r| r.value().clone())
    }

    fn provision(&self, account_id: Uuid) {
        if !self.auto_provision || self.accounts.contains_key(&account_id) {
            return;
        }
        self.insert_account(Account::new(account_id, STARTING_BALANCE));
        let racer = Racer::owned(account_id, StatTier::Starting, &mut rand::thread_rng());
        self.insert_racer(racer);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        self.provision(account_id);
        Ok(self.accounts.get(&account_id).map(|a| a.value().clone()))
    }

    async fn active_racer(&self, owner_id: Uuid) -> Result<Option<Racer>, StoreError> {
        self.provision(owner_id);
        let racer_id = match self.active.get(&owner_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.racer(racer_id))
    }

    async fn debit(&self, account_id: Uuid, amount: u64) -> Result<u64, StoreError> {
        let mut account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;
        if account.balance < amount {
            return Err(StoreError::InsufficientFunds {
                balance: account.balance,
                requested: amount,
            });
        }
        account.balance -= amount;
        Ok(account.balance)
    }

    async fn credit(&self, account_id: Uuid, amount: u64) -> Result<u64, StoreError> {
        let mut account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;
        account.balance += amount;
        Ok(account.balance)
    }

    async fn add_experience(&self, account_id: Uuid, amount: u64) -> Result<(), StoreError> {
        let mut account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;
        account.gain_experience(amount);
        Ok(())
    }

    async fn record_account_race(&self, account_id: Uuid, won: bool) -> Result<(), StoreError> {
        let mut account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::AccountNotFound(account_id))?;
        account.record_race(won);
        Ok(())
    }

    async fn racers(&self, owner_id: Uuid) -> Result<Vec<Racer>, StoreError> {
        self.provision(owner_id);
        let mut racers: Vec<Racer> = self
            .racers
            .iter()
            .filter(|r| r.owner_id == Some(owner_id))
            .map(|r| r.value().clone())
            .collect();
        racers.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.name.cmp(&b.name)));
        Ok(racers)
    }

    async fn set_active_racer(&self, owner_id: Uuid, racer_id: Uuid) -> Result<Racer, StoreError> {
        self.provision(owner_id);
        if !self.accounts.contains_key(&owner_id) {
            return Err(StoreError::AccountNotFound(owner_id));
        }
        let racer = self
            .racer(racer_id)
            .filter(|r| r.owner_id == Some(owner_id))
            .ok_or(StoreError::RacerNotFound(racer_id))?;
        self.active.insert(owner_id, racer_id);
        Ok(racer)
    }

    async fn record_race(
        &self,
        racer_id: Uuid,
        won: bool,
        experience: u64,
    ) -> Result<(), StoreError> {
        let mut racer = self
            .racers
            .get_mut(&racer_id)
            .ok_or(StoreError::RacerNotFound(racer_id))?;
        racer.record_race(won);
        racer.gain_experience(experience);
        Ok(())
    }
}
