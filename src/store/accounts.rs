//! Account store backed by Supabase tables

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::supabase::SupabaseClient;
use super::{Account, AccountStore, StoreError};
use crate::race::Racer;

/// Arguments of the `debit_balance` / `credit_balance` functions
#[derive(Debug, Serialize)]
struct BalanceChange {
    account_id: Uuid,
    amount: u64,
}

#[derive(Debug, Serialize)]
struct ExperienceUpdate {
    level: u64,
    xp: u64,
}

#[derive(Debug, Serialize)]
struct AccountRecordUpdate {
    races: u64,
    wins: u64,
}

#[derive(Debug, Serialize)]
struct ActiveUpdate {
    active: bool,
}

#[derive(Debug, Serialize)]
struct RacerRecordUpdate {
    races: u64,
    wins: u64,
    level: u64,
    exp: u64,
}

/// Accounts and racers stored in Supabase.
///
/// Balance moves go through Postgres functions so they are atomic;
/// `debit_balance` returns `null` when the balance cannot cover the amount.
#[derive(Clone)]
pub struct SupabaseStore {
    client: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn racer(&self, racer_id: Uuid) -> Result<Racer, StoreError> {
        let query = format!("id=eq.{}", racer_id);
        self.client
            .get_one("racers", &query)
            .await?
            .ok_or(StoreError::RacerNotFound(racer_id))
    }
}

#[async_trait]
impl AccountStore for SupabaseStore {
    async fn account(&self, account_id: Uuid) -> Result<Option<Account>, StoreError> {
        let query = format!("id=eq.{}", account_id);
        Ok(self.client.get_one("accounts", &query).await?)
    }

    async fn active_racer(&self, owner_id: Uuid) -> Result<Option<Racer>, StoreError> {
        let query = format!("owner_id=eq.{}&active=is.true", owner_id);
        Ok(self.client.get_one("racers", &query).await?)
    }

    async fn debit(&self, account_id: Uuid, amount: u64) -> Result<u64, StoreError> {
        let args = BalanceChange { account_id, amount };
        let balance: Option<u64> = self.client.rpc("debit_balance", &args).await?;

        match balance {
            Some(balance) => Ok(balance),
            None => {
                let account = self
                    .account(account_id)
                    .await?
                    .ok_or(StoreError::AccountNotFound(account_id))?;
                Err(StoreError::InsufficientFunds {
                    balance: account.balance,
                    requested: amount,
                })
            }
        }
    }

    async fn credit(&self, account_id: Uuid, amount: u64) -> Result<u64, StoreError> {
        let args = BalanceChange { account_id, amount };
        let balance: Option<u64> = self.client.rpc("credit_balance", &args).await?;
        balance.ok_or(StoreError::AccountNotFound(account_id))
    }

    async fn add_experience(&self, account_id: Uuid, amount: u64) -> Result<(), StoreError> {
        let mut account = self
            .account(account_id)
            .await?
            .ok_or(StoreError::AccountNotFound(account_id))?;
        account.gain_experience(amount);

        let query = format!("id=eq.{}", account_id);
        let update = ExperienceUpdate {
            level: account.level,
            xp: account.xp,
        };
        self.client.update("accounts", &query, &update).await?;

        debug!(account_id = %account_id, amount, level = account.level, "Account experience added");
        Ok(())
    }

    async fn record_account_race(&self, account_id: Uuid, won: bool) -> Result<(), StoreError> {
        let mut account = self
            .account(account_id)
            .await?
            .ok_or(StoreError::AccountNotFound(account_id))?;
        account.record_race(won);

        let query = format!("id=eq.{}", account_id);
        let update = AccountRecordUpdate {
            races: account.races,
            wins: account.wins,
        };
        self.client.update("accounts", &query, &update).await?;

        debug!(account_id = %account_id, won, races = account.races, "Account race recorded");
        Ok(())
    }

    async fn racers(&self, owner_id: Uuid) -> Result<Vec<Racer>, StoreError> {
        let query = format!("owner_id=eq.{}&order=level.desc,name.asc", owner_id);
        Ok(self.client.get("racers", &query).await?)
    }

    async fn set_active_racer(&self, owner_id: Uuid, racer_id: Uuid) -> Result<Racer, StoreError> {
        let query = format!("id=eq.{}&owner_id=eq.{}", racer_id, owner_id);
        let racer: Racer = self
            .client
            .get_one("racers", &query)
            .await?
            .ok_or(StoreError::RacerNotFound(racer_id))?;

        // Only one active racer per owner
        let active_query = format!("owner_id=eq.{}&active=is.true", owner_id);
        self.client
            .update("racers", &active_query, &ActiveUpdate { active: false })
            .await?;
        self.client
            .update("racers", &query, &ActiveUpdate { active: true })
            .await?;

        debug!(owner_id = %owner_id, racer_id = %racer_id, "Active racer set");
        Ok(racer)
    }

    async fn record_race(
        &self,
        racer_id: Uuid,
        won: bool,
        experience: u64,
    ) -> Result<(), StoreError> {
        let mut racer = self.racer(racer_id).await?;
        racer.record_race(won);
        racer.gain_experience(experience);

        let query = format!("id=eq.{}", racer_id);
        let update = RacerRecordUpdate {
            races: racer.races,
            wins: racer.wins,
            level: racer.level,
            exp: racer.exp,
        };
        self.client.update("racers", &query, &update).await?;

        debug!(racer_id = %racer_id, won, races = racer.races, "Racer record updated");
        Ok(())
    }
}
