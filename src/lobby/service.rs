//! Lobby service - hosting, joining and betting on races

use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::race::{
    BroadcastRenderer, FinishPolicy, Host, RaceError, RaceFlags, RaceHandle, RaceOptions,
    RaceRegistry, RaceWorker,
};
use crate::store::{AccountStore, StoreError};
use crate::util::time::RaceTimings;

/// A racer entered into a race
#[derive(Debug, Clone)]
pub struct Entry {
    pub race_id: String,
    pub racer_index: usize,
    pub racer_name: String,
}

/// A wager accepted by a race
#[derive(Debug, Clone)]
pub struct PlacedBet {
    pub race_id: String,
    pub racer_index: usize,
    pub racer_name: String,
    pub amount: u64,
    /// Bettor's balance after the stake was taken
    pub balance: u64,
}

/// Entry point for every player command.
///
/// Hosting spawns the race's worker; joins and bets go straight to the
/// race handle under its lock.
pub struct LobbyService {
    registry: Arc<RaceRegistry>,
    accounts: Arc<dyn AccountStore>,
    timings: RaceTimings,
    finish_policy: FinishPolicy,
}

impl LobbyService {
    pub fn new(
        registry: Arc<RaceRegistry>,
        accounts: Arc<dyn AccountStore>,
        timings: RaceTimings,
        finish_policy: FinishPolicy,
    ) -> Self {
        Self {
            registry,
            accounts,
            timings,
            finish_policy,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<RaceRegistry> {
        &self.registry
    }

    /// Create a race in `channel_id`, enter the host's racer and start the
    /// race's worker
    pub async fn host(
        &self,
        user_id: Uuid,
        display_name: String,
        channel_id: String,
        flags: RaceFlags,
    ) -> Result<RaceHandle, LobbyError> {
        self.accounts
            .account(user_id)
            .await?
            .ok_or(LobbyError::AccountNotFound(user_id))?;
        let racer = self
            .accounts
            .active_racer(user_id)
            .await?
            .ok_or(LobbyError::NoActiveRacer(user_id))?;

        let host = Host {
            user_id,
            display_name,
        };
        let options = RaceOptions {
            flags,
            finish_policy: self.finish_policy,
        };
        let handle = self.registry.create_race(host, channel_id, options);

        if let Err(e) = handle.add_racer(racer) {
            self.registry.remove(&handle.id);
            return Err(e.into());
        }

        let renderer = Arc::new(BroadcastRenderer::new(handle.views()));
        RaceWorker::new(
            handle.clone(),
            self.registry.clone(),
            self.accounts.clone(),
            renderer,
            self.timings,
        )
        .spawn();

        info!(race_id = %handle.id, user_id = %user_id, ?flags, "Race hosted");
        Ok(handle)
    }

    /// Enter the caller's active racer into an open race
    pub async fn join(&self, user_id: Uuid, race_id: &str) -> Result<Entry, LobbyError> {
        let handle = self.race(race_id)?;
        let racer = self
            .accounts
            .active_racer(user_id)
            .await?
            .ok_or(LobbyError::NoActiveRacer(user_id))?;
        let racer_name = racer.name.clone();

        let racer_index = handle.add_racer(racer)?;
        info!(race_id = %race_id, user_id = %user_id, racer_index, "Racer joined");

        Ok(Entry {
            race_id: handle.id,
            racer_index,
            racer_name,
        })
    }

    /// Stake `amount` on the racer at `racer_index`.
    ///
    /// The stake is debited before the wager is recorded and credited back
    /// when the race refuses it.
    pub async fn bet(
        &self,
        user_id: Uuid,
        race_id: &str,
        racer_index: usize,
        amount: u64,
    ) -> Result<PlacedBet, LobbyError> {
        let handle = self.race(race_id)?;
        if amount == 0 {
            return Err(RaceError::InvalidAmount.into());
        }

        let account = self
            .accounts
            .account(user_id)
            .await?
            .ok_or(LobbyError::AccountNotFound(user_id))?;
        if account.balance < amount {
            return Err(LobbyError::InsufficientFunds {
                balance: account.balance,
                requested: amount,
            });
        }

        let balance = self
            .accounts
            .debit(user_id, amount)
            .await
            .map_err(|e| match e {
                StoreError::InsufficientFunds { balance, requested } => {
                    LobbyError::InsufficientFunds { balance, requested }
                }
                other => LobbyError::Store(other),
            })?;

        if let Err(e) = handle.place_bet(racer_index, amount, user_id) {
            match self.accounts.credit(user_id, amount).await {
                Ok(_) => warn!(race_id = %race_id, user_id = %user_id, amount, error = %e, "Bet rejected, stake refunded"),
                Err(refund) => error!(race_id = %race_id, user_id = %user_id, amount, error = %refund, "Failed to refund rejected bet"),
            }
            return Err(e.into());
        }

        let racer_name = handle
            .get_racer(racer_index)
            .map(|r| r.name)
            .unwrap_or_default();
        info!(race_id = %race_id, user_id = %user_id, racer_index, amount, "Bet placed");
        Ok(PlacedBet {
            race_id: handle.id,
            racer_index,
            racer_name,
            amount,
            balance,
        })
    }

    fn race(&self, race_id: &str) -> Result<RaceHandle, LobbyError> {
        self.registry
            .get(race_id)
            .ok_or_else(|| LobbyError::RaceNotFound(race_id.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("Race {0} not found")]
    RaceNotFound(String),

    #[error("Account {0} is not initialised")]
    AccountNotFound(Uuid),

    #[error("Account {0} has no active racer")]
    NoActiveRacer(Uuid),

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },

    #[error(transparent)]
    Race(#[from] RaceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
