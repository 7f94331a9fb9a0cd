//! Application state shared across routes

use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::lobby::LobbyService;
use crate::race::RaceRegistry;
use crate::store::{AccountStore, MemoryStore, SupabaseClient, SupabaseStore};
use crate::util::rate_limit::{create_user_limiter, UserLimiter, COMMAND_RATE_LIMIT};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RaceRegistry>,
    pub accounts: Arc<dyn AccountStore>,
    pub lobby: Arc<LobbyService>,
    /// Per-user limit on race commands
    pub command_limiter: Arc<UserLimiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let accounts: Arc<dyn AccountStore> = match (&config.store_backend, &config.supabase) {
            (StoreBackend::Supabase, Some(supabase)) => {
                let client = SupabaseClient::new(&supabase.url, &supabase.service_role_key);
                Arc::new(SupabaseStore::new(client))
            }
            // Config only omits Supabase settings for the memory backend
            _ => Arc::new(MemoryStore::with_auto_provision()),
        };

        Self::with_store(config, accounts)
    }

    /// Build the state around an already constructed account store
    pub fn with_store(config: Config, accounts: Arc<dyn AccountStore>) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(RaceRegistry::new());

        let lobby = Arc::new(LobbyService::new(
            registry.clone(),
            accounts.clone(),
            config.race_timings,
            config.finish_policy,
        ));

        Self {
            config,
            registry,
            accounts,
            lobby,
            command_limiter: create_user_limiter(COMMAND_RATE_LIMIT),
        }
    }
}
