//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::race::FinishPolicy;
use crate::util::time::{
    RaceTimings, BETTING_TIMEOUT_SECS, MAX_RUNNING_SECS, NO_BETS_TIMEOUT_SECS, OPEN_TIMEOUT_SECS,
    TICK_INTERVAL_MILLIS,
};

/// Where accounts and racers live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Supabase,
    /// In-process store with auto-provisioned accounts, for local runs
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "supabase" => Ok(Self::Supabase),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Supabase connection settings
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,

    /// HS256 secret used to verify bearer tokens
    pub jwt_secret: String,
    /// Public base URL, used in startup logs
    pub public_base_url: String,
    /// Allowed client origin for CORS
    pub client_origin: String,

    pub store_backend: StoreBackend,
    /// Present when the backend is Supabase
    pub supabase: Option<SupabaseConfig>,

    pub race_timings: RaceTimings,
    pub finish_policy: FinishPolicy,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
        let log_json = match log_format.as_str() {
            "json" => true,
            "pretty" | "text" => false,
            _ => return Err(ConfigError::invalid("LOG_FORMAT", &log_format)),
        };

        let store_backend: StoreBackend = parse_or("STORE_BACKEND", StoreBackend::Supabase)?;
        let supabase = match store_backend {
            StoreBackend::Supabase => Some(SupabaseConfig {
                url: required("SUPABASE_URL")?,
                service_role_key: required("SUPABASE_SERVICE_ROLE_KEY")?,
            }),
            StoreBackend::Memory => None,
        };

        let race_timings = RaceTimings {
            open: Duration::from_secs(parse_or("RACE_OPEN_SECS", OPEN_TIMEOUT_SECS)?),
            betting: Duration::from_secs(parse_or("RACE_BETTING_SECS", BETTING_TIMEOUT_SECS)?),
            no_bets: Duration::from_secs(parse_or("RACE_NO_BETS_SECS", NO_BETS_TIMEOUT_SECS)?),
            tick: Duration::from_millis(parse_or("RACE_TICK_MILLIS", TICK_INTERVAL_MILLIS)?),
            max_running: Duration::from_secs(parse_or("RACE_MAX_RUNNING_SECS", MAX_RUNNING_SECS)?),
        };
        if race_timings.tick.is_zero() {
            return Err(ConfigError::invalid("RACE_TICK_MILLIS", "0"));
        }

        let finish_policy = match env::var("RACE_FINISH_POLICY") {
            Err(_) => FinishPolicy::default(),
            Ok(value) => parse_finish_policy(&value)
                .ok_or_else(|| ConfigError::invalid("RACE_FINISH_POLICY", &value))?,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json,

            jwt_secret: required("JWT_SECRET")?,
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://{}", server_addr)),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            store_backend,
            supabase,

            race_timings,
            finish_policy,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(name, &value)),
    }
}

pub fn parse_finish_policy(value: &str) -> Option<FinishPolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "podium" | "top3" => Some(FinishPolicy::Podium),
        "all" => Some(FinishPolicy::All),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}

impl ConfigError {
    fn invalid(name: &'static str, value: &str) -> Self {
        Self::Invalid {
            name,
            value: value.to_string(),
        }
    }
}
