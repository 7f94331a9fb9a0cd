//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::error;
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::lobby::LobbyError;
use crate::race::racer::Mood;
use crate::race::{Host, RaceError, RaceFlags, RaceView, Racer, Stage};
use crate::store::{Account, StoreError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Upper bound on a single HTTP request, store round trips included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/races", get(list_races_handler))
        .route("/races/:id", get(race_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/races", post(host_race_handler))
        .route("/races/:id/join", post(join_race_handler))
        .route("/races/:id/bets", post(bet_handler))
        .route("/me", get(profile_handler))
        .route("/me/wallet", get(wallet_handler))
        .route("/me/racers", get(racers_handler))
        .route("/me/active-racer", post(active_racer_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

/// CORS for the configured origins (comma-separated), or any origin for `*`
fn cors_layer(client_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();

    cors.allow_origin(AllowOrigin::list(allowed_origins))
        .allow_credentials(true)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_races: usize,
    total_entrants: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_races: state.registry.active_races(),
        total_entrants: state.registry.total_entrants(),
    })
}

// ============================================================================
// Race queries
// ============================================================================

#[derive(Serialize)]
struct RaceSummary {
    race_id: String,
    channel_id: String,
    host: Host,
    stage: Stage,
    entrants: usize,
    max_entrants: usize,
    wager_count: usize,
    pool: u64,
}

impl From<RaceView> for RaceSummary {
    fn from(view: RaceView) -> Self {
        Self {
            race_id: view.race_id,
            channel_id: view.channel_id,
            host: view.host,
            stage: view.stage,
            entrants: view.entrants.len(),
            max_entrants: view.max_entrants,
            wager_count: view.wager_count,
            pool: view.pool,
        }
    }
}

#[derive(Serialize)]
struct RacesResponse {
    races: Vec<RaceSummary>,
}

async fn list_races_handler(State(state): State<AppState>) -> Json<RacesResponse> {
    let mut races: Vec<RaceSummary> = state
        .registry
        .views()
        .into_iter()
        .map(RaceSummary::from)
        .collect();
    races.sort_by(|a, b| a.race_id.cmp(&b.race_id));

    Json(RacesResponse { races })
}

#[derive(Serialize)]
struct RaceResponse {
    #[serde(flatten)]
    race: RaceView,
    track: Vec<String>,
}

async fn race_handler(
    State(state): State<AppState>,
    Path(race_id): Path<String>,
) -> Result<Json<RaceResponse>, AppError> {
    let handle = state
        .registry
        .get(&race_id)
        .ok_or_else(|| AppError::NotFound(format!("Race {} not found", race_id)))?;

    let race = handle.view();
    let track = race.track_lines();
    Ok(Json(RaceResponse { race, track }))
}

// ============================================================================
// Race commands
// ============================================================================

#[derive(Deserialize)]
struct HostRaceRequest {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    flags: RaceFlags,
}

#[derive(Serialize)]
struct HostRaceResponse {
    race_id: String,
    ws_url: String,
    race: RaceView,
}

async fn host_race_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<HostRaceRequest>,
) -> Result<(StatusCode, Json<HostRaceResponse>), AppError> {
    check_rate(&state, auth.user_id)?;

    let channel_id = req.channel_id.unwrap_or_else(|| "lobby".to_string());
    let handle = state
        .lobby
        .host(auth.user_id, auth.display_name(), channel_id, req.flags)
        .await?;

    let ws_url = format!(
        "{}/ws?race_id={}",
        state
            .config
            .public_base_url
            .replace("https://", "wss://")
            .replace("http://", "ws://"),
        handle.id
    );

    Ok((
        StatusCode::CREATED,
        Json(HostRaceResponse {
            race_id: handle.id.clone(),
            ws_url,
            race: handle.view(),
        }),
    ))
}

#[derive(Serialize)]
struct JoinRaceResponse {
    race_id: String,
    racer_index: usize,
    racer_name: String,
}

async fn join_race_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(race_id): Path<String>,
) -> Result<Json<JoinRaceResponse>, AppError> {
    check_rate(&state, auth.user_id)?;

    let entry = state.lobby.join(auth.user_id, &race_id).await?;

    Ok(Json(JoinRaceResponse {
        race_id: entry.race_id,
        racer_index: entry.racer_index,
        racer_name: entry.racer_name,
    }))
}

#[derive(Deserialize)]
struct BetRequest {
    racer_index: usize,
    amount: u64,
}

#[derive(Serialize)]
struct BetResponse {
    race_id: String,
    racer_index: usize,
    racer_name: String,
    amount: u64,
    balance: u64,
}

async fn bet_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(race_id): Path<String>,
    Json(req): Json<BetRequest>,
) -> Result<Json<BetResponse>, AppError> {
    check_rate(&state, auth.user_id)?;

    let placed = state
        .lobby
        .bet(auth.user_id, &race_id, req.racer_index, req.amount)
        .await?;

    Ok(Json(BetResponse {
        race_id: placed.race_id,
        racer_index: placed.racer_index,
        racer_name: placed.racer_name,
        amount: placed.amount,
        balance: placed.balance,
    }))
}

// ============================================================================
// Account endpoints
// ============================================================================

#[derive(Serialize)]
struct RacerSummary {
    racer_id: Uuid,
    name: String,
    level: u64,
    /// Percent of the way to the next level
    level_progress: f64,
    races: u64,
    wins: u64,
    speed: f64,
    stamina: f64,
    recovery: f64,
    mood: Mood,
}

impl From<Racer> for RacerSummary {
    fn from(racer: Racer) -> Self {
        Self {
            racer_id: racer.id,
            level_progress: racer.level_progress(),
            name: racer.name,
            level: racer.level,
            races: racer.races,
            wins: racer.wins,
            speed: racer.stats.speed,
            stamina: racer.stats.stamina,
            recovery: racer.stats.recovery,
            mood: racer.mood,
        }
    }
}

#[derive(Serialize)]
struct ProfileResponse {
    user_id: Uuid,
    display_name: String,
    balance: u64,
    level: u64,
    xp: u64,
    races: u64,
    wins: u64,
    /// Whole percent
    win_rate: u64,
    racer_count: usize,
    active_racer: Option<RacerSummary>,
}

async fn profile_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<ProfileResponse>, AppError> {
    let account = account_of(&state, auth.user_id).await?;
    let racers = state.accounts.racers(auth.user_id).await?;
    let active_racer = state.accounts.active_racer(auth.user_id).await?;

    Ok(Json(ProfileResponse {
        user_id: account.id,
        display_name: auth.display_name(),
        balance: account.balance,
        level: account.level,
        xp: account.xp,
        races: account.races,
        wins: account.wins,
        win_rate: account.win_rate_percent(),
        racer_count: racers.len(),
        active_racer: active_racer.map(RacerSummary::from),
    }))
}

#[derive(Serialize)]
struct WalletResponse {
    balance: u64,
}

async fn wallet_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<WalletResponse>, AppError> {
    let account = account_of(&state, auth.user_id).await?;
    Ok(Json(WalletResponse {
        balance: account.balance,
    }))
}

#[derive(Serialize)]
struct RacersResponse {
    active_racer_id: Option<Uuid>,
    racers: Vec<RacerSummary>,
}

async fn racers_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<RacersResponse>, AppError> {
    account_of(&state, auth.user_id).await?;
    let racers = state.accounts.racers(auth.user_id).await?;
    let active_racer_id = state.accounts.active_racer(auth.user_id).await?.map(|r| r.id);

    Ok(Json(RacersResponse {
        active_racer_id,
        racers: racers.into_iter().map(RacerSummary::from).collect(),
    }))
}

#[derive(Deserialize)]
struct ActiveRacerRequest {
    racer_id: Uuid,
}

#[derive(Serialize)]
struct ActiveRacerResponse {
    racer: RacerSummary,
}

async fn active_racer_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<ActiveRacerRequest>,
) -> Result<Json<ActiveRacerResponse>, AppError> {
    check_rate(&state, auth.user_id)?;

    let racer = state
        .accounts
        .set_active_racer(auth.user_id, req.racer_id)
        .await?;

    Ok(Json(ActiveRacerResponse {
        racer: racer.into(),
    }))
}

async fn account_of(state: &AppState, user_id: Uuid) -> Result<Account, AppError> {
    state
        .accounts
        .account(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Account {} is not initialised", user_id)))
}

fn check_rate(state: &AppState, user_id: Uuid) -> Result<(), AppError> {
    state
        .command_limiter
        .check_key(&user_id)
        .map_err(|_| AppError::RateLimited)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LobbyError> for AppError {
    fn from(e: LobbyError) -> Self {
        let message = e.to_string();
        match e {
            LobbyError::RaceNotFound(_) | LobbyError::AccountNotFound(_) => {
                AppError::NotFound(message)
            }
            LobbyError::NoActiveRacer(_) | LobbyError::InsufficientFunds { .. } => {
                AppError::BadRequest(message)
            }
            LobbyError::Race(race) => match race {
                RaceError::InvalidRacer(_)
                | RaceError::InsufficientField
                | RaceError::InvalidAmount => AppError::BadRequest(message),
                RaceError::RaceClosed
                | RaceError::AlreadyJoined
                | RaceError::RaceFull(_)
                | RaceError::BetsClosed
                | RaceError::RaceConcluded => AppError::Conflict(message),
            },
            LobbyError::Store(e) => {
                error!(error = %e, "Account store failure");
                AppError::Internal("Account store unavailable".to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        let message = e.to_string();
        match e {
            StoreError::AccountNotFound(_) | StoreError::RacerNotFound(_) => {
                AppError::NotFound(message)
            }
            StoreError::InsufficientFunds { .. } => AppError::BadRequest(message),
            StoreError::Supabase(e) => {
                error!(error = %e, "Account store failure");
                AppError::Internal("Account store unavailable".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StoreBackend};
    use crate::http::middleware::{sign_jwt, JwtClaims};
    use crate::race::FinishPolicy;
    use crate::store::{AccountStore, MemoryStore};
    use crate::util::time::{unix_millis, RaceTimings};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn app() -> Router {
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".to_string(),
            log_json: false,
            jwt_secret: SECRET.to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            client_origin: "*".to_string(),
            store_backend: StoreBackend::Memory,
            supabase: None,
            race_timings: RaceTimings::default(),
            finish_policy: FinishPolicy::Podium,
        };
        let accounts: Arc<dyn AccountStore> = Arc::new(MemoryStore::with_auto_provision());
        build_router(AppState::with_store(config, accounts))
    }

    fn token(user_id: Uuid) -> String {
        let claims = JwtClaims {
            sub: user_id,
            exp: unix_millis() / 1000 + 3600,
            iat: 0,
            name: Some("tester".to_string()),
            email: None,
        };
        sign_jwt(&claims, SECRET)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, user_id: Uuid, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token(user_id)))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_authed(uri: &str, user_id: Uuid) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token(user_id)))
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_registry() {
        let app = app();
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_races"], 0);
    }

    #[tokio::test]
    async fn commands_need_a_token() {
        let app = app();
        let request = Request::post("/races")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_race_is_not_found() {
        let app = app();
        let (status, body) = send(&app, get("/races/zzzzzz")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("zzzzzz"));

        let (status, _) = send(&app, post("/races/zzzzzz/join", Uuid::new_v4(), Value::Null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn host_join_and_bet_flow() {
        let app = app();
        let host = Uuid::new_v4();

        let (status, body) = send(
            &app,
            post("/races", host, serde_json::json!({ "channel_id": "general" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let race_id = body["race_id"].as_str().unwrap().to_string();
        assert_eq!(body["race"]["stage"], "open");
        assert_eq!(body["race"]["host"]["display_name"], "tester");
        assert!(body["ws_url"].as_str().unwrap().starts_with("ws://"));

        let (status, body) = send(&app, get("/races")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["races"][0]["race_id"], race_id.as_str());
        assert_eq!(body["races"][0]["entrants"], 1);

        let player = Uuid::new_v4();
        let join = format!("/races/{}/join", race_id);
        let (status, body) = send(&app, post(&join, player, Value::Null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["racer_index"], 1);

        let (status, _) = send(&app, post(&join, player, Value::Null)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Entries are still open, so bets are refused
        let bets = format!("/races/{}/bets", race_id);
        let (status, body) = send(
            &app,
            post(&bets, player, serde_json::json!({ "racer_index": 0, "amount": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Bets are closed");

        let (status, body) = send(&app, get(&format!("/races/{}", race_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entrants"].as_array().unwrap().len(), 2);
        assert_eq!(body["track"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn profile_wallet_and_racers() {
        let app = app();
        let user = Uuid::new_v4();

        let (status, body) = send(&app, get_authed("/me/wallet", user)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], 10);

        let (status, body) = send(&app, get_authed("/me", user)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["display_name"], "tester");
        assert_eq!(body["races"], 0);
        assert_eq!(body["win_rate"], 0);
        assert_eq!(body["racer_count"], 1);
        let active = body["active_racer"]["racer_id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, get_authed("/me/racers", user)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["racers"].as_array().unwrap().len(), 1);
        assert_eq!(body["active_racer_id"], active.as_str());
        assert_eq!(body["racers"][0]["level"], 1);

        let (status, _) = send(
            &app,
            post("/me/active-racer", user, serde_json::json!({ "racer_id": Uuid::new_v4() })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            post("/me/active-racer", user, serde_json::json!({ "racer_id": active })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["racer"]["racer_id"], active.as_str());
    }

    #[tokio::test]
    async fn command_bursts_are_limited() {
        let app = app();
        let user = Uuid::new_v4();
        let mut statuses = Vec::new();
        for _ in 0..8 {
            let (status, _) = send(&app, post("/races/zzzzzz/join", user, Value::Null)).await;
            statuses.push(status);
        }
        assert!(statuses.contains(&StatusCode::TOO_MANY_REQUESTS));
    }
}
