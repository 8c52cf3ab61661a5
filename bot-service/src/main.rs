// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{net::SocketAddr, str::FromStr, sync::Arc};

use anyhow::Context;
use arena_common::{ArenaConfig, BotRegistry, BotSnapshot, DEFAULT_BOT_COUNT, expand_env_vars};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use lambda_http::run as lambda_run;
use serde::{Deserialize, Deserializer, Serialize, de};
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    registry: Arc<Mutex<BotRegistry>>,
}

impl AppState {
    /// Build the shared registry and fill it with the configured starting bots.
    fn new(arena: ArenaConfig) -> anyhow::Result<Self> {
        let initial_bot_count = arena.initial_bot_count;
        let mut registry = BotRegistry::new(arena).context("invalid arena configuration")?;
        registry
            .populate(initial_bot_count, Utc::now())
            .context("failed to populate initial bots")?;
        Ok(Self {
            registry: Arc::new(Mutex::new(registry)),
        })
    }
}

#[derive(Debug, Clone)]
struct ServiceConfig {
    bind_addr: SocketAddr,
    arena: ArenaConfig,
}

impl ServiceConfig {
    fn from_env() -> anyhow::Result<Self> {
        let mut arena = load_arena_config().unwrap_or_default();
        if let Some(count) = env_override::<usize>("INITIAL_BOT_COUNT") {
            arena.initial_bot_count = count;
        }
        if let Some(seed) = env_override::<u64>("ARENA_SEED") {
            arena.seed = Some(seed);
        }
        arena.validate().context("invalid arena configuration")?;

        Ok(Self {
            bind_addr: parse_bind_addr("BOT_SERVICE_BIND", "0.0.0.0:5000")?,
            arena,
        })
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    bot_count: usize,
}

#[derive(Debug, Deserialize)]
struct ResetQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    count: Option<usize>,
}

/// `?count=` with no value means the default count.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(de::Error::custom),
    }
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "bot_service=debug,arena_common=info,tower_http=info".to_string()
            }),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        width = config.arena.width,
        height = config.arena.height,
        initial_bot_count = config.arena.initial_bot_count,
        seeded = config.arena.seed.is_some(),
        "arena configured"
    );

    let state = AppState::new(config.arena)?;
    info!(
        bot_count = state.registry.lock().await.len(),
        "populated initial bots"
    );

    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running bot-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = config.bind_addr;
    info!(%bind_addr, "bot-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("bot-service shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for ctrl-c");
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/bots", get(list_bots_handler))
        .route("/bots/reset", post(reset_bots_handler))
        .route("/bots/eaten/{bot_id}", post(bot_eaten_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

fn env_override<T: FromStr>(var_name: &str) -> Option<T> {
    let value = std::env::var(var_name).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(var = var_name, value = %value, "ignoring unparsable environment override");
            None
        }
    }
}

fn load_arena_config() -> Option<ArenaConfig> {
    let path = std::env::var("ARENA_CONFIG_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read arena config file");
            return None;
        }
    };

    if raw.trim().is_empty() {
        warn!(path = %path, "arena config file is empty");
        return None;
    }

    match parse_arena_config(&raw) {
        Ok(config) => {
            info!(path = %path, "loaded arena config from YAML");
            Some(config)
        }
        Err(error) => {
            warn!(path = %path, error = %error, "failed to parse arena config yaml");
            None
        }
    }
}

fn parse_arena_config(raw: &str) -> anyhow::Result<ArenaConfig> {
    let expanded = expand_env_vars(raw).context("failed to expand environment variables")?;
    serde_yaml::from_str::<ArenaConfig>(&expanded).context("invalid arena config yaml")
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.registry.lock().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        bot_count: registry.len(),
    })
}

async fn list_bots_handler(State(state): State<AppState>) -> Json<Vec<BotSnapshot>> {
    let mut registry = state.registry.lock().await;
    Json(registry.list_and_advance(Utc::now()))
}

async fn reset_bots_handler(
    State(state): State<AppState>,
    query: Result<Query<ResetQuery>, QueryRejection>,
) -> Result<Json<Vec<BotSnapshot>>, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        ApiError::bad_request(format!(
            "count must be a non-negative integer: {}",
            rejection.body_text()
        ))
    })?;
    let count = query.count.unwrap_or(DEFAULT_BOT_COUNT);

    let mut registry = state.registry.lock().await;
    let bots = registry
        .reset(count, Utc::now())
        .map_err(|error| ApiError::bad_request(error.to_string()))?;
    info!(requested = count, bot_count = bots.len(), "reset and created bots");
    Ok(Json(bots))
}

async fn bot_eaten_handler(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> (StatusCode, Json<MessageResponse>) {
    let elimination = {
        let mut registry = state.registry.lock().await;
        registry.eliminate(&bot_id, Utc::now())
    };

    match elimination {
        Some(elimination) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: format!(
                    "Bot {} acknowledged as eaten, new bot {} spawned.",
                    elimination.removed_id, elimination.spawned_id
                ),
            }),
        ),
        None => {
            info!(bot_id = %bot_id, "eaten report for unknown bot");
            (
                StatusCode::NOT_FOUND,
                Json(MessageResponse {
                    message: format!("Bot {bot_id} not found."),
                }),
            )
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, State},
        http::Uri,
    };
    use arena_common::MAX_BOT_COUNT;
    use std::collections::HashSet;

    fn app_state(initial_bot_count: usize) -> AppState {
        AppState::new(ArenaConfig {
            initial_bot_count,
            seed: Some(11),
            ..ArenaConfig::default()
        })
        .unwrap()
    }

    fn reset_query(uri: &str) -> Result<Query<ResetQuery>, QueryRejection> {
        Query::try_from_uri(&uri.parse::<Uri>().unwrap())
    }

    fn ids(bots: &[BotSnapshot]) -> HashSet<String> {
        bots.iter().map(|bot| bot.id.clone()).collect()
    }

    #[tokio::test]
    async fn startup_populates_initial_bots() {
        let state = app_state(DEFAULT_BOT_COUNT);
        let response = health(State(state)).await.0;
        assert_eq!(response.status, "healthy");
        assert_eq!(response.bot_count, 10);
    }

    #[tokio::test]
    async fn list_bots_returns_every_live_bot() {
        let state = app_state(4);
        let bots = list_bots_handler(State(state)).await.0;
        assert_eq!(bots.len(), 4);
        assert!(bots.iter().all(|bot| bot.is_python_bot));
        assert!(bots.iter().all(|bot| bot.cells.len() == 1));
    }

    #[tokio::test]
    async fn reset_defaults_to_ten_bots() {
        let state = app_state(2);
        let bots = reset_bots_handler(State(state.clone()), reset_query("/bots/reset"))
            .await
            .unwrap()
            .0;
        assert_eq!(bots.len(), DEFAULT_BOT_COUNT);
        assert_eq!(health(State(state)).await.0.bot_count, DEFAULT_BOT_COUNT);
    }

    #[tokio::test]
    async fn reset_uses_requested_count() {
        let state = app_state(10);
        let bots = reset_bots_handler(State(state.clone()), reset_query("/bots/reset?count=3"))
            .await
            .unwrap()
            .0;
        assert_eq!(bots.len(), 3);

        let listed = list_bots_handler(State(state.clone())).await.0;
        assert_eq!(ids(&listed), ids(&bots));

        let empty = reset_bots_handler(State(state), reset_query("/bots/reset?count=0"))
            .await
            .unwrap()
            .0;
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn reset_treats_empty_count_as_default() {
        let state = app_state(2);
        let bots = reset_bots_handler(State(state), reset_query("/bots/reset?count="))
            .await
            .unwrap()
            .0;
        assert_eq!(bots.len(), DEFAULT_BOT_COUNT);
    }

    #[tokio::test]
    async fn reset_rejects_count_above_limit_and_keeps_bots() {
        let state = app_state(4);
        let before = ids(&list_bots_handler(State(state.clone())).await.0);

        let too_many = format!("/bots/reset?count={}", MAX_BOT_COUNT + 1);
        let huge = format!("/bots/reset?count={}", usize::MAX);
        for uri in [too_many, huge] {
            let err = reset_bots_handler(State(state.clone()), reset_query(&uri))
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }

        let after = ids(&list_bots_handler(State(state)).await.0);
        assert_eq!(before, after);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_observe_partial_updates() {
        let population = 8;
        let state = app_state(population);
        let mut tasks = Vec::new();

        for round in 0..60 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                match round % 3 {
                    0 => {
                        let bots = list_bots_handler(State(state)).await.0;
                        assert_eq!(bots.len(), population);
                        assert!(bots.iter().all(|bot| !bot.cells.is_empty()));
                    }
                    1 => {
                        let bots = list_bots_handler(State(state.clone())).await.0;
                        if let Some(victim) = bots.first() {
                            let (status, _) =
                                bot_eaten_handler(State(state), Path(victim.id.clone())).await;
                            // another task may have eaten or reset it first
                            assert!(status == StatusCode::OK || status == StatusCode::NOT_FOUND);
                        }
                    }
                    _ => {
                        let uri = format!("/bots/reset?count={population}");
                        let bots = reset_bots_handler(State(state), reset_query(&uri))
                            .await
                            .unwrap()
                            .0;
                        assert_eq!(bots.len(), population);
                    }
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(health(State(state.clone())).await.0.bot_count, population);
        let bots = list_bots_handler(State(state)).await.0;
        assert_eq!(bots.len(), population);
        assert!(bots.iter().all(|bot| bot.cells.len() == 1));
    }

    #[tokio::test]
    async fn reset_rejects_malformed_count() {
        let state = app_state(5);
        for uri in ["/bots/reset?count=abc", "/bots/reset?count=-1", "/bots/reset?count=2.5"] {
            let err = reset_bots_handler(State(state.clone()), reset_query(uri))
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
        assert_eq!(health(State(state)).await.0.bot_count, 5);
    }

    #[tokio::test]
    async fn eaten_bot_is_replaced() {
        let state = app_state(6);
        let victim = list_bots_handler(State(state.clone())).await.0[0].id.clone();

        let (status, Json(body)) =
            bot_eaten_handler(State(state.clone()), Path(victim.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.message.starts_with(&format!("Bot {victim} acknowledged as eaten")));

        let listed = list_bots_handler(State(state)).await.0;
        assert_eq!(listed.len(), 6);
        assert!(!ids(&listed).contains(&victim));
    }

    #[tokio::test]
    async fn eaten_unknown_bot_is_not_found() {
        let state = app_state(3);
        let before = ids(&list_bots_handler(State(state.clone())).await.0);

        let (status, Json(body)) =
            bot_eaten_handler(State(state.clone()), Path("nonexistent".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.message, "Bot nonexistent not found.");

        let after = ids(&list_bots_handler(State(state)).await.0);
        assert_eq!(before, after);
    }

    #[test]
    fn arena_config_yaml_overrides_selected_fields() {
        let config = parse_arena_config("width: 4000\ninitial_bot_count: 2\nseed: 5\n").unwrap();
        assert_eq!(config.width, 4000.0);
        assert_eq!(config.initial_bot_count, 2);
        assert_eq!(config.seed, Some(5));
        assert_eq!(config.height, ArenaConfig::default().height);
    }

    #[test]
    fn arena_config_yaml_rejects_wrong_types() {
        assert!(parse_arena_config("width: wide\n").is_err());
    }

    #[test]
    fn app_state_rejects_invalid_arena() {
        let result = AppState::new(ArenaConfig {
            retarget_chance: 2.0,
            ..ArenaConfig::default()
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn router_serves_bot_endpoints_over_http() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(app_state(4));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let base = format!("http://{addr}");

        let health: serde_json::Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["bot_count"], 4);

        let reset = client
            .post(format!("{base}/bots/reset?count=2"))
            .send()
            .await
            .unwrap();
        assert_eq!(reset.status(), reqwest::StatusCode::OK);
        let reset: Vec<serde_json::Value> = reset.json().await.unwrap();
        assert_eq!(reset.len(), 2);
        assert_eq!(reset[0]["isPythonBot"], true);
        assert!(reset[0]["totalMass"].is_number());
        assert!(reset[0]["target"]["x"].is_number());
        assert!(reset[0]["cells"][0]["radius"].is_number());

        let bots: Vec<serde_json::Value> = client
            .get(format!("{base}/bots"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(bots.len(), 2);

        let victim = bots[0]["id"].as_str().unwrap().to_string();
        let eaten = client
            .post(format!("{base}/bots/eaten/{victim}"))
            .send()
            .await
            .unwrap();
        assert_eq!(eaten.status(), reqwest::StatusCode::OK);

        let missing = client
            .post(format!("{base}/bots/eaten/nonexistent"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = missing.json().await.unwrap();
        assert_eq!(body["message"], "Bot nonexistent not found.");

        let bad = client
            .post(format!("{base}/bots/reset?count=many"))
            .send()
            .await
            .unwrap();
        assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
