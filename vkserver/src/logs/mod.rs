//! Logging rechargeable à chaud
//!
//! Un filtre de niveau global est placé sous un `reload::Layer` : la route
//! `/api/log_setup` le modifie sans redémarrer le serveur.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::Level;
use tracing_subscriber::{
    Registry, filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt,
};
use vkconfig::get_config;

const LEVELS: [Level; 5] = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];

/// Niveau courant et handle de rechargement du filtre
#[derive(Clone)]
pub struct LogState {
    level: Arc<RwLock<Level>>,
    handle: Arc<reload::Handle<LevelFilter, Registry>>,
}

impl LogState {
    pub fn new(level: Level, handle: reload::Handle<LevelFilter, Registry>) -> Self {
        Self {
            level: Arc::new(RwLock::new(level)),
            handle: Arc::new(handle),
        }
    }

    pub fn set_max_level(&self, level: Level) {
        *self.level.write().unwrap_or_else(|p| p.into_inner()) = level;
        if let Err(e) = self.handle.reload(LevelFilter::from_level(level)) {
            eprintln!("Failed to reload log level filter: {}", e);
        }
    }

    pub fn get_max_level(&self) -> Level {
        *self.level.read().unwrap_or_else(|p| p.into_inner())
    }
}

fn parse_level(s: &str) -> Option<Level> {
    Level::from_str(s.trim()).ok()
}

/// Installe le subscriber global
///
/// Niveau initial : `host.logger.min_level` ; sortie console si
/// `host.logger.enable_console`. Un subscriber déjà installé (tests) est
/// laissé en place.
///
/// ```rust,no_run
/// let log_state = vkserver::logs::init_logging();
/// log_state.set_max_level(tracing::Level::DEBUG);
/// ```
pub fn init_logging() -> LogState {
    let config = get_config();
    let level = config
        .get_log_min_level()
        .ok()
        .and_then(|l| parse_level(&l))
        .unwrap_or(Level::INFO);

    let (filter, handle) = reload::Layer::new(LevelFilter::from_level(level));
    let state = LogState::new(level, handle);

    // Le filtre rechargeable doit rester la première couche
    let registry = Registry::default().with(filter);
    let console = config.get_log_enable_console().unwrap_or(true);
    let installed = if console {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    } else {
        registry.try_init()
    };

    if let Err(e) = installed {
        eprintln!("Global tracing subscriber already installed: {}", e);
    }
    state
}

#[derive(Debug, Deserialize)]
pub struct LogSetupRequest {
    pub level: String,
}

#[derive(Debug, Serialize)]
pub struct LogSetupResponse {
    pub current_level: String,
    pub available_levels: Vec<String>,
}

impl From<Level> for LogSetupResponse {
    fn from(level: Level) -> Self {
        Self {
            current_level: level.as_str().to_string(),
            available_levels: LEVELS.iter().map(|l| l.as_str().to_string()).collect(),
        }
    }
}

async fn log_setup_get(State(state): State<LogState>) -> Json<LogSetupResponse> {
    Json(state.get_max_level().into())
}

async fn log_setup_post(
    State(state): State<LogState>,
    Json(payload): Json<LogSetupRequest>,
) -> impl IntoResponse {
    let Some(level) = parse_level(&payload.level) else {
        let body = serde_json::json!({
            "error": format!("Unknown log level '{}'", payload.level),
            "available_levels": LEVELS.iter().map(|l| l.as_str()).collect::<Vec<_>>(),
        });
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    };

    state.set_max_level(level);
    tracing::info!("Log level set to {}", level);
    Json(LogSetupResponse::from(level)).into_response()
}

/// Routes `GET`/`POST /log_setup`, à monter sous `/api`
pub fn create_logs_router(log_state: LogState) -> Router {
    Router::new()
        .route("/log_setup", get(log_setup_get).post(log_setup_post))
        .with_state(log_state)
}
