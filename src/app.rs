use crate::error::{AppError, AppResult};
use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::{Arc, Once, OnceLock};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub http: reqwest::Client,
    pub metrics: PrometheusHandle,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub metrics_path: String,
    /// Unset means echo mode: no backend is ever contacted.
    pub backend_url: Option<String>,
    pub backend_timeout_ms: u64,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let listen = env_nonempty("ECHOGATE_LISTEN").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let metrics_path =
            env_nonempty("ECHOGATE_METRICS_PATH").unwrap_or_else(|| "/metrics".to_string());
        let backend_url = env_nonempty("ECHOGATE_BACKEND_URL");
        let backend_timeout_ms = env_nonempty("ECHOGATE_BACKEND_TIMEOUT_MS")
            .and_then(|value| value.parse().ok())
            .unwrap_or(30_000);
        Self {
            listen,
            metrics_path,
            backend_url,
            backend_timeout_ms,
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

pub fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env())
}

pub fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    let http = reqwest::Client::builder()
        .user_agent("echogate/0.1")
        .build()
        .map_err(|err| {
            AppError::new(
                axum::http::StatusCode::BAD_REQUEST,
                "http_client_init_failed",
                err.to_string(),
            )
        })?;

    let metrics = init_metrics()?;

    Ok(AppState {
        runtime: Arc::new(runtime),
        http,
        metrics,
    })
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.runtime.metrics_path.clone();
    Router::new()
        .route(
            "/v1/chat/completions",
            post(crate::handlers::chat_completions),
        )
        .route("/healthz", get(crate::handlers::healthz))
        .route(&metrics_path, get(crate::handlers::metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::new(
                    axum::http::StatusCode::BAD_REQUEST,
                    "metrics_init_failed",
                    err.to_string(),
                ));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE.get().cloned().ok_or_else(|| {
        AppError::new(
            axum::http::StatusCode::BAD_REQUEST,
            "metrics_init_failed",
            "metrics recorder not available",
        )
    })
}
