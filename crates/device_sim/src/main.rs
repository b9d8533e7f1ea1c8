use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ControlRequest, ControlResponse, DeviceStatus},
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

mod config;
mod device;

use config::load_settings;
use device::{DeviceTiming, SimulatedDevice};

const MAX_CONTROL_BODY_BYTES: usize = 4 * 1024;

#[derive(Debug, Parser)]
#[command(name = "device_sim", about = "Simulated ignition controller")]
struct Args {
    /// Address to listen on, overriding the settings file.
    #[arg(long)]
    bind: Option<String>,
    /// Glow plug cycle length in seconds.
    #[arg(long)]
    glow_secs: Option<u64>,
}

struct AppState {
    device: Mutex<SimulatedDevice>,
}

impl AppState {
    fn new(timing: DeviceTiming) -> Self {
        Self {
            device: Mutex::new(SimulatedDevice::new(timing, Instant::now())),
        }
    }

    fn device(&self) -> MutexGuard<'_, SimulatedDevice> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    let mut settings = load_settings();
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    if let Some(secs) = args.glow_secs {
        settings.glow_plug_secs = secs;
    }

    let app = build_router(Arc::new(AppState::new(settings.timing())));

    let addr = settings.bind_addr()?;
    info!(%addr, timing = ?settings.timing(), "device simulator listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route(
            "/control",
            post(control).layer(RequestBodyLimitLayer::new(MAX_CONTROL_BODY_BYTES)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<Arc<AppState>>) -> Json<DeviceStatus> {
    Json(state.device().status(Instant::now()))
}

async fn control(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, (StatusCode, Json<ApiError>)> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "malformed control request");
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, rejection.body_text())),
        )
    })?;

    let response = state.device().apply(&request, Instant::now());
    if response.success {
        info!(action = request.action(), "control applied");
    } else {
        warn!(
            action = request.action(),
            message = response.message.as_deref().unwrap_or_default(),
            "control rejected"
        );
    }
    Ok(Json(response))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
