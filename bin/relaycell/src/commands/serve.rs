use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use relaycell_bridge::{
    BackoffPolicy, CommandBridge, PresenceManager, Readiness, ReadinessGate, RejectReason,
    SubmitOutcome, Supervisor,
};
use relaycell_channels::DiscordConnector;
use relaycell_core::config::TOKEN_ENV;
use relaycell_core::{Config, OutboundCommand, Paths};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Shared state passed to HTTP handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ServeState {
    bridge: CommandBridge,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    message: String,
    channel_id: i64,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_message(
    State(state): State<ServeState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            debug!(error = %rejection, "Malformed message request");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let command = OutboundCommand::new(req.channel_id, req.message);
    match state.bridge.submit(command).await {
        SubmitOutcome::Sent => StatusCode::NO_CONTENT.into_response(),
        SubmitOutcome::Rejected(reason @ RejectReason::InvalidInput(_)) => {
            error_response(StatusCode::BAD_REQUEST, reason.to_string())
        }
        SubmitOutcome::Rejected(reason @ RejectReason::SendFailed(_)) => {
            error_response(StatusCode::BAD_GATEWAY, reason.to_string())
        }
        SubmitOutcome::Unavailable(session_state) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("gateway session is {}", session_state),
        ),
    }
}

async fn handle_health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn handle_ready(State(state): State<ServeState>) -> Response {
    let gate = state.bridge.gate();
    if let Readiness::Ready(_) = gate.check() {
        return StatusCode::NO_CONTENT.into_response();
    }
    let (session_state, since) = gate.status();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "state": session_state.as_str(),
            "since": since.to_rfc3339(),
        })),
    )
        .into_response()
}

fn build_router(bridge: CommandBridge) -> Router {
    Router::new()
        .route("/message", post(handle_message))
        .route("/health", get(handle_health))
        .route("/ready", get(handle_ready))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ServeState { bridge })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run(paths: &Paths, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(paths)?;
    config.apply_env();
    config.validate()?;

    if !config.has_token() {
        warn!("{} is not set; the gateway session will close immediately", TOKEN_ENV);
    }

    let host = host.unwrap_or_else(|| config.http.host.clone());
    let port = port.unwrap_or(config.http.port);

    let gate = ReadinessGate::new();
    let bridge = CommandBridge::new(gate.clone(), &config.bridge);
    let connector = Arc::new(DiscordConnector::new(config.discord.clone())?);
    let supervisor = Supervisor::new(
        connector,
        gate,
        PresenceManager::new(&config.presence),
        BackoffPolicy::from(&config.supervisor),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let supervisor_handle = tokio::spawn(supervisor.run_loop(shutdown_tx.subscribe()));

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");

    let app = build_router(bridge);
    let http_shutdown_rx = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut rx = http_shutdown_rx;
                let _ = rx.recv().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "HTTP server failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining tasks...");
    let _ = shutdown_tx.send(());

    let handles: Vec<(&str, tokio::task::JoinHandle<()>)> = vec![
        ("http_server", http_handle),
        ("supervisor", supervisor_handle),
    ];
    drain(handles).await;

    info!("relaycell stopped");
    Ok(())
}

/// Wait for tasks to finish, aborting whatever outlives the graceful window.
async fn drain(handles: Vec<(&str, tokio::task::JoinHandle<()>)>) {
    let total = handles.len();
    let deadline = tokio::time::Instant::now() + GRACEFUL_TIMEOUT;

    while !handles.iter().all(|(_, h)| h.is_finished()) {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let mut aborted = 0;
    for (name, handle) in &handles {
        if !handle.is_finished() {
            warn!(task = *name, "Task did not exit in graceful window, aborting");
            handle.abort();
            aborted += 1;
        }
    }

    let mut failed = 0;
    for (name, handle) in handles {
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                debug!(task = name, "Task cancelled during shutdown");
            }
            Err(e) => {
                error!(task = name, error = %e, "Task panicked during shutdown");
                failed += 1;
            }
        }
    }

    if failed == 0 {
        info!(total, aborted, "Shutdown complete");
    } else {
        warn!(failed, total, aborted, "Shutdown completed with task failures");
    }
}
