//! Process entry point: wires up the Sensor Supervisor and Remote tasks,
//! installs the log redirector, and serves the WebSocket endpoint plus the
//! embedded web assets. Shaped after `backend-rust/src/main.rs`'s
//! `tokio::main` startup sequence (subscriber init, task spawns, CORS-layered
//! `axum::Router`, `axum::serve`), adapted from the teacher's race-control
//! backend to quadro2's two-task core.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::prelude::*;

use quadro2::assets::AssetStream;
use quadro2::config::{FusionConfig, RemoteTaskConfig, SensorTaskConfig};
use quadro2::logging::RemoteLogLayer;
use quadro2::remote::{self, RemoteEvent};
use quadro2::sensors::{self, NullDriver, SensorDriver};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
struct AppState {
    remote: remote::RemoteHandle,
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_session(socket, state))
}

/// One WebSocket session's read/write pump. Mirrors `remote_wsConnect`'s
/// callback wiring (`recv`/`close` handlers feeding `remote_t`) with Tokio
/// channels instead of ESP8266/FreeRTOS callbacks: inbound frames become
/// `Received` events on the remote task's inbox, and the per-session
/// `outbound` channel carries the greeting plus every later line the remote
/// task unicasts or broadcasts to this session (up to 3 may be live at
/// once, spec.md §3).
async fn ws_session(socket: WebSocket, state: AppState) {
    let session_id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<String>(32);

    state
        .remote
        .try_send(RemoteEvent::Connected { session: session_id, outbound: out_tx });

    let remote_for_recv = state.remote.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                remote_for_recv.try_send(RemoteEvent::Received {
                    session: session_id,
                    frame: text.into_bytes(),
                });
            }
        }
        remote_for_recv.try_send(RemoteEvent::Disconnected { session: session_id });
    });

    let send_task = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if sink.send(Message::Text(line)).await.is_err() {
                break;
            }
        }
    });

    let _ = tokio::join!(recv_task, send_task);
}

/// Serves one fixed embedded asset, fully drained into a single response
/// (see `assets::AssetStream`'s doc comment on the streaming-vs-one-shot
/// adaptation).
async fn serve_asset(path: &'static str) -> impl IntoResponse {
    let config = RemoteTaskConfig::default();
    match AssetStream::open(path, config.asset_chunk_size) {
        Ok(stream) => {
            let content_type = stream.content_type();
            let gzip = stream.is_gzip();
            let body = stream.drain();
            let mut response = axum::http::Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", content_type);
            if gzip {
                response = response.header("Content-Encoding", "gzip");
            }
            response.body(axum::body::Body::from(body)).unwrap().into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn serve_script_js() -> impl IntoResponse {
    serve_asset("/script.js").await
}
async fn serve_favicon() -> impl IntoResponse {
    serve_asset("/favicon.ico").await
}
async fn serve_manifest() -> impl IntoResponse {
    serve_asset("/manifest.json").await
}
async fn serve_index() -> impl IntoResponse {
    serve_asset("/index.html").await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let remote_cfg = RemoteTaskConfig::default();
    let (remote_handle, mut control_rx, mut emergency_rx, _remote_join) = remote::spawn(remote_cfg);

    // The redirector layers onto the same registry `fmt`'s layer attaches
    // to, so local stdout logging and the remote mirror both see every
    // event — redirection never silences local logging (§4.6), matching
    // `remote_printLog`'s unconditional call-through to the captured sink.
    let fmt_layer = tracing_subscriber::fmt::layer();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quadro2=info".into());
    let log_layer = RemoteLogLayer::new(remote_handle.clone(), tracing::Level::INFO, remote_cfg.message_cap);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(log_layer)
        .with(env_filter)
        .init();

    info!("quadro2 firmware v{} starting", env!("CARGO_PKG_VERSION"));

    let drivers: Vec<Box<dyn SensorDriver>> = vec![
        Box::new(NullDriver::new("imu")),
        Box::new(NullDriver::new("ultrasonic")),
        Box::new(NullDriver::new("barometer")),
        Box::new(NullDriver::new("gnss")),
    ];
    let (_sensor_handle, _sensor_join, driver_errors) =
        sensors::spawn(drivers, SensorTaskConfig::default(), FusionConfig::default());
    for err in driver_errors {
        tracing::warn!(%err, "sensor driver failed to initialize at startup");
    }

    tokio::spawn(async move {
        while let Some(cmd) = control_rx.recv().await {
            tracing::debug!(?cmd, "control command received (flight control core out of scope)");
        }
    });

    // §7 "Link timeout ... raise fatal emergency-stop signal to the flight
    // controller". The flight-control subsystem itself is out of scope
    // (spec.md §1); this task's only job is to make the escalation visible.
    tokio::spawn(async move {
        while emergency_rx.recv().await.is_some() {
            tracing::error!("operator link lost, emergency stop raised (flight control core out of scope)");
        }
    });

    let cors_origins_env = std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
    let cors = if cors_origins_env.trim() == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins_env
            .split(',')
            .filter_map(|o| o.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let state = AppState { remote: remote_handle };
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .route("/", get(serve_index))
        .route("/index.html", get(serve_index))
        .route("/manifest.json", get(serve_manifest))
        .route("/favicon.ico", get(serve_favicon))
        .route("/script.js", get(serve_script_js))
        .layer(cors)
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{port}");
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
