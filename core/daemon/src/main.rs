//! CognitiveSense daemon entrypoint.
//!
//! A small single-writer service that owns the session aggregation engine.
//! Clients send newline-delimited JSON requests over a Unix socket; every
//! mutation is serialized through one lock, and closed sessions are archived
//! to SQLite.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cognitivesense_daemon_protocol::{
    parse_event, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde::Serialize;
use serde_json::Value;
use session_core::{config, SenseConfig, SystemClock};

mod backoff;
mod db;
mod state;

use db::Db;
use state::SharedState;

const SOCKET_NAME: &str = "daemon.sock";
const SOCKET_PATH_ENV: &str = "COGNITIVESENSE_SOCKET";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const TICK_INTERVAL_SECS: u64 = 60;
const MAX_HISTORY_LIMIT: u64 = 1000;

fn main() {
    init_logging();

    if let Ok(path) = daemon_backoff_path() {
        backoff::apply_startup_backoff(&path);
    } else {
        warn!("Failed to resolve daemon backoff path");
    }

    let config = match config::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            SenseConfig::default()
        }
    };

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    info!(
        auto_reset_hours = config.session.auto_reset_hours,
        history_capacity = config.session.history_capacity,
        auto_pause_on_stress = config.behavior.auto_pause_on_stress,
        "Daemon config loaded"
    );
    let shared_state = Arc::new(SharedState::new(db, config, Arc::new(SystemClock)));

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "CognitiveSense daemon started");
    spawn_ticker(Arc::clone(&shared_state));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn spawn_ticker(state: Arc<SharedState>) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_secs(TICK_INTERVAL_SECS));
        if let Err(err) = state.tick() {
            warn!(error = %err, "Periodic session tick failed");
        }
    });
}

fn init_logging() {
    let debug_enabled = env::var("COGNITIVESENSE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn data_dir() -> Result<PathBuf, String> {
    config::data_dir().map_err(|err| err.to_string())
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(data_dir()?.join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    Ok(data_dir()?.join("daemon").join("sessions.db"))
}

fn daemon_backoff_path() -> Result<PathBuf, String> {
    Ok(data_dir()?.join("daemon").join("daemon-backoff.json"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id.clone();
    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "tick_interval_secs": TICK_INTERVAL_SECS,
            });
            if let Ok(snapshot) = state.health_snapshot() {
                if let Ok(value) = serde_json::to_value(snapshot) {
                    data["engine"] = value;
                }
            }
            if let Ok(path) = daemon_backoff_path() {
                if let Some(snapshot) = backoff::snapshot(&path) {
                    if let Ok(value) = serde_json::to_value(snapshot) {
                        data["backoff"] = value;
                    }
                }
            }
            Response::ok(id, data)
        }
        Method::GetSession => respond(id, "session", state.session_snapshot()),
        Method::GetHistory => {
            let limit = match parse_history_params(request.params) {
                Ok(limit) => limit,
                Err(err) => return Response::error_with_info(id, err),
            };
            respond(id, "history", state.history(limit))
        }
        Method::GetLiveMetrics => respond(id, "live_metrics", state.live_metrics()),
        Method::GetReport => {
            let session_id = match parse_report_params(request.params) {
                Ok(session_id) => session_id,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.report(session_id.as_deref()) {
                Ok(Some(report)) => respond(id, "report", Ok(report)),
                Ok(None) => Response::error(
                    id,
                    "session_not_found",
                    match session_id {
                        Some(session_id) => format!("no session with id {}", session_id),
                        None => "no active session".to_string(),
                    },
                ),
                Err(err) => Response::error(id, "report_error", err),
            }
        }
        Method::StartSession => respond(id, "session", state.start_session()),
        Method::EndSession => respond(
            id,
            "session",
            state
                .end_session()
                .map(|archived| serde_json::json!({ "ended": archived.is_some(), "session": archived })),
        ),
        Method::ResetSession => respond(id, "session", state.reset_session()),
        Method::Event => handle_event(request.params, id, state),
    }
}

fn respond<T: Serialize>(id: Option<String>, what: &str, result: Result<T, String>) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize {}: {}", what, err),
            ),
        },
        Err(err) => Response::error(id, "state_error", err),
    }
}

fn handle_event(params: Option<Value>, id: Option<String>, state: &SharedState) -> Response {
    let params = match params {
        Some(params) => params,
        None => return Response::error(id, "invalid_params", "event payload is required"),
    };

    let event = match parse_event(params) {
        Ok(event) => event,
        Err(err) => return Response::error_with_info(id, err),
    };

    tracing::debug!(
        event_id = %event.event_id,
        event_type = ?event.event_type,
        state = ?event.state,
        value = ?event.value,
        decision = ?event.decision,
        "Received event"
    );

    match state.apply_event(&event) {
        Ok(applied) => Response::ok(
            id,
            serde_json::json!({ "accepted": true, "applied": applied }),
        ),
        Err(err) => Response::error(id, "state_error", err),
    }
}

fn parse_history_params(params: Option<Value>) -> Result<Option<usize>, ErrorInfo> {
    let Some(params) = params else {
        return Ok(None);
    };
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    Ok(params
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|limit| limit.min(MAX_HISTORY_LIMIT) as usize))
}

fn parse_report_params(params: Option<Value>) -> Result<Option<String>, ErrorInfo> {
    let Some(params) = params else {
        return Ok(None);
    };
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    Ok(params
        .get("session_id")
        .and_then(|v| v.as_str())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string))
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
