use cognitivesense_daemon_protocol::{
    EngineState, EventEnvelope, EventType, Method, Request, Response, SystemState,
    PROTOCOL_VERSION,
};
use serde_json::Value;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> DaemonGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_cognitivesense-daemon"))
        .env("HOME", home)
        .env_remove("COGNITIVESENSE_SOCKET")
        .env_remove("COGNITIVESENSE_CONFIG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn cognitivesense-daemon");
    DaemonGuard { child }
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".cognitivesense").join("daemon.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, method: Method, params: Option<Value>) -> Response {
    let request = Request::new(method, Some("smoke".to_string()), params);
    send_raw(socket, &serde_json::to_vec(&request).expect("serialize request"))
}

fn send_raw(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    stream.write_all(payload).expect("Failed to write request");
    stream.write_all(b"\n").expect("Failed to write newline");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn send_event(socket: &Path, event: EventEnvelope) -> Response {
    send_request(
        socket,
        Method::Event,
        Some(serde_json::to_value(event).expect("serialize event")),
    )
}

fn data(response: Response) -> Value {
    assert!(response.ok, "response was not ok: {:?}", response.error);
    response.data.expect("response data")
}

#[test]
fn daemon_ipc_session_flow_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let _guard = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));

    let health = data(send_request(&socket, Method::GetHealth, None));
    assert_eq!(health["status"], "ok");
    assert_eq!(health["protocol_version"], PROTOCOL_VERSION);
    assert!(health["engine"]["active_session_id"].is_string());

    let mut engine = EventEnvelope::new("evt-engine", EventType::EngineState);
    engine.engine_state = Some(EngineState::Running);
    assert!(send_event(&socket, engine).ok);

    for i in 0..3 {
        let mut state = EventEnvelope::new(format!("evt-state-{}", i), EventType::StateChange);
        state.state = Some(SystemState::Alert);
        let applied = data(send_event(&socket, state));
        assert_eq!(applied["applied"], i == 0);
    }

    for (i, value) in [90.0, 40.0, 70.0].into_iter().enumerate() {
        let mut confidence = EventEnvelope::new(format!("evt-conf-{}", i), EventType::Confidence);
        confidence.value = Some(value);
        assert!(send_event(&socket, confidence).ok);
    }

    let mut inference = EventEnvelope::new("evt-inference", EventType::Inference);
    inference.decision = Some("Focus".to_string());
    assert!(send_event(&socket, inference).ok);

    let snapshot = data(send_request(&socket, Method::GetSession, None));
    assert_eq!(snapshot["active"], true);
    let session = &snapshot["session"];
    assert_eq!(session["currentState"], "alert");
    assert_eq!(session["minConfidence"], 40.0);
    assert_eq!(session["maxConfidence"], 90.0);
    assert_eq!(session["totalInferences"], 1);
    assert_eq!(session["inferenceCounts"]["Focus"], 1);
    assert_eq!(
        session["stateHistory"].as_array().map(Vec::len),
        Some(3),
        "offline, normal, alert"
    );

    let live = data(send_request(&socket, Method::GetLiveMetrics, None));
    assert_eq!(live["engineState"], "RUNNING");
    assert_eq!(live["confidence"], 70.0);
    assert_eq!(live["latestInference"]["decision"], "Focus");

    let report = data(send_request(&socket, Method::GetReport, None));
    assert_eq!(report["totalInferences"], 1);
    assert!(report["summary"]
        .as_str()
        .is_some_and(|summary| summary.starts_with("This session lasted")));

    let ended = data(send_request(&socket, Method::EndSession, None));
    assert_eq!(ended["ended"], true);
    let ended_id = ended["session"]["id"].as_str().expect("ended id").to_string();

    let history = data(send_request(
        &socket,
        Method::GetHistory,
        Some(serde_json::json!({ "limit": 10 })),
    ));
    let history = history.as_array().expect("history array");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["id"], ended_id.as_str());
    assert_eq!(history[0]["isActive"], false);

    let after_end = data(send_request(&socket, Method::GetSession, None));
    assert_eq!(after_end["active"], false);
    let missing = send_request(&socket, Method::GetReport, None);
    assert!(!missing.ok);
    assert_eq!(
        missing.error.map(|err| err.code),
        Some("session_not_found".to_string())
    );

    let archived_report = data(send_request(
        &socket,
        Method::GetReport,
        Some(serde_json::json!({ "session_id": ended_id })),
    ));
    assert_eq!(archived_report["sessionId"], ended_id.as_str());
}

#[test]
fn daemon_rejects_bad_requests() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let _guard = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));

    let bad_json = send_raw(&socket, b"{not json");
    assert_eq!(
        bad_json.error.map(|err| err.code),
        Some("invalid_json".to_string())
    );

    let wrong_version = send_raw(
        &socket,
        br#"{"protocol_version":99,"method":"get_health","id":"v"}"#,
    );
    assert_eq!(
        wrong_version.error.map(|err| err.code),
        Some("protocol_mismatch".to_string())
    );

    let mut missing_state = EventEnvelope::new("evt-missing", EventType::StateChange);
    missing_state.state = None;
    let rejected = send_event(&socket, missing_state);
    assert_eq!(
        rejected.error.map(|err| err.code),
        Some("missing_field".to_string())
    );
}

#[test]
fn archived_sessions_survive_daemon_restart() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());

    let ended_id = {
        let _guard = spawn_daemon(home.path());
        wait_for_socket(&socket, Duration::from_secs(5));
        let started = data(send_request(&socket, Method::StartSession, None));
        let started_id = started["id"].as_str().expect("started id").to_string();
        let ended = data(send_request(&socket, Method::EndSession, None));
        assert_eq!(ended["session"]["id"], started_id.as_str());
        started_id
    };

    let _ = std::fs::remove_file(&socket);
    let _guard = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));

    let history = data(send_request(&socket, Method::GetHistory, None));
    let ids: Vec<&str> = history
        .as_array()
        .expect("history array")
        .iter()
        .filter_map(|session| session["id"].as_str())
        .collect();
    assert!(ids.contains(&ended_id.as_str()));

    let health = data(send_request(&socket, Method::GetHealth, None));
    assert_eq!(health["engine"]["persisted_sessions"], 1);
}
