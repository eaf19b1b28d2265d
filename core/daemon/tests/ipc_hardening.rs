use cognitivesense_daemon_protocol::{EventEnvelope, EventType, Method, Request, Response};
use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, sleep};
use std::time::{Duration, Instant};

const SENDER_THREADS: usize = 8;
const EVENTS_PER_SENDER: usize = 25;

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
        .expect("failed to spawn cognitivesense-daemon");
    DaemonGuard { child }
}

fn temp_home(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in("/tmp")
        .expect("failed to create temp HOME")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".cognitivesense").join("daemon.sock")
}

fn can_bind_socket(home: &Path) -> bool {
    let probe_path = home.join("probe.sock");
    match UnixListener::bind(&probe_path) {
        Ok(listener) => {
            drop(listener);
            let _ = fs::remove_file(&probe_path);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true,
    }
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, request: &Request) -> Response {
    send_raw_request(
        socket,
        &serde_json::to_vec(request).expect("failed to serialize request"),
    )
}

fn send_raw_request(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("failed to connect to daemon socket");
    stream.write_all(payload).expect("failed to write request");
    if !payload.ends_with(b"\n") {
        stream.write_all(b"\n").expect("failed to write newline");
    }
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("failed to read response");
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

    serde_json::from_slice(response_bytes).expect("failed to parse response JSON")
}

fn health_ok(socket: &Path) -> bool {
    send_request(
        socket,
        &Request::new(Method::GetHealth, Some("health".to_string()), None),
    )
    .ok
}

#[test]
fn daemon_handles_malformed_payload_flood_without_losing_health() {
    let home = temp_home("cognitivesense-hardening-malformed");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping malformed flood hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let _guard = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));

    for _ in 0..128 {
        let response = send_raw_request(&socket, b"{\"bad_json\": true\n");
        assert!(!response.ok, "malformed payload must be rejected");
        assert_eq!(
            response.error.as_ref().map(|err| err.code.as_str()),
            Some("invalid_json")
        );
    }

    assert!(
        health_ok(&socket),
        "daemon should remain healthy after malformed flood"
    );
}

#[test]
fn daemon_idle_connection_returns_read_timeout_error() {
    let home = temp_home("cognitivesense-hardening-timeout");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping timeout hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let _guard = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));

    let mut idle = UnixStream::connect(&socket).expect("failed to connect idle stream");
    let response = read_response(&mut idle);
    assert!(!response.ok, "idle request should return an error");
    assert_eq!(
        response.error.as_ref().map(|err| err.code.as_str()),
        Some("read_timeout")
    );
}

#[test]
fn concurrent_senders_are_serialized_without_loss() {
    let home = temp_home("cognitivesense-hardening-concurrent");
    if !can_bind_socket(home.path()) {
        eprintln!(
            "Skipping concurrency hardening test: unix socket binding not permitted in this environment."
        );
        return;
    }

    let socket = socket_path(home.path());
    let _guard = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(5));

    let senders: Vec<_> = (0..SENDER_THREADS)
        .map(|sender| {
            let socket = socket.clone();
            thread::spawn(move || {
                for i in 0..EVENTS_PER_SENDER {
                    let mut event = EventEnvelope::new(
                        format!("evt-{}-{}", sender, i),
                        EventType::Confidence,
                    );
                    event.value = Some((sender * EVENTS_PER_SENDER + i) as f64);
                    let request = Request::new(
                        Method::Event,
                        Some(event.event_id.clone()),
                        Some(serde_json::to_value(&event).expect("serialize event")),
                    );
                    let response = send_request(&socket, &request);
                    assert!(response.ok, "event rejected: {:?}", response.error);
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().expect("sender thread panicked");
    }

    let snapshot = send_request(
        &socket,
        &Request::new(Method::GetSession, Some("session".to_string()), None),
    );
    let data = snapshot.data.expect("session payload");
    let session = &data["session"];
    let total = SENDER_THREADS * EVENTS_PER_SENDER;
    assert_eq!(
        session["confidenceHistory"]["samples"]
            .as_array()
            .map(Vec::len),
        Some(total)
    );
    assert_eq!(session["minConfidence"], 0.0);
    assert_eq!(session["maxConfidence"], (total - 1) as f64);
}
