//! Client helper for talking to the CognitiveSense daemon.
//!
//! The daemon is the only writer. Every command here is one request on a
//! fresh connection; failures are surfaced to the caller.

use chrono::Utc;
use cognitivesense_daemon_protocol::{
    EventEnvelope, EventType, Method, Request, Response, MAX_REQUEST_BYTES,
};
use rand::RngCore;
use serde_json::Value;
use session_core::config;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CliError, Result};

const SOCKET_ENV: &str = "COGNITIVESENSE_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 1500;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

pub fn socket_path() -> Result<PathBuf> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(config::data_dir()?.join(SOCKET_NAME))
}

/// Sends one request and returns its `data` payload.
pub fn call(method: Method, params: Option<Value>) -> Result<Value> {
    let request = Request::new(method, Some(make_event_id()), params);
    into_data(send_request(&request)?)
}

/// Event envelope with a fresh id, stamped now.
pub fn new_event(event_type: EventType) -> EventEnvelope {
    EventEnvelope::new(make_event_id(), event_type)
}

pub fn send_event(event: &EventEnvelope) -> Result<Value> {
    let request = Request::new(
        Method::Event,
        Some(event.event_id.clone()),
        Some(serde_json::to_value(event)?),
    );
    into_data(send_request(&request)?)
}

/// Sends an event, retrying once after a short pause. `build` is called per
/// attempt and must yield the same event id each time.
pub fn send_event_with_retry<F>(mut build: F, label: &str) -> Result<Value>
where
    F: FnMut() -> EventEnvelope,
{
    match send_event(&build()) {
        Ok(data) => Ok(data),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to send {} to daemon", label);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_event(&build()).inspect_err(|retry_err| {
                tracing::warn!(
                    error = %retry_err,
                    "Retry failed sending {} to daemon",
                    label
                );
            })
        }
    }
}

fn into_data(response: Response) -> Result<Value> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    Err(match response.error {
        Some(err) => CliError::Daemon {
            code: err.code,
            message: err.message,
        },
        None => CliError::Daemon {
            code: "unknown".to_string(),
            message: "Unknown daemon error".to_string(),
        },
    })
}

fn send_request(request: &Request) -> Result<Response> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket).map_err(|source| CliError::Connect {
        path: socket.clone(),
        source,
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, request)?;
    stream.write_all(b"\n")?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(CliError::ResponseTooLarge);
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
                return Err(CliError::Timeout);
            }
            Err(err) => return Err(CliError::Io(err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(CliError::EmptyResponse);
    }

    Ok(serde_json::from_slice(response_bytes)?)
}

pub fn make_event_id() -> String {
    let mut random = rand::thread_rng();
    let rand = random.next_u64();
    format!(
        "evt-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        rand
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::path::Path;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, OnceLock,
    };
    use std::time::{Duration, Instant};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    struct EnvGuard {
        key: &'static str,
        prior: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prior = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, prior }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.prior {
                std::env::set_var(self.key, value);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn socket_in_tmp(prefix: &str) -> PathBuf {
        let socket_dir = Path::new("/tmp").join(format!(
            "{}-{}",
            prefix,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or(Duration::from_millis(0))
                .as_nanos()
        ));
        std::fs::create_dir_all(&socket_dir).unwrap();
        let socket_path = socket_dir.join("daemon.sock");
        let _ = std::fs::remove_file(&socket_path);
        socket_path
    }

    fn read_request(stream: &mut UnixStream) -> Option<Request> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if buffer.contains(&b'\n') {
                        break;
                    }
                }
                Err(_) => return None,
            }
        }

        let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
            Some(index) => &buffer[..index],
            None => buffer.as_slice(),
        };
        serde_json::from_slice(request_bytes).ok()
    }

    fn write_response(stream: &mut UnixStream, response: &Response) {
        let mut payload = serde_json::to_vec(response).unwrap();
        payload.push(b'\n');
        let _ = stream.write_all(&payload);
    }

    #[test]
    fn send_event_retries_after_daemon_error() {
        let _guard = env_lock();
        let socket_path = socket_in_tmp("sense-retry");
        let listener = UnixListener::bind(&socket_path).unwrap();
        listener.set_nonblocking(true).unwrap();

        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let server = std::thread::spawn(move || {
            let start = Instant::now();
            let mut handled = 0;
            while handled < 2 && start.elapsed() < Duration::from_secs(5) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        handled += 1;
                        attempt_count_clone.fetch_add(1, Ordering::SeqCst);
                        read_request(&mut stream);
                        let response = if handled == 1 {
                            Response::error(None, "test_error", "simulated")
                        } else {
                            Response::ok(
                                None,
                                serde_json::json!({"accepted": true, "applied": true}),
                            )
                        };
                        write_response(&mut stream, &response);
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket_path.to_str().unwrap());
        let event = new_event(EventType::PauseStart);
        let result = send_event_with_retry(|| event.clone(), "pause event");

        assert_eq!(
            result.unwrap()["applied"],
            serde_json::Value::Bool(true)
        );
        server.join().unwrap();
        assert_eq!(attempt_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retry_reuses_same_event_id_after_lost_response() {
        let _guard = env_lock();
        let socket_path = socket_in_tmp("sense-lost");
        let listener = UnixListener::bind(&socket_path).unwrap();
        listener.set_nonblocking(true).unwrap();

        let seen_ids: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_ids_clone = Arc::clone(&seen_ids);

        let server = std::thread::spawn(move || {
            let start = Instant::now();
            let mut handled = 0;
            while handled < 2 && start.elapsed() < Duration::from_secs(5) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        handled += 1;
                        let request = read_request(&mut stream);
                        let event_id = request
                            .and_then(|request| request.params)
                            .and_then(|params| {
                                serde_json::from_value::<EventEnvelope>(params).ok()
                            })
                            .map(|event| event.event_id);
                        seen_ids_clone.lock().unwrap().push(event_id);

                        if handled == 2 {
                            write_response(
                                &mut stream,
                                &Response::ok(None, serde_json::json!({"accepted": true})),
                            );
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket_path.to_str().unwrap());
        let mut event = new_event(EventType::Confidence);
        event.value = Some(72.0);
        assert!(send_event_with_retry(|| event.clone(), "confidence event").is_ok());
        server.join().unwrap();

        let ids = seen_ids.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].is_some());
        assert_eq!(ids[0], ids[1], "retry must reuse the same event id");
    }

    #[test]
    fn call_surfaces_daemon_error_code() {
        let _guard = env_lock();
        let socket_path = socket_in_tmp("sense-error");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let request = read_request(&mut stream).expect("request");
                assert_eq!(request.method, Method::GetReport);
                write_response(
                    &mut stream,
                    &Response::error(request.id, "session_not_found", "no active session"),
                );
            }
        });

        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket_path.to_str().unwrap());
        let err = call(Method::GetReport, None).unwrap_err();
        server.join().unwrap();

        match err {
            CliError::Daemon { code, message } => {
                assert_eq!(code, "session_not_found");
                assert_eq!(message, "no active session");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn socket_path_honours_env_override() {
        let _guard = env_lock();
        let _socket_guard = EnvGuard::set(SOCKET_ENV, "/tmp/sense-custom.sock");
        assert_eq!(
            socket_path().unwrap(),
            PathBuf::from("/tmp/sense-custom.sock")
        );
    }

    #[test]
    fn missing_daemon_reports_connect_error() {
        let _guard = env_lock();
        let socket_path = socket_in_tmp("sense-missing");
        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket_path.to_str().unwrap());
        assert!(matches!(
            call(Method::GetHealth, None),
            Err(CliError::Connect { .. })
        ));
    }

    #[test]
    fn event_ids_are_unique_and_prefixed() {
        let first = make_event_id();
        let second = make_event_id();
        assert!(first.starts_with("evt-"));
        assert!(first.len() <= 128);
        assert_ne!(first, second);
    }
}
