//! Relay from the inference backend to the daemon.
//!
//! The backend streams one JSON prediction frame per line over TCP. Each
//! frame is split into engine events and forwarded. Connection loss is
//! reported as a `disconnect` event, a successful connect as `reconnect`,
//! and the link is re-dialled with exponential backoff. A backend that stays
//! silent for longer than the connection timeout counts as lost.

use chrono::Utc;
use cognitivesense_daemon_protocol::{parse_inference_frame, EventEnvelope, EventType};
use session_core::config::ConnectionConfig;
use std::io::{BufRead, BufReader};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::daemon_client;
use crate::error::{CliError, Result};

pub const BASE_DELAY_MS: u64 = 1_000;
pub const MAX_DELAY_MS: u64 = 30_000;
const MIN_TIMEOUT_SECS: u64 = 1;

/// `min(1000 * 2^attempt, 30000)` milliseconds.
pub fn backoff_delay_ms(attempt: u32) -> u64 {
    2u64.checked_pow(attempt)
        .and_then(|factor| factor.checked_mul(BASE_DELAY_MS))
        .map_or(MAX_DELAY_MS, |delay| delay.min(MAX_DELAY_MS))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            enabled: config.reconnect_enabled,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before zero-based reconnect `attempt`, or `None` once the
    /// budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt >= self.max_attempts {
            return None;
        }
        Some(Duration::from_millis(backoff_delay_ms(attempt)))
    }
}

/// Where decoded events go.
pub trait EventSink {
    fn deliver(&mut self, event: EventEnvelope) -> Result<()>;
}

/// Forwards to the daemon socket, retrying each event once.
pub struct DaemonSink;

impl EventSink for DaemonSink {
    fn deliver(&mut self, event: EventEnvelope) -> Result<()> {
        daemon_client::send_event_with_retry(|| event.clone(), "bridge event").map(|_| ())
    }
}

pub struct Bridge<S: EventSink> {
    addr: String,
    /// Bounds both the connect and each read from the backend.
    timeout: Duration,
    policy: ReconnectPolicy,
    sink: S,
    frames_forwarded: u64,
}

impl<S: EventSink> Bridge<S> {
    pub fn new(
        addr: impl Into<String>,
        timeout: Duration,
        policy: ReconnectPolicy,
        sink: S,
    ) -> Self {
        Self {
            addr: addr.into(),
            timeout: timeout.max(Duration::from_secs(MIN_TIMEOUT_SECS)),
            policy,
            sink,
            frames_forwarded: 0,
        }
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded
    }

    /// Runs until the reconnect budget is exhausted. With reconnection
    /// disabled, a backend that closes after a successful connect ends the
    /// bridge cleanly.
    pub fn run(&mut self) -> Result<()> {
        self.run_with(thread::sleep)
    }

    fn run_with<W: FnMut(Duration)>(&mut self, mut wait: W) -> Result<()> {
        let mut attempts: u32 = 0;
        let mut connected_once = false;

        loop {
            match self.connect() {
                Ok(stream) => {
                    attempts = 0;
                    connected_once = true;
                    info!(addr = %self.addr, "Connected to inference backend");
                    self.emit(daemon_client::new_event(EventType::Reconnect));
                    self.pump(stream);
                    warn!(addr = %self.addr, "Inference backend connection closed");
                    self.emit(daemon_client::new_event(EventType::Disconnect));
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        addr = %self.addr,
                        attempt = attempts,
                        "Failed to connect to inference backend"
                    );
                }
            }

            match self.policy.next_delay(attempts) {
                Some(delay) => {
                    attempts += 1;
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = attempts,
                        "Reconnecting to inference backend"
                    );
                    wait(delay);
                }
                None if !self.policy.enabled && connected_once => return Ok(()),
                None => {
                    warn!(attempts, "Max reconnection attempts reached");
                    return Err(CliError::BackendUnreachable { attempts });
                }
            }
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let mut last_err = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(CliError::Io(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.addr),
            )
        })))
    }

    fn pump(&mut self, stream: TcpStream) {
        for line in BufReader::new(stream).lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) if is_timeout(&err) => {
                    warn!(
                        timeout_secs = self.timeout.as_secs(),
                        "Inference backend went silent"
                    );
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "Failed to read from inference backend");
                    break;
                }
            };
            let line = line.trim();
            if !line.is_empty() {
                self.forward_frame(line);
            }
        }
    }

    fn forward_frame(&mut self, line: &str) {
        let frame = match parse_inference_frame(line) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(code = %err.code, message = %err.message, "Skipping backend frame");
                return;
            }
        };

        self.frames_forwarded += 1;
        let prefix = daemon_client::make_event_id();
        let recorded_at = Utc::now().to_rfc3339();
        for event in frame.into_events(&prefix, &recorded_at) {
            self.emit(event);
        }
    }

    fn emit(&mut self, event: EventEnvelope) {
        let event_type = event.event_type;
        if let Err(err) = self.sink.deliver(event) {
            warn!(error = %err, event_type = ?event_type, "Failed to forward event to daemon");
        }
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
