//! sense: command-line control surface for the CognitiveSense daemon.
//!
//! Every subcommand is one request to the daemon over its Unix socket.
//!
//! ## Subcommands
//!
//! - `start`, `stop`, `reset`: session lifecycle
//! - `pause`, `resume`, `state`, `confidence`, `inference`, `activity`,
//!   `disconnect`, `reconnect`: inject a single event
//! - `status`, `history`, `report`, `health`, `live`: queries
//! - `bridge`: relay inference frames from the backend until it gives up

mod bridge;
mod daemon_client;
mod error;
mod logging;

use clap::{Parser, Subcommand};
use cognitivesense_daemon_protocol::{EventEnvelope, EventType, Method, SystemState};
use serde::Deserialize;
use serde_json::Value;
use session_core::report::format_duration_ms;
use session_core::{config, Session, SessionReport, StatePercentages};
use std::time::Duration;

use bridge::{Bridge, DaemonSink, ReconnectPolicy};
use error::Result;

#[derive(Parser)]
#[command(name = "sense")]
#[command(about = "CognitiveSense session control")]
#[command(version)]
struct Cli {
    /// Print raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session, archiving the current one
    Start,

    /// End the current session
    Stop,

    /// Discard the current session and start over
    Reset,

    /// Pause monitoring
    Pause,

    /// Resume monitoring
    Resume,

    /// Report a system state (normal, alert, critical, offline)
    State {
        #[arg(value_name = "STATE", value_parser = parse_state)]
        state: SystemState,
    },

    /// Record a confidence sample (0-100)
    Confidence {
        #[arg(value_name = "VALUE")]
        value: f64,
    },

    /// Record an inference decision
    Inference {
        #[arg(value_name = "LABEL")]
        label: String,

        /// Model that produced the decision
        #[arg(long)]
        model: Option<String>,
    },

    /// Record an activity-rate sample (defaults to 1.0)
    Activity {
        #[arg(value_name = "VALUE")]
        value: Option<f64>,
    },

    /// Mark the backend link as lost
    Disconnect,

    /// Mark the backend link as restored
    Reconnect,

    /// Show the current session
    Status,

    /// Show live dashboard metrics
    Live,

    /// List archived sessions, newest first
    History {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Session report for the current or an archived session
    Report {
        #[arg(long)]
        session_id: Option<String>,
    },

    /// Daemon health
    Health,

    /// Relay backend inference frames to the daemon
    Bridge {
        /// Backend address (host:port); defaults to the configured one
        #[arg(long)]
        addr: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct SessionSnapshot {
    active: bool,
    session: Option<Session>,
    duration_ms: i64,
    percentages: StatePercentages,
    longest_stress_ms: i64,
    paused: bool,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli.command, cli.json) {
        tracing::error!(error = %err, "sense command failed");
        eprintln!("sense: {}", err);
        std::process::exit(1);
    }
}

fn run(command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Start => {
            let data = daemon_client::call(Method::StartSession, None)?;
            print_or(json, &data, |data| {
                format!("Started session {}", data["id"].as_str().unwrap_or("?"))
            })
        }
        Commands::Stop => {
            let data = daemon_client::call(Method::EndSession, None)?;
            print_or(json, &data, |data| match data["session"]["id"].as_str() {
                Some(id) => format!("Ended session {}", id),
                None => "No active session".to_string(),
            })
        }
        Commands::Reset => {
            let data = daemon_client::call(Method::ResetSession, None)?;
            print_or(json, &data, |data| {
                format!("Reset; new session {}", data["id"].as_str().unwrap_or("?"))
            })
        }
        Commands::Pause => emit(daemon_client::new_event(EventType::PauseStart), json),
        Commands::Resume => emit(daemon_client::new_event(EventType::PauseEnd), json),
        Commands::State { state } => {
            let mut event = daemon_client::new_event(EventType::StateChange);
            event.state = Some(state);
            emit(event, json)
        }
        Commands::Confidence { value } => {
            let mut event = daemon_client::new_event(EventType::Confidence);
            event.value = Some(value);
            emit(event, json)
        }
        Commands::Inference { label, model } => {
            let mut event = daemon_client::new_event(EventType::Inference);
            event.decision = Some(label);
            event.model = model;
            emit(event, json)
        }
        Commands::Activity { value } => {
            let mut event = daemon_client::new_event(EventType::Activity);
            event.value = value;
            emit(event, json)
        }
        Commands::Disconnect => emit(daemon_client::new_event(EventType::Disconnect), json),
        Commands::Reconnect => emit(daemon_client::new_event(EventType::Reconnect), json),
        Commands::Status => {
            let data = daemon_client::call(Method::GetSession, None)?;
            if json {
                return print_json(&data);
            }
            let snapshot: SessionSnapshot = serde_json::from_value(data)?;
            println!("{}", render_status(&snapshot));
            Ok(())
        }
        Commands::Live => {
            let data = daemon_client::call(Method::GetLiveMetrics, None)?;
            print_json(&data)
        }
        Commands::History { limit } => {
            let params = limit.map(|limit| serde_json::json!({ "limit": limit }));
            let data = daemon_client::call(Method::GetHistory, params)?;
            if json {
                return print_json(&data);
            }
            let sessions: Vec<Session> = serde_json::from_value(data)?;
            println!("{}", render_history(&sessions));
            Ok(())
        }
        Commands::Report { session_id } => {
            let params = session_id.map(|id| serde_json::json!({ "session_id": id }));
            let data = daemon_client::call(Method::GetReport, params)?;
            if json {
                return print_json(&data);
            }
            let report: SessionReport = serde_json::from_value(data)?;
            print!("{}", report.render_text());
            Ok(())
        }
        Commands::Health => {
            let data = daemon_client::call(Method::GetHealth, None)?;
            print_json(&data)
        }
        Commands::Bridge { addr } => run_bridge(addr),
    }
}

fn run_bridge(addr: Option<String>) -> Result<()> {
    let config = config::load_config(None)?;
    let connection = config.connection;
    let addr = addr.unwrap_or_else(|| connection.backend_addr.clone());
    tracing::info!(addr = %addr, "Starting backend bridge");

    let mut bridge = Bridge::new(
        addr,
        Duration::from_secs(connection.connection_timeout_secs),
        ReconnectPolicy::from_config(&connection),
        DaemonSink,
    );
    let result = bridge.run();
    tracing::info!(frames = bridge.frames_forwarded(), "Backend bridge stopped");
    result
}

fn emit(event: EventEnvelope, json: bool) -> Result<()> {
    let event_type = event.event_type;
    let data = daemon_client::send_event_with_retry(|| event.clone(), "cli event")?;
    print_or(json, &data, |data| {
        let applied = data["applied"].as_bool().unwrap_or(false);
        format!(
            "{:?}: {}",
            event_type,
            if applied { "applied" } else { "ignored" }
        )
    })
}

fn print_or<F>(json: bool, data: &Value, text: F) -> Result<()>
where
    F: FnOnce(&Value) -> String,
{
    if json {
        print_json(data)
    } else {
        println!("{}", text(data));
        Ok(())
    }
}

fn print_json(data: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

fn parse_state(value: &str) -> std::result::Result<SystemState, String> {
    SystemState::from_str(&value.to_ascii_lowercase()).ok_or_else(|| {
        format!(
            "unknown state '{}' (expected normal, alert, critical or offline)",
            value
        )
    })
}

fn render_status(snapshot: &SessionSnapshot) -> String {
    let session = match (&snapshot.session, snapshot.active) {
        (Some(session), true) => session,
        _ => return "No active session".to_string(),
    };

    let mut out = format!("Session {}\n", session.id);
    out.push_str(&format!(
        "  State:      {}{}\n",
        session.current_state.as_str(),
        if snapshot.paused { " (paused)" } else { "" }
    ));
    out.push_str(&format!(
        "  Duration:   {}\n",
        format_duration_ms(snapshot.duration_ms)
    ));
    out.push_str(&format!(
        "  Breakdown:  normal {:.1}%  alert {:.1}%  critical {:.1}%  offline {:.1}%\n",
        snapshot.percentages.normal,
        snapshot.percentages.alert,
        snapshot.percentages.critical,
        snapshot.percentages.offline
    ));
    out.push_str(&format!(
        "  Longest stress interval: {}\n",
        format_duration_ms(snapshot.longest_stress_ms)
    ));
    out.push_str(&format!(
        "  Inferences: {}  Samples: {}",
        session.total_inferences,
        session.confidence_history.len()
    ));
    out
}

fn render_history(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "No archived sessions".to_string();
    }
    sessions
        .iter()
        .map(|session| {
            format!(
                "{}  {}  {} inference(s)",
                session.id,
                format_duration_ms(session.end_time.map_or(0, |end| end - session.start_time)),
                session.total_inferences
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(active: bool) -> SessionSnapshot {
        let mut session = Session::new("session_status".to_string(), 0, 10);
        session.current_state = SystemState::Alert;
        SessionSnapshot {
            active,
            session: active.then_some(session),
            duration_ms: 90_000,
            percentages: StatePercentages {
                normal: 0.0,
                alert: 100.0,
                critical: 0.0,
                offline: 0.0,
            },
            longest_stress_ms: 90_000,
            paused: true,
        }
    }

    #[test]
    fn state_argument_is_case_insensitive() {
        assert_eq!(parse_state("Critical"), Ok(SystemState::Critical));
        assert!(parse_state("panic").is_err());
    }

    #[test]
    fn status_renders_state_and_breakdown() {
        let text = render_status(&snapshot(true));
        assert!(text.starts_with("Session session_status"));
        assert!(text.contains("alert (paused)"));
        assert!(text.contains("1 minute 30 seconds"));
        assert!(text.contains("alert 100.0%"));
    }

    #[test]
    fn status_without_session_says_so() {
        assert_eq!(render_status(&snapshot(false)), "No active session");
    }

    #[test]
    fn snapshot_parses_daemon_payload() {
        let session = Session::new("session_wire".to_string(), 1_000, 10);
        let payload = serde_json::json!({
            "active": true,
            "session": session,
            "duration_ms": 0,
            "percentages": StatePercentages::OFFLINE_DEFAULT,
            "longest_stress_ms": 0,
            "paused": false,
        });
        let parsed: SessionSnapshot = serde_json::from_value(payload).expect("snapshot");
        assert!(parsed.active);
        assert_eq!(parsed.session.map(|s| s.id), Some("session_wire".to_string()));
    }

    #[test]
    fn history_lists_each_session() {
        let mut first = Session::new("session_a".to_string(), 0, 10);
        first.end_time = Some(60_000);
        first.is_active = false;
        let second = Session::new("session_b".to_string(), 0, 10);
        let text = render_history(&[first, second]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("session_a  1 minute"));
        assert_eq!(render_history(&[]), "No archived sessions");
    }
}
