//! Session aggregation engine for the CognitiveSense monitoring dashboard.
//!
//! Consumes a stream of state, confidence, inference, connection and pause
//! events and keeps per-session statistics: time in each state, confidence
//! bounds and average, inference tallies, outage durations and pause time.
//!
//! The engine is synchronous and does no I/O. The daemon owns one
//! [`EventRouter`] behind a mutex and feeds it events in delivery order.
//!
//! ```
//! use std::sync::Arc;
//! use session_core::{ManualClock, SessionTracker, SystemState, TrackerSettings};
//!
//! let clock = ManualClock::new(0);
//! let mut tracker = SessionTracker::new(Arc::new(clock.clone()), TrackerSettings::default());
//! tracker.start_session();
//! tracker.update_system_state(SystemState::Normal);
//! clock.advance(1_000);
//! let ended = tracker.end_session().unwrap();
//! assert_eq!(ended.durations.normal, 1_000);
//! ```

mod confidence;
mod connection;
mod inference;
mod intervals;
mod pause;

pub mod clock;
pub mod config;
pub mod error;
pub mod live;
pub mod report;
pub mod ring;
pub mod router;
pub mod session;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, SenseConfig};
pub use connection::{DisconnectEvent, ReconnectEvent};
pub use error::{Result, SessionError};
pub use inference::InferenceCount;
pub use intervals::{StateDurations, StateInterval, StatePercentages};
pub use live::{LatestInference, LiveMetrics};
pub use pause::PauseInterval;
pub use report::SessionReport;
pub use ring::{MetricRing, MetricSample};
pub use router::{EventRouter, RouterSettings};
pub use session::Session;
pub use tracker::{SessionTracker, StartOutcome, TrackerSettings};

pub use cognitivesense_daemon_protocol::{EngineState, SystemState};
