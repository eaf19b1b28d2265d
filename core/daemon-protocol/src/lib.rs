//! IPC protocol types and validation for the CognitiveSense session daemon.
//!
//! This crate is shared by the daemon, the engine and the CLI to prevent
//! schema drift. The daemon remains the authority on validation, but clients
//! can reuse the same types to construct valid requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// Model name attached to inferences that arrive as raw backend frames.
pub const BACKEND_MODEL_NAME: &str = "CognitiveSense-RF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetSession,
    GetHistory,
    GetLiveMetrics,
    GetReport,
    StartSession,
    EndSession,
    ResetSession,
    Event,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: Option<String>, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Discrete classification of system condition at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    Normal,
    Alert,
    Critical,
    Offline,
}

impl SystemState {
    pub const ALL: [SystemState; 4] = [
        SystemState::Normal,
        SystemState::Alert,
        SystemState::Critical,
        SystemState::Offline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Normal => "normal",
            SystemState::Alert => "alert",
            SystemState::Critical => "critical",
            SystemState::Offline => "offline",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(SystemState::Normal),
            "alert" => Some(SystemState::Alert),
            "critical" => Some(SystemState::Critical),
            "offline" => Some(SystemState::Offline),
            _ => None,
        }
    }

    /// Alert and critical periods count as stress.
    pub fn is_stress(&self) -> bool {
        matches!(self, SystemState::Alert | SystemState::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum EventType {
    StateChange,
    Confidence,
    Inference,
    Activity,
    Disconnect,
    Reconnect,
    PauseStart,
    PauseEnd,
    EngineState,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EventEnvelope {
    pub event_id: String,
    pub recorded_at: String,
    pub event_type: EventType,
    #[serde(default)]
    pub state: Option<SystemState>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub engine_state: Option<EngineState>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl EventEnvelope {
    /// Bare envelope stamped with the current time; callers fill in the payload.
    pub fn new(event_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            event_id: event_id.into(),
            recorded_at: Utc::now().to_rfc3339(),
            event_type,
            state: None,
            value: None,
            decision: None,
            model: None,
            engine_state: None,
            metadata: None,
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.event_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_event_id", "event_id is required"));
        }
        if self.event_id.len() > 128 {
            return Err(ErrorInfo::new(
                "invalid_event_id",
                "event_id must be 128 characters or fewer",
            ));
        }

        if DateTime::parse_from_rfc3339(&self.recorded_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "recorded_at must be RFC3339",
            ));
        }

        match self.event_type {
            EventType::StateChange => require_present(&self.state, "state")?,
            EventType::Confidence => require_present(&self.value, "value")?,
            EventType::Inference => require_string(&self.decision, "decision")?,
            EventType::EngineState => require_present(&self.engine_state, "engine_state")?,
            EventType::Activity
            | EventType::Disconnect
            | EventType::Reconnect
            | EventType::PauseStart
            | EventType::PauseEnd => {}
        }

        Ok(())
    }
}

pub fn parse_event(params: Value) -> Result<EventEnvelope, ErrorInfo> {
    let envelope: EventEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("event payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

/// One point of the backend's rolling label history.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FrameHistoryPoint {
    pub time: f64,
    pub label: i64,
}

/// Raw prediction frame pushed by the inference backend.
///
/// The backend also sends `features` and `proba`; they are accepted and
/// ignored here.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InferenceFrame {
    #[serde(default)]
    pub engine_state: Option<EngineState>,
    #[serde(default)]
    pub label_id: Option<i64>,
    #[serde(default)]
    pub label_name: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub history: Vec<FrameHistoryPoint>,
}

impl InferenceFrame {
    /// Anything the backend does not label `Normal` is treated as an alert.
    pub fn system_state(&self) -> SystemState {
        match self.label_name.as_deref() {
            Some("Normal") => SystemState::Normal,
            _ => SystemState::Alert,
        }
    }

    /// Splits a frame into the engine events it implies, in delivery order:
    /// engine state, inference, confidence, state change.
    ///
    /// The engine-state event carries the frame's label state, so a frame
    /// settles on one system state instead of passing through the engine
    /// default on the way.
    pub fn into_events(self, id_prefix: &str, recorded_at: &str) -> Vec<EventEnvelope> {
        let state = self.system_state();
        let mut events = Vec::with_capacity(4);
        let mut push = |suffix: &str, event_type: EventType| {
            let mut event = EventEnvelope::new(format!("{}-{}", id_prefix, suffix), event_type);
            event.recorded_at = recorded_at.to_string();
            events.push(event);
            events.len() - 1
        };

        let engine_index = self
            .engine_state
            .map(|_| push("engine", EventType::EngineState));
        let inference_index = push("inference", EventType::Inference);
        let confidence_index = push("confidence", EventType::Confidence);
        let state_index = push("state", EventType::StateChange);

        if let Some(index) = engine_index {
            events[index].engine_state = self.engine_state;
            events[index].state = Some(state);
        }
        events[inference_index].decision = self.label_name.clone();
        events[inference_index].model = Some(BACKEND_MODEL_NAME.to_string());
        events[inference_index].value = self.confidence;
        events[confidence_index].value = Some(self.confidence.unwrap_or(0.0));
        events[state_index].state = Some(state);

        events
    }
}

pub fn parse_inference_frame(line: &str) -> Result<InferenceFrame, ErrorInfo> {
    let frame: InferenceFrame = serde_json::from_str(line).map_err(|err| {
        ErrorInfo::new(
            "invalid_frame",
            format!("backend frame is invalid JSON: {}", err),
        )
    })?;
    require_string(&frame.label_name, "label_name")?;
    Ok(frame)
}

fn require_string(value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    if let Some(candidate) = value {
        if !candidate.trim().is_empty() {
            return Ok(());
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}

fn require_present<T>(value: &Option<T>, field: &str) -> Result<(), ErrorInfo> {
    match value {
        Some(_) => Ok(()),
        None => Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        )),
    }
}
