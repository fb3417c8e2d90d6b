//! Wire message types for the JSON channels
//!
//! The detection-intake, bird and pilot channels carry one JSON object per
//! line. Inbound lines are decoded here into typed messages; outbound
//! responses and events are built from [`OutboundMessage`].

use crate::{BirdRiskLevel, CameraId, CoreError, CoreResult, RunwayAvailability, RunwayStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// DETECTION INTAKE
// ============================================================================

/// Inbound event on the detection-intake channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum IntakeEvent {
    #[serde(rename = "object_detected")]
    ObjectDetected(ObjectDetected),
    #[serde(rename = "map_calibration")]
    MapCalibration(CalibrationRequest),
    #[serde(rename = "frame_captured")]
    FrameCaptured(FrameCaptured),
}

const INTAKE_EVENTS: [&str; 3] = ["object_detected", "map_calibration", "frame_captured"];

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectDetected {
    pub camera_id: CameraId,
    pub img_id: u64,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

/// Detection as sent by the inference producer
#[derive(Debug, Clone, Deserialize)]
pub struct RawDetection {
    pub object_id: i64,
    pub class: String,
    pub bbox: [f64; 4],
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, deserialize_with = "lenient_rescue_level")]
    pub rescue_level: Option<u8>,
}

/// A bad `rescue_level` drops only that field, not the whole batch
fn lenient_rescue_level<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|level| u8::try_from(level).ok()))
}

/// Calibration request; fields stay raw so the worker can report exactly what is wrong
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalibrationRequest {
    #[serde(default)]
    pub camera_id: Option<Value>,
    #[serde(default)]
    pub matrix: Option<Value>,
    #[serde(default)]
    pub scale: Option<Value>,
}

/// Captured frame, JPEG encoded as base64
#[derive(Debug, Clone, Deserialize)]
pub struct FrameCaptured {
    pub camera_id: CameraId,
    pub img_id: u64,
    pub image: String,
}

/// Parse a JSON line and check its `"type":"event"` envelope
fn parse_event_envelope(line: &str) -> CoreResult<(Value, String)> {
    let value: Value = serde_json::from_str(line)?;

    let kind = value.get("type").and_then(Value::as_str);
    if kind != Some("event") {
        return Err(CoreError::unknown(format!("message type {:?}", kind)));
    }

    let event = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid_field("missing event name"))?
        .to_string();

    Ok((value, event))
}

pub fn decode_intake(line: &str) -> CoreResult<IntakeEvent> {
    let (value, event) = parse_event_envelope(line)?;
    if !INTAKE_EVENTS.contains(&event.as_str()) {
        return Err(CoreError::unknown(event));
    }

    serde_json::from_value(value).map_err(|e| CoreError::invalid_field(e.to_string()))
}

// ============================================================================
// BIRD SUBSYSTEM
// ============================================================================

pub fn decode_bird(line: &str) -> CoreResult<BirdRiskLevel> {
    let (value, event) = parse_event_envelope(line)?;
    if event != "BR_CHANGED" {
        return Err(CoreError::unknown(event));
    }

    let result = value
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid_field("missing result"))?;
    BirdRiskLevel::from_wire(result).ok_or_else(|| CoreError::invalid_field(format!("risk level {}", result)))
}

// ============================================================================
// PILOT CONSOLE
// ============================================================================

/// Inquiry sent by the pilot console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PilotCommand {
    BirdRiskInquiry,
    RunwayAStatus,
    RunwayBStatus,
    RunwayAvailability,
}

impl PilotCommand {
    pub fn from_wire(text: &str) -> Option<Self> {
        match text {
            "BR_INQ" => Some(Self::BirdRiskInquiry),
            "RWY_A_STATUS" => Some(Self::RunwayAStatus),
            "RWY_B_STATUS" => Some(Self::RunwayBStatus),
            "RWY_AVAIL_INQ" => Some(Self::RunwayAvailability),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::BirdRiskInquiry => "BR_INQ",
            Self::RunwayAStatus => "RWY_A_STATUS",
            Self::RunwayBStatus => "RWY_B_STATUS",
            Self::RunwayAvailability => "RWY_AVAIL_INQ",
        }
    }

    /// Request id recorded in the interaction log
    pub fn log_id(&self) -> i32 {
        match self {
            Self::BirdRiskInquiry => 1,
            Self::RunwayAStatus => 2,
            Self::RunwayBStatus => 3,
            Self::RunwayAvailability => 4,
        }
    }
}

pub fn decode_pilot(line: &str) -> CoreResult<PilotCommand> {
    let value: Value = serde_json::from_str(line)?;
    let command = value
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid_field("missing command"))?;

    PilotCommand::from_wire(command).ok_or_else(|| CoreError::unknown(command))
}

/// Answer to a pilot inquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PilotReply {
    BirdRisk(BirdRiskLevel),
    Runway(RunwayStatus),
    Availability(RunwayAvailability),
}

impl PilotReply {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::BirdRisk(level) => level.as_wire(),
            Self::Runway(status) => status.as_str(),
            Self::Availability(avail) => avail.as_str(),
        }
    }

    /// Response id recorded in the interaction log
    pub fn log_id(&self) -> i32 {
        match self {
            Self::BirdRisk(level) => 10 + level.code() as i32,
            Self::Runway(status) => 20 + status.code() as i32,
            Self::Availability(avail) => match avail {
                RunwayAvailability::All => 30,
                RunwayAvailability::OnlyA => 31,
                RunwayAvailability::OnlyB => 32,
                RunwayAvailability::None => 33,
            },
        }
    }
}

// ============================================================================
// OUTBOUND JSON
// ============================================================================

/// Outbound message on a JSON channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Response {
        command: String,
        result: String,
    },
    Event {
        event: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        camera_id: Option<String>,
        result: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        reason: Option<String>,
    },
    Error {
        code: u8,
        reason: String,
    },
}

impl OutboundMessage {
    pub fn response(command: PilotCommand, reply: PilotReply) -> Self {
        Self::Response {
            command: command.as_wire().to_string(),
            result: reply.as_wire().to_string(),
        }
    }

    pub fn event(event: impl Into<String>, result: impl Into<String>) -> Self {
        Self::Event {
            event: event.into(),
            camera_id: None,
            result: result.into(),
            reason: None,
        }
    }

    pub fn calibration_result(camera_id: &str, reason: Option<String>) -> Self {
        Self::Event {
            event: "map_calibration_result".to_string(),
            camera_id: Some(camera_id.to_string()),
            result: if reason.is_none() { "OK" } else { "ERROR" }.to_string(),
            reason,
        }
    }

    pub fn error(err: &CoreError) -> Self {
        Self::Error {
            code: err.wire_code(),
            reason: err.to_string(),
        }
    }

    pub fn to_line(&self) -> String {
        // Serializing these plain variants cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

// ============================================================================
// TESTS
// ============================================================================
