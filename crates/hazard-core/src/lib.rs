//! # Hazard Core
//!
//! Core domain models shared by every crate of the airfield hazard
//! coordinator: detections, runways, bird risk, zone access authority and the
//! records handed to persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub mod error;
pub mod mapping;
pub mod messages;

pub use error::{CoreError, CoreResult};
pub use mapping::*;
pub use messages::*;

/// Number of airfield zones carrying an access authority level
pub const ZONE_COUNT: usize = 8;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Producer-assigned object identifier, never reused for another object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub i64);

impl ObjectId {
    /// Parse an id received as text on the admin channel
    pub fn parse(text: &str) -> CoreResult<Self> {
        text.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| CoreError::InvalidObjectId(text.to_string()))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Camera identifier. Producers send either a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept a JSON string or integer as a camera id
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().to_string())),
            serde_json::Value::Number(n) => n.as_i64().map(|n| Self(n.to_string())),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for CameraId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Airfield zone identifier (1..=8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub u8);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// DETECTIONS
// ============================================================================

/// Object class reported by the inference producer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Bird,
    Animal,
    /// Foreign object debris
    Fod,
    Person,
    Vehicle,
    WorkPerson,
    WorkVehicle,
    /// Person lying down; the only rescue-relevant class
    FallenPerson,
    Airplane,
    Other(String),
}

impl ObjectClass {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "bird" => Self::Bird,
            "animal" => Self::Animal,
            "fod" => Self::Fod,
            "person" => Self::Person,
            "vehicle" => Self::Vehicle,
            "work_person" => Self::WorkPerson,
            "work_vehicle" => Self::WorkVehicle,
            "fallen_person" => Self::FallenPerson,
            "airplane" => Self::Airplane,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Bird => "bird",
            Self::Animal => "animal",
            Self::Fod => "fod",
            Self::Person => "person",
            Self::Vehicle => "vehicle",
            Self::WorkPerson => "work_person",
            Self::WorkVehicle => "work_vehicle",
            Self::FallenPerson => "fallen_person",
            Self::Airplane => "airplane",
            Self::Other(label) => label,
        }
    }

    pub fn is_rescue_subject(&self) -> bool {
        matches!(self, Self::FallenPerson)
    }

    /// Classes that are a hazard wherever they appear
    pub fn is_hazard(&self) -> bool {
        matches!(self, Self::Bird | Self::Animal | Self::Fod)
    }

    pub fn is_person_like(&self) -> bool {
        matches!(self, Self::Person | Self::WorkPerson | Self::FallenPerson)
    }

    /// Highest zone authority level this class may enter, for access-gated classes
    pub fn clearance(&self) -> Option<u8> {
        match self {
            Self::Person | Self::Vehicle => Some(1),
            Self::WorkPerson | Self::WorkVehicle => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pixel bounding box `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn from_array(b: [f64; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Integer crop rectangle `(x, y, w, h)` clipped to an image, or None if empty
    pub fn clip_to(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.floor().clamp(0.0, image_width as f64) as u32;
        let y1 = self.y1.floor().clamp(0.0, image_height as f64) as u32;
        let x2 = self.x2.ceil().clamp(0.0, image_width as f64) as u32;
        let y2 = self.y2.ceil().clamp(0.0, image_height as f64) as u32;

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// One detected object, mapped onto the airfield map
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub object_id: ObjectId,
    pub class: ObjectClass,
    pub bbox: BoundingBox,
    /// Pixel center in the source frame
    pub center: (f64, f64),
    pub map_x: f64,
    pub map_y: f64,
    pub zone: Option<ZoneId>,
    /// Only carried for person-like classes
    pub rescue_level: Option<u8>,
    pub confidence: f64,
    pub camera_id: CameraId,
    pub img_id: u64,
}

impl DetectionRecord {
    /// Map position rounded to whole map units, as sent to consoles
    pub fn map_point(&self) -> (i64, i64) {
        (self.map_x.round() as i64, self.map_y.round() as i64)
    }

    /// Zone number sent on the wire; 0 when outside every zone
    pub fn zone_code(&self) -> u8 {
        self.zone.map(|z| z.0).unwrap_or(0)
    }
}

/// All detections of one inference cycle for one camera frame
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    pub camera_id: CameraId,
    pub img_id: u64,
    pub records: Vec<DetectionRecord>,
    pub received_at: DateTime<Utc>,
}

impl DetectionBatch {
    pub fn new(camera_id: CameraId, img_id: u64, records: Vec<DetectionRecord>) -> Self {
        Self {
            camera_id,
            img_id,
            records,
            received_at: Utc::now(),
        }
    }
}

// ============================================================================
// ALERT CLASSIFICATION
// ============================================================================

/// Kind of first-sighting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Hazard,
    Unauthorized,
    Rescue,
}

impl EventKind {
    pub fn code(&self) -> u8 {
        match self {
            EventKind::Hazard => 1,
            EventKind::Unauthorized => 2,
            EventKind::Rescue => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(EventKind::Hazard),
            2 => Some(EventKind::Unauthorized),
            3 => Some(EventKind::Rescue),
            _ => None,
        }
    }
}

/// Decide whether a detection is alertable and as which kind of event.
///
/// Hazard classes alert anywhere. Access-gated classes alert only when the
/// zone's authority level exceeds the class clearance.
pub fn classify(class: &ObjectClass, zone: Option<ZoneId>, access: &AccessCondition) -> Option<EventKind> {
    if class.is_rescue_subject() {
        return Some(EventKind::Rescue);
    }
    if class.is_hazard() {
        return Some(EventKind::Hazard);
    }

    let clearance = class.clearance()?;
    let level = access.level_for(zone?)?;
    (level.value() > clearance).then_some(EventKind::Unauthorized)
}

// ============================================================================
// RUNWAYS AND BIRD RISK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunwayId {
    A,
    B,
}

impl RunwayId {
    pub const ALL: [RunwayId; 2] = [RunwayId::A, RunwayId::B];
}

impl fmt::Display for RunwayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunwayId::A => write!(f, "A"),
            RunwayId::B => write!(f, "B"),
        }
    }
}

/// Occupancy status of a runway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunwayStatus {
    #[default]
    Clear,
    Warning,
}

impl RunwayStatus {
    pub fn code(&self) -> u8 {
        match self {
            RunwayStatus::Clear => 0,
            RunwayStatus::Warning => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunwayStatus::Clear => "CLEAR",
            RunwayStatus::Warning => "WARNING",
        }
    }
}

/// Runways currently usable, as answered to pilots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunwayAvailability {
    All,
    OnlyA,
    OnlyB,
    None,
}

impl RunwayAvailability {
    pub fn from_statuses(a: RunwayStatus, b: RunwayStatus) -> Self {
        match (a, b) {
            (RunwayStatus::Clear, RunwayStatus::Clear) => Self::All,
            (RunwayStatus::Clear, RunwayStatus::Warning) => Self::OnlyA,
            (RunwayStatus::Warning, RunwayStatus::Clear) => Self::OnlyB,
            (RunwayStatus::Warning, RunwayStatus::Warning) => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::OnlyA => "RWY_A",
            Self::OnlyB => "RWY_B",
            Self::None => "NONE",
        }
    }
}

/// Bird strike risk reported by the bird subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BirdRiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl BirdRiskLevel {
    pub fn code(&self) -> u8 {
        match self {
            BirdRiskLevel::Low => 0,
            BirdRiskLevel::Medium => 1,
            BirdRiskLevel::High => 2,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            BirdRiskLevel::Low => "BR_LOW",
            BirdRiskLevel::Medium => "BR_MEDIUM",
            BirdRiskLevel::High => "BR_HIGH",
        }
    }

    pub fn from_wire(text: &str) -> Option<Self> {
        match text {
            "BR_LOW" => Some(BirdRiskLevel::Low),
            "BR_MEDIUM" => Some(BirdRiskLevel::Medium),
            "BR_HIGH" => Some(BirdRiskLevel::High),
            _ => None,
        }
    }
}

// ============================================================================
// ACCESS AUTHORITY
// ============================================================================

/// Zone authority level: 1 open, 2 ground crew only, 3 closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityLevel(u8);

impl AuthorityLevel {
    pub fn new(value: i64) -> CoreResult<Self> {
        match value {
            1..=3 => Ok(Self(value as u8)),
            _ => Err(CoreError::InvalidAuthorityLevel(value.to_string())),
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Authority level of every zone; always exactly [`ZONE_COUNT`] entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCondition([AuthorityLevel; ZONE_COUNT]);

impl AccessCondition {
    /// Build from raw levels, zone 1 first
    pub fn from_levels(levels: &[i64]) -> CoreResult<Self> {
        if levels.len() != ZONE_COUNT {
            return Err(CoreError::WrongZoneCount {
                expected: ZONE_COUNT,
                actual: levels.len(),
            });
        }

        let mut out = [AuthorityLevel(1); ZONE_COUNT];
        for (slot, level) in out.iter_mut().zip(levels) {
            *slot = AuthorityLevel::new(*level)?;
        }
        Ok(Self(out))
    }

    /// Parse the comma separated list used by `AC_UA`
    pub fn parse_wire(text: &str) -> CoreResult<Self> {
        let parts: Vec<&str> = text.split(',').map(str::trim).collect();
        if parts.len() != ZONE_COUNT {
            return Err(CoreError::WrongZoneCount {
                expected: ZONE_COUNT,
                actual: parts.len(),
            });
        }

        let levels = parts
            .iter()
            .map(|p| p.parse::<i64>().map_err(|_| CoreError::InvalidAuthorityLevel(p.to_string())))
            .collect::<CoreResult<Vec<_>>>()?;
        Self::from_levels(&levels)
    }

    pub fn level_for(&self, zone: ZoneId) -> Option<AuthorityLevel> {
        let index = (zone.0 as usize).checked_sub(1)?;
        self.0.get(index).copied()
    }

    pub fn levels(&self) -> [u8; ZONE_COUNT] {
        self.0.map(|l| l.value())
    }

    pub fn to_wire(&self) -> String {
        self.levels()
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for AccessCondition {
    /// Aprons open, taxiways crew-only, runways closed, grass open
    fn default() -> Self {
        Self::from_levels(&[1, 1, 2, 2, 3, 3, 1, 1]).unwrap_or(Self([AuthorityLevel(1); ZONE_COUNT]))
    }
}

// ============================================================================
// PERSISTENCE RECORDS
// ============================================================================

/// A first sighting ready for persistence
#[derive(Debug, Clone)]
pub struct Sighting {
    pub record: DetectionRecord,
    pub kind: EventKind,
    pub detected_at: DateTime<Utc>,
}

/// A first-sighting event as read back from storage
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub object_id: ObjectId,
    pub kind: EventKind,
    pub class: String,
    pub zone: u8,
    pub camera_id: CameraId,
    pub img_id: u64,
    pub map_x: f64,
    pub map_y: f64,
    pub rescue_level: Option<u8>,
    pub image_path: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// One pilot request/response pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionLog {
    pub request_id: i32,
    pub response_id: i32,
    pub requested_at: DateTime<Utc>,
    pub responded_at: DateTime<Utc>,
}

/// Timestamp format used on the admin wire (no commas)
pub fn wire_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_parse() {
        assert_eq!(ObjectId::parse("42").unwrap(), ObjectId(42));
        assert!(ObjectId::parse("abc").is_err());
        assert!(ObjectId::parse("").is_err());
    }

    #[test]
    fn test_camera_id_accepts_string_and_number() {
        let a: CameraId = serde_json::from_str("\"A\"").unwrap();
        let b: CameraId = serde_json::from_str("2").unwrap();
        assert_eq!(a.as_str(), "A");
        assert_eq!(b.as_str(), "2");
    }

    #[test]
    fn test_bbox_normalizes_and_clips() {
        let bbox = BoundingBox::new(110.0, 80.0, 10.0, 20.0);
        assert_eq!(bbox.center(), (60.0, 50.0));
        assert_eq!(bbox.clip_to(50, 50), Some((10, 20, 40, 30)));
        assert_eq!(BoundingBox::new(60.0, 60.0, 70.0, 70.0).clip_to(50, 50), None);
    }

    #[test]
    fn test_classification() {
        let access = AccessCondition::from_levels(&[1, 2, 3, 1, 1, 1, 1, 1]).unwrap();

        assert_eq!(classify(&ObjectClass::Bird, None, &access), Some(EventKind::Hazard));
        assert_eq!(classify(&ObjectClass::FallenPerson, Some(ZoneId(1)), &access), Some(EventKind::Rescue));
        assert_eq!(classify(&ObjectClass::Person, Some(ZoneId(1)), &access), None);
        assert_eq!(classify(&ObjectClass::Person, Some(ZoneId(2)), &access), Some(EventKind::Unauthorized));
        assert_eq!(classify(&ObjectClass::WorkPerson, Some(ZoneId(2)), &access), None);
        assert_eq!(classify(&ObjectClass::WorkVehicle, Some(ZoneId(3)), &access), Some(EventKind::Unauthorized));
        assert_eq!(classify(&ObjectClass::Person, None, &access), None);
        assert_eq!(classify(&ObjectClass::Airplane, Some(ZoneId(3)), &access), None);
    }

    #[test]
    fn test_access_condition_validation() {
        assert!(matches!(
            AccessCondition::parse_wire("1,2,3,1,2,3,1"),
            Err(CoreError::WrongZoneCount { actual: 7, .. })
        ));
        assert!(matches!(
            AccessCondition::parse_wire("1,2,3,1,2,3,1,2,3"),
            Err(CoreError::WrongZoneCount { actual: 9, .. })
        ));
        assert!(matches!(
            AccessCondition::parse_wire("1,2,3,1,2,3,1,4"),
            Err(CoreError::InvalidAuthorityLevel(_))
        ));
        assert!(matches!(
            AccessCondition::parse_wire("0,2,3,1,2,3,1,1"),
            Err(CoreError::InvalidAuthorityLevel(_))
        ));

        let access = AccessCondition::parse_wire("1, 2,3,1,2,3,1,2").unwrap();
        assert_eq!(access.to_wire(), "1,2,3,1,2,3,1,2");
        assert_eq!(access.level_for(ZoneId(3)).unwrap().value(), 3);
        assert!(access.level_for(ZoneId(0)).is_none());
        assert!(access.level_for(ZoneId(9)).is_none());
    }

    #[test]
    fn test_runway_availability() {
        use RunwayStatus::*;
        assert_eq!(RunwayAvailability::from_statuses(Clear, Clear).as_str(), "ALL");
        assert_eq!(RunwayAvailability::from_statuses(Clear, Warning).as_str(), "RWY_A");
        assert_eq!(RunwayAvailability::from_statuses(Warning, Clear).as_str(), "RWY_B");
        assert_eq!(RunwayAvailability::from_statuses(Warning, Warning).as_str(), "NONE");
    }

    #[test]
    fn test_bird_risk_wire() {
        assert_eq!(BirdRiskLevel::from_wire("BR_HIGH"), Some(BirdRiskLevel::High));
        assert_eq!(BirdRiskLevel::High.code(), 2);
        assert_eq!(BirdRiskLevel::from_wire("BR_EXTREME"), None);
    }
}
