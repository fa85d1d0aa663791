use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// One text region reported by the OCR engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// X coordinate of the top-left corner of the bounding box.
    pub left: f64,
    pub text: String,
    pub confidence: f64,
}

/// A registry entry, exactly as stored in the `vehicle` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub owner_name: String,
    pub engine_number: String,
    pub chassis_number: String,
    pub plate_number: String,
    pub vehicle_type: String,
    pub status: String,
}

/// Outcome of the registry lookup for a single scan.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleMatch {
    Registered(Vehicle),
    NotRegistered,
    Unreadable,
}

impl VehicleMatch {
    pub fn is_registered(&self) -> bool {
        matches!(self, VehicleMatch::Registered(_))
    }
}

// Registered vehicles serialize as the bare record; the other outcomes as a
// `{"message": ...}` object so existing consumers keep working.
impl Serialize for VehicleMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VehicleMatch::Registered(vehicle) => vehicle.serialize(serializer),
            VehicleMatch::NotRegistered => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("message", "Vehicle not registered")?;
                map.end()
            }
            VehicleMatch::Unreadable => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("message", "Plate unreadable")?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawText {
    pub text: String,
    pub prob: f64,
}

/// The payload returned by `POST /detect` and replayed from the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectResponse {
    pub plate: Option<String>,
    pub raw: Vec<RawText>,
    #[serde(rename = "match")]
    pub vehicle: VehicleMatch,
}

pub const UNREADABLE_PLATE: &str = "PLATE UNREADABLE";
pub const VERDICT_REGISTERED: &str = "Registered";
pub const VERDICT_NOT_REGISTERED: &str = "Not Registered";

/// A row to be written to the scan log.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub plate_text: String,
    pub is_match: String,
    pub created_at: String,
}

impl ScanRecord {
    pub fn new(plate: Option<&str>, matched: bool, created_at: String) -> ScanRecord {
        ScanRecord {
            plate_text: plate.unwrap_or(UNREADABLE_PLATE).to_string(),
            is_match: if matched {
                VERDICT_REGISTERED
            } else {
                VERDICT_NOT_REGISTERED
            }
            .to_string(),
            created_at,
        }
    }
}

/// A row read back from the scan log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEntry {
    pub id: i64,
    pub plate_text: String,
    pub is_match: String,
    pub created_at: String,
}
