//! Wire models for the vehicle cloud API
//!
//! Every decoded node keeps an explicit `extra` map with the payload keys
//! the known fields did not consume, so schema drift on the server side is
//! preserved instead of discarded.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Merged result of one poll cycle, keyed by API field name.
pub type Snapshot = HashMap<String, FieldNode>;

/// Scalar API value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlainValue {
    pub value: Value,
    /// Payload keys not consumed by the known fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl PlainValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            extra: HashMap::new(),
        }
    }
}

/// API value with its measurement timestamp.
///
/// An absent timestamp stays absent; it is never defaulted to the epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedValue {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl TimestampedValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            unit: None,
            timestamp: None,
            extra: HashMap::new(),
        }
    }
}

/// GeoJSON-shaped geometry of a location payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub coordinates: Vec<f64>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationProperties {
    pub heading: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Vehicle position as reported by the location endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: LocationProperties,
    pub geometry: Geometry,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A command the vehicle accepts, as listed by the commands endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableCommand {
    pub command: String,
    pub href: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Terminal result of a command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub vin: String,
    #[serde(alias = "invokeStatus")]
    pub invoke_status: String,
    pub message: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// One decoded snapshot entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldNode {
    Plain(PlainValue),
    Timestamped(TimestampedValue),
    Location(Location),
    CommandResult(CommandResult),
}

impl FieldNode {
    /// Scalar value of the node, if it carries one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Plain(node) => Some(&node.value),
            Self::Timestamped(node) => Some(&node.value),
            Self::Location(_) | Self::CommandResult(_) => None,
        }
    }

    /// Measurement unit, if the node carries one.
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Timestamped(node) => node.unit.as_deref(),
            _ => None,
        }
    }

    /// Timestamp of the node, if the payload carried one.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamped(node) => node.timestamp,
            Self::Location(node) => node.properties.timestamp,
            _ => None,
        }
    }

    /// Look up an unrecognized sibling key preserved from the payload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let extra = match self {
            Self::Plain(node) => &node.extra,
            Self::Timestamped(node) => &node.extra,
            Self::Location(node) => &node.extra,
            Self::CommandResult(node) => &node.extra,
        };
        extra.get(key)
    }
}

impl From<PlainValue> for FieldNode {
    fn from(value: PlainValue) -> Self {
        Self::Plain(value)
    }
}

impl From<TimestampedValue> for FieldNode {
    fn from(value: TimestampedValue) -> Self {
        Self::Timestamped(value)
    }
}

/// Immutable per-session facts about the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vin: String,
    #[serde(rename = "modelYear")]
    pub model_year: u16,
    pub gearbox: String,
    #[serde(rename = "fuelType")]
    pub fuel_type: String,
    #[serde(rename = "externalColour", default)]
    pub external_colour: Option<String>,
    #[serde(rename = "batteryCapacityKWH", default)]
    pub battery_capacity_kwh: Option<f64>,
    pub images: VehicleImages,
    #[serde(rename = "descriptions")]
    pub description: VehicleModel,
}

impl Vehicle {
    /// Whether the vehicle has a battery engine.
    pub fn has_battery_engine(&self) -> bool {
        matches!(self.fuel_type.as_str(), "ELECTRIC" | "PETROL/ELECTRIC")
    }

    /// Whether the vehicle has a combustion engine.
    pub fn has_combustion_engine(&self) -> bool {
        matches!(
            self.fuel_type.as_str(),
            "DIESEL" | "PETROL" | "PETROL/ELECTRIC"
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleImages {
    #[serde(rename = "exteriorImageUrl")]
    pub exterior_image_url: String,
    #[serde(rename = "internalImageUrl")]
    pub internal_image_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleModel {
    pub model: String,
    #[serde(default)]
    pub upholstery: Option<String>,
    pub steering: String,
}

/// Token pair returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Outcome of one externally visible step of the login flow.
///
/// `authenticate` resolves to `OtpRequired` or `Completed`; `submit_otp`
/// resolves to `Completed`. The intermediate statuses are followed through
/// inside the auth client but are part of the protocol's state space.
#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    /// Credentials must be submitted to the given URL.
    CredentialsRequired { next_url: String },
    /// A one-time passcode must be posted to the given URL.
    OtpRequired { next_url: String },
    /// The passcode was accepted; the flow continues at the given URL.
    OtpVerified { next_url: String },
    /// The flow finished and produced a token pair.
    Completed { token: TokenPair },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vehicle(fuel_type: &str) -> Vehicle {
        Vehicle {
            vin: "YV1TESTVIN000001".to_string(),
            model_year: 2023,
            gearbox: "AUTOMATIC".to_string(),
            fuel_type: fuel_type.to_string(),
            external_colour: Some("Onyx Black".to_string()),
            battery_capacity_kwh: Some(67.0),
            images: VehicleImages {
                exterior_image_url: "https://cdn.example.com/ext.png".to_string(),
                internal_image_url: "https://cdn.example.com/int.png".to_string(),
            },
            description: VehicleModel {
                model: "XC40".to_string(),
                upholstery: None,
                steering: "LEFT".to_string(),
            },
        }
    }

    #[test]
    fn engine_predicates_follow_fuel_type() {
        let cases = [
            ("ELECTRIC", true, false),
            ("PETROL/ELECTRIC", true, true),
            ("DIESEL", false, true),
            ("PETROL", false, true),
            ("NONE", false, false),
        ];

        for (fuel_type, battery, combustion) in cases {
            let vehicle = vehicle(fuel_type);
            assert_eq!(vehicle.has_battery_engine(), battery, "{fuel_type}");
            assert_eq!(vehicle.has_combustion_engine(), combustion, "{fuel_type}");
        }
    }

    #[test]
    fn vehicle_decodes_wire_names() {
        let vehicle: Vehicle = serde_json::from_value(json!({
            "vin": "YV1TESTVIN000001",
            "modelYear": 2024,
            "gearbox": "AUTOMATIC",
            "fuelType": "ELECTRIC",
            "batteryCapacityKWH": 78.0,
            "images": {
                "exteriorImageUrl": "https://cdn.example.com/ext.png",
                "internalImageUrl": "https://cdn.example.com/int.png"
            },
            "descriptions": { "model": "EX30", "upholstery": null, "steering": "LEFT" }
        }))
        .unwrap();

        assert_eq!(vehicle.model_year, 2024);
        assert_eq!(vehicle.battery_capacity_kwh, Some(78.0));
        assert_eq!(vehicle.external_colour, None);
        assert_eq!(vehicle.description.model, "EX30");
    }

    #[test]
    fn timestamped_value_round_trips() {
        let raw = json!({
            "value": 42.5,
            "unit": "km",
            "timestamp": "2024-11-02T09:30:00Z"
        });

        let field: TimestampedValue = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(field.value, json!(42.5));
        assert_eq!(field.unit.as_deref(), Some("km"));
        assert!(field.timestamp.is_some());

        let encoded = serde_json::to_value(&field).unwrap();
        let decoded: TimestampedValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, field);
    }

    #[test]
    fn missing_timestamp_stays_absent() {
        let field: TimestampedValue =
            serde_json::from_value(json!({ "value": "LOCKED" })).unwrap();
        assert_eq!(field.timestamp, None);

        let encoded = serde_json::to_value(&field).unwrap();
        assert!(encoded.get("timestamp").is_none());

        let decoded: TimestampedValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.timestamp, None);
    }

    #[test]
    fn unknown_payload_keys_are_preserved() {
        let field: TimestampedValue = serde_json::from_value(json!({
            "value": "UNAVAILABLE",
            "timestamp": "2024-11-02T09:30:00Z",
            "unavailable_reason": "no_internet"
        }))
        .unwrap();

        let node = FieldNode::from(field);
        assert_eq!(node.get("unavailable_reason"), Some(&json!("no_internet")));
        assert_eq!(node.get("unknown"), None);
    }

    #[test]
    fn command_result_accepts_wire_key() {
        let result: CommandResult = serde_json::from_value(json!({
            "vin": "YV1TESTVIN000001",
            "invokeStatus": "COMPLETED",
            "message": ""
        }))
        .unwrap();

        assert_eq!(result.invoke_status, "COMPLETED");
        assert!(result.extra.is_empty());
    }
}
