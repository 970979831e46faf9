//! Field descriptors for presentation layers
//!
//! A descriptor couples a stable key with the snapshot fields that feed it,
//! an availability predicate over the vehicle, and an optional value
//! transform. Presentation code pairs a descriptor with its own widget
//! type; nothing here knows how values are rendered.

use serde_json::Value;

use crate::models::{FieldNode, Snapshot, Vehicle};
use crate::units::{self, FuelUnit};

type AvailableFn = fn(&Vehicle) -> bool;
type TransformFn = fn(&FieldNode, FuelUnit) -> Option<Value>;

pub struct FieldDescriptor {
    /// Stable identifier for consumers.
    pub key: &'static str,
    /// Snapshot fields that can feed this descriptor, in preference order.
    pub api_fields: &'static [&'static str],
    /// Whether the vehicle exposes this value at all.
    pub available: AvailableFn,
    /// Transform applied to the raw field, if any.
    pub transform: Option<TransformFn>,
}

impl FieldDescriptor {
    /// Resolve the descriptor's current value from a snapshot.
    pub fn resolve(&self, snapshot: &Snapshot, unit: FuelUnit) -> Option<Value> {
        let node = self
            .api_fields
            .iter()
            .find_map(|field| snapshot.get(*field))?;
        match self.transform {
            Some(transform) => transform(node, unit),
            None => node.value().cloned(),
        }
    }
}

fn always(_: &Vehicle) -> bool {
    true
}

fn battery(vehicle: &Vehicle) -> bool {
    vehicle.has_battery_engine()
}

fn combustion(vehicle: &Vehicle) -> bool {
    vehicle.has_combustion_engine()
}

/// An availability field may carry the reason the car is unreachable in a
/// sibling key; prefer it over the plain value.
fn availability_status(node: &FieldNode, _: FuelUnit) -> Option<Value> {
    match node.get("unavailable_reason") {
        Some(reason) if !reason.is_null() => Some(reason.clone()),
        _ => node.value().cloned(),
    }
}

fn fuel_consumption(node: &FieldNode, unit: FuelUnit) -> Option<Value> {
    let raw = node.value()?.as_f64()?;
    serde_json::Number::from_f64(units::convert_fuel_consumption(raw, unit)).map(Value::Number)
}

fn time_to_service(node: &FieldNode, _: FuelUnit) -> Option<Value> {
    let raw = node.value()?.as_f64()?;
    Some(units::service_time_in_days(raw, node.unit()).into())
}

fn engine_time_to_service(node: &FieldNode, _: FuelUnit) -> Option<Value> {
    let raw = node.value()?.as_f64()?;
    Some(units::engine_service_time_in_days(raw).into())
}

pub const DESCRIPTORS: &[FieldDescriptor] = &[
    FieldDescriptor {
        key: "api_status",
        api_fields: &["apiStatus"],
        available: always,
        transform: None,
    },
    FieldDescriptor {
        key: "availability",
        api_fields: &["availabilityStatus"],
        available: always,
        transform: Some(availability_status),
    },
    FieldDescriptor {
        key: "average_energy_consumption",
        api_fields: &["averageEnergyConsumption", "averageEnergyConsumptionAutomatic"],
        available: battery,
        transform: None,
    },
    FieldDescriptor {
        key: "average_fuel_consumption",
        api_fields: &["averageFuelConsumption", "averageFuelConsumptionAutomatic"],
        available: combustion,
        transform: Some(fuel_consumption),
    },
    FieldDescriptor {
        key: "average_speed",
        api_fields: &["averageSpeed", "averageSpeedAutomatic"],
        available: always,
        transform: None,
    },
    FieldDescriptor {
        key: "battery_capacity",
        api_fields: &["batteryCapacityKWH"],
        available: battery,
        transform: None,
    },
    FieldDescriptor {
        key: "battery_charge_level",
        api_fields: &["batteryChargeLevel"],
        available: battery,
        transform: None,
    },
    FieldDescriptor {
        key: "charging_connection_status",
        api_fields: &["chargingConnectionStatus"],
        available: battery,
        transform: None,
    },
    FieldDescriptor {
        key: "charging_system_status",
        api_fields: &["chargingSystemStatus"],
        available: battery,
        transform: None,
    },
    FieldDescriptor {
        key: "distance_to_empty_battery",
        api_fields: &["distanceToEmptyBattery"],
        available: battery,
        transform: None,
    },
    FieldDescriptor {
        key: "distance_to_empty_tank",
        api_fields: &["distanceToEmptyTank"],
        available: combustion,
        transform: None,
    },
    FieldDescriptor {
        key: "distance_to_service",
        api_fields: &["distanceToService"],
        available: always,
        transform: None,
    },
    FieldDescriptor {
        key: "engine_time_to_service",
        api_fields: &["engineHoursToService"],
        available: always,
        transform: Some(engine_time_to_service),
    },
    FieldDescriptor {
        key: "estimated_charging_time",
        api_fields: &["estimatedChargingTime"],
        available: battery,
        transform: None,
    },
    FieldDescriptor {
        key: "fuel_amount",
        api_fields: &["fuelAmount"],
        available: combustion,
        transform: None,
    },
    FieldDescriptor {
        key: "odometer",
        api_fields: &["odometer"],
        available: always,
        transform: None,
    },
    FieldDescriptor {
        key: "request_count",
        api_fields: &["apiRequestCount"],
        available: always,
        transform: None,
    },
    FieldDescriptor {
        key: "time_to_service",
        api_fields: &["timeToService"],
        available: always,
        transform: Some(time_to_service),
    },
    FieldDescriptor {
        key: "trip_meter_automatic",
        api_fields: &["tripMeterAutomatic"],
        available: always,
        transform: None,
    },
    FieldDescriptor {
        key: "trip_meter_manual",
        api_fields: &["tripMeterManual"],
        available: always,
        transform: None,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimestampedValue;
    use serde_json::json;
    use std::collections::HashMap;

    fn descriptor(key: &str) -> &'static FieldDescriptor {
        DESCRIPTORS
            .iter()
            .find(|descriptor| descriptor.key == key)
            .expect("descriptor exists")
    }

    fn snapshot_with(field: &str, node: TimestampedValue) -> Snapshot {
        HashMap::from([(field.to_string(), FieldNode::Timestamped(node))])
    }

    #[test]
    fn fuel_consumption_descriptor_converts_units() {
        let snapshot = snapshot_with("averageFuelConsumption", TimestampedValue::new(9.0));
        let descriptor = descriptor("average_fuel_consumption");

        assert_eq!(
            descriptor.resolve(&snapshot, FuelUnit::LiterPer100Km),
            Some(json!(9.0))
        );
        assert_eq!(
            descriptor.resolve(&snapshot, FuelUnit::MpgUk),
            Some(json!(31.39))
        );
        assert_eq!(
            descriptor.resolve(&snapshot, FuelUnit::MpgUs),
            Some(json!(26.13))
        );
    }

    #[test]
    fn descriptors_fall_back_through_api_fields() {
        let snapshot = snapshot_with(
            "averageSpeedAutomatic",
            TimestampedValue::new(63),
        );
        let descriptor = descriptor("average_speed");

        assert_eq!(
            descriptor.resolve(&snapshot, FuelUnit::default()),
            Some(json!(63))
        );
        assert_eq!(
            descriptor.resolve(&Snapshot::new(), FuelUnit::default()),
            None
        );
    }

    #[test]
    fn availability_prefers_unavailable_reason() {
        let mut node = TimestampedValue::new("UNAVAILABLE");
        node.extra
            .insert("unavailable_reason".to_string(), json!("no_internet"));
        let snapshot = snapshot_with("availabilityStatus", node);

        let descriptor = descriptor("availability");
        assert_eq!(
            descriptor.resolve(&snapshot, FuelUnit::default()),
            Some(json!("no_internet"))
        );
    }

    #[test]
    fn service_time_descriptors_normalise_to_days() {
        let mut node = TimestampedValue::new(2.0);
        node.unit = Some("months".to_string());
        let snapshot = snapshot_with("timeToService", node);
        assert_eq!(
            descriptor("time_to_service").resolve(&snapshot, FuelUnit::default()),
            Some(json!(60))
        );

        let snapshot = snapshot_with("engineHoursToService", TimestampedValue::new(310.0));
        assert_eq!(
            descriptor("engine_time_to_service").resolve(&snapshot, FuelUnit::default()),
            Some(json!(13))
        );
    }

    #[test]
    fn availability_predicates_follow_engine_type() {
        use crate::models::{VehicleImages, VehicleModel};

        let electric = Vehicle {
            vin: "YV1TESTVIN000001".to_string(),
            model_year: 2024,
            gearbox: "AUTOMATIC".to_string(),
            fuel_type: "ELECTRIC".to_string(),
            external_colour: None,
            battery_capacity_kwh: Some(78.0),
            images: VehicleImages {
                exterior_image_url: String::new(),
                internal_image_url: String::new(),
            },
            description: VehicleModel {
                model: "EX30".to_string(),
                upholstery: None,
                steering: "LEFT".to_string(),
            },
        };

        assert!((descriptor("battery_charge_level").available)(&electric));
        assert!(!(descriptor("fuel_amount").available)(&electric));
        assert!((descriptor("odometer").available)(&electric));
    }
}
