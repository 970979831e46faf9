//! Poll-cycle planning
//!
//! Which calls a cycle issues depends on immutable vehicle facts (engine
//! type) and on the capability flags computed once at setup. The selection
//! is pure so it can be tested without a network.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{FieldNode, Vehicle};

/// Sentinel the API uses for fields a vehicle does not report.
const UNSPECIFIED: &str = "UNSPECIFIED";

/// Which optional subsystems answered the setup probes with real data.
///
/// Computed once per session; a capability is not re-evaluated until a new
/// session probes again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_location: bool,
    pub supports_doors: bool,
    pub supports_tyres: bool,
    pub supports_warnings: bool,
    pub supports_windows: bool,
    /// Field keys observed as null-or-UNSPECIFIED during probing.
    pub unsupported_keys: HashSet<String>,
}

/// One call of a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCall {
    ApiStatus,
    Availability,
    Brakes,
    Diagnostics,
    EngineStatus,
    EngineWarnings,
    Odometer,
    Statistics,
    FuelStatus,
    RechargeStatus,
    Doors,
    Location,
    Tyres,
    Warnings,
    Windows,
}

impl PollCall {
    /// The API status probe is served outside the metered API.
    pub fn counts_against_quota(self) -> bool {
        !matches!(self, Self::ApiStatus)
    }
}

/// Build the call list for one cycle, in fixed issue order.
///
/// The order determines which fragment wins on a key collision during the
/// merge, so it must stay deterministic.
pub fn build_plan(vehicle: &Vehicle, capabilities: &Capabilities) -> Vec<PollCall> {
    let mut plan = vec![
        PollCall::ApiStatus,
        PollCall::Availability,
        PollCall::Brakes,
        PollCall::Diagnostics,
        PollCall::EngineStatus,
        PollCall::EngineWarnings,
        PollCall::Odometer,
        PollCall::Statistics,
    ];

    if vehicle.has_combustion_engine() {
        plan.push(PollCall::FuelStatus);
    }
    if vehicle.has_battery_engine() {
        plan.push(PollCall::RechargeStatus);
    }

    if capabilities.supports_doors {
        plan.push(PollCall::Doors);
    }
    if capabilities.supports_location {
        plan.push(PollCall::Location);
    }
    if capabilities.supports_tyres {
        plan.push(PollCall::Tyres);
    }
    if capabilities.supports_warnings {
        plan.push(PollCall::Warnings);
    }
    if capabilities.supports_windows {
        plan.push(PollCall::Windows);
    }

    plan
}

/// Whether a probed field carries a real value.
pub fn field_supported(node: &FieldNode) -> bool {
    match node.value() {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => text != UNSPECIFIED,
        Some(_) => true,
    }
}

/// A probed subsystem is supported when any of its fields carries a real
/// value; an empty or all-UNSPECIFIED response means the vehicle does not
/// expose it.
pub fn subsystem_supported(fields: &HashMap<String, FieldNode>) -> bool {
    fields.values().any(field_supported)
}
