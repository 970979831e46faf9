//! vlink core library
//!
//! Bridges a cloud vehicle API (interactive login, status polling, remote
//! commands) into a periodically refreshed snapshot model: the auth client
//! drives the multi-step login and token refresh, the vehicle API client
//! decodes per-subsystem payloads into typed snapshot fragments, the
//! session store persists credentials and the request quota across
//! restarts, and the coordinator fans the polling out and publishes one
//! consistent snapshot per cycle.

pub mod api;
pub mod auth;
pub mod coordinator;
pub mod descriptors;
pub mod error;
pub mod models;
pub mod store;
pub mod units;

// Re-export commonly used types
pub use api::{ApiEndpoints, VehicleApi};
pub use auth::{AuthClient, AuthEndpoints, HeaderCache};
pub use coordinator::{Capabilities, Coordinator, FIELD_BATTERY_CAPACITY, FIELD_REQUEST_COUNT};
pub use error::{VlinkError, VlinkResult};
pub use models::{
    Authorization, CommandResult, FieldNode, Snapshot, TokenPair, Vehicle,
};
pub use store::{
    FileSessionStore, MemorySessionStore, SessionRecord, SessionStore, SharedStore, StoreError,
};
pub use units::{FuelUnit, convert_fuel_consumption};
