//! Vehicle data and command endpoints

pub mod client;

pub use client::{ApiEndpoints, VehicleApi};
