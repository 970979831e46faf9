//! Authentication against the vehicle cloud

pub mod client;
pub mod headers;

pub use client::{AuthClient, AuthEndpoints};
pub use headers::HeaderCache;
