//! Infrastructure adapters and runtime bootstrap.

pub mod cache_warmer;
pub mod cdn;
pub mod client;
pub mod error;
pub mod http;
pub mod memory;
pub mod queue;
pub mod runtime;
pub mod sitemap;
pub mod snapshot;
pub mod telemetry;
