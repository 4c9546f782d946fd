//! Domain value types shared by the cache and media pipelines.

pub mod content;
pub mod transforms;
pub mod types;
