//! Collaborator contracts, background jobs and the service registry.

pub mod error;
pub mod jobs;
pub mod registry;
pub mod repos;
