//! Static page cache with relation-aware invalidation, plus an asynchronous
//! media-transform pipeline.
//!
//! The core lives in [`cache`] and [`media`]; both talk to the host system only
//! through the collaborator traits in [`application::repos`]. [`infra`] ships
//! in-process implementations of those traits and the admin HTTP surface.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod media;
