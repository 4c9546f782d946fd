//! Static page cache.
//!
//! Rendered HTML is written to `<base_path>/<site host>/<uri>/index.html` and
//! served by the front web server without touching the application. Content
//! mutations are mapped to the stale URLs through the configured relation map:
//!
//! ```toml
//! [cache.relations]
//! blog = ["news", "/listing"]   # blog changes also stale news pages and /listing
//! shop = "all"                  # shop changes wipe everything
//! ```
//!
//! An empty relation map makes every mutation a full wipe.

mod config;
mod coordinator;
mod keys;
pub(crate) mod lock;
mod middleware;
mod patterns;
mod relations;
mod store;

pub use config::CacheConfig;
pub use coordinator::{
    CaptureOutcome, CapturedRequest, CapturedResponse, INVALIDATE_ALL_LOCK, InvalidationCoordinator,
    InvalidationError, InvalidationReport, InvalidationRequest, MutationOutcome, ResponseFormat,
    SkipReason, element_lock_key,
};
pub use keys::{CacheKeyError, CacheKeying, HOME_PLACEHOLDER, site_host_path};
pub use middleware::{CacheState, CaptureFlags, static_cache_layer};
pub use patterns::{PatternSet, matches_uri_patterns};
pub use relations::{CacheRelationMap, RelationTarget, Resolution, SiteUrl, resolve};
pub use store::{CacheStoreError, StaticCacheStore};
