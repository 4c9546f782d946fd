//! Collaborator traits the pipelines consume: content graph, job queue,
//! mutual-exclusion lock and CDN purge.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    content::{Asset, AssetKind, Element, ElementId, SaveOptions, SiteId, VolumeId},
    types::JobType,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("content graph error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Filter for batch asset queries. Empty lists mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetQuery {
    pub volume_ids: Vec<VolumeId>,
    pub kinds: Vec<AssetKind>,
}

impl AssetQuery {
    pub fn matches(&self, asset: &Asset) -> bool {
        (self.volume_ids.is_empty() || self.volume_ids.contains(&asset.volume_id))
            && (self.kinds.is_empty() || self.kinds.contains(&asset.kind))
    }
}

/// Source of truth for elements, assets and their relations.
#[async_trait]
pub trait ContentGraph: Send + Sync {
    /// Every site-specific instance of the element, or empty when it no longer exists.
    async fn element_in_all_sites(&self, id: ElementId) -> Result<Vec<Element>, RepoError>;

    /// Elements that reference `element`.
    async fn related_to(&self, element: &Element) -> Result<Vec<Element>, RepoError>;

    /// Every element of the given section/type handles on one site.
    async fn elements_by_handles(
        &self,
        handles: &[String],
        site_id: SiteId,
    ) -> Result<Vec<Element>, RepoError>;

    /// The top-level owner of a nested element; the element itself when it has no owner.
    async fn root_owner(&self, element: &Element) -> Result<Element, RepoError>;

    async fn asset_by_id(&self, id: ElementId) -> Result<Option<Asset>, RepoError>;

    async fn assets(&self, query: &AssetQuery) -> Result<Vec<Asset>, RepoError>;

    async fn save_asset(&self, asset: &Asset, options: SaveOptions) -> Result<(), RepoError>;
}

/// Non-blocking keyed mutual exclusion.
#[async_trait]
pub trait MutexLock: Send + Sync {
    /// Returns false when the key is already held.
    async fn acquire(&self, key: &str) -> bool;

    async fn release(&self, key: &str);
}

/// A unit of background work as handed to the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub ttr: Duration,
    pub retryable: bool,
    pub description: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to encode job payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("job queue unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Push a job and return its identifier without waiting for execution.
    async fn push(&self, job: JobDescriptor) -> Result<String, QueueError>;

    /// Descriptions of jobs that are pending or running.
    async fn active_descriptions(&self) -> Result<Vec<String>, QueueError>;
}

/// Structured CDN purge result; transport failures are reported here rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl PurgeOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            message: None,
            errors: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            errors: Vec::new(),
        }
    }
}

/// Setup mistakes surface as errors; everything else becomes a failed [`PurgeOutcome`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CdnError {
    #[error("cdn purge is not configured: missing {missing}")]
    NotConfigured { missing: &'static str },
}

#[async_trait]
pub trait CdnPurger: Send + Sync {
    async fn purge_urls(&self, urls: &[String]) -> Result<PurgeOutcome, CdnError>;

    async fn purge_all(&self) -> Result<PurgeOutcome, CdnError>;
}
