//! Shared domain enumerations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    InvalidateCache,
    WarmCache,
    TransformMedia,
    RemoveTransforms,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::InvalidateCache => "invalidate_cache",
            JobType::WarmCache => "warm_cache",
            JobType::TransformMedia => "transform_media",
            JobType::RemoveTransforms => "remove_transforms",
        }
    }
}

impl TryFrom<&str> for JobType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "invalidate_cache" => Ok(JobType::InvalidateCache),
            "warm_cache" => Ok(JobType::WarmCache),
            "transform_media" => Ok(JobType::TransformMedia),
            "remove_transforms" => Ok(JobType::RemoveTransforms),
            _ => Err(()),
        }
    }
}

/// Mutation events reported by the content graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationEvent {
    BeforeSave,
    BeforeResave,
    BeforeUpdateSlug,
    BeforeDelete,
    BeforeRestore,
}

impl MutationEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationEvent::BeforeSave => "before_save",
            MutationEvent::BeforeResave => "before_resave",
            MutationEvent::BeforeUpdateSlug => "before_update_slug",
            MutationEvent::BeforeDelete => "before_delete",
            MutationEvent::BeforeRestore => "before_restore",
        }
    }
}
