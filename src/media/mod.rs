//! Media transform pipeline: eligibility, planning, execution and the
//! record list that downstream templates read.
//!
//! Asset hooks enqueue per-asset jobs; the job runs
//! [`AssetLifecycleCoordinator::transform_image`], which asks the
//! [`MediaTransformPlanner`] for the missing widths, fetches each one through
//! the [`TransformExecutor`], and persists the merged
//! [`TransformRecord`](crate::domain::transforms::TransformRecord) list.

pub mod adapter;
mod error;
pub mod executor;
pub mod lifecycle;
pub mod planner;
pub mod records;

pub use adapter::TransformAdapter;
pub use error::TransformError;
pub use executor::TransformExecutor;
pub use lifecycle::{AssetLifecycleCoordinator, LifecycleError, OnDemand, TransformOutcome};
pub use planner::{Ineligible, MediaTransformPlanner, PlannedTransform};
pub use records::{TransformRecordStore, src_or_original, srcset};
