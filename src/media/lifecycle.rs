//! Asset mutation hooks and the transform/remove operations they drive.

use std::{path::Path, sync::Arc};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::{
    error::TransformError,
    executor::TransformExecutor,
    planner::MediaTransformPlanner,
    records::merge,
};
use crate::{
    application::{
        jobs::{TransformJobPayload, enqueue_transform_job},
        repos::{AssetQuery, ContentGraph, JobQueue, QueueError, RepoError},
    },
    domain::{
        content::{Asset, AssetKind, ElementId, SaveOptions, VolumeId},
        transforms::{MediaTransformSpec, TransformRecord},
    },
};

const TARGET: &str = "quire::media::lifecycle";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("failed to encode transform records: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    NotFound,
    Ineligible(&'static str),
    /// Every requested width already exists.
    UpToDate,
    /// Records were persisted; holds the full merged list.
    Transformed(Vec<TransformRecord>),
    /// Nothing succeeded; the asset was left untouched.
    Failed,
}

impl TransformOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformOutcome::NotFound => "not_found",
            TransformOutcome::Ineligible(reason) => reason,
            TransformOutcome::UpToDate => "up_to_date",
            TransformOutcome::Transformed(_) => "transformed",
            TransformOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnDemand {
    Available(Vec<TransformRecord>),
    Enqueued(String),
}

pub struct AssetLifecycleCoordinator {
    graph: Arc<dyn ContentGraph>,
    queue: Arc<dyn JobQueue>,
    planner: MediaTransformPlanner,
    executor: TransformExecutor,
}

impl AssetLifecycleCoordinator {
    pub fn new(
        graph: Arc<dyn ContentGraph>,
        queue: Arc<dyn JobQueue>,
        planner: MediaTransformPlanner,
        executor: TransformExecutor,
    ) -> Self {
        Self {
            graph,
            queue,
            planner,
            executor,
        }
    }

    pub fn planner(&self) -> &MediaTransformPlanner {
        &self.planner
    }

    /// Generate the missing variants of one asset and persist the merged record list.
    #[instrument(skip_all, fields(asset_id = asset_id, forced = forced))]
    pub async fn transform_image(
        &self,
        asset_id: ElementId,
        forced: bool,
        specs: &[MediaTransformSpec],
    ) -> Result<TransformOutcome, LifecycleError> {
        let Some(mut asset) = self.graph.asset_by_id(asset_id).await? else {
            return Ok(TransformOutcome::NotFound);
        };
        if let Err(reason) = self.planner.eligibility(&asset, forced, false) {
            debug!(target = TARGET, asset_id, reason = reason.as_str(), "Skipping transform");
            return Ok(TransformOutcome::Ineligible(reason.as_str()));
        }

        let records = self.planner.records();
        let existing = records.read(&asset);
        let missing = self.planner.unsatisfied(&asset, specs, &existing);
        if missing.is_empty() {
            return Ok(TransformOutcome::UpToDate);
        }

        let mut fresh = Vec::with_capacity(missing.len());
        for spec in &missing {
            // Failures are logged by the executor; the remaining specs still run.
            if let Ok(record) = self.executor.execute(&asset, spec).await {
                fresh.push(record);
            }
        }
        if fresh.is_empty() {
            return Ok(TransformOutcome::Failed);
        }

        let merged = merge(&existing, &fresh);
        records.write(&mut asset, &merged)?;
        self.graph.save_asset(&asset, SaveOptions::skip_hooks()).await?;

        info!(
            target = TARGET,
            asset_id,
            created = fresh.len(),
            total = merged.len(),
            "Stored media transforms"
        );
        Ok(TransformOutcome::Transformed(merged))
    }

    /// Clear the record field and remove every variant on disk.
    pub async fn delete_transformed_image(
        &self,
        asset: &mut Asset,
        skip_save: bool,
    ) -> Result<(), LifecycleError> {
        self.planner.records().clear(asset);
        if !skip_save {
            self.graph.save_asset(asset, SaveOptions::skip_hooks()).await?;
        }
        self.remove_variants(asset).await
    }

    /// Before-save hook: a renamed or moved asset loses its stale variants.
    #[instrument(skip_all, fields(asset_id = asset.id))]
    pub async fn on_before_save(
        &self,
        asset: &mut Asset,
        previous: Option<&Asset>,
        options: SaveOptions,
    ) -> Result<(), LifecycleError> {
        if options.skip_hooks {
            return Ok(());
        }
        let Some(previous) = previous else {
            return Ok(());
        };
        if previous.url == asset.url {
            return Ok(());
        }

        debug!(
            target = TARGET,
            asset_id = asset.id,
            from = %previous.url,
            to = %asset.url,
            "Asset moved; clearing transforms"
        );
        self.planner.records().clear(asset);
        self.remove_variants(previous).await
    }

    /// After-save hook: enqueue a transform job for an eligible asset.
    #[instrument(skip_all, fields(asset_id = asset.id))]
    pub async fn on_after_save(
        &self,
        asset: &Asset,
        options: SaveOptions,
    ) -> Result<Option<String>, LifecycleError> {
        if let Err(reason) = self.planner.eligibility(asset, false, options.skip_hooks) {
            debug!(
                target = TARGET,
                asset_id = asset.id,
                reason = reason.as_str(),
                "Not enqueueing transform"
            );
            return Ok(None);
        }

        let payload = TransformJobPayload {
            asset_id: asset.id,
            forced: false,
            specs: Vec::new(),
        };
        let job_id = enqueue_transform_job(self.queue.as_ref(), &payload).await?;
        Ok(Some(job_id))
    }

    /// Before-delete hook: variants go with the asset, no write-back.
    pub async fn on_before_delete(&self, asset: &mut Asset) -> Result<(), LifecycleError> {
        self.delete_transformed_image(asset, true).await
    }

    /// Serve existing widths, or enqueue a forced job scoped to the missing ones.
    pub async fn transform_media_on_demand(
        &self,
        asset: &Asset,
        specs: &[MediaTransformSpec],
    ) -> Result<OnDemand, LifecycleError> {
        let existing = self.planner.records().read(asset);
        let missing = self.planner.unsatisfied(asset, specs, &existing);
        if missing.is_empty() {
            return Ok(OnDemand::Available(existing));
        }

        let payload = TransformJobPayload {
            asset_id: asset.id,
            forced: true,
            specs: missing,
        };
        let job_id = enqueue_transform_job(self.queue.as_ref(), &payload).await?;
        Ok(OnDemand::Enqueued(job_id))
    }

    /// Enqueue a transform job for every eligible asset, optionally within some volumes.
    pub async fn transform_images(
        &self,
        forced: bool,
        volumes: &[VolumeId],
    ) -> Result<usize, LifecycleError> {
        let query = AssetQuery {
            volume_ids: volumes.to_vec(),
            kinds: vec![AssetKind::Image, AssetKind::Video],
        };

        let mut enqueued = 0;
        for asset in self.graph.assets(&query).await? {
            if !self.planner.can_transform(&asset, forced) {
                continue;
            }
            let payload = TransformJobPayload {
                asset_id: asset.id,
                forced,
                specs: Vec::new(),
            };
            enqueue_transform_job(self.queue.as_ref(), &payload).await?;
            enqueued += 1;
        }

        info!(target = TARGET, enqueued, forced, "Enqueued batch transforms");
        Ok(enqueued)
    }

    /// Clear records and variants from every asset that has any.
    pub async fn remove_transforms(&self) -> Result<usize, LifecycleError> {
        let mut removed = 0;
        for mut asset in self.graph.assets(&AssetQuery::default()).await? {
            if !self.planner.records().has_records(&asset) {
                continue;
            }
            self.delete_transformed_image(&mut asset, false).await?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn remove_variants(&self, asset: &Asset) -> Result<(), LifecycleError> {
        let dir = self.executor.transform_dir(asset)?;
        remove_dir(&dir).await;
        Ok(())
    }
}

async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            target = TARGET,
            path = %dir.display(),
            error = %err,
            "Failed to remove transform directory"
        ),
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        domain::content::{FieldAccessor, Site},
        infra::{memory::MemoryContentGraph, queue::LocalJobQueue},
        media::planner::tests::{image, media_settings},
    };

    struct Fixture {
        graph: Arc<MemoryContentGraph>,
        queue: Arc<LocalJobQueue>,
        lifecycle: AssetLifecycleCoordinator,
        root: TempDir,
    }

    fn fixture(server: &MockServer) -> Fixture {
        let root = TempDir::new().expect("tempdir");
        let mut settings = media_settings();
        settings.api_url = server.url("/");
        settings.transform_dir = root.path().to_path_buf();

        let graph = Arc::new(MemoryContentGraph::default());
        let queue = Arc::new(LocalJobQueue::default());
        let executor = TransformExecutor::new(
            reqwest::Client::new(),
            settings.clone(),
            vec![Site::new(1, "https://example.com/")],
        );
        let lifecycle = AssetLifecycleCoordinator::new(
            graph.clone(),
            queue.clone(),
            MediaTransformPlanner::new(settings),
            executor,
        );
        Fixture {
            graph,
            queue,
            lifecycle,
            root,
        }
    }

    #[tokio::test]
    async fn transform_persists_sorted_records_and_skips_hooks() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200).body("bytes");
            })
            .await;
        let fx = fixture(&server);
        fx.graph.insert_asset(image(1, "a.jpg"));

        let outcome = fx.lifecycle.transform_image(1, false, &[]).await.expect("run");

        let TransformOutcome::Transformed(records) = outcome else {
            panic!("expected transformed outcome");
        };
        assert_eq!(
            records.iter().map(|record| record.width).collect::<Vec<_>>(),
            vec![400, 800]
        );
        assert_eq!(fx.graph.saves(), vec![(1, SaveOptions::skip_hooks())]);
        let stored = fx.graph.asset(1).expect("asset");
        assert!(stored.field("transformUrls").is_some());
        assert!(fx.root.path().join("images/a.jpg/800/a.webp").exists());
    }

    #[tokio::test]
    async fn failed_specs_do_not_write_back() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(500);
            })
            .await;
        let fx = fixture(&server);
        fx.graph.insert_asset(image(2, "b.jpg"));

        let outcome = fx.lifecycle.transform_image(2, false, &[]).await.expect("run");
        assert_eq!(outcome, TransformOutcome::Failed);
        assert!(fx.graph.saves().is_empty());
    }

    #[tokio::test]
    async fn after_save_enqueues_once_for_eligible_assets() {
        let server = MockServer::start_async().await;
        let fx = fixture(&server);

        let asset = image(3, "c.jpg");
        let job = fx
            .lifecycle
            .on_after_save(&asset, SaveOptions::default())
            .await
            .expect("hook");
        assert!(job.is_some());

        let skipped = fx
            .lifecycle
            .on_after_save(&asset, SaveOptions::skip_hooks())
            .await
            .expect("hook");
        assert!(skipped.is_none());
        assert_eq!(fx.queue.len(), 1);
    }

    #[tokio::test]
    async fn moved_asset_loses_its_records() {
        let server = MockServer::start_async().await;
        let fx = fixture(&server);

        let previous = image(4, "d.jpg");
        let stale_dir = fx.root.path().join("images/d.jpg/400");
        std::fs::create_dir_all(&stale_dir).expect("dir");

        let mut moved = previous.clone();
        moved.url = "/media/archive/d.jpg".into();
        moved.set_field("transformUrls", r#"[{"uri":"/x","width":400}]"#);

        fx.lifecycle
            .on_before_save(&mut moved, Some(&previous), SaveOptions::default())
            .await
            .expect("hook");

        assert!(moved.field("transformUrls").is_none());
        assert!(!fx.root.path().join("images/d.jpg").exists());
    }

    #[tokio::test]
    async fn before_delete_clears_records_and_variants_without_saving() {
        let server = MockServer::start_async().await;
        let fx = fixture(&server);

        let mut doomed = image(5, "e.jpg");
        doomed.set_field("transformUrls", r#"[{"uri":"/m/400/e.webp","width":400}]"#);
        fx.graph.insert_asset(doomed.clone());
        let variant_dir = fx.root.path().join("images/e.jpg/400");
        std::fs::create_dir_all(&variant_dir).expect("dir");
        std::fs::write(variant_dir.join("e.webp"), b"webp").expect("variant");

        fx.lifecycle
            .on_before_delete(&mut doomed)
            .await
            .expect("hook");

        assert!(doomed.field("transformUrls").is_none());
        assert!(!fx.root.path().join("images/e.jpg").exists());
        assert!(fx.graph.saves().is_empty());
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn on_demand_short_circuits_when_widths_exist() {
        let server = MockServer::start_async().await;
        let fx = fixture(&server);
        let mut asset = image(5, "e.jpg");
        asset.set_field("transformUrls", r#"[{"uri":"/m/400/e.webp","width":400}]"#);

        let available = fx
            .lifecycle
            .transform_media_on_demand(&asset, &[MediaTransformSpec::width(400)])
            .await
            .expect("on demand");
        assert!(matches!(available, OnDemand::Available(records) if records.len() == 1));

        let enqueued = fx
            .lifecycle
            .transform_media_on_demand(
                &asset,
                &[MediaTransformSpec::width(400), MediaTransformSpec::width(1000)],
            )
            .await
            .expect("on demand");
        assert!(matches!(enqueued, OnDemand::Enqueued(_)));
        assert_eq!(fx.queue.len(), 1);
    }

    #[tokio::test]
    async fn batch_transform_respects_volume_filter() {
        let server = MockServer::start_async().await;
        let fx = fixture(&server);
        fx.graph.insert_asset(image(6, "f.jpg"));
        let mut other_volume = image(7, "g.jpg");
        other_volume.volume_id = 2;
        fx.graph.insert_asset(other_volume);

        let enqueued = fx.lifecycle.transform_images(false, &[2]).await.expect("batch");
        assert_eq!(enqueued, 1);
    }

    #[tokio::test]
    async fn remove_transforms_clears_every_asset_with_records() {
        let server = MockServer::start_async().await;
        let fx = fixture(&server);
        let mut with_records = image(8, "h.jpg");
        with_records.set_field("transformUrls", r#"[{"uri":"/m/400/h.webp","width":400}]"#);
        fx.graph.insert_asset(with_records);
        fx.graph.insert_asset(image(9, "i.jpg"));

        let removed = fx.lifecycle.remove_transforms().await.expect("remove");
        assert_eq!(removed, 1);
        let stored = fx.graph.asset(8).expect("asset");
        assert!(stored.field("transformUrls").is_none());
    }
}
