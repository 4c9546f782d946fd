//! Wiring of the standalone runtime from [`Settings`].

use std::sync::Arc;

use tracing::info;

use super::{
    cache_warmer::SiteWarmer,
    cdn::CloudflarePurger,
    client::build_http_client,
    error::InfraError,
    memory::{MemoryContentGraph, MemoryMutex},
    queue::{DrainSummary, LocalJobQueue},
    snapshot::ContentSnapshot,
};
use crate::{
    application::{
        registry::ServiceRegistry,
        repos::{CdnPurger, ContentGraph, JobQueue, MutexLock},
    },
    cache::{CacheConfig, InvalidationCoordinator},
    config::Settings,
    media::{AssetLifecycleCoordinator, MediaTransformPlanner, TransformExecutor},
};

pub struct Runtime {
    pub registry: ServiceRegistry,
    pub queue: Arc<LocalJobQueue>,
    pub graph: Arc<MemoryContentGraph>,
    pub mutex: Arc<MemoryMutex>,
}

impl Runtime {
    /// Build from settings, reading the content snapshot when one is configured.
    pub async fn load(settings: &Settings) -> Result<Self, InfraError> {
        let graph = match settings.content.snapshot_path.as_deref() {
            Some(path) => ContentSnapshot::load(path).await?.into_graph(),
            None => MemoryContentGraph::default(),
        };
        Self::with_graph(settings, Arc::new(graph))
    }

    pub fn with_graph(
        settings: &Settings,
        graph: Arc<MemoryContentGraph>,
    ) -> Result<Self, InfraError> {
        let client = build_http_client(&settings.http)?;
        let queue = Arc::new(LocalJobQueue::default());
        let mutex = Arc::new(MemoryMutex::default());

        let cdn: Option<Arc<dyn CdnPurger>> = if settings.cdn.enabled {
            Some(Arc::new(CloudflarePurger::new(client.clone(), &settings.cdn)))
        } else {
            None
        };

        let graph_dyn: Arc<dyn ContentGraph> = graph.clone();
        let queue_dyn: Arc<dyn JobQueue> = queue.clone();
        let mutex_dyn: Arc<dyn MutexLock> = mutex.clone();

        let cache = InvalidationCoordinator::new(
            CacheConfig::from_settings(settings),
            graph_dyn.clone(),
            mutex_dyn.clone(),
            queue_dyn.clone(),
            cdn.clone(),
        );
        let media = AssetLifecycleCoordinator::new(
            graph_dyn,
            queue_dyn.clone(),
            MediaTransformPlanner::new(settings.media.clone()),
            TransformExecutor::new(client.clone(), settings.media.clone(), settings.sites.clone()),
        );

        let registry = ServiceRegistry {
            cache: Arc::new(cache),
            media: Arc::new(media),
            warmer: SiteWarmer::from_settings(settings, client),
            warm_concurrency: settings.cache.warm_concurrency,
            queue: queue_dyn,
            mutex: mutex_dyn,
            cdn,
        };

        Ok(Self {
            registry,
            queue,
            graph,
            mutex,
        })
    }

    /// Run queued jobs to completion on the current task.
    pub async fn drain(&self) -> DrainSummary {
        self.queue.run_pending(&self.registry).await
    }

    /// Write the content graph back to the configured snapshot, if any.
    pub async fn persist(&self, settings: &Settings) -> Result<(), InfraError> {
        let Some(path) = settings.content.snapshot_path.as_deref() else {
            return Ok(());
        };
        ContentSnapshot::from_graph(&self.graph).save(path).await?;
        info!(
            target = "quire::infra::runtime",
            path = %path.display(),
            "Saved content snapshot"
        );
        Ok(())
    }
}
