//! JSON content snapshots for the standalone binary.
//!
//! ```json
//! {
//!   "elements": [{ "id": 1, "site_id": 1, "kind": { "kind": "entry", "section": "blog" }, "url": "/blog/hello" }],
//!   "assets": [{ "id": 9, "site_id": 1, "volume_id": 1, "volume": "images", "kind": "image",
//!                "filename": "photo.jpg", "url": "/media/images/photo.jpg", "size": 52133 }],
//!   "relations": [[1, 9]]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{error::InfraError, memory::MemoryContentGraph};
use crate::domain::content::{Asset, Element, ElementId};

const TARGET: &str = "quire::infra::snapshot";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSnapshot {
    pub elements: Vec<Element>,
    pub assets: Vec<Asset>,
    /// `[source, target]`: `source` references `target`.
    pub relations: Vec<(ElementId, ElementId)>,
}

impl ContentSnapshot {
    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read(path).await?;
        let snapshot: Self = serde_json::from_slice(&raw)
            .map_err(|err| InfraError::snapshot(path.display().to_string(), err.to_string()))?;
        info!(
            target = TARGET,
            path = %path.display(),
            elements = snapshot.elements.len(),
            assets = snapshot.assets.len(),
            "Loaded content snapshot"
        );
        Ok(snapshot)
    }

    /// Write the snapshot through a temporary file and rename it into place.
    pub async fn save(&self, path: &Path) -> Result<(), InfraError> {
        let encoded = serde_json::to_vec_pretty(self)
            .map_err(|err| InfraError::snapshot(path.display().to_string(), err.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn from_graph(graph: &MemoryContentGraph) -> Self {
        Self {
            elements: graph.elements(),
            assets: graph.all_assets(),
            relations: graph.relations(),
        }
    }

    pub fn into_graph(self) -> MemoryContentGraph {
        let graph = MemoryContentGraph::default();
        for element in self.elements {
            graph.insert_element(element);
        }
        for asset in self.assets {
            graph.insert_asset(asset);
        }
        for (source, target) in self.relations {
            graph.relate(source, target);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        application::repos::ContentGraph,
        domain::content::{AssetKind, ContentKind, FieldAccessor, SaveOptions},
    };

    const SNAPSHOT: &str = r#"{
        "elements": [
            { "id": 1, "site_id": 1, "kind": { "kind": "entry", "section": "blog" }, "url": "/blog/hello" }
        ],
        "assets": [
            { "id": 9, "site_id": 1, "volume_id": 1, "volume": "images", "kind": "image",
              "filename": "photo.jpg", "url": "/media/images/photo.jpg", "size": 52133 }
        ],
        "relations": [[1, 9]]
    }"#;

    #[tokio::test]
    async fn snapshot_populates_the_graph() {
        let snapshot: ContentSnapshot = serde_json::from_str(SNAPSHOT).expect("snapshot");
        let graph = snapshot.into_graph();

        let asset = graph.asset(9).expect("asset");
        assert_eq!(asset.kind, AssetKind::Image);
        let related = graph.related_to(&asset.as_element()).await.expect("related");
        assert_eq!(related.len(), 1);
        assert_eq!(
            related[0].kind,
            ContentKind::Entry {
                section: "blog".into()
            }
        );
    }

    #[tokio::test]
    async fn saved_snapshot_keeps_asset_fields() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("content.json");
        let graph = serde_json::from_str::<ContentSnapshot>(SNAPSHOT)
            .expect("snapshot")
            .into_graph();

        let mut asset = graph.asset(9).expect("asset");
        asset.set_field("transformUrls", r#"[{"uri":"/a/400/photo.webp","width":400}]"#);
        graph
            .save_asset(&asset, SaveOptions::skip_hooks())
            .await
            .expect("save");

        ContentSnapshot::from_graph(&graph)
            .save(&path)
            .await
            .expect("write");
        let reloaded = ContentSnapshot::load(&path).await.expect("load");

        assert_eq!(reloaded.elements.len(), 1);
        assert_eq!(reloaded.relations, vec![(1, 9)]);
        assert!(reloaded.assets[0].field("transformUrls").is_some());
    }

    #[tokio::test]
    async fn malformed_snapshot_names_the_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{").await.expect("write");

        let err = ContentSnapshot::load(&path).await.expect_err("invalid json");
        assert!(matches!(err, InfraError::Snapshot { .. }));
    }
}
