//! In-process adapters for the content graph and the mutual-exclusion lock.
//!
//! Used by the standalone binary and by tests; a host application plugs in its
//! own implementations of the same traits.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{Mutex, RwLock},
};

use async_trait::async_trait;

use crate::{
    application::repos::{AssetQuery, ContentGraph, MutexLock, RepoError},
    cache::lock::{mutex_lock, rw_read, rw_write},
    domain::content::{Asset, Element, ElementId, SaveOptions, SiteId},
};

const TARGET: &str = "quire::infra::memory";
const MAX_OWNER_DEPTH: usize = 16;

#[derive(Debug, Default)]
struct GraphState {
    elements: BTreeMap<(ElementId, SiteId), Element>,
    relations: BTreeSet<(ElementId, ElementId)>,
    assets: BTreeMap<ElementId, Asset>,
    saves: Vec<(ElementId, SaveOptions)>,
}

#[derive(Debug, Default)]
pub struct MemoryContentGraph {
    state: RwLock<GraphState>,
}

impl MemoryContentGraph {
    pub fn insert_element(&self, element: Element) {
        let mut state = rw_write(&self.state, TARGET, "insert_element");
        state.elements.insert((element.id, element.site_id), element);
    }

    pub fn remove_element(&self, id: ElementId) {
        let mut state = rw_write(&self.state, TARGET, "remove_element");
        state.elements.retain(|(element_id, _), _| *element_id != id);
        state.assets.remove(&id);
    }

    /// Record that `source` references `target`.
    pub fn relate(&self, source: ElementId, target: ElementId) {
        let mut state = rw_write(&self.state, TARGET, "relate");
        state.relations.insert((source, target));
    }

    pub fn insert_asset(&self, asset: Asset) {
        let mut state = rw_write(&self.state, TARGET, "insert_asset");
        let element = asset.as_element();
        state.elements.insert((element.id, element.site_id), element);
        state.assets.insert(asset.id, asset);
    }

    pub fn asset(&self, id: ElementId) -> Option<Asset> {
        rw_read(&self.state, TARGET, "asset").assets.get(&id).cloned()
    }

    /// Non-asset elements, ordered by id then site.
    pub fn elements(&self) -> Vec<Element> {
        let state = rw_read(&self.state, TARGET, "elements");
        state
            .elements
            .values()
            .filter(|element| !state.assets.contains_key(&element.id))
            .cloned()
            .collect()
    }

    pub fn all_assets(&self) -> Vec<Asset> {
        rw_read(&self.state, TARGET, "all_assets")
            .assets
            .values()
            .cloned()
            .collect()
    }

    /// `(source, target)` pairs recorded through [`Self::relate`].
    pub fn relations(&self) -> Vec<(ElementId, ElementId)> {
        rw_read(&self.state, TARGET, "relations")
            .relations
            .iter()
            .copied()
            .collect()
    }

    /// Every asset save seen so far, in order.
    pub fn saves(&self) -> Vec<(ElementId, SaveOptions)> {
        rw_read(&self.state, TARGET, "saves").saves.clone()
    }
}

#[async_trait]
impl ContentGraph for MemoryContentGraph {
    async fn element_in_all_sites(&self, id: ElementId) -> Result<Vec<Element>, RepoError> {
        let state = rw_read(&self.state, TARGET, "element_in_all_sites");
        Ok(state
            .elements
            .values()
            .filter(|element| element.id == id)
            .cloned()
            .collect())
    }

    async fn related_to(&self, element: &Element) -> Result<Vec<Element>, RepoError> {
        let state = rw_read(&self.state, TARGET, "related_to");
        Ok(state
            .relations
            .iter()
            .filter(|(_, target)| *target == element.id)
            .filter_map(|(source, _)| state.elements.get(&(*source, element.site_id)))
            .cloned()
            .collect())
    }

    async fn elements_by_handles(
        &self,
        handles: &[String],
        site_id: SiteId,
    ) -> Result<Vec<Element>, RepoError> {
        let state = rw_read(&self.state, TARGET, "elements_by_handles");
        Ok(state
            .elements
            .values()
            .filter(|element| element.site_id == site_id)
            .filter(|element| {
                element
                    .kind
                    .handle()
                    .is_some_and(|handle| handles.iter().any(|wanted| wanted == handle))
            })
            .cloned()
            .collect())
    }

    async fn root_owner(&self, element: &Element) -> Result<Element, RepoError> {
        let state = rw_read(&self.state, TARGET, "root_owner");
        let mut current = element.clone();
        for _ in 0..MAX_OWNER_DEPTH {
            let Some(owner_id) = current.owner_id else {
                break;
            };
            match state.elements.get(&(owner_id, current.site_id)) {
                Some(owner) => current = owner.clone(),
                None => break,
            }
        }
        Ok(current)
    }

    async fn asset_by_id(&self, id: ElementId) -> Result<Option<Asset>, RepoError> {
        Ok(self.asset(id))
    }

    async fn assets(&self, query: &AssetQuery) -> Result<Vec<Asset>, RepoError> {
        let state = rw_read(&self.state, TARGET, "assets");
        Ok(state
            .assets
            .values()
            .filter(|asset| query.matches(asset))
            .cloned()
            .collect())
    }

    async fn save_asset(&self, asset: &Asset, options: SaveOptions) -> Result<(), RepoError> {
        let mut state = rw_write(&self.state, TARGET, "save_asset");
        if !state.assets.contains_key(&asset.id) {
            return Err(RepoError::NotFound);
        }
        state.assets.insert(asset.id, asset.clone());
        state.saves.push((asset.id, options));
        Ok(())
    }
}

/// Process-local keyed lock.
#[derive(Debug, Default)]
pub struct MemoryMutex {
    held: Mutex<HashSet<String>>,
}

impl MemoryMutex {
    pub fn is_held(&self, key: &str) -> bool {
        mutex_lock(&self.held, TARGET, "is_held").contains(key)
    }
}

#[async_trait]
impl MutexLock for MemoryMutex {
    async fn acquire(&self, key: &str) -> bool {
        mutex_lock(&self.held, TARGET, "acquire").insert(key.to_string())
    }

    async fn release(&self, key: &str) {
        mutex_lock(&self.held, TARGET, "release").remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::ContentKind;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let mutex = MemoryMutex::default();
        assert!(mutex.acquire("scope").await);
        assert!(!mutex.acquire("scope").await);
        assert!(mutex.acquire("other").await);

        mutex.release("scope").await;
        assert!(!mutex.is_held("scope"));
        assert!(mutex.acquire("scope").await);
    }

    #[tokio::test]
    async fn root_owner_walks_the_owner_chain() {
        let graph = MemoryContentGraph::default();
        let entry = Element::new(
            1,
            1,
            ContentKind::Entry {
                section: "blog".into(),
            },
        );
        let block = Element::new(
            2,
            1,
            ContentKind::Other {
                class: "block".into(),
            },
        )
        .with_owner(1);
        let nested = Element::new(
            3,
            1,
            ContentKind::Other {
                class: "block".into(),
            },
        )
        .with_owner(2);
        graph.insert_element(entry);
        graph.insert_element(block);

        let root = graph.root_owner(&nested).await.expect("root");
        assert_eq!(root.id, 1);
    }

    #[tokio::test]
    async fn all_site_lookup_returns_every_instance() {
        let graph = MemoryContentGraph::default();
        let kind = ContentKind::Entry {
            section: "blog".into(),
        };
        graph.insert_element(Element::new(5, 1, kind.clone()));
        graph.insert_element(Element::new(5, 2, kind));

        assert_eq!(graph.element_in_all_sites(5).await.expect("query").len(), 2);
        graph.remove_element(5);
        assert!(graph.element_in_all_sites(5).await.expect("query").is_empty());
    }
}
