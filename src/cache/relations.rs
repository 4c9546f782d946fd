//! Relation-aware expansion of a mutated element into stale page URLs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    application::repos::{ContentGraph, RepoError},
    domain::content::{Element, SiteId},
};

const ALL_SENTINEL: &str = "all";

/// One configured relation: another content handle, a literal URI, or "everything".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationTarget {
    All,
    Handle(String),
    Uri(String),
}

impl RelationTarget {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(ALL_SENTINEL) {
            RelationTarget::All
        } else if raw.starts_with('/') || raw.contains("://") {
            RelationTarget::Uri(raw.to_string())
        } else {
            RelationTarget::Handle(raw.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawRelation {
    One(String),
    Many(Vec<String>),
}

/// Static `handle → related targets` configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "BTreeMap<String, RawRelation>")]
pub struct CacheRelationMap {
    entries: BTreeMap<String, Vec<RelationTarget>>,
}

impl From<BTreeMap<String, RawRelation>> for CacheRelationMap {
    fn from(raw: BTreeMap<String, RawRelation>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(handle, relation)| {
                let targets = match relation {
                    RawRelation::One(value) => vec![RelationTarget::parse(&value)],
                    RawRelation::Many(values) => {
                        values.iter().map(|value| RelationTarget::parse(value)).collect()
                    }
                };
                (handle, targets)
            })
            .collect();
        Self { entries }
    }
}

impl CacheRelationMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, handle: &str) -> Option<&[RelationTarget]> {
        self.entries.get(handle).map(Vec::as_slice)
    }

    pub fn insert<S: AsRef<str>>(&mut self, handle: impl Into<String>, targets: &[S]) {
        let targets = targets
            .iter()
            .map(|target| RelationTarget::parse(target.as_ref()))
            .collect();
        self.entries.insert(handle.into(), targets);
    }

    pub fn with<S: AsRef<str>>(mut self, handle: impl Into<String>, targets: &[S]) -> Self {
        self.insert(handle, targets);
        self
    }
}

/// A page URL tagged with the site it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteUrl {
    pub url: String,
    pub site_id: SiteId,
}

impl SiteUrl {
    pub fn new(url: impl Into<String>, site_id: SiteId) -> Self {
        Self {
            url: url.into(),
            site_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Too broad to enumerate; wipe the whole cache.
    InvalidateAll,
    Urls(BTreeSet<SiteUrl>),
}

/// Compute the cached URLs made stale by a change to `element`.
pub async fn resolve(
    element: &Element,
    relations: &CacheRelationMap,
    graph: &dyn ContentGraph,
) -> Result<Resolution, RepoError> {
    if relations.is_empty() {
        return Ok(Resolution::InvalidateAll);
    }

    let site_id = element.site_id;
    let mut urls = BTreeSet::new();

    let root = graph.root_owner(element).await?;
    collect(&mut urls, &root, site_id);

    if element.kind.capabilities().supports_related_to {
        for related in graph.related_to(element).await? {
            collect(&mut urls, &related, site_id);
        }
    }

    let Some(targets) = root.kind.handle().and_then(|handle| relations.get(handle)) else {
        return Ok(Resolution::Urls(urls));
    };

    if targets.contains(&RelationTarget::All) {
        return Ok(Resolution::InvalidateAll);
    }

    let handles: Vec<String> = targets
        .iter()
        .filter_map(|target| match target {
            RelationTarget::Handle(handle) => Some(handle.clone()),
            _ => None,
        })
        .collect();
    if !handles.is_empty() {
        for related in graph.elements_by_handles(&handles, site_id).await? {
            collect(&mut urls, &related, site_id);
        }
    }

    for target in targets {
        if let RelationTarget::Uri(uri) = target {
            urls.insert(SiteUrl::new(uri.clone(), site_id));
        }
    }

    Ok(Resolution::Urls(urls))
}

fn collect(urls: &mut BTreeSet<SiteUrl>, candidate: &Element, site_id: SiteId) {
    if let Some(url) = candidate.page_url() {
        urls.insert(SiteUrl::new(url, site_id));
    }
}
