//! Resolved static-cache configuration.
//!
//! Built once from [`CacheSettings`](crate::config::CacheSettings): patterns are
//! compiled here so the capture hook only runs precompiled regexes.

use std::path::PathBuf;

use super::{patterns::PatternSet, relations::CacheRelationMap};
use crate::{
    config::Settings,
    domain::content::{Site, SiteId},
};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub include: PatternSet,
    pub exclude: PatternSet,
    pub excluded_sites: Vec<SiteId>,
    pub base_path: PathBuf,
    pub relations: CacheRelationMap,
    pub sites: Vec<Site>,
}

impl CacheConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let cache = &settings.cache;
        Self {
            enabled: cache.enabled,
            include: PatternSet::compile(&cache.include),
            exclude: PatternSet::compile(&cache.exclude),
            excluded_sites: cache.excluded_sites.clone(),
            base_path: cache.base_path.clone(),
            relations: cache.relations.clone(),
            sites: settings.sites.clone(),
        }
    }

    pub fn site(&self, id: SiteId) -> Option<&Site> {
        self.sites.iter().find(|site| site.id == id)
    }

    pub fn is_site_excluded(&self, id: SiteId) -> bool {
        self.excluded_sites.contains(&id)
    }

    /// The site whose base URL host (and path prefix, when several share a host)
    /// best matches the request.
    pub fn site_for_request(&self, host: &str, path: &str) -> Option<&Site> {
        let host = host.to_ascii_lowercase();
        self.sites
            .iter()
            .filter_map(|site| {
                let parsed = url::Url::parse(&site.base_url).ok()?;
                let site_host = match parsed.port() {
                    Some(port) => format!("{}:{port}", parsed.host_str()?),
                    None => parsed.host_str()?.to_string(),
                };
                if site_host.to_ascii_lowercase() != host {
                    return None;
                }
                let prefix = parsed.path().trim_end_matches('/');
                let matches_prefix = prefix.is_empty()
                    || path == prefix
                    || path.starts_with(&format!("{prefix}/"));
                matches_prefix.then_some((prefix.len(), site))
            })
            .max_by_key(|(prefix_len, _)| *prefix_len)
            .map(|(_, site)| site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::relations::CacheRelationMap;

    fn config() -> CacheConfig {
        CacheConfig {
            enabled: true,
            include: PatternSet::default(),
            exclude: PatternSet::default(),
            excluded_sites: vec![3],
            base_path: "/tmp/static".into(),
            relations: CacheRelationMap::default(),
            sites: vec![
                Site::new(1, "https://example.com/"),
                Site::new(2, "https://example.com/fr/"),
                Site::new(3, "http://localhost:8080/"),
            ],
        }
    }

    #[test]
    fn longest_path_prefix_wins() {
        let config = config();
        assert_eq!(
            config.site_for_request("example.com", "/fr/blog").map(|s| s.id),
            Some(2)
        );
        assert_eq!(
            config.site_for_request("EXAMPLE.com", "/blog").map(|s| s.id),
            Some(1)
        );
        assert_eq!(
            config.site_for_request("example.com", "/free").map(|s| s.id),
            Some(1)
        );
    }

    #[test]
    fn ports_are_part_of_the_host() {
        let config = config();
        assert_eq!(
            config.site_for_request("localhost:8080", "/").map(|s| s.id),
            Some(3)
        );
        assert!(config.site_for_request("localhost", "/").is_none());
        assert!(config.is_site_excluded(3));
    }
}
