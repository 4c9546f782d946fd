//! Mapping from page URLs to on-disk cache paths.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Placeholder some hosts use in place of an empty homepage URI.
pub const HOME_PLACEHOLDER: &str = "__home__";
pub const INDEX_FILE: &str = "index.html";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheKeyError {
    #[error("path traversal rejected in `{0}`")]
    Traversal(String),
    #[error("site base url `{0}` has no host")]
    MissingHost(String),
}

/// Deterministic URL → file path mapping under a cache root.
#[derive(Debug, Clone)]
pub struct CacheKeying {
    base_path: PathBuf,
}

impl CacheKeying {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Root-relative URI of `url` within the site, without query, fragment, home
    /// placeholder or boundary slashes.
    pub fn relative_uri(url: &str, site_base_url: &str) -> String {
        let url = strip_query(url);
        let base = strip_query(site_base_url).trim_end_matches('/');

        let rest = match url.strip_prefix(base) {
            Some(rest) if !base.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
            _ if url.contains("://") => match url::Url::parse(url) {
                Ok(parsed) => return clean_uri(parsed.path()),
                Err(_) => url,
            },
            _ => url,
        };

        clean_uri(rest)
    }

    /// Cache file for `url` on the site rooted at `site_base_url`.
    ///
    /// URIs that contain a `.` name a file and are used as-is; anything else maps
    /// to an `index.html` inside a directory named after the URI.
    pub fn path_for(&self, url: &str, site_base_url: &str) -> Result<PathBuf, CacheKeyError> {
        let uri = Self::relative_uri(url, site_base_url);
        let mut path = self.site_dir(site_base_url)?;
        push_segments(&mut path, &uri, url)?;
        if !uri.contains('.') {
            path.push(INDEX_FILE);
        }
        Ok(path)
    }

    /// Directory holding every cached page of one site.
    pub fn site_dir(&self, site_base_url: &str) -> Result<PathBuf, CacheKeyError> {
        let host_path = site_host_path(site_base_url);
        if host_path.is_empty() {
            return Err(CacheKeyError::MissingHost(site_base_url.to_string()));
        }
        let mut path = self.base_path.clone();
        push_segments(&mut path, &host_path, site_base_url)?;
        Ok(path)
    }
}

/// Site base URL without its scheme, e.g. `example.com/en`.
pub fn site_host_path(site_base_url: &str) -> String {
    let trimmed = strip_query(site_base_url.trim());
    let without_scheme = match trimmed.split_once("://") {
        Some((scheme, rest))
            if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") =>
        {
            rest
        }
        _ => trimmed,
    };
    without_scheme.trim_matches('/').to_string()
}

fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

fn clean_uri(uri: &str) -> String {
    let uri = uri.replace('\\', "/");
    uri.split('/')
        .filter(|segment| !segment.is_empty() && *segment != HOME_PLACEHOLDER)
        .collect::<Vec<_>>()
        .join("/")
}

fn push_segments(path: &mut PathBuf, relative: &str, original: &str) -> Result<(), CacheKeyError> {
    for segment in relative.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(CacheKeyError::Traversal(original.to_string())),
            other => path.push(other),
        }
    }
    Ok(())
}
