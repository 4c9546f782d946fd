//! Filesystem store for cached page bodies.
//!
//! Every operation here is best-effort from the caller's point of view: a failed
//! write or delete costs a cache miss, never a failed page.

use std::path::{Path, PathBuf};

use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::keys::{CacheKeyError, CacheKeying, INDEX_FILE};

/// URIs stored verbatim, without the generation comment.
const VERBATIM_URIS: [&str; 2] = ["site.webmanifest", "robots.txt"];

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error(transparent)]
    Key(#[from] CacheKeyError),
    #[error("cache io failed for `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheStoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StaticCacheStore {
    keying: CacheKeying,
}

impl StaticCacheStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            keying: CacheKeying::new(base_path),
        }
    }

    pub fn keying(&self) -> &CacheKeying {
        &self.keying
    }

    pub fn base_path(&self) -> &Path {
        self.keying.base_path()
    }

    /// Write `content` for `url`, logging and swallowing any failure.
    pub async fn save(&self, content: &[u8], url: &str, site_base_url: &str) -> Option<PathBuf> {
        match self.try_save(content, url, site_base_url).await {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(
                    target = "quire::cache::store",
                    url,
                    error = %err,
                    "failed to write cached page"
                );
                None
            }
        }
    }

    /// Write `content` for `url` atomically, appending a generation comment unless
    /// the URI is one of the verbatim special files.
    pub async fn try_save(
        &self,
        content: &[u8],
        url: &str,
        site_base_url: &str,
    ) -> Result<PathBuf, CacheStoreError> {
        let path = self.keying.path_for(url, site_base_url)?;
        let uri = CacheKeying::relative_uri(url, site_base_url);

        let mut body = content.to_vec();
        if !VERBATIM_URIS.contains(&uri.as_str()) {
            body.extend_from_slice(generation_comment().as_bytes());
        }

        write_atomically(&path, &body).await?;
        debug!(target = "quire::cache::store", path = %path.display(), "cached page written");
        Ok(path)
    }

    /// Remove the cached file for `url`. Returns whether a file was removed; a
    /// missing file is not an error.
    pub async fn delete(&self, url: &str, site_base_url: &str) -> Result<bool, CacheStoreError> {
        let path = self.keying.path_for(url, site_base_url)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CacheStoreError::io(&path, err)),
        }
    }

    /// Remove every directory whose final segment is `p<digits>`. Returns the
    /// number of directories removed.
    pub async fn purge_pagination_fragments(&self) -> usize {
        let mut removed = 0;
        let mut pending = vec![self.base_path().to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            target = "quire::cache::store",
                            path = %dir.display(),
                            error = %err,
                            "failed to scan cache directory"
                        );
                    }
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(
                            target = "quire::cache::store",
                            path = %dir.display(),
                            error = %err,
                            "failed to read cache directory entry"
                        );
                        break;
                    }
                };
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|kind| kind.is_dir())
                    .unwrap_or(false);
                if !is_dir {
                    continue;
                }

                let path = entry.path();
                if is_pagination_segment(&entry.file_name().to_string_lossy()) {
                    match fs::remove_dir_all(&path).await {
                        Ok(()) => removed += 1,
                        Err(err) => warn!(
                            target = "quire::cache::store",
                            path = %path.display(),
                            error = %err,
                            "failed to remove pagination fragment"
                        ),
                    }
                } else {
                    pending.push(path);
                }
            }
        }

        removed
    }

    /// Remove the whole cache root. Returns false when the wipe failed.
    pub async fn clear_all(&self) -> bool {
        match fs::remove_dir_all(self.base_path()).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(
                    target = "quire::cache::store",
                    path = %self.base_path().display(),
                    error = %err,
                    "failed to clear static cache"
                );
                false
            }
        }
    }

    /// Number of cached `index.html` pages under the root.
    pub async fn count_cached_pages(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self.base_path().to_path_buf()];

        while let Some(dir) = pending.pop() {
            let Ok(mut entries) = fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let Ok(kind) = entry.file_type().await else {
                    continue;
                };
                if kind.is_dir() {
                    pending.push(entry.path());
                } else if kind.is_file() && entry.file_name() == INDEX_FILE {
                    count += 1;
                }
            }
        }

        count
    }
}

fn generation_comment() -> String {
    let stamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());
    format!("<!-- Cached on {stamp} -->")
}

fn is_pagination_segment(name: &str) -> bool {
    name.len() > 1
        && name.starts_with('p')
        && name[1..].bytes().all(|byte| byte.is_ascii_digit())
}

async fn write_atomically(path: &Path, body: &[u8]) -> Result<(), CacheStoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|err| CacheStoreError::io(parent, err))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(body).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(CacheStoreError::io(path, err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com";

    fn store() -> (tempfile::TempDir, StaticCacheStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StaticCacheStore::new(dir.path().join("static"));
        (dir, store)
    }

    #[tokio::test]
    async fn save_appends_generation_comment() {
        let (_dir, store) = store();
        let path = store
            .try_save(b"<html>hi</html>", "https://example.com/blog/hello", BASE)
            .await
            .expect("save");

        assert!(path.ends_with("example.com/blog/hello/index.html"));
        let body = fs::read_to_string(&path).await.expect("read");
        assert!(body.starts_with("<html>hi</html><!-- Cached on "));
        assert!(body.ends_with(" -->"));
    }

    #[tokio::test]
    async fn special_files_are_stored_verbatim() {
        let (_dir, store) = store();
        let path = store
            .try_save(b"User-agent: *", "https://example.com/robots.txt", BASE)
            .await
            .expect("save");
        assert_eq!(fs::read_to_string(&path).await.expect("read"), "User-agent: *");
    }

    #[tokio::test]
    async fn saving_twice_overwrites() {
        let (_dir, store) = store();
        let url = "https://example.com/blog/hello";
        store.try_save(b"first", url, BASE).await.expect("first");
        let path = store.try_save(b"second", url, BASE).await.expect("second");

        let body = fs::read_to_string(&path).await.expect("read");
        assert!(body.starts_with("second<!-- Cached on "));
        assert_eq!(body.matches("<!-- Cached on").count(), 1);

        let mut entries = fs::read_dir(path.parent().expect("parent"))
            .await
            .expect("dir");
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.expect("entry") {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["index.html".to_string()]);
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_an_error() {
        let (_dir, store) = store();
        let url = "https://example.com/gone";
        assert!(!store.delete(url, BASE).await.expect("delete"));

        store.try_save(b"x", url, BASE).await.expect("save");
        assert!(store.delete(url, BASE).await.expect("delete"));
        assert!(!store.delete(url, BASE).await.expect("delete again"));
    }

    #[tokio::test]
    async fn pagination_fragments_are_swept() {
        let (_dir, store) = store();
        for url in [
            "https://example.com/blog/p2",
            "https://example.com/blog/p10",
            "https://example.com/news/p3/extra",
            "https://example.com/blog/post-1",
            "https://example.com/pages",
        ] {
            store.try_save(b"x", url, BASE).await.expect("save");
        }

        assert_eq!(store.purge_pagination_fragments().await, 3);
        assert_eq!(store.count_cached_pages().await, 2);
        assert_eq!(store.purge_pagination_fragments().await, 0);
    }

    #[tokio::test]
    async fn clear_all_wipes_and_tolerates_missing_root() {
        let (_dir, store) = store();
        assert!(store.clear_all().await);

        store
            .try_save(b"x", "https://example.com/a", BASE)
            .await
            .expect("save");
        store
            .try_save(b"x", "https://example.com/b", BASE)
            .await
            .expect("save");
        assert_eq!(store.count_cached_pages().await, 2);

        assert!(store.clear_all().await);
        assert_eq!(store.count_cached_pages().await, 0);
        assert!(!store.base_path().exists());
    }

    #[test]
    fn pagination_segment_shape() {
        assert!(is_pagination_segment("p1"));
        assert!(is_pagination_segment("p123"));
        assert!(!is_pagination_segment("p"));
        assert!(!is_pagination_segment("page2"));
        assert!(!is_pagination_segment("p2a"));
    }
}
