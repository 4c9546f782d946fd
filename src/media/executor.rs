//! Fetch one transformed variant and write it to the transform store.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use metrics::counter;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{adapter::TransformAdapter, error::TransformError};
use crate::{
    config::MediaSettings,
    domain::{
        content::{Asset, AssetKind, Site},
        transforms::{MediaTransformSpec, TransformRecord},
    },
};

const METRIC_TRANSFORM_SUCCESS: &str = "quire_transform_success_total";
const METRIC_TRANSFORM_FAILURE: &str = "quire_transform_failure_total";

#[derive(Debug, Clone)]
pub struct TransformExecutor {
    client: reqwest::Client,
    settings: MediaSettings,
    sites: Vec<Site>,
}

impl TransformExecutor {
    pub fn new(client: reqwest::Client, settings: MediaSettings, sites: Vec<Site>) -> Self {
        Self {
            client,
            settings,
            sites,
        }
    }

    /// Directory holding every variant of `asset`.
    pub fn transform_dir(&self, asset: &Asset) -> Result<PathBuf, TransformError> {
        let mut dir = self.settings.transform_dir.clone();
        for segment in self.asset_segments(asset)? {
            dir.push(segment);
        }
        Ok(dir)
    }

    pub async fn execute(
        &self,
        asset: &Asset,
        spec: &MediaTransformSpec,
    ) -> Result<TransformRecord, TransformError> {
        let result = self.try_execute(asset, spec).await;
        match &result {
            Ok(record) => {
                counter!(METRIC_TRANSFORM_SUCCESS).increment(1);
                debug!(
                    target = "quire::media::executor",
                    asset_id = asset.id,
                    uri = %record.uri,
                    "Stored transform"
                );
            }
            Err(err) => {
                counter!(METRIC_TRANSFORM_FAILURE).increment(1);
                warn!(
                    target = "quire::media::executor",
                    asset_id = asset.id,
                    width = ?spec.width,
                    error = %err,
                    "Transform failed"
                );
            }
        }
        result
    }

    async fn try_execute(
        &self,
        asset: &Asset,
        spec: &MediaTransformSpec,
    ) -> Result<TransformRecord, TransformError> {
        let width = spec.width.ok_or(TransformError::MissingWidth)?;
        let adapter = match asset.kind {
            AssetKind::Image => self.settings.image_adapter,
            AssetKind::Video => self.settings.video_adapter,
            AssetKind::Other => return Err(TransformError::UnsupportedKind(asset.id)),
        };
        if let Some(limit) = adapter.size_ceiling() {
            if asset.size > limit {
                return Err(TransformError::TooLarge {
                    size: asset.size,
                    limit,
                });
            }
        }

        let format = adapter.resolve_format(&spec.format);
        let request_url = adapter.build_url(self.endpoint(adapter)?, &self.source_url(asset)?, spec)?;

        let segments = self.asset_segments(asset)?;
        let file_name = format!("{}.{format}", sanitize_segment(asset.stem()));
        let dir = self
            .transform_dir(asset)?
            .join(width.to_string());
        let target = dir.join(&file_name);

        fs::create_dir_all(&dir)
            .await
            .map_err(|err| TransformError::io(&dir, err))?;
        self.download(&request_url, &dir, &target).await?;

        let mut uri = self.settings.transform_url_prefix.clone();
        for segment in &segments {
            uri.push('/');
            uri.push_str(segment);
        }
        uri.push_str(&format!("/{width}/{file_name}"));

        Ok(TransformRecord::new(uri, width))
    }

    async fn download(&self, url: &str, dir: &Path, target: &Path) -> Result<(), TransformError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| TransformError::http(url, err))?;

        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let written = write_stream(response, url, &tmp).await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(err);
        }

        fs::rename(&tmp, target)
            .await
            .map_err(|err| TransformError::io(target, err))
    }

    fn endpoint(&self, adapter: TransformAdapter) -> Result<&str, TransformError> {
        match adapter {
            TransformAdapter::RedirectImage => Ok(self.settings.api_url.as_str()),
            TransformAdapter::CdnImage | TransformAdapter::CdnVideo => self
                .settings
                .cdn_base_url
                .as_deref()
                .ok_or(TransformError::NotConfigured {
                    missing: "media.cdn_base_url",
                }),
        }
    }

    /// Absolute URL the transformation service fetches the original from.
    fn source_url(&self, asset: &Asset) -> Result<String, TransformError> {
        if asset.url.starts_with("http://") || asset.url.starts_with("https://") {
            return Ok(asset.url.clone());
        }

        let origin = match self.settings.public_url.as_deref() {
            Some(public) => public,
            None => self
                .sites
                .iter()
                .find(|site| site.id == asset.site_id)
                .map(|site| site.base_url.as_str())
                .ok_or(TransformError::UnknownSite(asset.site_id))?,
        };

        Ok(format!(
            "{}/{}",
            origin.trim_end_matches('/'),
            asset.url.trim_start_matches('/')
        ))
    }

    /// Asset URL path split into safe segments, without the media prefix.
    fn asset_segments(&self, asset: &Asset) -> Result<Vec<String>, TransformError> {
        let path = match url::Url::parse(&asset.url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => asset.url.clone(),
        };

        let mut segments = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(TransformError::Traversal(asset.url.clone())),
                other => segments.push(sanitize_segment(other)),
            }
        }

        if segments
            .first()
            .is_some_and(|first| *first == self.settings.media_prefix)
        {
            segments.remove(0);
        }

        Ok(segments)
    }
}

async fn write_stream(
    response: reqwest::Response,
    url: &str,
    tmp: &Path,
) -> Result<(), TransformError> {
    let mut file = fs::File::create(tmp)
        .await
        .map_err(|err| TransformError::io(tmp, err))?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| TransformError::http(url, err))?;
        file.write_all(&chunk)
            .await
            .map_err(|err| TransformError::io(tmp, err))?;
    }
    file.flush().await.map_err(|err| TransformError::io(tmp, err))
}

fn sanitize_segment(segment: &str) -> String {
    segment.replace("%40", "_").replace('@', "_")
}
