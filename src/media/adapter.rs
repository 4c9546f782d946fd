//! Request builders for the external transformation services.

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::TransformError;
use crate::domain::transforms::{AUTO_FORMAT, MediaTransformSpec};

/// Largest source the CDN video transform accepts.
pub const VIDEO_SIZE_CEILING_BYTES: u64 = 100 * 1024 * 1024;

const AUTO_IMAGE_FORMAT: &str = "webp";
const AUTO_VIDEO_FORMAT: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformAdapter {
    /// Query-string resizing service (`?url=…&w=…&q=…&output=…`).
    RedirectImage,
    /// CDN-native `/cdn-cgi/image/<options>/<source>`.
    CdnImage,
    /// CDN-native `/cdn-cgi/media/mode=video,…/<source>`.
    CdnVideo,
}

impl TransformAdapter {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformAdapter::RedirectImage => "redirect-image",
            TransformAdapter::CdnImage => "cdn-image",
            TransformAdapter::CdnVideo => "cdn-video",
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, TransformAdapter::CdnVideo)
    }

    pub fn size_ceiling(self) -> Option<u64> {
        match self {
            TransformAdapter::CdnVideo => Some(VIDEO_SIZE_CEILING_BYTES),
            _ => None,
        }
    }

    /// Concrete output format; `auto` cannot name a file on disk.
    pub fn resolve_format(self, requested: &str) -> String {
        let requested = requested.trim().to_ascii_lowercase();
        if requested.is_empty() || requested == AUTO_FORMAT {
            if self.is_video() {
                AUTO_VIDEO_FORMAT.to_string()
            } else {
                AUTO_IMAGE_FORMAT.to_string()
            }
        } else {
            requested
        }
    }

    /// Build the URL that yields the transformed bytes of `source_url`.
    ///
    /// `endpoint` is the resizing service for [`TransformAdapter::RedirectImage`]
    /// and the CDN origin for the CDN-native adapters.
    pub fn build_url(
        self,
        endpoint: &str,
        source_url: &str,
        spec: &MediaTransformSpec,
    ) -> Result<String, TransformError> {
        let width = spec.width.ok_or(TransformError::MissingWidth)?;
        let format = self.resolve_format(&spec.format);

        match self {
            TransformAdapter::RedirectImage => {
                let mut url = Url::parse(endpoint).map_err(|err| TransformError::InvalidUrl {
                    url: endpoint.to_string(),
                    reason: err.to_string(),
                })?;
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("url", source_url);
                    query.append_pair("w", &width.to_string());
                    if let Some(height) = spec.height {
                        query.append_pair("h", &height.to_string());
                    }
                    if let Some(quality) = spec.quality {
                        query.append_pair("q", &quality.to_string());
                    }
                    query.append_pair("output", &format);
                    if spec.grayscale {
                        query.append_pair("filt", "greyscale");
                    }
                }
                Ok(url.into())
            }
            TransformAdapter::CdnImage => {
                let mut options = vec![format!("width={width}")];
                if let Some(height) = spec.height {
                    options.push(format!("height={height}"));
                }
                options.push(format!("format={format}"));
                options.push(format!("fit={}", spec.fit));
                if let Some(quality) = spec.quality {
                    options.push(format!("quality={quality}"));
                }
                if spec.grayscale {
                    options.push("saturation=0".to_string());
                }
                Ok(cdn_url(endpoint, "image", &options, source_url))
            }
            TransformAdapter::CdnVideo => {
                let mut options = vec!["mode=video".to_string(), format!("width={width}")];
                if let Some(height) = spec.height {
                    options.push(format!("height={height}"));
                }
                options.push(format!("fit={}", spec.fit));
                Ok(cdn_url(endpoint, "media", &options, source_url))
            }
        }
    }
}

fn cdn_url(origin: &str, kind: &str, options: &[String], source_url: &str) -> String {
    format!(
        "{}/cdn-cgi/{kind}/{}/{}",
        origin.trim_end_matches('/'),
        options.join(","),
        source_url.trim_start_matches('/')
    )
}
