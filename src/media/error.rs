use std::path::PathBuf;

use thiserror::Error;

use crate::domain::content::{ElementId, SiteId};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform spec has no width")]
    MissingWidth,
    #[error("asset {0} is neither an image nor a video")]
    UnsupportedKind(ElementId),
    #[error("asset is {size} bytes, above the {limit} byte ceiling of the video adapter")]
    TooLarge { size: u64, limit: u64 },
    #[error("transform adapter is not configured: missing {missing}")]
    NotConfigured { missing: &'static str },
    #[error("no public origin for site {0}")]
    UnknownSite(SiteId),
    #[error("invalid transform url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("asset path `{0}` escapes the transform root")]
    Traversal(String),
    #[error("transform request to `{url}` failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write transform to `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransformError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            url: url.into(),
            source,
        }
    }

    /// Setup mistakes rather than runtime conditions.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured { .. } | Self::TooLarge { .. } | Self::UnknownSite(_)
        )
    }
}
