use serde::{Deserialize, Serialize};

pub const AUTO_FORMAT: &str = "auto";
pub const DEFAULT_FIT: &str = "cover";

/// Desired variant of an asset. Pure value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTransformSpec {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default = "default_fit")]
    pub fit: String,
    #[serde(default)]
    pub grayscale: bool,
}

fn default_format() -> String {
    AUTO_FORMAT.to_string()
}

fn default_fit() -> String {
    DEFAULT_FIT.to_string()
}

impl Default for MediaTransformSpec {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            format: default_format(),
            quality: None,
            fit: default_fit(),
            grayscale: false,
        }
    }
}

impl MediaTransformSpec {
    pub fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }
}

/// A completed transform: where the variant lives and how wide it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRecord {
    pub uri: String,
    pub width: u32,
}

impl TransformRecord {
    pub fn new(uri: impl Into<String>, width: u32) -> Self {
        Self {
            uri: uri.into(),
            width,
        }
    }
}
