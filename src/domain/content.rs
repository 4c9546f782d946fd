//! Content graph entities as seen by the cache and media pipelines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type ElementId = u64;
pub type SiteId = u32;
pub type VolumeId = u32;

/// Relation-map handle used for the commerce product element kind.
pub const SHOPIFY_PRODUCT_HANDLE: &str = "shopifyProduct";

/// A configured site: identifier plus the base URL every page URL is rooted at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub base_url: String,
}

impl Site {
    pub fn new(id: SiteId, base_url: impl Into<String>) -> Self {
        Self {
            id,
            base_url: base_url.into(),
        }
    }

    /// Join a root-relative URI onto the site's base URL.
    pub fn absolute_url(&self, uri: &str) -> String {
        if uri.contains("://") {
            return uri.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let uri = uri.trim_start_matches('/');
        if uri.is_empty() {
            format!("{base}/")
        } else {
            format!("{base}/{uri}")
        }
    }
}

/// What an element can do, resolved once from its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub has_url: bool,
    pub supports_related_to: bool,
}

/// Closed set of element kinds the pipelines recognise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentKind {
    Entry { section: String },
    Product { product_type: String },
    ShopifyProduct,
    Asset { volume: String },
    Other { class: String },
}

impl ContentKind {
    pub fn capabilities(&self) -> Capabilities {
        match self {
            ContentKind::Entry { .. } | ContentKind::Product { .. } | ContentKind::ShopifyProduct => {
                Capabilities {
                    has_url: true,
                    supports_related_to: false,
                }
            }
            ContentKind::Asset { .. } => Capabilities {
                has_url: false,
                supports_related_to: true,
            },
            ContentKind::Other { .. } => Capabilities {
                has_url: false,
                supports_related_to: false,
            },
        }
    }

    /// Classification handle looked up in the cache relation map.
    pub fn handle(&self) -> Option<&str> {
        match self {
            ContentKind::Entry { section } => Some(section),
            ContentKind::Product { product_type } => Some(product_type),
            ContentKind::ShopifyProduct => Some(SHOPIFY_PRODUCT_HANDLE),
            ContentKind::Asset { volume } => Some(volume),
            ContentKind::Other { .. } => None,
        }
    }

    pub fn class_name(&self) -> &str {
        match self {
            ContentKind::Entry { .. } => "entry",
            ContentKind::Product { .. } => "product",
            ContentKind::ShopifyProduct => "shopify_product",
            ContentKind::Asset { .. } => "asset",
            ContentKind::Other { class } => class,
        }
    }

    /// Entries, products and assets trigger cache invalidation; anything else is ignored.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, ContentKind::Other { .. })
    }
}

/// An element reference handed over by the content graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub site_id: SiteId,
    pub kind: ContentKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub owner_id: Option<ElementId>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub revision: bool,
}

impl Element {
    pub fn new(id: ElementId, site_id: SiteId, kind: ContentKind) -> Self {
        Self {
            id,
            site_id,
            kind,
            url: None,
            owner_id: None,
            draft: false,
            revision: false,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_owner(mut self, owner_id: ElementId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn is_draft_or_revision(&self) -> bool {
        self.draft || self.revision
    }

    /// The element's own page URL, if its kind has one.
    pub fn page_url(&self) -> Option<&str> {
        if !self.kind.capabilities().has_url {
            return None;
        }
        self.url.as_deref().filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Video,
    Other,
}

/// Named dynamic field access on an entity.
pub trait FieldAccessor {
    fn field(&self, name: &str) -> Option<&str>;
    fn set_field(&mut self, name: &str, value: impl Into<String>);
}

/// A media asset: the unit of transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: ElementId,
    pub site_id: SiteId,
    pub volume_id: VolumeId,
    pub volume: String,
    pub kind: AssetKind,
    pub filename: String,
    /// Root-relative public URL, e.g. `/media/blog/photo.jpg`.
    pub url: String,
    pub size: u64,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub revision: bool,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Asset {
    pub fn extension(&self) -> String {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// File name with its final extension removed.
    pub fn stem(&self) -> &str {
        match self.filename.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.filename,
        }
    }

    pub fn is_draft_or_revision(&self) -> bool {
        self.draft || self.revision
    }

    /// The element view of this asset, for cache invalidation.
    pub fn as_element(&self) -> Element {
        Element {
            id: self.id,
            site_id: self.site_id,
            kind: ContentKind::Asset {
                volume: self.volume.clone(),
            },
            url: Some(self.url.clone()),
            owner_id: None,
            draft: self.draft,
            revision: self.revision,
        }
    }
}

impl FieldAccessor for Asset {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    fn set_field(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_string(), value.into());
    }
}

/// Options threaded through a content-graph save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Suppress lifecycle hooks so a pipeline write-back does not re-trigger itself.
    pub skip_hooks: bool,
}

impl SaveOptions {
    pub fn skip_hooks() -> Self {
        Self { skip_hooks: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(filename: &str) -> Asset {
        Asset {
            id: 1,
            site_id: 1,
            volume_id: 1,
            volume: "images".into(),
            kind: AssetKind::Image,
            filename: filename.into(),
            url: format!("/media/{filename}"),
            size: 10,
            draft: false,
            revision: false,
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn only_assets_support_related_queries() {
        let asset = ContentKind::Asset {
            volume: "images".into(),
        };
        assert!(asset.capabilities().supports_related_to);
        assert!(!asset.capabilities().has_url);

        let entry = ContentKind::Entry {
            section: "blog".into(),
        };
        assert!(entry.capabilities().has_url);
        assert!(!entry.capabilities().supports_related_to);
    }

    #[test]
    fn shopify_products_use_fixed_handle() {
        assert_eq!(ContentKind::ShopifyProduct.handle(), Some("shopifyProduct"));
        assert_eq!(
            ContentKind::Other {
                class: "user".into()
            }
            .handle(),
            None
        );
    }

    #[test]
    fn asset_extension_and_stem() {
        let asset = asset("Hero.Shot.JPG");
        assert_eq!(asset.extension(), "jpg");
        assert_eq!(asset.stem(), "Hero.Shot");
        assert_eq!(super::tests::asset("README").extension(), "");
    }

    #[test]
    fn blank_field_values_read_as_absent() {
        let mut asset = asset("a.jpg");
        asset.set_field("transformUrls", "  ");
        assert_eq!(asset.field("transformUrls"), None);
        asset.set_field("transformUrls", "[]");
        assert_eq!(asset.field("transformUrls"), Some("[]"));
    }

    #[test]
    fn site_absolute_url_joins_paths() {
        let site = Site::new(1, "https://example.com/");
        assert_eq!(site.absolute_url("/blog"), "https://example.com/blog");
        assert_eq!(site.absolute_url(""), "https://example.com/");
        assert_eq!(
            site.absolute_url("https://other.test/x"),
            "https://other.test/x"
        );
    }
}
