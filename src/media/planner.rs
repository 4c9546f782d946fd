//! Eligibility gate and minimal transform planning for an asset.

use std::collections::BTreeSet;

use tracing::warn;

use super::{adapter::TransformAdapter, records::TransformRecordStore};
use crate::{
    config::MediaSettings,
    domain::{
        content::{Asset, AssetKind},
        transforms::{MediaTransformSpec, TransformRecord},
    },
};

/// Why an asset is not transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    DraftOrRevision,
    HooksSkipped,
    VolumeNotAllowed,
    AlreadyTransformed,
    ImagesDisabled,
    ExtensionExcluded,
    VideosDisabled,
    TooLarge,
    UnsupportedKind,
}

impl Ineligible {
    pub fn as_str(self) -> &'static str {
        match self {
            Ineligible::DraftOrRevision => "draft_or_revision",
            Ineligible::HooksSkipped => "hooks_skipped",
            Ineligible::VolumeNotAllowed => "volume_not_allowed",
            Ineligible::AlreadyTransformed => "already_transformed",
            Ineligible::ImagesDisabled => "images_disabled",
            Ineligible::ExtensionExcluded => "extension_excluded",
            Ineligible::VideosDisabled => "videos_disabled",
            Ineligible::TooLarge => "too_large",
            Ineligible::UnsupportedKind => "unsupported_kind",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransform {
    pub spec: MediaTransformSpec,
    pub satisfied: bool,
}

#[derive(Debug, Clone)]
pub struct MediaTransformPlanner {
    settings: MediaSettings,
    records: TransformRecordStore,
}

impl MediaTransformPlanner {
    pub fn new(settings: MediaSettings) -> Self {
        let records = TransformRecordStore::new(settings.fields.transforms.clone());
        Self { settings, records }
    }

    pub fn settings(&self) -> &MediaSettings {
        &self.settings
    }

    pub fn records(&self) -> &TransformRecordStore {
        &self.records
    }

    /// The adapter that serves this asset, if any.
    pub fn adapter_for(&self, asset: &Asset) -> Option<TransformAdapter> {
        match asset.kind {
            AssetKind::Image => Some(self.settings.image_adapter),
            AssetKind::Video => Some(self.settings.video_adapter),
            AssetKind::Other => None,
        }
    }

    pub fn can_transform(&self, asset: &Asset, forced: bool) -> bool {
        self.eligibility(asset, forced, false).is_ok()
    }

    pub fn eligibility(
        &self,
        asset: &Asset,
        forced: bool,
        skip_hooks: bool,
    ) -> Result<(), Ineligible> {
        if asset.is_draft_or_revision() {
            return Err(Ineligible::DraftOrRevision);
        }
        if skip_hooks {
            return Err(Ineligible::HooksSkipped);
        }
        if !self.settings.allowed_volumes.is_empty()
            && !self.settings.allowed_volumes.contains(&asset.volume_id)
        {
            return Err(Ineligible::VolumeNotAllowed);
        }
        if !forced && self.records.has_records(asset) {
            return Err(Ineligible::AlreadyTransformed);
        }

        match asset.kind {
            AssetKind::Image => {
                if !self.settings.image_enabled {
                    return Err(Ineligible::ImagesDisabled);
                }
                let extension = asset.extension();
                if self
                    .settings
                    .no_transform_extensions
                    .iter()
                    .any(|excluded| *excluded == extension)
                {
                    return Err(Ineligible::ExtensionExcluded);
                }
            }
            AssetKind::Video => {
                if !self.settings.video_enabled {
                    return Err(Ineligible::VideosDisabled);
                }
                let ceiling = self.settings.video_adapter.size_ceiling();
                if ceiling.is_some_and(|limit| asset.size > limit) {
                    return Err(Ineligible::TooLarge);
                }
            }
            AssetKind::Other => return Err(Ineligible::UnsupportedKind),
        }

        Ok(())
    }

    /// Configured presets for the asset's media kind, ascending by width.
    pub fn default_specs(&self, asset: &Asset) -> Vec<MediaTransformSpec> {
        match asset.kind {
            AssetKind::Video => self.settings.video_presets.clone(),
            _ => self.settings.image_presets.clone(),
        }
    }

    /// Mark each requested spec as satisfied when a record of the same width exists.
    pub fn plan(
        &self,
        asset: &Asset,
        requested: &[MediaTransformSpec],
        existing: &[TransformRecord],
    ) -> Vec<PlannedTransform> {
        let specs = if requested.is_empty() {
            self.default_specs(asset)
        } else {
            requested.to_vec()
        };
        let done: BTreeSet<u32> = existing.iter().map(|record| record.width).collect();

        specs
            .into_iter()
            .filter(|spec| match spec.width {
                Some(width) if width > 0 => true,
                _ => {
                    warn!(
                        target = "quire::media::planner",
                        asset_id = asset.id,
                        "Skipping transform spec without a width"
                    );
                    false
                }
            })
            .map(|spec| PlannedTransform {
                satisfied: spec.width.is_some_and(|width| done.contains(&width)),
                spec,
            })
            .collect()
    }

    pub fn unsatisfied(
        &self,
        asset: &Asset,
        requested: &[MediaTransformSpec],
        existing: &[TransformRecord],
    ) -> Vec<MediaTransformSpec> {
        self.plan(asset, requested, existing)
            .into_iter()
            .filter(|planned| !planned.satisfied)
            .map(|planned| planned.spec)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        config::FieldHandles,
        domain::content::FieldAccessor,
        media::adapter::VIDEO_SIZE_CEILING_BYTES,
    };

    pub(crate) fn media_settings() -> MediaSettings {
        MediaSettings {
            image_enabled: true,
            video_enabled: true,
            image_adapter: TransformAdapter::RedirectImage,
            video_adapter: TransformAdapter::CdnVideo,
            api_url: "https://wsrv.nl/".into(),
            cdn_base_url: Some("https://cdn.example.com".into()),
            public_url: None,
            transform_dir: "web/media_optimised".into(),
            transform_url_prefix: "/media_optimised".into(),
            media_prefix: "media".into(),
            allowed_volumes: Vec::new(),
            no_transform_extensions: vec!["svg".into(), "gif".into(), "webp".into(), "avif".into()],
            image_presets: vec![MediaTransformSpec::width(400), MediaTransformSpec::width(800)],
            video_presets: vec![MediaTransformSpec::width(720)],
            fields: FieldHandles::default(),
        }
    }

    pub(crate) fn image(id: u64, filename: &str) -> Asset {
        Asset {
            id,
            site_id: 1,
            volume_id: 1,
            volume: "images".into(),
            kind: AssetKind::Image,
            filename: filename.into(),
            url: format!("/media/images/{filename}"),
            size: 1024,
            draft: false,
            revision: false,
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn plan_returns_only_missing_widths() {
        let planner = MediaTransformPlanner::new(media_settings());
        let existing = vec![
            TransformRecord::new("/m/100.webp", 100),
            TransformRecord::new("/m/300.webp", 300),
        ];
        let requested = vec![
            MediaTransformSpec::width(100),
            MediaTransformSpec::width(300),
            MediaTransformSpec::width(600),
        ];

        let missing = planner.unsatisfied(&image(1, "a.jpg"), &requested, &existing);
        assert_eq!(missing, vec![MediaTransformSpec::width(600)]);
    }

    #[test]
    fn plan_defaults_to_presets_per_kind() {
        let planner = MediaTransformPlanner::new(media_settings());
        let planned = planner.plan(&image(1, "a.jpg"), &[], &[]);
        assert_eq!(planned.len(), 2);
        assert!(planned.iter().all(|planned| !planned.satisfied));

        let mut video = image(2, "clip.mov");
        video.kind = AssetKind::Video;
        let planned = planner.plan(&video, &[], &[]);
        assert_eq!(planned[0].spec.width, Some(720));
    }

    #[test]
    fn specs_without_width_are_dropped() {
        let planner = MediaTransformPlanner::new(media_settings());
        let planned = planner.plan(&image(1, "a.jpg"), &[MediaTransformSpec::default()], &[]);
        assert!(planned.is_empty());
    }

    #[test]
    fn eligibility_rules() {
        let planner = MediaTransformPlanner::new(media_settings());
        assert!(planner.can_transform(&image(1, "a.jpg"), false));
        assert_eq!(
            planner.eligibility(&image(1, "logo.SVG"), false, false),
            Err(Ineligible::ExtensionExcluded)
        );
        assert_eq!(
            planner.eligibility(&image(1, "a.jpg"), false, true),
            Err(Ineligible::HooksSkipped)
        );

        let mut draft = image(1, "a.jpg");
        draft.draft = true;
        assert_eq!(
            planner.eligibility(&draft, true, false),
            Err(Ineligible::DraftOrRevision)
        );

        let mut done = image(1, "a.jpg");
        done.set_field("transformUrls", r#"[{"uri":"/x","width":400}]"#);
        assert_eq!(
            planner.eligibility(&done, false, false),
            Err(Ineligible::AlreadyTransformed)
        );
        assert!(planner.can_transform(&done, true));
    }

    #[test]
    fn volume_allow_list_is_enforced() {
        let mut settings = media_settings();
        settings.allowed_volumes = vec![9];
        let planner = MediaTransformPlanner::new(settings);
        assert_eq!(
            planner.eligibility(&image(1, "a.jpg"), false, false),
            Err(Ineligible::VolumeNotAllowed)
        );
    }

    #[test]
    fn oversized_video_is_rejected() {
        let planner = MediaTransformPlanner::new(media_settings());
        let mut video = image(3, "clip.mp4");
        video.kind = AssetKind::Video;
        video.size = VIDEO_SIZE_CEILING_BYTES + 1;
        assert_eq!(
            planner.eligibility(&video, false, false),
            Err(Ineligible::TooLarge)
        );

        let mut settings = media_settings();
        settings.video_enabled = false;
        let planner = MediaTransformPlanner::new(settings);
        video.size = 10;
        assert_eq!(
            planner.eligibility(&video, false, false),
            Err(Ineligible::VideosDisabled)
        );
    }
}
