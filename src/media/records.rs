//! The ordered transform-record list persisted on an asset field.

use std::collections::BTreeMap;

use tracing::warn;

use crate::domain::{content::FieldAccessor, transforms::TransformRecord};

/// Reads and writes transform records through a named asset field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRecordStore {
    field: String,
}

impl TransformRecordStore {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn has_records<A: FieldAccessor>(&self, asset: &A) -> bool {
        asset.field(&self.field).is_some()
    }

    pub fn read<A: FieldAccessor>(&self, asset: &A) -> Vec<TransformRecord> {
        parse_records(asset.field(&self.field))
    }

    pub fn write<A: FieldAccessor>(
        &self,
        asset: &mut A,
        records: &[TransformRecord],
    ) -> Result<(), serde_json::Error> {
        let encoded = to_json(records)?;
        asset.set_field(&self.field, encoded);
        Ok(())
    }

    pub fn clear<A: FieldAccessor>(&self, asset: &mut A) {
        asset.set_field(&self.field, String::new());
    }
}

/// Decode a stored record list. Unreadable values count as no records.
pub fn parse_records(raw: Option<&str>) -> Vec<TransformRecord> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };

    match serde_json::from_str::<Vec<TransformRecord>>(raw) {
        Ok(records) => records,
        Err(err) => {
            warn!(
                target = "quire::media::records",
                error = %err,
                "Ignoring unreadable transform records"
            );
            Vec::new()
        }
    }
}

/// Union `fresh` into `existing`: one record per width, ascending, `fresh` wins.
pub fn merge(existing: &[TransformRecord], fresh: &[TransformRecord]) -> Vec<TransformRecord> {
    let mut by_width: BTreeMap<u32, TransformRecord> = BTreeMap::new();
    for record in existing.iter().chain(fresh) {
        if record.uri.trim().is_empty() {
            continue;
        }
        by_width.insert(record.width, record.clone());
    }
    by_width.into_values().collect()
}

pub fn to_json(records: &[TransformRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string(records)
}

/// `"<uri> <width>w, ..."` for an `img` `srcset` attribute.
pub fn srcset(records: &[TransformRecord]) -> String {
    records
        .iter()
        .map(|record| format!("{} {}w", record.uri, record.width))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Smallest (or largest, with `last`) variant, falling back to the original URL.
pub fn src_or_original<'a>(
    records: &'a [TransformRecord],
    original_url: &'a str,
    last: bool,
) -> &'a str {
    let record = if last { records.last() } else { records.first() };
    record.map_or(original_url, |record| record.uri.as_str())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    struct Fields(BTreeMap<String, String>);

    impl FieldAccessor for Fields {
        fn field(&self, name: &str) -> Option<&str> {
            self.0.get(name).map(String::as_str).filter(|v| !v.is_empty())
        }

        fn set_field(&mut self, name: &str, value: impl Into<String>) {
            self.0.insert(name.to_string(), value.into());
        }
    }

    #[test]
    fn merge_sorts_and_dedups_by_width() {
        let existing = vec![
            TransformRecord::new("/m/300/x.webp", 300),
            TransformRecord::new("/m/100/x.webp", 100),
        ];
        let merged = merge(&existing, &[TransformRecord::new("/a/600/x.webp", 600)]);
        let widths: Vec<u32> = merged.iter().map(|record| record.width).collect();
        assert_eq!(widths, vec![100, 300, 600]);
    }

    #[test]
    fn merge_prefers_fresh_records_and_drops_empty_uris() {
        let existing = vec![
            TransformRecord::new("/old/400.webp", 400),
            TransformRecord::new("", 800),
        ];
        let merged = merge(&existing, &[TransformRecord::new("/new/400.webp", 400)]);
        assert_eq!(merged, vec![TransformRecord::new("/new/400.webp", 400)]);
    }

    #[test]
    fn invalid_json_reads_as_empty() {
        assert!(parse_records(Some("not json")).is_empty());
        assert!(parse_records(Some("  ")).is_empty());
        assert!(parse_records(None).is_empty());
    }

    #[test]
    fn store_round_trips_through_the_named_field() {
        let store = TransformRecordStore::new("transformUrls");
        let mut fields = Fields(BTreeMap::new());
        assert!(!store.has_records(&fields));

        let records = vec![TransformRecord::new("/m/400/a.webp", 400)];
        store.write(&mut fields, &records).expect("write");
        assert_eq!(
            fields.0.get("transformUrls").map(String::as_str),
            Some(r#"[{"uri":"/m/400/a.webp","width":400}]"#)
        );
        assert_eq!(store.read(&fields), records);

        store.clear(&mut fields);
        assert!(!store.has_records(&fields));
    }

    #[test]
    fn srcset_lists_every_variant() {
        let records = vec![
            TransformRecord::new("/m/400/a.webp", 400),
            TransformRecord::new("/m/800/a.webp", 800),
        ];
        assert_eq!(srcset(&records), "/m/400/a.webp 400w, /m/800/a.webp 800w");
        assert_eq!(srcset(&[]), "");
    }

    #[test]
    fn src_falls_back_to_original() {
        let records = vec![
            TransformRecord::new("/m/400/a.webp", 400),
            TransformRecord::new("/m/800/a.webp", 800),
        ];
        assert_eq!(src_or_original(&records, "/media/a.jpg", false), "/m/400/a.webp");
        assert_eq!(src_or_original(&records, "/media/a.jpg", true), "/m/800/a.webp");
        assert_eq!(src_or_original(&[], "/media/a.jpg", true), "/media/a.jpg");
    }
}
