//! Common collection-item envelope shared by every collection payload type.

use crate::domain::ItemUuid;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// `{ uuid, created_at, updated_at, type_name }`, embedded in every
/// collection item. `created_at` is immutable once set; `updated_at` is
/// bumped on every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemMeta {
    /// The item's own uuid (distinct from its collection key, which for
    /// devices is the ext address rather than this uuid).
    pub uuid: ItemUuid,
    /// Immutable creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation.
    pub updated_at: DateTime<Utc>,
}

impl ItemMeta {
    /// Creates a fresh meta with `created_at == updated_at == now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            uuid: ItemUuid::generate(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the item updated at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Renders the `created`/`updated` timestamp attributes:
    /// `updated` is included only when it differs from `created`.
    pub fn write_timestamps(&self, attrs: &mut Map<String, Value>) {
        attrs.insert(
            "created".to_string(),
            Value::String(self.created_at.to_rfc3339()),
        );
        if self.updated_at != self.created_at {
            attrs.insert(
                "updated".to_string(),
                Value::String(self.updated_at.to_rfc3339()),
            );
        }
    }
}

/// A per-type set of allowed attribute keys, parsed from
/// `?fields[<type>]=key1,key2,...` query parameters. A
/// key ending in `.` admits one level of that key's sub-keys rather than
/// requiring the whole nested value to be named explicitly.
#[derive(Debug, Clone, Default)]
pub struct FieldsFilter {
    per_type: HashMap<String, HashSet<String>>,
}

impl FieldsFilter {
    /// No filtering: every attribute key of every type is included.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Builds a filter from `fields[type]=a,b,c` query-parameter pairs.
    #[must_use]
    pub fn from_query_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut per_type = HashMap::new();
        for (key, value) in pairs {
            let Some(type_name) = key
                .strip_prefix("fields[")
                .and_then(|rest| rest.strip_suffix(']'))
            else {
                continue;
            };
            let keys: HashSet<String> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            per_type.insert(type_name.to_string(), keys);
        }
        Self { per_type }
    }

    /// Applies the filter for `type_name` to a fully-populated attributes
    /// object. Returns the object unchanged if no filter is configured for
    /// this type. A bare key admits its attribute's value in full; a key
    /// ending in `.` admits only a single level of that attribute's
    /// sub-keys, with anything nested deeper than that stripped.
    #[must_use]
    pub fn apply(&self, type_name: &str, attrs: Map<String, Value>) -> Map<String, Value> {
        let Some(allowed) = self.per_type.get(type_name) else {
            return attrs;
        };
        let plain: HashSet<&str> = allowed.iter().filter(|k| !k.ends_with('.')).map(String::as_str).collect();
        let one_level: HashSet<&str> = allowed
            .iter()
            .filter_map(|k| k.strip_suffix('.'))
            .collect();
        attrs
            .into_iter()
            .filter_map(|(k, v)| {
                if plain.contains(k.as_str()) {
                    Some((k, v))
                } else if one_level.contains(k.as_str()) {
                    Some((k, admit_one_level(v)))
                } else {
                    None
                }
            })
            .collect()
    }

    /// True if this type has any filter configured at all (used to decide
    /// whether a wholly-filtered-out type should render an empty item).
    #[must_use]
    pub fn has_filter_for(&self, type_name: &str) -> bool {
        self.per_type.contains_key(type_name)
    }
}

/// Keeps the immediate keys of `value` (or of each element, if `value` is
/// an array) but strips anything nested deeper than that.
fn admit_one_level(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, strip_nested(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(admit_one_level).collect()),
        other => other,
    }
}

fn strip_nested(value: Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => Value::Null,
        scalar => scalar,
    }
}

/// Implemented by every collection item payload (`DeviceItem`,
/// `DiagnosticItem`). `item_id` is the collection's dedup/eviction key:
/// the ext address for devices, a fresh uuid for diagnostics.
pub trait CollectionItem {
    /// The collection key: stable across updates to the same logical item.
    fn item_id(&self) -> String;

    /// The json:api `type` discriminator (e.g. `"device"`, `"thisDevice"`,
    /// `"networkDiagnostics"`, `"energyScanReport"`).
    fn type_name(&self) -> &'static str;

    /// Shared envelope fields.
    fn meta(&self) -> &ItemMeta;

    /// Shared envelope fields, mutably.
    fn meta_mut(&mut self) -> &mut ItemMeta;

    /// Renders this item's own attributes (not including the shared
    /// timestamp fields, which [`Collection`](super::Collection) adds).
    fn own_attributes(&self) -> Map<String, Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_attrs() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "extAddress": "aabbccddeeff0011",
            "childTable": [
                {"rloc16": 2049, "mode": {"rxOnWhenIdle": true, "isFtd": true}},
            ],
        }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn bare_key_admits_the_whole_attribute() {
        let filter = FieldsFilter::from_query_pairs([("fields[device]".to_string(), "childTable".to_string())]);
        let filtered = filter.apply("device", sample_attrs());
        assert_eq!(filtered.len(), 1);
        assert_eq!(
            filtered["childTable"][0]["mode"]["rxOnWhenIdle"],
            json!(true),
            "a bare key keeps the attribute's value in full, nested content included"
        );
    }

    #[test]
    fn trailing_dot_key_admits_only_one_level_of_sub_keys() {
        let filter = FieldsFilter::from_query_pairs([("fields[device]".to_string(), "childTable.".to_string())]);
        let filtered = filter.apply("device", sample_attrs());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered["childTable"][0]["rloc16"], json!(2049));
        assert_eq!(
            filtered["childTable"][0]["mode"],
            Value::Null,
            "content nested deeper than one level must be stripped, not admitted"
        );
    }
}
