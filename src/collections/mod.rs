//! Bounded, FIFO-evicting in-memory collections.
//!
//! Two instances of the generic [`Collection<T>`] here back the `devices`
//! and `diagnostics` collections exposed over the collection API.

pub mod device;
pub mod diagnostic;
pub mod item;

use chrono::Utc;
use item::{CollectionItem, FieldsFilter, ItemMeta};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};

/// A bounded collection of items of a single payload type, evicted
/// strictly oldest-first by insertion order once `max_size` is reached.
#[derive(Debug)]
pub struct Collection<T: CollectionItem> {
    items: HashMap<String, T>,
    /// Insertion order, oldest first. Re-adding an existing id does not
    /// move it within this order; only a brand-new id is appended.
    order: VecDeque<String>,
    max_size: usize,
    holds_types: HashMap<&'static str, usize>,
}

impl<T: CollectionItem> Collection<T> {
    /// Builds an empty collection bounded at `max_size` items.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            items: HashMap::new(),
            order: VecDeque::new(),
            max_size,
            holds_types: HashMap::new(),
        }
    }

    /// Number of items currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if the collection holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds or replaces an item. If the item's [`CollectionItem::item_id`]
    /// already exists, it is replaced in place without disturbing eviction
    /// order; otherwise, if the collection is at capacity, the oldest item
    /// is evicted first. Returns the item's id.
    pub fn add(&mut self, item: T) -> String {
        let id = item.item_id();
        if let Some(existing) = self.items.get(&id) {
            let old_type = existing.type_name();
            let new_type = item.type_name();
            if old_type != new_type {
                self.bump_type_count(old_type, -1);
                self.bump_type_count(new_type, 1);
            }
            self.items.insert(id.clone(), item);
            return id;
        }

        if self.items.len() >= self.max_size {
            self.evict_oldest();
        }
        self.bump_type_count(item.type_name(), 1);
        self.order.push_back(id.clone());
        self.items.insert(id.clone(), item);
        id
    }

    fn evict_oldest(&mut self) {
        while let Some(oldest_id) = self.order.pop_front() {
            if let Some(removed) = self.items.remove(&oldest_id) {
                self.bump_type_count(removed.type_name(), -1);
                break;
            }
        }
    }

    fn bump_type_count(&mut self, type_name: &'static str, delta: i64) {
        let count = self.holds_types.entry(type_name).or_insert(0);
        *count = count.saturating_add_signed(delta as i32);
    }

    /// Looks up an item by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.get(id)
    }

    /// Looks up an item by id, mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.items.get_mut(id)
    }

    /// Iterates items in no particular guaranteed order (insertion order is
    /// tracked separately for eviction, not for iteration).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    /// Drops every item and resets the eviction FIFO and type counters.
    /// A `clear()` on an already-empty collection is a no-op.
    pub fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
        self.holds_types.clear();
    }

    fn render_attributes(&self, item: &T, fields: &FieldsFilter) -> Map<String, Value> {
        let mut attrs = item.own_attributes();
        item.meta().write_timestamps(&mut attrs);
        fields.apply(item.type_name(), attrs)
    }

    /// Renders one item as `{type, id, attributes}`.
    fn render_item(&self, item: &T, fields: &FieldsFilter) -> Value {
        json!({
            "type": item.type_name(),
            "id": item.item_id(),
            "attributes": self.render_attributes(item, fields),
        })
    }

    /// Renders the full collection as a json:api document:
    /// `{data: [...], meta: {collection: {offset, limit, total, pending?}}}`.
    #[must_use]
    pub fn to_json_api(&self, fields: &FieldsFilter) -> Value {
        self.to_json_api_with_pending(fields, None)
    }

    /// As [`Collection::to_json_api`], additionally reporting `pending`
    /// (the count of not-yet-delivered results) when a discovery/diagnostic
    /// cycle is still running.
    #[must_use]
    pub fn to_json_api_with_pending(&self, fields: &FieldsFilter, pending: Option<usize>) -> Value {
        let data: Vec<Value> = self
            .order
            .iter()
            .filter_map(|id| self.items.get(id))
            .map(|item| self.render_item(item, fields))
            .collect();
        let mut collection_meta = json!({
            "offset": 0,
            "limit": self.max_size,
            "total": self.items.len(),
        });
        if let Some(pending) = pending {
            collection_meta["pending"] = json!(pending);
        }
        json!({
            "data": data,
            "meta": { "collection": collection_meta },
        })
    }

    /// Renders a single item as a json:api document string, or an empty
    /// string if the item is missing or filtered out entirely.
    #[must_use]
    pub fn to_json_api_item(&self, id: &str, fields: &FieldsFilter) -> String {
        let Some(item) = self.items.get(id) else {
            return String::new();
        };
        if fields.has_filter_for(item.type_name())
            && self.render_attributes(item, fields).is_empty()
        {
            return String::new();
        }
        json!({ "data": self.render_item(item, fields) }).to_string()
    }

    /// Renders the full collection as plain JSON (no json:api envelope):
    /// just the array of `{type, id, attributes}` items.
    #[must_use]
    pub fn to_plain_json(&self, fields: &FieldsFilter) -> Value {
        Value::Array(
            self.order
                .iter()
                .filter_map(|id| self.items.get(id))
                .map(|item| self.render_item(item, fields))
                .collect(),
        )
    }
}

/// Current wall-clock time used for item timestamps; a thin indirection so
/// callers outside the `collector` module (which thread time explicitly for
/// testability) still get a consistent `Utc::now()` source.
#[must_use]
pub fn now() -> chrono::DateTime<Utc> {
    Utc::now()
}

/// The two collection singletons the control plane owns, constructed once
/// at process start and passed by reference into the collector and the
/// REST handlers.
#[derive(Debug)]
pub struct Collections {
    /// The `devices` collection.
    pub devices: Collection<device::DeviceItem>,
    /// The `diagnostics` collection.
    pub diagnostics: Collection<diagnostic::DiagnosticItem>,
}

impl Collections {
    /// Builds both collections bounded at the configured capacities.
    #[must_use]
    pub fn new(max_devices: usize, max_diagnostics: usize) -> Self {
        Self {
            devices: Collection::new(max_devices),
            diagnostics: Collection::new(max_diagnostics),
        }
    }

    /// Looks up a device's learned MLEID-IID by its ext-address id, for
    /// destination resolution.
    #[must_use]
    pub fn lookup_device_mleid(&self, device_id: &str) -> Option<crate::domain::ExtAddress> {
        let item = self.devices.get(device_id)?;
        let iid = item.fields().ml_eid_iid;
        if iid.is_zero() { None } else { Some(iid) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[derive(Clone)]
    struct Dummy {
        id: String,
        meta: ItemMeta,
    }

    impl CollectionItem for Dummy {
        fn item_id(&self) -> String {
            self.id.clone()
        }
        fn type_name(&self) -> &'static str {
            "dummy"
        }
        fn meta(&self) -> &ItemMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut ItemMeta {
            &mut self.meta
        }
        fn own_attributes(&self) -> Map<String, Value> {
            let mut m = Map::new();
            m.insert("id".to_string(), json!(self.id));
            m
        }
    }

    fn dummy(id: &str) -> Dummy {
        Dummy {
            id: id.to_string(),
            meta: ItemMeta::new(now()),
        }
    }

    #[test]
    fn evicts_oldest_first_once_at_capacity() {
        let mut coll: Collection<Dummy> = Collection::new(2);
        coll.add(dummy("a"));
        coll.add(dummy("b"));
        coll.add(dummy("c"));
        assert_eq!(coll.len(), 2);
        assert!(coll.get("a").is_none(), "oldest item must be evicted first");
        assert!(coll.get("b").is_some());
        assert!(coll.get("c").is_some());
    }

    #[test]
    fn re_adding_existing_id_does_not_reorder_eviction() {
        let mut coll: Collection<Dummy> = Collection::new(2);
        coll.add(dummy("a"));
        coll.add(dummy("b"));
        coll.add(dummy("a")); // update in place, still oldest
        coll.add(dummy("c")); // should evict "a", not "b"
        assert!(coll.get("a").is_none());
        assert!(coll.get("b").is_some());
        assert!(coll.get("c").is_some());
    }

    #[test]
    fn clear_on_empty_collection_is_a_no_op() {
        let mut coll: Collection<Dummy> = Collection::new(2);
        coll.clear();
        coll.clear();
        assert_eq!(coll.len(), 0);
    }

    #[test]
    fn size_never_exceeds_max_after_many_adds() {
        let mut coll: Collection<Dummy> = Collection::new(3);
        for i in 0..50 {
            coll.add(dummy(&format!("item-{i}")));
            assert!(coll.len() <= 3);
        }
    }
}
