//! In-memory [`StoreAdapter`] for tests and embedding.
//!
//! Behaves like a tiny ORM over [`JsonRecord`]s: [`MemoryStore::save`] and
//! [`MemoryStore::destroy`] run the registered lifecycle hooks the way a
//! database-backed store would, and blank ids get the next integer id.
//! Records are iterated in id order (numeric ids first, numerically).

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, Weak};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{JsonRecord, RecordHooks, StoreAdapter};
use crate::dirty::{AutoIndexScope, DirtyState};
use crate::models::{is_blank, object_id_string};

/// Sort key keeping `2` before `10`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RecordKey {
    Numeric(u64),
    Text(String),
}

impl RecordKey {
    /// Only canonical integers are numeric, so `"01"` and `"1"` stay apart.
    fn parse(id: &str) -> Self {
        match id.parse::<u64>() {
            Ok(n) if n.to_string() == id => Self::Numeric(n),
            _ => Self::Text(id.to_string()),
        }
    }
}

pub struct MemoryStore {
    id_field: String,
    records: RwLock<BTreeMap<RecordKey, JsonRecord>>,
    hooks: RwLock<Vec<Weak<dyn RecordHooks<JsonRecord>>>>,
}

impl MemoryStore {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            records: RwLock::new(BTreeMap::new()),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    fn id_of(&self, record: &JsonRecord) -> String {
        object_id_string(record.get(&self.id_field))
    }

    fn next_id(&self) -> u64 {
        self.records
            .read()
            .unwrap()
            .keys()
            .filter_map(|k| match k {
                RecordKey::Numeric(n) => Some(*n),
                RecordKey::Text(_) => None,
            })
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Store a record directly, bypassing lifecycle hooks. Returns its id.
    pub fn insert(&self, fields: Value) -> Result<String> {
        let mut record = match JsonRecord::from_json(fields) {
            Some(r) => r,
            None => bail!("records must be JSON objects"),
        };
        let id = self.assign_id(&mut record);
        record.mark_persisted();
        self.records
            .write()
            .unwrap()
            .insert(RecordKey::parse(&id), record);
        Ok(id)
    }

    fn assign_id(&self, record: &mut JsonRecord) -> String {
        let id = self.id_of(record);
        if !is_blank(&id) {
            return id;
        }
        let next = self.next_id();
        record.set(self.id_field.clone(), Value::from(next));
        next.to_string()
    }

    pub fn get(&self, id: &str) -> Option<JsonRecord> {
        self.records
            .read()
            .unwrap()
            .get(&RecordKey::parse(id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_hooks(&self) -> Vec<Arc<dyn RecordHooks<JsonRecord>>> {
        self.hooks
            .read()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Persist `record`, running validation, save and commit hooks.
    pub async fn save(&self, record: &mut JsonRecord, scope: AutoIndexScope) -> crate::Result<()> {
        let hooks = self.live_hooks();
        let mut state = DirtyState::default();
        for h in &hooks {
            h.after_validation(record, &mut state)?;
        }
        for h in &hooks {
            h.before_save(record, &mut state);
        }

        let id = self.assign_id(record);
        record.mark_persisted();
        self.records
            .write()
            .unwrap()
            .insert(RecordKey::parse(&id), record.clone());

        for h in &hooks {
            h.after_commit(record, &mut state, scope).await?;
        }
        Ok(())
    }

    /// Delete `record` and run destroy hooks. Unknown records are a no-op.
    pub async fn destroy(&self, record: &JsonRecord, scope: AutoIndexScope) -> crate::Result<()> {
        let key = RecordKey::parse(&self.id_of(record));
        let removed = self.records.write().unwrap().remove(&key);
        if removed.is_none() {
            return Ok(());
        }
        let mut state = DirtyState::default();
        for h in self.live_hooks() {
            h.after_destroy(record, &mut state, scope).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter<JsonRecord> for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn default_attributes(&self, record: &JsonRecord) -> Map<String, Value> {
        record.fields().clone()
    }

    fn is_new_record(&self, record: &JsonRecord) -> bool {
        record.is_new()
    }

    fn changed_since_persist(&self, record: &JsonRecord, field: &str) -> Option<bool> {
        record.changed(field)
    }

    async fn find_batch(&self, offset: usize, limit: usize) -> Result<Vec<JsonRecord>> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<JsonRecord>> {
        Ok(self.get(id))
    }

    fn register_hooks(&self, hooks: Arc<dyn RecordHooks<JsonRecord>>) -> bool {
        self.hooks.write().unwrap().push(Arc::downgrade(&hooks));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn batches_follow_numeric_order() {
        let store = MemoryStore::new("id");
        for id in [10, 2, 1] {
            store.insert(json!({ "id": id })).unwrap();
        }
        let ids: Vec<String> = store
            .find_batch(0, 10)
            .await
            .unwrap()
            .iter()
            .map(|r| object_id_string(r.get("id")))
            .collect();
        assert_eq!(ids, vec!["1", "2", "10"]);
        assert_eq!(store.find_batch(2, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_ids_are_assigned() {
        let store = MemoryStore::new("id");
        store.insert(json!({ "id": 4 })).unwrap();
        let id = store.insert(json!({ "name": "x" })).unwrap();
        assert_eq!(id, "5");

        let mut r = JsonRecord::from_json(json!({ "name": "y" })).unwrap();
        store.save(&mut r, AutoIndexScope::enabled()).await.unwrap();
        assert_eq!(r.get("id"), Some(&json!(6)));
        assert!(!r.is_new());
    }

    #[test]
    fn padded_ids_do_not_collide_with_numeric_ones() {
        let store = MemoryStore::new("id");
        store.insert(json!({ "id": "1", "name": "one" })).unwrap();
        store.insert(json!({ "id": "01", "name": "zero-one" })).unwrap();
        store.insert(json!({ "id": "+1", "name": "plus-one" })).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("01").unwrap().get("name"), Some(&json!("zero-one")));
        assert_eq!(store.get("1").unwrap().get("name"), Some(&json!("one")));
        assert_eq!(RecordKey::parse("42"), RecordKey::Numeric(42));
    }

    #[test]
    fn non_objects_are_rejected() {
        let store = MemoryStore::new("id");
        assert!(store.insert(json!("nope")).is_err());
    }
}
