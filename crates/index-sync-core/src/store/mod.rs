//! Data-store abstraction.
//!
//! A [`StoreAdapter`] is the one capability interface the synchronization
//! core needs from a persistence library:
//!
//! | Capability | Methods |
//! |------------|---------|
//! | Extract | [`default_attributes`](StoreAdapter::default_attributes) |
//! | ChangedSince | [`is_new_record`](StoreAdapter::is_new_record), [`changed_since_persist`](StoreAdapter::changed_since_persist) |
//! | BatchIterate | [`find_batch`](StoreAdapter::find_batch), [`find_by_id`](StoreAdapter::find_by_id) |
//! | RegisterHooks | [`register_hooks`](StoreAdapter::register_hooks) |
//!
//! One implementation exists per backing store and is chosen statically when
//! a model is registered. [`JsonRecord`] is a ready-made record type with
//! built-in change tracking, used by the in-memory store and by the
//! application's JSON-lines store.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::dirty::{AutoIndexScope, DirtyState};

/// A raw field value as read from the store.
///
/// Binary columns surface as [`RawValue::Bytes`] and are turned into strings
/// during extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Json(Value),
    Bytes(Vec<u8>),
}

/// A domain record that can be indexed.
pub trait Record: Send + Sync + 'static {
    /// Read a named field. `None` when the record has no such field.
    fn field(&self, name: &str) -> Option<Value>;

    /// Read a named field without converting binary data.
    fn raw_field(&self, name: &str) -> Option<RawValue> {
        self.field(name).map(RawValue::Json)
    }

    /// Custom dirty predicate. When it returns `Some`, change detection is
    /// delegated to it entirely.
    fn custom_dirty(&self) -> Option<bool> {
        None
    }
}

/// Lifecycle callbacks a store fires around persistence.
///
/// The store owns one [`DirtyState`] per in-flight record and hands it to
/// every callback of one commit cycle.
#[async_trait]
pub trait RecordHooks<R: Record>: Send + Sync {
    /// Called after the record passed validation, before it is written.
    fn after_validation(&self, record: &R, state: &mut DirtyState) -> crate::Result<()>;

    /// Called right before the record is written.
    fn before_save(&self, record: &R, state: &mut DirtyState);

    /// Called once the write is durable (after commit, or after save when
    /// the store has no transactions).
    async fn after_commit(
        &self,
        record: &R,
        state: &mut DirtyState,
        scope: AutoIndexScope,
    ) -> crate::Result<()>;

    /// Called after the record was deleted.
    async fn after_destroy(
        &self,
        record: &R,
        state: &mut DirtyState,
        scope: AutoIndexScope,
    ) -> crate::Result<()>;
}

/// Capability interface over one persistence library.
#[async_trait]
pub trait StoreAdapter<R: Record>: Send + Sync {
    /// Short adapter identifier (e.g. `"memory"`, `"jsonl"`).
    fn name(&self) -> &str;

    /// The record's full native field set, ignoring any query scoping.
    fn default_attributes(&self, record: &R) -> Map<String, Value>;

    /// True when the record has never been persisted.
    fn is_new_record(&self, record: &R) -> bool;

    /// Whether `field` changed since the record was last persisted.
    ///
    /// `None` means the store cannot tell (unknown or computed field).
    fn changed_since_persist(&self, record: &R, field: &str) -> Option<bool>;

    /// Load up to `limit` records starting at `offset`, in a stable order.
    async fn find_batch(&self, offset: usize, limit: usize) -> Result<Vec<R>>;

    /// Load a single record by its identifier.
    async fn find_by_id(&self, _id: &str) -> Result<Option<R>> {
        Ok(None)
    }

    /// Attach lifecycle callbacks. Returns `false` when the store cannot
    /// deliver lifecycle events.
    fn register_hooks(&self, _hooks: Arc<dyn RecordHooks<R>>) -> bool {
        false
    }
}

/// A schemaless record with change tracking.
///
/// Keeps the field map as last persisted next to the current one, so
/// `changed(field)` can compare the two.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonRecord {
    fields: Map<String, Value>,
    persisted: Option<Map<String, Value>>,
}

impl JsonRecord {
    /// A record that was never persisted.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            persisted: None,
        }
    }

    /// A record as loaded from a store.
    pub fn loaded(fields: Map<String, Value>) -> Self {
        Self {
            persisted: Some(fields.clone()),
            fields,
        }
    }

    /// Build a new record from a JSON object. Returns `None` for non-objects.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self::new(fields)),
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn is_new(&self) -> bool {
        self.persisted.is_none()
    }

    /// Compare `name` against the persisted snapshot.
    pub fn changed(&self, name: &str) -> Option<bool> {
        let snapshot = match &self.persisted {
            Some(s) => s,
            None => return Some(true),
        };
        match (snapshot.get(name), self.fields.get(name)) {
            (None, None) => None,
            (before, after) => Some(before != after),
        }
    }

    /// Take the current fields as the persisted snapshot.
    pub fn mark_persisted(&mut self) {
        self.persisted = Some(self.fields.clone());
    }
}

impl Record for JsonRecord {
    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }
}
