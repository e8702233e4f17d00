//! Change detection and per-record indexing state.
//!
//! [`must_reindex`] answers "could the remote document of this record be
//! stale?". It errs on the side of yes: any field the store cannot track is
//! treated as changed, and so is any callable condition.
//!
//! [`DirtyState`] is the per-record scratch state carried from validation to
//! commit. Validation may run several times before one commit (nested saves
//! in a transaction), so the dirty bit only ever accumulates upward until the
//! commit clears it.

use crate::config::{Constraint, IndexConfiguration};
use crate::error::Result;
use crate::extract::attribute_names;
use crate::store::{Record, StoreAdapter};

/// Scratch state for one record between validation and commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyState {
    /// Set before save; consumed after commit.
    pub pending_auto_index: bool,
    /// `None` until the first validation.
    pub must_reindex: Option<bool>,
    /// Wait for remote tasks when the commit indexes the record.
    pub synchronous: bool,
}

impl DirtyState {
    /// Fold one validation result in. Once dirty, stays dirty.
    pub fn record_validation(&mut self, dirty: bool) {
        self.must_reindex = Some(self.must_reindex.unwrap_or(false) || dirty);
    }

    /// Whether the commit should index the record.
    pub fn should_index(&self) -> bool {
        self.pending_auto_index && self.must_reindex != Some(false)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Whether lifecycle hooks may index and enqueue.
///
/// Explicit operations ([`Searchable::index_record`](crate::searchable::Searchable::index_record)
/// and friends) are not affected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoIndexScope {
    suppressed: bool,
}

impl AutoIndexScope {
    pub fn enabled() -> Self {
        Self { suppressed: false }
    }

    pub fn suppressed() -> Self {
        Self { suppressed: true }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }
}

/// Whether `record` needs re-indexing under any of `configs`.
///
/// Order of checks:
///
/// 1. a custom dirty predicate on the record decides alone;
/// 2. a never-persisted record is dirty;
/// 3. per non-secondary configuration: the id field, every emitted
///    attribute, and the fields behind `if` / `unless` conditions.
pub fn must_reindex<'a, R, I>(record: &R, configs: I, adapter: &dyn StoreAdapter<R>) -> Result<bool>
where
    R: Record,
    I: IntoIterator<Item = &'a IndexConfiguration<R>>,
{
    if let Some(dirty) = record.custom_dirty() {
        return Ok(dirty);
    }
    if adapter.is_new_record(record) {
        return Ok(true);
    }
    for config in configs {
        if config.is_secondary() {
            continue;
        }
        if configuration_dirty(record, config, adapter)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn configuration_dirty<R: Record>(
    record: &R,
    config: &IndexConfiguration<R>,
    adapter: &dyn StoreAdapter<R>,
) -> Result<bool> {
    if adapter.changed_since_persist(record, config.id_field()) == Some(true) {
        return Ok(true);
    }
    for name in attribute_names(record, config, adapter)? {
        if adapter.changed_since_persist(record, &name) != Some(false) {
            return Ok(true);
        }
    }
    let constraints = config.index_if().into_iter().chain(config.index_unless());
    for c in constraints {
        if constraint_dirty(record, c, adapter) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn constraint_dirty<R: Record>(record: &R, c: &Constraint<R>, adapter: &dyn StoreAdapter<R>) -> bool {
    match c {
        Constraint::Field(name) => adapter.changed_since_persist(record, name) != Some(false),
        Constraint::AllOf(all) => all.iter().any(|c| constraint_dirty(record, c, adapter)),
        Constraint::Callable(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::JsonRecord;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn loaded(v: Value) -> JsonRecord {
        JsonRecord::loaded(v.as_object().cloned().unwrap())
    }

    fn check(config: &Arc<IndexConfiguration<JsonRecord>>, record: &JsonRecord) -> bool {
        let store = MemoryStore::new("id");
        must_reindex(record, [config.as_ref()], &store).unwrap()
    }

    #[test]
    fn new_records_are_dirty() {
        let c = IndexConfiguration::<JsonRecord>::builder("Color").build().unwrap();
        let r = JsonRecord::from_json(json!({ "id": 1 })).unwrap();
        assert!(check(&c, &r));
    }

    #[test]
    fn unchanged_tracked_attributes_are_clean() {
        let c = IndexConfiguration::<JsonRecord>::builder("Color")
            .attributes(["name", "hex"])
            .build()
            .unwrap();
        let mut r = loaded(json!({ "id": 1, "name": "red", "hex": 1, "notes": "x" }));
        assert!(!check(&c, &r));

        // untracked field
        r.set("notes", json!("y"));
        assert!(!check(&c, &r));

        r.set("hex", json!(2));
        assert!(check(&c, &r));
    }

    #[test]
    fn id_change_is_dirty() {
        let c = IndexConfiguration::<JsonRecord>::builder("Color")
            .attributes(["name"])
            .build()
            .unwrap();
        let mut r = loaded(json!({ "id": 1, "name": "red" }));
        r.set("id", json!(2));
        assert!(check(&c, &r));
    }

    #[test]
    fn untrackable_attribute_is_dirty() {
        let c = IndexConfiguration::<JsonRecord>::builder("Color")
            .attributes(["name"])
            .add_attribute_with("virtual", |_: &JsonRecord| Ok(json!(1)))
            .build()
            .unwrap();
        assert!(check(&c, &loaded(json!({ "id": 1, "name": "red" }))));
    }

    #[test]
    fn condition_fields_are_tracked() {
        let c = IndexConfiguration::<JsonRecord>::builder("Color")
            .attributes(["name"])
            .index_if(Constraint::field("published"))
            .build()
            .unwrap();
        let mut r = loaded(json!({ "id": 1, "name": "red", "published": true }));
        assert!(!check(&c, &r));
        r.set("published", json!(false));
        assert!(check(&c, &r));

        let callable = IndexConfiguration::<JsonRecord>::builder("Color")
            .attributes(["name"])
            .index_unless(Constraint::callable(|_: &JsonRecord| false))
            .build()
            .unwrap();
        assert!(check(&callable, &loaded(json!({ "id": 1, "name": "red" }))));
    }

    #[test]
    fn custom_predicate_overrides_everything() {
        struct Ebook(bool);
        impl Record for Ebook {
            fn field(&self, _: &str) -> Option<Value> {
                None
            }
            fn custom_dirty(&self) -> Option<bool> {
                Some(self.0)
            }
        }
        struct Never;
        #[async_trait::async_trait]
        impl StoreAdapter<Ebook> for Never {
            fn name(&self) -> &str {
                "never"
            }
            fn default_attributes(&self, _: &Ebook) -> serde_json::Map<String, Value> {
                Default::default()
            }
            fn is_new_record(&self, _: &Ebook) -> bool {
                true
            }
            fn changed_since_persist(&self, _: &Ebook, _: &str) -> Option<bool> {
                Some(true)
            }
            async fn find_batch(&self, _: usize, _: usize) -> anyhow::Result<Vec<Ebook>> {
                Ok(vec![])
            }
        }
        let c = IndexConfiguration::<Ebook>::builder("Ebook").build().unwrap();
        assert!(!must_reindex(&Ebook(false), [c.as_ref()], &Never).unwrap());
        assert!(must_reindex(&Ebook(true), [c.as_ref()], &Never).unwrap());
    }

    #[test]
    fn dirty_state_accumulates_until_cleared() {
        let mut s = DirtyState::default();
        s.record_validation(true);
        s.record_validation(false);
        assert_eq!(s.must_reindex, Some(true));

        s.pending_auto_index = true;
        assert!(s.should_index());
        s.clear();
        assert!(!s.should_index());

        s.pending_auto_index = true;
        s.record_validation(false);
        assert!(!s.should_index());
    }
}
