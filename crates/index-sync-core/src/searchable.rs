//! The per-model indexing facade.
//!
//! [`Searchable`] ties a model's configuration tree to a store adapter and
//! the shared [`SyncContext`]. It exposes explicit operations (index, remove,
//! reindex, clear, search) and, as [`RecordHooks`], drives automatic
//! indexing from the store's lifecycle:
//!
//! ```text
//! after_validation ──► dirty? (accumulates)
//! before_save      ──► pending auto-index
//! after_commit     ──► index or enqueue when pending and dirty, then reset
//! after_destroy    ──► remove or enqueue
//! ```
//!
//! Remote calls for one record are planned before any is made, so a blank
//! object id fails the operation without touching the remote service.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::IndexConfiguration;
use crate::context::SyncContext;
use crate::dirty::{self, AutoIndexScope, DirtyState};
use crate::error::{ConfigError, Result, SyncError};
use crate::extract::build_document;
use crate::jobs::{IndexJob, JobAction};
use crate::models::{is_blank, Document, FacetHit, SearchPage, SearchParams, SearchResponse};
use crate::registry::ConfigurationSet;
use crate::reindex::{ReindexCoordinator, ReindexObserver, ReindexOptions, ReindexReport};
use crate::safe_index::SafeIndex;
use crate::store::{Record, RecordHooks, StoreAdapter};

enum Step {
    Configure,
    Save(Document),
    Delete(String),
}

pub struct Searchable<R: Record> {
    context: Arc<SyncContext>,
    configurations: Arc<ConfigurationSet<R>>,
    adapter: Arc<dyn StoreAdapter<R>>,
}

impl<R: Record> Searchable<R> {
    /// Register a model. Lifecycle hooks are attached when the primary
    /// configuration auto-indexes or auto-removes and the store supports it.
    pub fn register(
        context: Arc<SyncContext>,
        primary: Arc<IndexConfiguration<R>>,
        adapter: Arc<dyn StoreAdapter<R>>,
    ) -> Result<Arc<Self>> {
        let configurations = context.registry().configurations_for(&primary)?;
        let this = Arc::new(Self {
            context,
            configurations,
            adapter,
        });
        if primary.auto_index() || primary.auto_remove() {
            let hooks: Arc<dyn RecordHooks<R>> = this.clone();
            if !this.adapter.register_hooks(hooks) {
                debug!(
                    model = primary.model(),
                    store = this.adapter.name(),
                    "store has no lifecycle events; automatic indexing is off"
                );
            }
        }
        Ok(this)
    }

    pub fn model(&self) -> &str {
        self.primary().model()
    }

    pub fn primary(&self) -> &Arc<IndexConfiguration<R>> {
        self.configurations.primary()
    }

    pub fn configurations(&self) -> &ConfigurationSet<R> {
        &self.configurations
    }

    pub fn adapter(&self) -> &dyn StoreAdapter<R> {
        self.adapter.as_ref()
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    /// Resolved name of the primary index.
    pub fn index_name(&self) -> String {
        self.context.reconciler().resolved_name(self.primary().as_ref())
    }

    /// Handle for the primary index, or for a configured index by name.
    pub async fn index(&self, name: Option<&str>) -> Result<Arc<SafeIndex>> {
        let config = match name {
            None => self.primary(),
            Some(n) => self
                .configurations
                .find(n, self.context.environment())
                .ok_or_else(|| ConfigError::UnknownIndex(n.to_string()))?,
        };
        self.context.reconciler().ensure_configured(config.as_ref()).await
    }

    pub fn must_reindex(&self, record: &R) -> Result<bool> {
        dirty::must_reindex(
            record,
            self.configurations.iter().map(|c| c.as_ref()),
            self.adapter.as_ref(),
        )
    }

    /// Write one record to every index it belongs to, and delete it from
    /// conditional indexes it no longer qualifies for.
    pub async fn index_record(&self, record: &R, synchronous: bool) -> Result<()> {
        let mut plan = Vec::new();
        for config in self.configurations.iter() {
            if config.indexing_disabled() {
                continue;
            }
            if config.is_secondary() {
                plan.push((config, Step::Configure));
            } else if config.is_indexable(record) {
                let doc = build_document(record, config, self.adapter.as_ref())?;
                plan.push((config, Step::Save(doc)));
            } else if config.is_conditional() {
                let id = config.object_id_of(record);
                if !is_blank(&id) {
                    plan.push((config, Step::Delete(id)));
                }
            }
        }

        for (config, step) in plan {
            let index = self.context.reconciler().ensure_configured(config.as_ref()).await?;
            let task = match step {
                Step::Configure => continue,
                Step::Save(doc) => index.save_object(&doc).await?,
                Step::Delete(id) => index.delete_object(&id).await?,
            };
            if synchronous || config.synchronous() {
                index.wait_task(&task).await?;
            }
        }
        Ok(())
    }

    /// Index a batch of records. Returns the number of documents written.
    pub async fn index_records(&self, records: &[R], synchronous: bool) -> Result<usize> {
        let mut plan = Vec::new();
        for config in self.configurations.iter() {
            if config.indexing_disabled() || config.is_secondary() {
                continue;
            }
            let mut documents = Vec::new();
            let mut stale = Vec::new();
            for record in records {
                if config.is_indexable(record) {
                    documents.push(build_document(record, config, self.adapter.as_ref())?);
                } else if config.is_conditional() {
                    let id = config.object_id_of(record);
                    if !is_blank(&id) {
                        stale.push(id);
                    }
                }
            }
            plan.push((config, documents, stale));
        }

        let mut written = 0;
        for (config, documents, stale) in plan {
            let index = self.context.reconciler().ensure_configured(config.as_ref()).await?;
            let mut last = None;
            if !stale.is_empty() {
                last = Some(index.delete_objects(&stale).await?);
            }
            if !documents.is_empty() {
                last = Some(index.save_objects(&documents).await?);
                written += documents.len();
            }
            if synchronous || config.synchronous() {
                if let Some(task) = last {
                    index.wait_task(&task).await?;
                }
            }
        }
        Ok(written)
    }

    /// Delete an object id from every populated index.
    pub async fn remove_from_index(&self, object_id: &str, synchronous: bool) -> Result<()> {
        if is_blank(object_id) {
            return Err(ConfigError::BlankObjectId.into());
        }
        for config in self.configurations.iter() {
            if config.indexing_disabled() || config.is_secondary() {
                continue;
            }
            let index = self.context.reconciler().ensure_configured(config.as_ref()).await?;
            let task = index.delete_object(object_id).await?;
            if synchronous || config.synchronous() {
                index.wait_task(&task).await?;
            }
        }
        Ok(())
    }

    pub async fn remove_record(&self, record: &R, synchronous: bool) -> Result<()> {
        let id = self.primary().object_id_of(record);
        self.remove_from_index(&id, synchronous).await
    }

    /// Remove every document, keeping settings. The next use re-checks them.
    pub async fn clear_index(&self, synchronous: bool) -> Result<()> {
        let reconciler = self.context.reconciler();
        for config in self.configurations.iter() {
            if config.indexing_disabled() {
                continue;
            }
            let index = reconciler.ensure_configured(config.as_ref()).await?;
            if config.is_secondary() {
                continue;
            }
            let task = index.clear().await?;
            if synchronous || config.synchronous() {
                index.wait_task(&task).await?;
            }
            reconciler.forget(config.as_ref());
        }
        Ok(())
    }

    pub async fn reindex(&self, options: &ReindexOptions) -> Result<ReindexReport> {
        self.reindex_with(options, None).await
    }

    pub async fn reindex_with(
        &self,
        options: &ReindexOptions,
        observer: Option<&dyn ReindexObserver>,
    ) -> Result<ReindexReport> {
        let mut coordinator = ReindexCoordinator::new(self.context.reconciler(), self.adapter.as_ref());
        if let Some(o) = observer {
            coordinator = coordinator.with_observer(o);
        }
        coordinator.run(&self.configurations, options).await
    }

    /// Push declared settings to every index, changed or not.
    pub async fn push_settings(&self, synchronous: bool) -> Result<()> {
        for config in self.configurations.iter() {
            if config.indexing_disabled() {
                continue;
            }
            let (index, task) = self.context.reconciler().push_settings(config.as_ref()).await?;
            if synchronous || config.synchronous() {
                index.wait_task(&task).await?;
            }
        }
        Ok(())
    }

    /// Search and return the service's response as is.
    pub async fn raw_search(&self, query: &str, params: &SearchParams) -> Result<SearchResponse> {
        let index = self.index(params.index.as_deref()).await?;
        index.search(query, &params.params).await
    }

    /// Search with 1-based paging.
    pub async fn search(&self, query: &str, params: &SearchParams) -> Result<SearchPage> {
        let mut params = params.clone();
        if let Some(page) = params.get_u64("page") {
            params
                .params
                .insert("page".to_string(), page.saturating_sub(1).to_string());
        }
        let raw = self.raw_search(query, &params).await?;
        Ok(SearchPage::from_response(raw))
    }

    /// Search and load the matching records from the store, in rank order.
    /// Hits whose record no longer exists are skipped.
    pub async fn search_records(&self, query: &str, params: &SearchParams) -> Result<Vec<R>> {
        let page = self.search(query, params).await?;
        let mut records = Vec::with_capacity(page.len());
        for id in page.raw.hit_ids() {
            match self.adapter.find_by_id(&id).await.map_err(SyncError::store)? {
                Some(r) => records.push(r),
                None => warn!(model = self.model(), object_id = %id, "hit has no backing record"),
            }
        }
        Ok(records)
    }

    pub async fn search_for_facet_values(
        &self,
        facet: &str,
        text: &str,
        params: &SearchParams,
    ) -> Result<Vec<FacetHit>> {
        let index = self.index(params.index.as_deref()).await?;
        index.search_for_facet_values(facet, text, &params.params).await
    }

    /// Replay a deferred job.
    pub async fn perform(&self, job: &IndexJob) -> Result<()> {
        if job.model != self.model() {
            return Err(ConfigError::UnknownModel(job.model.clone()).into());
        }
        match job.action {
            JobAction::Index => {
                let found = self
                    .adapter
                    .find_by_id(&job.object_id)
                    .await
                    .map_err(SyncError::store)?;
                match found {
                    Some(record) => self.index_record(&record, false).await,
                    None => self.remove_from_index(&job.object_id, false).await,
                }
            }
            JobAction::Remove => self.remove_from_index(&job.object_id, false).await,
        }
    }

    async fn enqueue_index(&self, record: &R, synchronous: bool) -> Result<()> {
        let primary = self.primary();
        match primary.enqueue() {
            Some(queue) => {
                if primary.indexing_disabled() {
                    return Ok(());
                }
                let id = primary.object_id_of(record);
                if is_blank(&id) {
                    return Err(ConfigError::BlankObjectId.into());
                }
                queue.enqueue(IndexJob::index(self.model(), id))
            }
            None => self.index_record(record, synchronous).await,
        }
    }

    async fn enqueue_remove(&self, record: &R, synchronous: bool) -> Result<()> {
        let primary = self.primary();
        match primary.enqueue() {
            Some(queue) => {
                if primary.indexing_disabled() {
                    return Ok(());
                }
                let id = primary.object_id_of(record);
                if is_blank(&id) {
                    return Err(ConfigError::BlankObjectId.into());
                }
                queue.enqueue(IndexJob::remove(self.model(), id))
            }
            None => self.remove_record(record, synchronous).await,
        }
    }
}

#[async_trait]
impl<R: Record> RecordHooks<R> for Searchable<R> {
    fn after_validation(&self, record: &R, state: &mut DirtyState) -> Result<()> {
        let dirty = self.adapter.is_new_record(record) || self.must_reindex(record)?;
        state.record_validation(dirty);
        if self.primary().synchronous() {
            state.synchronous = true;
        }
        Ok(())
    }

    fn before_save(&self, _record: &R, state: &mut DirtyState) {
        if self.primary().auto_index() {
            state.pending_auto_index = true;
        }
    }

    async fn after_commit(&self, record: &R, state: &mut DirtyState, scope: AutoIndexScope) -> Result<()> {
        let run = !scope.is_suppressed() && state.should_index();
        let synchronous = state.synchronous;
        state.clear();
        if run {
            self.enqueue_index(record, synchronous).await?;
        }
        Ok(())
    }

    async fn after_destroy(&self, record: &R, state: &mut DirtyState, scope: AutoIndexScope) -> Result<()> {
        if scope.is_suppressed() || !self.primary().auto_remove() {
            return Ok(());
        }
        let synchronous = state.synchronous || self.primary().synchronous();
        self.enqueue_remove(record, synchronous).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryClient;
    use crate::config::Constraint;
    use crate::jobs::MemoryQueue;
    use crate::store::memory::MemoryStore;
    use crate::store::JsonRecord;
    use serde_json::json;

    struct Fixture {
        client: Arc<MemoryClient>,
        store: Arc<MemoryStore>,
        model: Arc<Searchable<JsonRecord>>,
    }

    fn fixture(
        build: impl FnOnce(crate::config::IndexConfigurationBuilder<JsonRecord>) -> crate::config::IndexConfigurationBuilder<JsonRecord>,
    ) -> Fixture {
        let client = Arc::new(MemoryClient::new());
        let context = SyncContext::new(client.clone(), Some("test".into()));
        let store = Arc::new(MemoryStore::new("id"));
        let config = build(IndexConfiguration::builder("Color")).build().unwrap();
        let model = Searchable::register(context, config, store.clone()).unwrap();
        Fixture { client, store, model }
    }

    fn record(v: serde_json::Value) -> JsonRecord {
        JsonRecord::from_json(v).unwrap()
    }

    #[tokio::test]
    async fn blank_id_fails_without_remote_calls() {
        let f = fixture(|b| b);
        let err = f
            .model
            .index_record(&record(json!({ "id": "", "name": "x" })), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::BlankObjectId)));
        assert!(f.client.calls().is_empty());

        assert!(f.model.remove_from_index("  ", false).await.is_err());
        assert!(f.client.calls().is_empty());
    }

    #[tokio::test]
    async fn conditional_index_deletes_non_qualifying_record() {
        let f = fixture(|b| b.index_if(Constraint::field("visible")));
        f.model
            .index_record(&record(json!({ "id": 1, "visible": true })), false)
            .await
            .unwrap();
        assert_eq!(f.client.object_ids("Color"), vec!["1".to_string()]);

        f.model
            .index_record(&record(json!({ "id": 1, "visible": false })), false)
            .await
            .unwrap();
        assert!(f.client.object_ids("Color").is_empty());
        assert_eq!(f.client.count("delete_object"), 1);

        // no id: nothing to delete
        f.model
            .index_record(&record(json!({ "id": null, "visible": false })), false)
            .await
            .unwrap();
        assert_eq!(f.client.count("delete_object"), 1);
    }

    #[tokio::test]
    async fn disabled_model_is_a_no_op() {
        let f = fixture(|b| b.disable_indexing(true));
        let r = record(json!({ "id": 1 }));
        f.model.index_record(&r, true).await.unwrap();
        f.model.remove_from_index("1", true).await.unwrap();
        f.model.clear_index(true).await.unwrap();
        f.model.push_settings(true).await.unwrap();
        f.model.reindex(&ReindexOptions::default()).await.unwrap();
        assert!(f.client.calls().is_empty());
    }

    #[tokio::test]
    async fn saving_through_the_store_auto_indexes() {
        let f = fixture(|b| b.attributes(["name"]));
        let mut r = record(json!({ "name": "red" }));
        f.store.save(&mut r, AutoIndexScope::enabled()).await.unwrap();
        assert_eq!(f.client.object("Color", "1").unwrap()["name"], json!("red"));

        // unchanged save does not touch the index
        f.client.reset_calls();
        f.store.save(&mut r, AutoIndexScope::enabled()).await.unwrap();
        assert_eq!(f.client.count("save_objects"), 0);

        f.store.destroy(&r, AutoIndexScope::enabled()).await.unwrap();
        assert!(f.client.object("Color", "1").is_none());
    }

    #[tokio::test]
    async fn suppressed_scope_skips_hooks() {
        let f = fixture(|b| b);
        let mut r = record(json!({ "name": "red" }));
        f.store.save(&mut r, AutoIndexScope::suppressed()).await.unwrap();
        f.store.destroy(&r, AutoIndexScope::suppressed()).await.unwrap();
        assert!(f.client.calls().is_empty());
    }

    #[tokio::test]
    async fn enqueue_defers_to_the_queue() {
        let queue = Arc::new(MemoryQueue::new());
        let q = queue.clone();
        let f = fixture(move |b| b.enqueue(q));
        let mut r = record(json!({ "name": "red" }));
        f.store.save(&mut r, AutoIndexScope::enabled()).await.unwrap();
        assert!(f.client.calls().is_empty());

        let jobs = queue.drain();
        assert_eq!(jobs, vec![IndexJob::index("Color", "1")]);
        f.model.perform(&jobs[0]).await.unwrap();
        assert!(f.client.object("Color", "1").is_some());

        // the record is gone by the time the job runs
        f.store.destroy(&r, AutoIndexScope::enabled()).await.unwrap();
        let jobs = queue.drain();
        assert_eq!(jobs, vec![IndexJob::remove("Color", "1")]);
        f.model.perform(&IndexJob::index("Color", "1")).await.unwrap();
        assert!(f.client.object("Color", "1").is_none());
    }

    #[tokio::test]
    async fn jobs_for_other_models_are_rejected() {
        let f = fixture(|b| b);
        let err = f.model.perform(&IndexJob::index("Other", "1")).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn search_pages_are_one_based() {
        let f = fixture(|b| b.setting("hitsPerPage", json!(2)));
        let records: Vec<JsonRecord> = (1..=5)
            .map(|i| record(json!({ "id": i, "name": format!("red {}", i) })))
            .collect();
        assert_eq!(f.model.index_records(&records, false).await.unwrap(), 5);

        let page = f
            .model
            .search("red", &SearchParams::new().page(3))
            .await
            .unwrap();
        assert_eq!(page.page, 3);
        assert_eq!(page.len(), 1);
        assert_eq!(page.total_hits, 5);
    }

    #[tokio::test]
    async fn search_records_load_from_the_store() {
        let f = fixture(|b| b);
        f.store.insert(json!({ "id": 1, "name": "red" })).unwrap();
        f.store.insert(json!({ "id": 2, "name": "dark red" })).unwrap();
        f.model
            .reindex(&ReindexOptions::default())
            .await
            .unwrap();
        f.store.destroy(&f.store.get("2").unwrap(), AutoIndexScope::suppressed()).await.unwrap();

        let found = f.model.search_records("red", &SearchParams::new()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("id"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn unknown_index_name_is_rejected() {
        let f = fixture(|b| b.add_replica("Color_desc", |r| r));
        assert!(f.model.index(Some("Color_desc")).await.is_ok());
        let err = f.model.index(Some("Color_nope")).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::UnknownIndex(_))));
    }

    #[tokio::test]
    async fn clear_resets_the_settings_memo() {
        let f = fixture(|b| b.setting("hitsPerPage", json!(3)));
        f.model
            .index_record(&record(json!({ "id": 1 })), false)
            .await
            .unwrap();
        f.model.clear_index(false).await.unwrap();
        assert!(f.client.object_ids("Color").is_empty());
        f.model
            .index_record(&record(json!({ "id": 2 })), false)
            .await
            .unwrap();
        assert_eq!(f.client.count("get_settings"), 2);
    }
}
