//! Registry of every searchable model, independent of record type.
//!
//! [`ManagedModel`] erases the record type of a [`Searchable`] so that
//! batch tooling (reindex everything, replay a job queue) can address models
//! by name.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{ConfigError, Result};
use crate::jobs::IndexJob;
use crate::models::{FacetHit, SearchPage, SearchParams, SearchResponse};
use crate::reindex::{ReindexObserver, ReindexOptions, ReindexReport};
use crate::searchable::Searchable;
use crate::store::Record;

/// Type-erased view of a registered model.
#[async_trait]
pub trait ManagedModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Resolved primary index name.
    fn index_name(&self) -> String;

    /// Resolved names of every configured index, primary first.
    fn index_names(&self) -> Vec<String>;

    async fn reindex(
        &self,
        options: &ReindexOptions,
        observer: Option<&dyn ReindexObserver>,
    ) -> Result<ReindexReport>;

    async fn clear_index(&self, synchronous: bool) -> Result<()>;

    async fn push_settings(&self, synchronous: bool) -> Result<()>;

    async fn remove_from_index(&self, object_id: &str, synchronous: bool) -> Result<()>;

    async fn raw_search(&self, query: &str, params: &SearchParams) -> Result<SearchResponse>;

    async fn search(&self, query: &str, params: &SearchParams) -> Result<SearchPage>;

    async fn search_for_facet_values(
        &self,
        facet: &str,
        text: &str,
        params: &SearchParams,
    ) -> Result<Vec<FacetHit>>;

    async fn perform(&self, job: &IndexJob) -> Result<()>;
}

#[async_trait]
impl<R: Record> ManagedModel for Searchable<R> {
    fn model_name(&self) -> &str {
        self.model()
    }

    fn index_name(&self) -> String {
        Searchable::index_name(self)
    }

    fn index_names(&self) -> Vec<String> {
        let env = self.context().environment();
        self.configurations()
            .iter()
            .map(|c| c.resolved_name(env))
            .collect()
    }

    async fn reindex(
        &self,
        options: &ReindexOptions,
        observer: Option<&dyn ReindexObserver>,
    ) -> Result<ReindexReport> {
        self.reindex_with(options, observer).await
    }

    async fn clear_index(&self, synchronous: bool) -> Result<()> {
        Searchable::clear_index(self, synchronous).await
    }

    async fn push_settings(&self, synchronous: bool) -> Result<()> {
        Searchable::push_settings(self, synchronous).await
    }

    async fn remove_from_index(&self, object_id: &str, synchronous: bool) -> Result<()> {
        Searchable::remove_from_index(self, object_id, synchronous).await
    }

    async fn raw_search(&self, query: &str, params: &SearchParams) -> Result<SearchResponse> {
        Searchable::raw_search(self, query, params).await
    }

    async fn search(&self, query: &str, params: &SearchParams) -> Result<SearchPage> {
        Searchable::search(self, query, params).await
    }

    async fn search_for_facet_values(
        &self,
        facet: &str,
        text: &str,
        params: &SearchParams,
    ) -> Result<Vec<FacetHit>> {
        Searchable::search_for_facet_values(self, facet, text, params).await
    }

    async fn perform(&self, job: &IndexJob) -> Result<()> {
        Searchable::perform(self, job).await
    }
}

/// All registered models, in registration order.
#[derive(Default)]
pub struct ModelCatalog {
    models: Vec<Arc<dyn ManagedModel>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: Arc<dyn ManagedModel>) -> Result<()> {
        if self.find(model.model_name()).is_some() {
            return Err(ConfigError::DuplicateModel(model.model_name().to_string()).into());
        }
        self.models.push(model);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn ManagedModel>> {
        self.models.iter().find(|m| m.model_name() == name)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn ManagedModel>> {
        self.find(name)
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()).into())
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.model_name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ManagedModel>> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Reindex every model in registration order; stops at the first error.
    pub async fn reindex_all(
        &self,
        options: &ReindexOptions,
        observer: Option<&dyn ReindexObserver>,
    ) -> Result<Vec<(String, ReindexReport)>> {
        let mut reports = Vec::with_capacity(self.models.len());
        for model in &self.models {
            info!(model = model.model_name(), "reindexing");
            let report = model.reindex(options, observer).await?;
            reports.push((model.model_name().to_string(), report));
        }
        Ok(reports)
    }

    pub async fn clear_all(&self, synchronous: bool) -> Result<()> {
        for model in &self.models {
            info!(model = model.model_name(), "clearing index");
            model.clear_index(synchronous).await?;
        }
        Ok(())
    }

    /// Route a deferred job to its model.
    pub async fn perform(&self, job: &IndexJob) -> Result<()> {
        self.get(&job.model)?.perform(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryClient;
    use crate::config::IndexConfiguration;
    use crate::context::SyncContext;
    use crate::error::SyncError;
    use crate::store::memory::MemoryStore;
    use crate::store::JsonRecord;
    use serde_json::json;

    fn catalog() -> (Arc<MemoryClient>, ModelCatalog, Arc<MemoryStore>) {
        let client = Arc::new(MemoryClient::new());
        let context = SyncContext::new(client.clone(), None);
        let colors = Arc::new(MemoryStore::new("id"));
        colors.insert(json!({ "id": 1, "name": "red" })).unwrap();
        let people = Arc::new(MemoryStore::new("id"));
        people.insert(json!({ "id": 1, "name": "Steve Jobs" })).unwrap();

        let mut catalog = ModelCatalog::new();
        for (name, store) in [("Color", colors.clone()), ("People", people)] {
            let config = IndexConfiguration::<JsonRecord>::builder(name).build().unwrap();
            let model = Searchable::register(context.clone(), config, store).unwrap();
            catalog.register(model).unwrap();
        }
        (client, catalog, colors)
    }

    #[tokio::test]
    async fn reindex_all_covers_every_model() {
        let (client, catalog, _) = catalog();
        let reports = catalog.reindex_all(&ReindexOptions::default(), None).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(client.object_ids("People"), vec!["1".to_string()]);
        assert_eq!(client.object("People", "1").unwrap()["name"], json!("Steve Jobs"));

        catalog.clear_all(false).await.unwrap();
        assert!(client.object_ids("Color").is_empty());
    }

    #[tokio::test]
    async fn jobs_are_routed_by_model() {
        let (client, catalog, _) = catalog();
        catalog.perform(&IndexJob::index("Color", "1")).await.unwrap();
        assert!(client.object("Color", "1").is_some());

        let err = catalog.perform(&IndexJob::index("Ghost", "1")).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(ConfigError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let (_, mut catalog, store) = catalog();
        let other = SyncContext::new(Arc::new(MemoryClient::new()), None);
        let config = IndexConfiguration::<JsonRecord>::builder("Color").build().unwrap();
        let dup = Searchable::register(other, config, store).unwrap();
        assert!(catalog.register(dup).is_err());
        assert_eq!(catalog.names(), vec!["Color", "People"]);
    }
}
