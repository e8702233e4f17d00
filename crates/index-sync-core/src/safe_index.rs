//! Failure-policy wrapper around one remote index.
//!
//! Every remote call goes through [`SafeIndex`]. With `raise_on_failure`
//! set, remote errors propagate. Without it, the error is logged and the
//! call returns a degraded value carrying an error marker:
//!
//! | Operation | Degraded value |
//! |-----------|----------------|
//! | writes (save, delete, clear, settings, copy) | [`TaskInfo`] with no task id |
//! | search | empty [`SearchResponse`] |
//! | facet search | empty list |
//! | get settings | empty [`SettingsSnapshot`] |
//!
//! Two behaviors ignore the policy: `get_settings` maps a missing index to
//! empty settings, and [`SafeIndex::move_to`] always propagates.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::error;

use crate::client::{RemoteResult, SearchClient};
use crate::error::{RemoteError, Result};
use crate::models::{CopyScope, Document, FacetHit, SearchResponse, TaskInfo};
use crate::settings::SLAVES;

/// Value returned in place of a failed remote call.
pub trait Fallback {
    fn from_failure(error: &RemoteError) -> Self;
}

impl Fallback for TaskInfo {
    fn from_failure(error: &RemoteError) -> Self {
        TaskInfo {
            task_id: None,
            error: Some(error.to_string()),
        }
    }
}

impl Fallback for SearchResponse {
    fn from_failure(error: &RemoteError) -> Self {
        SearchResponse {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

impl Fallback for Vec<FacetHit> {
    fn from_failure(_: &RemoteError) -> Self {
        Vec::new()
    }
}

impl Fallback for () {
    fn from_failure(_: &RemoteError) -> Self {}
}

impl Fallback for Option<Map<String, Value>> {
    fn from_failure(_: &RemoteError) -> Self {
        None
    }
}

/// Remote settings as fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsSnapshot {
    pub values: Map<String, Value>,
    /// Set when the fetch failed and the policy swallowed the error.
    pub error: Option<String>,
}

impl Fallback for SettingsSnapshot {
    fn from_failure(error: &RemoteError) -> Self {
        SettingsSnapshot {
            values: Map::new(),
            error: Some(error.to_string()),
        }
    }
}

impl SettingsSnapshot {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    /// The snapshot to diff against. A degraded fetch counts as unknown.
    pub fn current(&self) -> Option<&Map<String, Value>> {
        if self.is_degraded() {
            None
        } else {
            Some(&self.values)
        }
    }

    /// Whether the remote index lists its secondaries under the legacy field.
    pub fn uses_slaves(&self) -> bool {
        matches!(self.values.get(SLAVES), Some(v) if !v.is_null())
    }
}

/// A remote index handle with a failure policy.
pub struct SafeIndex {
    name: String,
    client: Arc<dyn SearchClient>,
    raise_on_failure: bool,
}

impl std::fmt::Debug for SafeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeIndex")
            .field("name", &self.name)
            .field("raise_on_failure", &self.raise_on_failure)
            .finish()
    }
}

impl SafeIndex {
    pub fn new(name: impl Into<String>, client: Arc<dyn SearchClient>, raise_on_failure: bool) -> Self {
        Self {
            name: name.into(),
            client,
            raise_on_failure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raise_on_failure(&self) -> bool {
        self.raise_on_failure
    }

    fn guard<T: Fallback>(&self, operation: &str, result: RemoteResult<T>) -> Result<T> {
        match result {
            Ok(v) => Ok(v),
            Err(e) if self.raise_on_failure => Err(e.into()),
            Err(e) => {
                error!(index = %self.name, operation, error = %e, "remote call failed");
                Ok(T::from_failure(&e))
            }
        }
    }

    pub async fn save_objects(&self, documents: &[Document]) -> Result<TaskInfo> {
        let r = self.client.save_objects(&self.name, documents).await;
        self.guard("save_objects", r)
    }

    pub async fn save_object(&self, document: &Document) -> Result<TaskInfo> {
        self.save_objects(std::slice::from_ref(document)).await
    }

    pub async fn delete_object(&self, object_id: &str) -> Result<TaskInfo> {
        let r = self.client.delete_object(&self.name, object_id).await;
        self.guard("delete_object", r)
    }

    pub async fn delete_objects(&self, object_ids: &[String]) -> Result<TaskInfo> {
        let r = self.client.delete_objects(&self.name, object_ids).await;
        self.guard("delete_objects", r)
    }

    pub async fn get_object(&self, object_id: &str) -> Result<Option<Map<String, Value>>> {
        let r = self.client.get_object(&self.name, object_id).await;
        self.guard("get_object", r)
    }

    pub async fn clear(&self) -> Result<TaskInfo> {
        let r = self.client.clear_index(&self.name).await;
        self.guard("clear_index", r)
    }

    pub async fn delete(&self) -> Result<TaskInfo> {
        let r = self.client.delete_index(&self.name).await;
        self.guard("delete_index", r)
    }

    /// Fetch remote settings. A missing index has empty settings.
    pub async fn get_settings(&self) -> Result<SettingsSnapshot> {
        let r = match self.client.get_settings(&self.name).await {
            Ok(values) => Ok(SettingsSnapshot {
                values,
                error: None,
            }),
            Err(e) if e.is_not_found() => Ok(SettingsSnapshot::default()),
            Err(e) => Err(e),
        };
        self.guard("get_settings", r)
    }

    pub async fn set_settings(&self, settings: &Map<String, Value>) -> Result<TaskInfo> {
        let r = self.client.set_settings(&self.name, settings).await;
        self.guard("set_settings", r)
    }

    /// Wait for `task`. A degraded task (no id) cannot be waited on: that is
    /// an error in raising mode and a no-op otherwise.
    pub async fn wait_task(&self, task: &TaskInfo) -> Result<()> {
        let r = match task.task_id {
            Some(id) => self.client.wait_task(&self.name, id).await,
            None => Err(RemoteError::transport(format!(
                "no task to wait for: {}",
                task.error.as_deref().unwrap_or("missing task id")
            ))),
        };
        if task.task_id.is_none() && !self.raise_on_failure {
            return Ok(());
        }
        self.guard("wait_task", r)
    }

    pub async fn search(&self, query: &str, params: &BTreeMap<String, String>) -> Result<SearchResponse> {
        let r = self.client.search(&self.name, query, params).await;
        self.guard("search", r)
    }

    pub async fn search_for_facet_values(
        &self,
        facet: &str,
        text: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<FacetHit>> {
        let r = self
            .client
            .search_for_facet_values(&self.name, facet, text, params)
            .await;
        self.guard("search_for_facet_values", r)
    }

    pub async fn copy_to(&self, destination: &str, scope: &[CopyScope]) -> Result<TaskInfo> {
        let r = self.client.copy_index(&self.name, destination, scope).await;
        self.guard("copy_index", r)
    }

    /// Replace `destination` with this index. Always propagates failures:
    /// a half-finished rebuild must not look successful.
    pub async fn move_to(&self, destination: &str) -> Result<TaskInfo> {
        Ok(self.client.move_index(&self.name, destination).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryClient;
    use crate::error::SyncError;

    fn failing(raise: bool) -> (Arc<MemoryClient>, SafeIndex) {
        let client = Arc::new(MemoryClient::new());
        client.fail_with(Some(RemoteError::new(503, "unavailable")));
        let index = SafeIndex::new("Color", client.clone(), raise);
        (client, index)
    }

    #[tokio::test]
    async fn raising_mode_propagates() {
        let (_, index) = failing(true);
        let err = index.save_objects(&[]).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(ref e) if e.status == Some(503)));
    }

    #[tokio::test]
    async fn swallowing_mode_returns_markers() {
        let (_, index) = failing(false);

        let task = index.save_objects(&[]).await.unwrap();
        assert!(task.task_id.is_none());
        assert!(task.error.unwrap().contains("unavailable"));

        let res = index.search("x", &BTreeMap::new()).await.unwrap();
        assert!(res.hits.is_empty());
        assert_eq!(res.hits_per_page, 0);
        assert_eq!(res.page, 0);
        assert!(res.error.is_some());

        let settings = index.get_settings().await.unwrap();
        assert!(settings.is_degraded());
        assert!(settings.current().is_none());

        assert!(index
            .search_for_facet_values("kind", "", &BTreeMap::new())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn missing_index_has_empty_settings() {
        let client = Arc::new(MemoryClient::new());
        let index = SafeIndex::new("Nope", client, true);
        let s = index.get_settings().await.unwrap();
        assert_eq!(s.current(), Some(&Map::new()));
    }

    #[tokio::test]
    async fn waiting_on_a_degraded_task() {
        let client = Arc::new(MemoryClient::new());
        let degraded = TaskInfo::from_failure(&RemoteError::new(500, "boom"));

        let lenient = SafeIndex::new("Color", client.clone(), false);
        assert!(lenient.wait_task(&degraded).await.is_ok());
        assert_eq!(client.count("wait_task"), 0);

        let strict = SafeIndex::new("Color", client, true);
        assert!(strict.wait_task(&degraded).await.is_err());
    }

    #[tokio::test]
    async fn move_always_raises() {
        let (_, index) = failing(false);
        assert!(index.move_to("Color_live").await.is_err());
    }

    #[test]
    fn legacy_listing_detection() {
        let mut s = SettingsSnapshot::default();
        assert!(!s.uses_slaves());
        s.values.insert(SLAVES.into(), serde_json::json!(["a"]));
        assert!(s.uses_slaves());
        s.values.insert(SLAVES.into(), Value::Null);
        assert!(!s.uses_slaves());
    }
}
