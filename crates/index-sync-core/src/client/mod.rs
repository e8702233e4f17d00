//! Remote search service abstraction.
//!
//! [`SearchClient`] is the raw wire contract: every method addresses an index
//! by its resolved name and reports failures as [`RemoteError`]. A missing
//! index is a 404. Nothing here applies the failure policy; that is the job
//! of [`SafeIndex`](crate::safe_index::SafeIndex).
//!
//! Index handles are created locally and for free: the service creates an
//! index on its first write.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::models::{CopyScope, Document, FacetHit, SearchResponse, TaskInfo};

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Upsert documents (by object id).
    async fn save_objects(&self, index: &str, documents: &[Document]) -> RemoteResult<TaskInfo>;

    async fn delete_object(&self, index: &str, object_id: &str) -> RemoteResult<TaskInfo>;

    async fn delete_objects(&self, index: &str, object_ids: &[String]) -> RemoteResult<TaskInfo>;

    async fn get_object(&self, index: &str, object_id: &str)
        -> RemoteResult<Option<Map<String, Value>>>;

    /// Remove every document, keeping the index and its settings.
    async fn clear_index(&self, index: &str) -> RemoteResult<TaskInfo>;

    async fn delete_index(&self, index: &str) -> RemoteResult<TaskInfo>;

    async fn get_settings(&self, index: &str) -> RemoteResult<Map<String, Value>>;

    /// Apply the given settings; keys not mentioned are left untouched.
    async fn set_settings(&self, index: &str, settings: &Map<String, Value>)
        -> RemoteResult<TaskInfo>;

    /// Block until the task is applied.
    async fn wait_task(&self, index: &str, task_id: u64) -> RemoteResult<()>;

    /// Atomically replace `destination` with `source`; `source` disappears.
    async fn move_index(&self, source: &str, destination: &str) -> RemoteResult<TaskInfo>;

    /// Copy the scoped parts of `source` onto `destination`.
    async fn copy_index(
        &self,
        source: &str,
        destination: &str,
        scope: &[CopyScope],
    ) -> RemoteResult<TaskInfo>;

    async fn search(
        &self,
        index: &str,
        query: &str,
        params: &BTreeMap<String, String>,
    ) -> RemoteResult<SearchResponse>;

    async fn search_for_facet_values(
        &self,
        index: &str,
        facet: &str,
        text: &str,
        params: &BTreeMap<String, String>,
    ) -> RemoteResult<Vec<FacetHit>>;
}
