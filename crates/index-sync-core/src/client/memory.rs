//! In-memory [`SearchClient`] for tests and dry runs.
//!
//! Indexes live in a `HashMap` behind `std::sync::RwLock`. Every call is
//! appended to a call log so tests can assert on exactly which remote
//! operations happened. Search is a case-insensitive substring match over
//! string values, paginated like the real service.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{RemoteResult, SearchClient};
use crate::error::RemoteError;
use crate::models::{CopyScope, Document, FacetHit, SearchResponse, TaskInfo, OBJECT_ID};
use crate::settings::{REPLICAS, SLAVES};

const DEFAULT_HITS_PER_PAGE: u64 = 20;

/// Contents of one in-memory index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryIndex {
    pub objects: BTreeMap<String, Map<String, Value>>,
    pub settings: Map<String, Value>,
    pub synonyms: Vec<Value>,
    pub rules: Vec<Value>,
}

/// One recorded client call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: &'static str,
    pub index: String,
}

pub struct MemoryClient {
    indices: RwLock<HashMap<String, MemoryIndex>>,
    next_task: AtomicU64,
    calls: Mutex<Vec<Call>>,
    failure: RwLock<Option<RemoteError>>,
    targeted: RwLock<Vec<TargetedFailure>>,
}

/// A failure injected for one operation on indexes ending with a suffix.
#[derive(Debug, Clone)]
struct TargetedFailure {
    operation: &'static str,
    index_suffix: String,
    error: RemoteError,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
            next_task: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            failure: RwLock::new(None),
            targeted: RwLock::new(Vec::new()),
        }
    }

    /// Make every subsequent call fail with `error` (or succeed again with `None`).
    pub fn fail_with(&self, error: Option<RemoteError>) {
        *self.failure.write().unwrap() = error;
    }

    /// Make `operation` fail on every index whose name ends with
    /// `index_suffix`. Other calls are unaffected.
    pub fn fail_on(&self, operation: &'static str, index_suffix: impl Into<String>, error: RemoteError) {
        self.targeted.write().unwrap().push(TargetedFailure {
            operation,
            index_suffix: index_suffix.into(),
            error,
        });
    }

    pub fn clear_failures(&self) {
        *self.failure.write().unwrap() = None;
        self.targeted.write().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls of one operation, on any index.
    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn index_exists(&self, index: &str) -> bool {
        self.indices.read().unwrap().contains_key(index)
    }

    pub fn snapshot(&self, index: &str) -> Option<MemoryIndex> {
        self.indices.read().unwrap().get(index).cloned()
    }

    pub fn object(&self, index: &str, object_id: &str) -> Option<Map<String, Value>> {
        self.snapshot(index)
            .and_then(|i| i.objects.get(object_id).cloned())
    }

    pub fn object_ids(&self, index: &str) -> Vec<String> {
        self.snapshot(index)
            .map(|i| i.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Seed remote state without recording a call.
    pub fn seed(&self, index: &str, contents: MemoryIndex) {
        self.indices
            .write()
            .unwrap()
            .insert(index.to_string(), contents);
    }

    fn record(&self, operation: &'static str, index: &str) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(Call {
            operation,
            index: index.to_string(),
        });
        if let Some(e) = &*self.failure.read().unwrap() {
            return Err(e.clone());
        }
        let targeted = self.targeted.read().unwrap();
        match targeted
            .iter()
            .find(|t| t.operation == operation && index.ends_with(t.index_suffix.as_str()))
        {
            Some(t) => Err(t.error.clone()),
            None => Ok(()),
        }
    }

    fn task(&self) -> TaskInfo {
        TaskInfo::new(self.next_task.fetch_add(1, Ordering::SeqCst))
    }

    fn missing(index: &str) -> RemoteError {
        RemoteError::not_found(format!("Index {} does not exist", index))
    }

    fn with_index<T>(
        &self,
        index: &str,
        f: impl FnOnce(&MemoryIndex) -> T,
    ) -> RemoteResult<T> {
        let indices = self.indices.read().unwrap();
        indices.get(index).map(f).ok_or_else(|| Self::missing(index))
    }

    fn write_index(&self, index: &str, f: impl FnOnce(&mut MemoryIndex)) -> TaskInfo {
        let mut indices = self.indices.write().unwrap();
        f(indices.entry(index.to_string()).or_default());
        self.task()
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_query(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|v| matches_query(v, needle)),
        Value::Object(map) => map.values().any(|v| matches_query(v, needle)),
        _ => false,
    }
}

fn param_u64(params: &BTreeMap<String, String>, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.parse().ok())
}

#[async_trait]
impl SearchClient for MemoryClient {
    async fn save_objects(&self, index: &str, documents: &[Document]) -> RemoteResult<TaskInfo> {
        self.record("save_objects", index)?;
        Ok(self.write_index(index, |i| {
            for doc in documents {
                let mut body = doc.attributes.clone();
                body.insert(OBJECT_ID.to_string(), Value::String(doc.object_id.clone()));
                i.objects.insert(doc.object_id.clone(), body);
            }
        }))
    }

    async fn delete_object(&self, index: &str, object_id: &str) -> RemoteResult<TaskInfo> {
        self.record("delete_object", index)?;
        Ok(self.write_index(index, |i| {
            i.objects.remove(object_id);
        }))
    }

    async fn delete_objects(&self, index: &str, object_ids: &[String]) -> RemoteResult<TaskInfo> {
        self.record("delete_objects", index)?;
        Ok(self.write_index(index, |i| {
            for id in object_ids {
                i.objects.remove(id);
            }
        }))
    }

    async fn get_object(
        &self,
        index: &str,
        object_id: &str,
    ) -> RemoteResult<Option<Map<String, Value>>> {
        self.record("get_object", index)?;
        self.with_index(index, |i| i.objects.get(object_id).cloned())
    }

    async fn clear_index(&self, index: &str) -> RemoteResult<TaskInfo> {
        self.record("clear_index", index)?;
        Ok(self.write_index(index, |i| i.objects.clear()))
    }

    async fn delete_index(&self, index: &str) -> RemoteResult<TaskInfo> {
        self.record("delete_index", index)?;
        match self.indices.write().unwrap().remove(index) {
            Some(_) => Ok(self.task()),
            None => Err(Self::missing(index)),
        }
    }

    async fn get_settings(&self, index: &str) -> RemoteResult<Map<String, Value>> {
        self.record("get_settings", index)?;
        self.with_index(index, |i| i.settings.clone())
    }

    async fn set_settings(
        &self,
        index: &str,
        settings: &Map<String, Value>,
    ) -> RemoteResult<TaskInfo> {
        self.record("set_settings", index)?;
        Ok(self.write_index(index, |i| {
            for (k, v) in settings {
                i.settings.insert(k.clone(), v.clone());
            }
        }))
    }

    async fn wait_task(&self, index: &str, task_id: u64) -> RemoteResult<()> {
        self.record("wait_task", index)?;
        if task_id >= self.next_task.load(Ordering::SeqCst) {
            return Err(RemoteError::new(404, format!("Task {} does not exist", task_id)));
        }
        Ok(())
    }

    async fn move_index(&self, source: &str, destination: &str) -> RemoteResult<TaskInfo> {
        self.record("move_index", source)?;
        let mut indices = self.indices.write().unwrap();
        let mut moved = indices.remove(source).ok_or_else(|| Self::missing(source))?;
        // the destination keeps its replicas
        if let Some(previous) = indices.get(destination) {
            for field in [REPLICAS, SLAVES] {
                if let Some(listing) = previous.settings.get(field) {
                    moved.settings.insert(field.to_string(), listing.clone());
                }
            }
        }
        indices.insert(destination.to_string(), moved);
        drop(indices);
        Ok(self.task())
    }

    async fn copy_index(
        &self,
        source: &str,
        destination: &str,
        scope: &[CopyScope],
    ) -> RemoteResult<TaskInfo> {
        self.record("copy_index", source)?;
        let src = self.with_index(source, MemoryIndex::clone)?;
        Ok(self.write_index(destination, |dst| {
            if scope.is_empty() {
                *dst = src;
                return;
            }
            for part in scope {
                match part {
                    CopyScope::Settings => dst.settings = src.settings.clone(),
                    CopyScope::Synonyms => dst.synonyms = src.synonyms.clone(),
                    CopyScope::Rules => dst.rules = src.rules.clone(),
                }
            }
        }))
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        params: &BTreeMap<String, String>,
    ) -> RemoteResult<SearchResponse> {
        self.record("search", index)?;
        let needle = query.trim().to_lowercase();
        let (matched, default_hpp) = self.with_index(index, |i| {
            let matched: Vec<Map<String, Value>> = i
                .objects
                .values()
                .filter(|o| needle.is_empty() || o.values().any(|v| matches_query(v, &needle)))
                .cloned()
                .collect();
            let hpp = i
                .settings
                .get("hitsPerPage")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_HITS_PER_PAGE);
            (matched, hpp)
        })?;

        let hits_per_page = param_u64(params, "hitsPerPage").unwrap_or(default_hpp).max(1);
        let page = param_u64(params, "page").unwrap_or(0);
        let nb_hits = matched.len() as u64;
        let nb_pages = nb_hits.saturating_add(hits_per_page - 1) / hits_per_page;
        let skip = usize::try_from(page.saturating_mul(hits_per_page)).unwrap_or(usize::MAX);
        let take = usize::try_from(hits_per_page).unwrap_or(usize::MAX);
        let hits = matched
            .into_iter()
            .skip(skip)
            .take(take)
            .collect();
        Ok(SearchResponse {
            hits,
            nb_hits,
            page,
            nb_pages,
            hits_per_page,
            facets: Map::new(),
            error: None,
        })
    }

    async fn search_for_facet_values(
        &self,
        index: &str,
        facet: &str,
        text: &str,
        _params: &BTreeMap<String, String>,
    ) -> RemoteResult<Vec<FacetHit>> {
        self.record("search_for_facet_values", index)?;
        let prefix = text.to_lowercase();
        let counts = self.with_index(index, |i| {
            let mut counts: BTreeMap<String, u64> = BTreeMap::new();
            for object in i.objects.values() {
                let values: Vec<&Value> = match object.get(facet) {
                    Some(Value::Array(items)) => items.iter().collect(),
                    Some(v) => vec![v],
                    None => vec![],
                };
                for v in values {
                    let s = match v {
                        Value::String(s) => s.clone(),
                        Value::Null => continue,
                        other => other.to_string(),
                    };
                    if s.to_lowercase().starts_with(&prefix) {
                        *counts.entry(s).or_insert(0) += 1;
                    }
                }
            }
            counts
        })?;
        let mut hits: Vec<FacetHit> = counts
            .into_iter()
            .map(|(value, count)| FacetHit {
                highlighted: value.clone(),
                value,
                count,
            })
            .collect();
        hits.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, v: Value) -> Document {
        Document::new(id, v.as_object().cloned().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn missing_index_is_not_found() {
        let c = MemoryClient::new();
        let err = c.get_settings("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(c.count("get_settings"), 1);
    }

    #[tokio::test]
    async fn save_search_and_paginate() {
        let c = MemoryClient::new();
        let docs: Vec<Document> = (0..5)
            .map(|n| doc(&n.to_string(), json!({ "name": format!("red {}", n) })))
            .collect();
        c.save_objects("Color", &docs).await.unwrap();
        c.save_objects("Color", &[doc("9", json!({ "name": "blue" }))])
            .await
            .unwrap();

        let mut params = BTreeMap::new();
        params.insert("hitsPerPage".to_string(), "2".to_string());
        params.insert("page".to_string(), "2".to_string());
        let res = c.search("Color", "RED", &params).await.unwrap();
        assert_eq!(res.nb_hits, 5);
        assert_eq!(res.nb_pages, 3);
        assert_eq!(res.hit_ids(), vec!["4".to_string()]);
    }

    #[tokio::test]
    async fn move_replaces_destination() {
        let c = MemoryClient::new();
        c.save_objects("a.tmp", &[doc("1", json!({}))]).await.unwrap();
        c.save_objects("a", &[doc("2", json!({}))]).await.unwrap();
        c.move_index("a.tmp", "a").await.unwrap();
        assert!(!c.index_exists("a.tmp"));
        assert_eq!(c.object_ids("a"), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn copy_respects_scope() {
        let c = MemoryClient::new();
        c.save_objects("src", &[doc("1", json!({}))]).await.unwrap();
        let mut s = Map::new();
        s.insert("hitsPerPage".into(), json!(7));
        c.set_settings("src", &s).await.unwrap();

        c.copy_index("src", "dst", &[CopyScope::Settings]).await.unwrap();
        let dst = c.snapshot("dst").unwrap();
        assert_eq!(dst.settings["hitsPerPage"], json!(7));
        assert!(dst.objects.is_empty());
    }

    #[tokio::test]
    async fn injected_failure_applies_to_every_call() {
        let c = MemoryClient::new();
        c.fail_with(Some(RemoteError::new(503, "down")));
        assert!(c.save_objects("x", &[]).await.is_err());
        c.fail_with(None);
        assert!(c.save_objects("x", &[]).await.is_ok());
        assert_eq!(c.count("save_objects"), 2);
    }

    #[tokio::test]
    async fn targeted_failure_hits_only_matching_indexes() {
        let c = MemoryClient::new();
        c.fail_on("save_objects", ".tmp", RemoteError::new(500, "disk full"));
        assert!(c.save_objects("Color.tmp", &[doc("1", json!({}))]).await.is_err());
        assert!(c.save_objects("Color", &[doc("1", json!({}))]).await.is_ok());
        assert!(c.clear_index("Color.tmp").await.is_ok());
        c.clear_failures();
        assert!(c.save_objects("Color.tmp", &[doc("1", json!({}))]).await.is_ok());
    }

    #[tokio::test]
    async fn huge_page_parameters_do_not_overflow() {
        let c = MemoryClient::new();
        c.save_objects("Color", &[doc("1", json!({ "name": "red" }))])
            .await
            .unwrap();
        let mut params = BTreeMap::new();
        params.insert("hitsPerPage".to_string(), u64::MAX.to_string());
        params.insert("page".to_string(), u64::MAX.to_string());
        let res = c.search("Color", "", &params).await.unwrap();
        assert_eq!(res.nb_hits, 1);
        assert_eq!(res.nb_pages, 1);
        assert!(res.hits.is_empty());
    }

    #[tokio::test]
    async fn facet_values_are_counted() {
        let c = MemoryClient::new();
        c.save_objects(
            "Color",
            &[
                doc("1", json!({ "kind": "primary" })),
                doc("2", json!({ "kind": ["primary", "pastel"] })),
                doc("3", json!({ "kind": "secondary" })),
            ],
        )
        .await
        .unwrap();
        let hits = c
            .search_for_facet_values("Color", "kind", "p", &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(hits[0].value, "primary");
        assert_eq!(hits[0].count, 2);
        assert_eq!(hits.len(), 2);
    }
}
