//! Core data types exchanged with the remote search service.
//!
//! [`Document`] is what gets written; [`TaskInfo`], [`SearchResponse`] and
//! [`FacetHit`] are what comes back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Name of the unique identifier field on every remote document.
pub const OBJECT_ID: &str = "objectID";

/// A flattened record ready for the remote index.
///
/// Serializes as the attribute map with `objectID` merged in:
///
/// ```rust
/// use index_sync_core::models::Document;
/// use serde_json::json;
///
/// let attrs = json!({ "name": "Steve Jobs" }).as_object().cloned().unwrap();
/// let doc = Document::new("1", attrs).unwrap();
/// assert_eq!(
///     serde_json::to_value(&doc).unwrap(),
///     json!({ "name": "Steve Jobs", "objectID": "1" })
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "objectID")]
    pub object_id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Document {
    /// Build a document, refusing a blank identifier.
    pub fn new(
        object_id: impl Into<String>,
        mut attributes: Map<String, Value>,
    ) -> Result<Self, ConfigError> {
        let object_id = object_id.into();
        if is_blank(&object_id) {
            return Err(ConfigError::BlankObjectId);
        }
        // objectID is owned by the document, never by the attribute map
        attributes.remove(OBJECT_ID);
        Ok(Self {
            object_id,
            attributes,
        })
    }
}

/// True for empty or whitespace-only identifiers.
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Render a field value as an object id. Null and missing values are blank.
pub fn object_id_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Handle for an asynchronous remote operation.
///
/// A degraded (logged, not raised) failure yields a `TaskInfo` with no
/// task id and the error message attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    #[serde(rename = "taskID", default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskInfo {
    pub fn new(task_id: u64) -> Self {
        Self {
            task_id: Some(task_id),
            error: None,
        }
    }
}

/// Parts of an index copied by [`SearchClient::copy_index`](crate::client::SearchClient::copy_index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyScope {
    Settings,
    Synonyms,
    Rules,
}

/// Query parameters for a search call.
///
/// `index` is consumed locally to pick a configured secondary index; every
/// other parameter is forwarded to the remote service as a string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParams {
    pub index: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a configured secondary index by name.
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    /// Add a parameter; the value is stringified.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    pub fn page(self, page: u64) -> Self {
        self.param("page", page)
    }

    pub fn hits_per_page(self, n: u64) -> Self {
        self.param("hitsPerPage", n)
    }

    /// Numeric parameter lookup.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.parse().ok())
    }
}

/// Raw response from a search call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub hits: Vec<Map<String, Value>>,
    #[serde(rename = "nbHits", default)]
    pub nb_hits: u64,
    #[serde(default)]
    pub page: u64,
    #[serde(rename = "nbPages", default)]
    pub nb_pages: u64,
    #[serde(rename = "hitsPerPage", default)]
    pub hits_per_page: u64,
    #[serde(default)]
    pub facets: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResponse {
    /// Object ids of the hits, in rank order.
    pub fn hit_ids(&self) -> Vec<String> {
        self.hits
            .iter()
            .map(|h| object_id_string(h.get(OBJECT_ID)))
            .collect()
    }
}

/// A paginated search result with 1-based paging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub hits: Vec<Map<String, Value>>,
    /// Hits reachable through pagination (the service caps retrievable hits).
    pub total_hits: u64,
    /// Current page, starting at 1.
    pub page: u64,
    pub per_page: u64,
    pub facets: Map<String, Value>,
    #[serde(skip)]
    pub raw: SearchResponse,
}

impl SearchPage {
    pub fn from_response(raw: SearchResponse) -> Self {
        let reachable = raw.nb_pages.saturating_mul(raw.hits_per_page);
        let total_hits = raw.nb_hits.min(reachable);
        Self {
            hits: raw.hits.clone(),
            total_hits,
            page: raw.page + 1,
            per_page: raw.hits_per_page,
            facets: raw.facets.clone(),
            raw,
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// The error marker of a degraded search, if any.
    pub fn error(&self) -> Option<&str> {
        self.raw.error.as_deref()
    }
}

/// One facet value returned by a facet-value search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetHit {
    pub value: String,
    #[serde(default)]
    pub highlighted: String,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_ids_are_rejected() {
        assert_eq!(
            Document::new("", Map::new()),
            Err(ConfigError::BlankObjectId)
        );
        assert_eq!(
            Document::new("   ", Map::new()),
            Err(ConfigError::BlankObjectId)
        );
        assert!(Document::new("0", Map::new()).is_ok());
    }

    #[test]
    fn object_id_rendering() {
        assert_eq!(object_id_string(Some(&json!(42))), "42");
        assert_eq!(object_id_string(Some(&json!("abc"))), "abc");
        assert_eq!(object_id_string(Some(&Value::Null)), "");
        assert_eq!(object_id_string(None), "");
    }

    #[test]
    fn attribute_map_cannot_override_object_id() {
        let attrs = json!({ "objectID": "spoofed", "name": "x" })
            .as_object()
            .cloned()
            .unwrap();
        let doc = Document::new("7", attrs).unwrap();
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({ "objectID": "7", "name": "x" })
        );
    }

    #[test]
    fn search_page_caps_total_and_shifts_page() {
        let raw = SearchResponse {
            hits: vec![],
            nb_hits: 5000,
            page: 2,
            nb_pages: 50,
            hits_per_page: 20,
            facets: Map::new(),
            error: None,
        };
        let page = SearchPage::from_response(raw);
        assert_eq!(page.total_hits, 1000);
        assert_eq!(page.page, 3);
        assert_eq!(page.per_page, 20);
    }

    #[test]
    fn task_info_serializes_with_remote_field_name() {
        let t = TaskInfo::new(12);
        assert_eq!(serde_json::to_value(&t).unwrap(), json!({ "taskID": 12 }));
    }
}
