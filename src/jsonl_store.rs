//! Read-only data store backed by a JSON-lines file.
//!
//! Each non-empty line is one record (a JSON object). Records are served in
//! file order; lookups by id use the model's id field. The store has no
//! lifecycle events, so models backed by it are indexed through the CLI
//! (`reindex`, `work`) rather than automatically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use index_sync_core::models::{is_blank, object_id_string};
use index_sync_core::store::{JsonRecord, StoreAdapter};

pub struct JsonlStore {
    path: PathBuf,
    records: Vec<JsonRecord>,
    by_id: HashMap<String, usize>,
}

impl JsonlStore {
    /// Load every record of `path`. A missing file is an error; an empty file
    /// is an empty store.
    pub fn open(path: &Path, id_field: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read records: {}", path.display()))?;

        let mut records = Vec::new();
        let mut by_id = HashMap::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid JSON", path.display(), n + 1))?;
            let fields = match value {
                Value::Object(map) => map,
                _ => bail!("{}:{}: records must be JSON objects", path.display(), n + 1),
            };
            let id = object_id_string(fields.get(id_field));
            if !is_blank(&id) {
                by_id.insert(id, records.len());
            }
            records.push(JsonRecord::loaded(fields));
        }

        Ok(Self {
            path: path.to_path_buf(),
            records,
            by_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StoreAdapter<JsonRecord> for JsonlStore {
    fn name(&self) -> &str {
        "jsonl"
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
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<JsonRecord>> {
        Ok(self.by_id.get(id).map(|&i| self.records[i].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn jsonl(lines: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(lines.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn loads_records_in_file_order() {
        let file = jsonl("{\"id\": 2, \"name\": \"b\"}\n\n{\"id\": 1, \"name\": \"a\"}\n");
        let store = JsonlStore::open(file.path(), "id").unwrap();
        assert_eq!(store.len(), 2);

        let batch = store.find_batch(0, 10).await.unwrap();
        assert_eq!(batch[0].get("name"), Some(&json!("b")));
        assert!(!store.is_new_record(&batch[0]));

        let found = store.find_by_id("1").await.unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&json!("a")));
        assert!(store.find_by_id("9").await.unwrap().is_none());
    }

    #[test]
    fn reports_the_offending_line() {
        let file = jsonl("{\"id\": 1}\n[1, 2]\n");
        let err = JsonlStore::open(file.path(), "id").err().unwrap();
        assert!(format!("{:#}", err).contains(":2: records must be JSON objects"));

        let file = jsonl("{oops\n");
        let err = JsonlStore::open(file.path(), "id").err().unwrap();
        assert!(format!("{:#}", err).contains(":1: invalid JSON"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(JsonlStore::open(Path::new("/nonexistent/records.jsonl"), "id").is_err());
    }
}
