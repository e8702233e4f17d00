//! Configuration parsing and validation.
//!
//! `isync` reads a single TOML file (default `./config/isync.toml`):
//!
//! ```toml
//! [remote]
//! application_id = "APP123"
//! api_key = "..."            # or ISYNC_API_KEY
//!
//! [indexing]
//! environment = "production"
//! batch_size = 500
//!
//! [queue]
//! spool = "./data/jobs.jsonl"
//!
//! [[models]]
//! name = "Contact"
//! source = "./data/contacts.jsonl"
//! attributes = ["first_name", "last_name", "email"]
//! index_if = "published"
//!
//! [models.settings]
//! searchableAttributes = ["last_name", "first_name"]
//!
//! [[models.replicas]]
//! name = "Contact_by_name"
//! inherit = true
//! settings = { ranking = ["asc(last_name)"] }
//! ```
//!
//! Every section except `[remote]` is optional. Defaults are applied with
//! `#[serde(default = "...")]` helpers and the whole file is checked by
//! [`load_config`] before anything talks to the remote service.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Environment variable consulted when `remote.api_key` is not set.
pub const API_KEY_ENV: &str = "ISYNC_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub application_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Explicit host list. Empty means the service's default hosts.
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_task_poll_ms")]
    pub task_poll_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_task_poll_ms() -> u64 {
    100
}

impl RemoteConfig {
    /// The configured key, falling back to [`API_KEY_ENV`].
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.clone());
        }
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => bail!(
                "remote.api_key is not set and {} is empty or missing",
                API_KEY_ENV
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Suffix for models declared with `per_environment = true`.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Default failure policy for models that don't set their own.
    #[serde(default = "default_raise_on_failure")]
    pub raise_on_failure: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            batch_size: default_batch_size(),
            raise_on_failure: default_raise_on_failure(),
        }
    }
}

fn default_environment() -> String {
    "development".to_string()
}
fn default_batch_size() -> usize {
    1000
}
fn default_raise_on_failure() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct QueueConfig {
    /// JSON-lines file that receives enqueued jobs.
    pub spool: Option<PathBuf>,
}

/// A field-based condition: one field name, or several that must all hold.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum FieldCondition {
    One(String),
    All(Vec<String>),
}

impl FieldCondition {
    pub fn fields(&self) -> Vec<&str> {
        match self {
            FieldCondition::One(f) => vec![f.as_str()],
            FieldCondition::All(fs) => fs.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct GeolocConfig {
    pub lat: String,
    pub lng: String,
}

/// One `[[models]]` entry.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub name: String,
    /// JSON-lines file holding the model's records.
    pub source: PathBuf,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub per_environment: bool,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub geoloc: Option<GeolocConfig>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub index_if: Option<FieldCondition>,
    #[serde(default)]
    pub index_unless: Option<FieldCondition>,
    #[serde(default)]
    pub disable_indexing: bool,
    #[serde(default)]
    pub synchronous: bool,
    #[serde(default)]
    pub raise_on_failure: Option<bool>,
    #[serde(default)]
    pub sanitize: bool,
    #[serde(default)]
    pub force_utf8_encoding: bool,
    #[serde(default = "default_check_settings")]
    pub check_settings: bool,
    /// Route writes through the `[queue]` spool.
    #[serde(default)]
    pub enqueue: bool,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub indexes: Vec<NestedIndexConfig>,
    #[serde(default)]
    pub replicas: Vec<NestedIndexConfig>,
    /// Legacy spelling of `replicas`; the two cannot be mixed.
    #[serde(default)]
    pub slaves: Vec<NestedIndexConfig>,
}

fn default_id_field() -> String {
    "id".to_string()
}
fn default_check_settings() -> bool {
    true
}

/// An additional index or replica declared under a model.
#[derive(Debug, Deserialize, Clone)]
pub struct NestedIndexConfig {
    pub name: String,
    #[serde(default)]
    pub per_environment: Option<bool>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub index_if: Option<FieldCondition>,
    #[serde(default)]
    pub index_unless: Option<FieldCondition>,
    #[serde(default)]
    pub inherit: bool,
    #[serde(default = "default_check_settings")]
    pub check_settings: bool,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub replicas: Vec<NestedIndexConfig>,
}

impl ModelConfig {
    pub fn declared_index_name(&self) -> String {
        self.index_name
            .clone()
            .unwrap_or_else(|| index_sync_core::config::default_index_name(&self.name))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.remote.application_id.trim().is_empty() {
        bail!("remote.application_id must not be empty");
    }
    if config.remote.timeout_secs == 0 {
        bail!("remote.timeout_secs must be > 0");
    }
    if config.remote.task_poll_ms == 0 {
        bail!("remote.task_poll_ms must be > 0");
    }

    if config.indexing.batch_size == 0 {
        bail!("indexing.batch_size must be > 0");
    }
    if config.indexing.environment.trim().is_empty() {
        bail!("indexing.environment must not be empty");
    }

    let mut seen = HashSet::new();
    for model in &config.models {
        if model.name.trim().is_empty() {
            bail!("models[].name must not be empty");
        }
        if !seen.insert(model.name.as_str()) {
            bail!("model '{}' is declared more than once", model.name);
        }
        if model.id_field.trim().is_empty() {
            bail!("model '{}': id_field must not be empty", model.name);
        }
        if model.enqueue && config.queue.spool.is_none() {
            bail!(
                "model '{}' enqueues jobs but no [queue] spool is configured",
                model.name
            );
        }
        if model.enqueue && model.synchronous {
            bail!(
                "model '{}': enqueue and synchronous cannot be combined",
                model.name
            );
        }
        if !model.replicas.is_empty() && !model.slaves.is_empty() {
            bail!(
                "model '{}': cannot mix replicas and slaves",
                model.name
            );
        }
        for nested in model.indexes.iter().chain(&model.replicas).chain(&model.slaves) {
            if nested.name.trim().is_empty() {
                bail!("model '{}': nested index names must not be empty", model.name);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let file = write_config(
            r#"
[remote]
application_id = "APP"
"#,
        );
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.remote.timeout_secs, 30);
        assert_eq!(cfg.remote.max_retries, 5);
        assert_eq!(cfg.remote.task_poll_ms, 100);
        assert_eq!(cfg.indexing.environment, "development");
        assert_eq!(cfg.indexing.batch_size, 1000);
        assert!(cfg.indexing.raise_on_failure);
        assert!(cfg.queue.spool.is_none());
        assert!(cfg.models.is_empty());
    }

    #[test]
    fn models_parse_with_nested_indexes() {
        let file = write_config(
            r#"
[remote]
application_id = "APP"

[[models]]
name = "Admin::User"
source = "users.jsonl"
attributes = ["name"]
index_if = ["active", "confirmed"]
geoloc = { lat = "lat", lng = "lng" }

[models.settings]
hitsPerPage = 42
searchableAttributes = ["name"]

[[models.replicas]]
name = "users_by_name"
inherit = true
"#,
        );
        let cfg = load_config(file.path()).unwrap();
        let model = &cfg.models[0];
        assert_eq!(model.declared_index_name(), "Admin_User");
        assert_eq!(model.id_field, "id");
        assert!(model.check_settings);
        assert_eq!(
            model.index_if,
            Some(FieldCondition::All(vec!["active".into(), "confirmed".into()]))
        );
        assert_eq!(model.settings["hitsPerPage"], serde_json::json!(42));
        assert!(model.replicas[0].inherit);
        assert_eq!(model.geoloc.as_ref().unwrap().lat, "lat");
    }

    #[test]
    fn rejects_invalid_files() {
        let cases = [
            (
                "[remote]\napplication_id = \"\"\n",
                "application_id",
            ),
            (
                "[remote]\napplication_id = \"A\"\n[indexing]\nbatch_size = 0\n",
                "batch_size",
            ),
            (
                "[remote]\napplication_id = \"A\"\n[[models]]\nname = \"X\"\nsource = \"x\"\n[[models]]\nname = \"X\"\nsource = \"y\"\n",
                "more than once",
            ),
            (
                "[remote]\napplication_id = \"A\"\n[[models]]\nname = \"X\"\nsource = \"x\"\nenqueue = true\n",
                "spool",
            ),
            (
                "[remote]\napplication_id = \"A\"\n[[models]]\nname = \"X\"\nsource = \"x\"\n[[models.replicas]]\nname = \"r\"\n[[models.slaves]]\nname = \"s\"\n",
                "cannot mix",
            ),
        ];
        for (body, needle) in cases {
            let file = write_config(body);
            let err = load_config(file.path()).unwrap_err();
            assert!(
                format!("{:#}", err).contains(needle),
                "expected '{}' in '{:#}'",
                needle,
                err
            );
        }
    }

    #[test]
    fn explicit_api_key_wins() {
        let file = write_config("[remote]\napplication_id = \"A\"\napi_key = \"secret\"\n");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.remote.api_key().unwrap(), "secret");
    }
}
