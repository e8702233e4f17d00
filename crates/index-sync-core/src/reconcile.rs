//! Lazy, memoized settings reconciliation.
//!
//! The first use of a configuration's index creates a [`SafeIndex`] handle
//! and, unless disabled, brings the remote settings in line:
//!
//! ```text
//! fetch current ──► desired (own or inherited) ──► rename listing ──► diff ──► push?
//! ```
//!
//! An empty snapshot (including a missing index) always leads to a push.
//! Handles are memoized per (model, resolved index name), so reconciliation
//! runs at most once per process until [`SettingsReconciler::forget`].

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::client::SearchClient;
use crate::config::IndexConfiguration;
use crate::error::Result;
use crate::models::TaskInfo;
use crate::safe_index::{SafeIndex, SettingsSnapshot};
use crate::settings::{settings_changed, take_secondary_listing, REPLICAS, SLAVES};
use crate::store::Record;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandleKey {
    model: String,
    index: String,
}

pub struct SettingsReconciler {
    client: Arc<dyn SearchClient>,
    environment: Option<String>,
    handles: DashMap<HandleKey, Arc<SafeIndex>>,
}

impl SettingsReconciler {
    pub fn new(client: Arc<dyn SearchClient>, environment: Option<String>) -> Self {
        Self {
            client,
            environment,
            handles: DashMap::new(),
        }
    }

    pub fn client(&self) -> &Arc<dyn SearchClient> {
        &self.client
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn resolved_name<R: Record>(&self, config: &IndexConfiguration<R>) -> String {
        config.resolved_name(self.environment())
    }

    fn key<R: Record>(&self, config: &IndexConfiguration<R>) -> HandleKey {
        HandleKey {
            model: config.model().to_string(),
            index: self.resolved_name(config),
        }
    }

    /// Memoized handle for `config`, reconciling settings on first use.
    pub async fn ensure_configured<R: Record>(
        &self,
        config: &IndexConfiguration<R>,
    ) -> Result<Arc<SafeIndex>> {
        self.ensure_configured_with(config, None).await
    }

    /// Like [`ensure_configured`](Self::ensure_configured), with an explicit
    /// desired settings map in place of the configuration's own.
    pub async fn ensure_configured_with<R: Record>(
        &self,
        config: &IndexConfiguration<R>,
        desired: Option<Map<String, Value>>,
    ) -> Result<Arc<SafeIndex>> {
        let key = self.key(config);
        if let Some(handle) = self.handles.get(&key) {
            return Ok(Arc::clone(handle.value()));
        }

        let handle = Arc::new(SafeIndex::new(
            key.index.clone(),
            Arc::clone(&self.client),
            config.raise_on_failure(),
        ));
        if !config.indexing_disabled() && config.check_settings() {
            let current = handle.get_settings().await?;
            let desired = desired.unwrap_or_else(|| config.desired_settings(self.environment()));
            let push = prepare_push(&current, desired, config.kind().inherits());
            // an index without settings (or not yet created) is always configured
            let blank = current.current().map_or(true, |c| c.is_empty());
            if blank || settings_changed(current.current(), &push) {
                info!(index = %key.index, "pushing index settings");
                handle.set_settings(&push).await?;
            } else {
                debug!(index = %key.index, "index settings up to date");
            }
        }

        let handle = self.handles.entry(key).or_insert(handle);
        Ok(Arc::clone(handle.value()))
    }

    /// Push the configuration's settings without comparing them first.
    pub async fn push_settings<R: Record>(
        &self,
        config: &IndexConfiguration<R>,
    ) -> Result<(Arc<SafeIndex>, TaskInfo)> {
        let key = self.key(config);
        let handle = Arc::clone(
            self.handles
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(SafeIndex::new(
                        key.index.clone(),
                        Arc::clone(&self.client),
                        config.raise_on_failure(),
                    ))
                })
                .value(),
        );
        let current = handle.get_settings().await?;
        let push = prepare_push(
            &current,
            config.desired_settings(self.environment()),
            config.kind().inherits(),
        );
        info!(index = %key.index, "pushing index settings");
        let task = handle.set_settings(&push).await?;
        Ok((handle, task))
    }

    /// Drop the memoized handle so the next use reconciles again.
    pub fn forget<R: Record>(&self, config: &IndexConfiguration<R>) {
        self.handles.remove(&self.key(config));
    }

    pub fn cached_handles(&self) -> usize {
        self.handles.len()
    }
}

/// Put the secondary listing under the field name the remote index already
/// uses, or drop it for inheriting secondaries.
fn prepare_push(
    current: &SettingsSnapshot,
    mut desired: Map<String, Value>,
    inherit: bool,
) -> Map<String, Value> {
    if let Some(listing) = take_secondary_listing(&mut desired) {
        if !inherit {
            let field = if current.uses_slaves() { SLAVES } else { REPLICAS };
            desired.insert(field.to_string(), listing);
        }
    }
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{MemoryClient, MemoryIndex};
    use crate::error::RemoteError;
    use crate::store::JsonRecord;
    use serde_json::json;

    fn reconciler() -> (Arc<MemoryClient>, SettingsReconciler) {
        let client = Arc::new(MemoryClient::new());
        let r = SettingsReconciler::new(client.clone(), Some("test".into()));
        (client, r)
    }

    #[tokio::test]
    async fn pushes_once_then_memoizes() {
        let (client, r) = reconciler();
        let config = IndexConfiguration::<JsonRecord>::builder("Color")
            .per_environment(true)
            .setting("customRanking", json!(["asc(hex)"]))
            .build()
            .unwrap();

        let h1 = r.ensure_configured(&config).await.unwrap();
        let h2 = r.ensure_configured(&config).await.unwrap();
        assert!(Arc::ptr_eq(&h1, &h2));
        assert_eq!(h1.name(), "Color_test");
        assert_eq!(client.count("get_settings"), 1);
        assert_eq!(client.count("set_settings"), 1);
    }

    #[tokio::test]
    async fn unchanged_settings_are_not_pushed_again() {
        let (client, r) = reconciler();
        let config = IndexConfiguration::<JsonRecord>::builder("Color")
            .setting("hitsPerPage", json!(12))
            .add_replica("Color_desc", |x| x)
            .build()
            .unwrap();

        r.ensure_configured(&config).await.unwrap();
        r.forget(&config);
        r.ensure_configured(&config).await.unwrap();
        assert_eq!(client.count("set_settings"), 1);
        assert_eq!(
            client.snapshot("Color").unwrap().settings["replicas"],
            json!(["Color_desc"])
        );
    }

    #[tokio::test]
    async fn legacy_listing_field_is_kept() {
        let (client, r) = reconciler();
        let mut legacy = MemoryIndex::default();
        legacy.settings.insert(SLAVES.into(), json!(["Color_old"]));
        client.seed("Color", legacy);

        let config = IndexConfiguration::<JsonRecord>::builder("Color")
            .add_replica("Color_old", |x| x)
            .build()
            .unwrap();
        r.ensure_configured(&config).await.unwrap();

        // listing already matches under the legacy name
        assert_eq!(client.count("set_settings"), 0);
    }

    #[tokio::test]
    async fn disabled_configuration_makes_no_remote_calls() {
        let (client, r) = reconciler();
        let config = IndexConfiguration::<JsonRecord>::builder("Color")
            .setting("hitsPerPage", json!(5))
            .disable_indexing(true)
            .build()
            .unwrap();
        r.ensure_configured(&config).await.unwrap();
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn check_settings_off_skips_reconciliation() {
        let (client, r) = reconciler();
        let config = IndexConfiguration::<JsonRecord>::builder("Color")
            .setting("hitsPerPage", json!(5))
            .check_settings(false)
            .build()
            .unwrap();
        r.ensure_configured(&config).await.unwrap();
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn inheriting_replica_never_pushes_a_listing() {
        let (client, r) = reconciler();
        let config = IndexConfiguration::<JsonRecord>::builder("Color")
            .setting("hitsPerPage", json!(8))
            .add_replica("Color_inh", |x| x.inherit(true))
            .build()
            .unwrap();
        r.ensure_configured(config.secondaries()[0].as_ref())
            .await
            .unwrap();
        let pushed = client.snapshot("Color_inh").unwrap().settings;
        assert_eq!(pushed["hitsPerPage"], json!(8));
        assert!(pushed.get("replicas").is_none());
    }

    #[tokio::test]
    async fn failed_fetch_counts_as_changed_when_swallowed() {
        let (client, r) = reconciler();
        client.fail_with(Some(RemoteError::new(500, "boom")));
        let config = IndexConfiguration::<JsonRecord>::builder("Color")
            .raise_on_failure(false)
            .build()
            .unwrap();
        r.ensure_configured(&config).await.unwrap();
        assert_eq!(client.count("set_settings"), 1);
    }

    #[tokio::test]
    async fn missing_index_is_configured_even_without_settings() {
        let (client, r) = reconciler();
        let config = IndexConfiguration::<JsonRecord>::builder("Color")
            .build()
            .unwrap();
        r.ensure_configured(&config).await.unwrap();
        assert_eq!(client.count("set_settings"), 1);
        assert!(client.index_exists("Color"));
    }

    #[tokio::test]
    async fn forced_push_ignores_the_diff() {
        let (client, r) = reconciler();
        let config = IndexConfiguration::<JsonRecord>::builder("Color")
            .setting("hitsPerPage", json!(5))
            .build()
            .unwrap();
        r.ensure_configured(&config).await.unwrap();
        let (_, task) = r.push_settings(&config).await.unwrap();
        assert!(task.task_id.is_some());
        assert_eq!(client.count("set_settings"), 2);
    }
}
