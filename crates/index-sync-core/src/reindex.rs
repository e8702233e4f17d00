//! Full reindex of a model, in place or through a temporary index.
//!
//! ```text
//! in place:        for each batch ──► delete non-indexable ──► save indexable
//!
//! temporary index: settings ──► <name>.tmp ◄── batches
//!                                   │
//!                                   └── move ──► <name>   (atomic swap)
//! ```
//!
//! Secondary indexes are never populated: the remote service feeds them from
//! their primary. They still get their settings reconciled.
//!
//! A rebuild whose writes were swallowed by a lenient index is never moved
//! over the live index. The temporary index is dropped instead and the live
//! name is listed in [`ReindexReport::aborted`].

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::IndexConfiguration;
use crate::error::{Result, SyncError};
use crate::extract::build_document;
use crate::models::{is_blank, CopyScope, Document, TaskInfo};
use crate::reconcile::SettingsReconciler;
use crate::registry::ConfigurationSet;
use crate::safe_index::SafeIndex;
use crate::settings::{merge, take_secondary_listing};
use crate::store::{Record, StoreAdapter};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const TEMPORARY_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexOptions {
    pub batch_size: usize,
    /// Wait for the last write of each index to be applied.
    pub synchronous: bool,
    /// Rebuild into `<name>.tmp` and swap it in.
    pub use_temp_index: bool,
    /// With a temporary index, copy settings, synonyms and rules from the
    /// live index instead of pushing declared settings.
    pub copy_from_primary: bool,
}

impl Default for ReindexOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            synchronous: false,
            use_temp_index: false,
            copy_from_primary: false,
        }
    }
}

/// Counters for one reindex run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    /// Indexes that were populated.
    pub indexes: usize,
    pub batches: usize,
    pub indexed: usize,
    pub removed: usize,
    /// Live indexes left untouched because their rebuild had failed writes.
    pub aborted: Vec<String>,
}

impl ReindexReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_empty()
    }
}

/// Outcome of streaming records into one index.
struct Populated {
    last: Option<TaskInfo>,
    /// Some write failed and was swallowed.
    degraded: bool,
}

/// Receives progress while a reindex runs.
pub trait ReindexObserver: Send + Sync {
    fn index_started(&self, _index: &str) {}
    fn batch_done(&self, _index: &str, _indexed_so_far: usize) {}
    fn index_done(&self, _index: &str, _indexed: usize) {}
}

pub struct ReindexCoordinator<'a, R: Record> {
    reconciler: &'a SettingsReconciler,
    adapter: &'a dyn StoreAdapter<R>,
    observer: Option<&'a dyn ReindexObserver>,
}

impl<'a, R: Record> ReindexCoordinator<'a, R> {
    pub fn new(reconciler: &'a SettingsReconciler, adapter: &'a dyn StoreAdapter<R>) -> Self {
        Self {
            reconciler,
            adapter,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn ReindexObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn run(&self, set: &ConfigurationSet<R>, options: &ReindexOptions) -> Result<ReindexReport> {
        if options.use_temp_index {
            self.rebuild(set, options).await
        } else {
            self.in_place(set, options).await
        }
    }

    /// Write every record into the live indexes.
    pub async fn in_place(&self, set: &ConfigurationSet<R>, options: &ReindexOptions) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();
        for config in set.iter() {
            if config.indexing_disabled() {
                debug!(model = config.model(), index = config.index_name(), "indexing disabled");
                continue;
            }
            let index = self.reconciler.ensure_configured(config.as_ref()).await?;
            if config.is_secondary() {
                continue;
            }
            let populated = self
                .populate(config, &index, options.batch_size, true, &mut report)
                .await?;
            if populated.degraded {
                error!(index = index.name(), "reindex finished with failed writes");
            }
            if options.synchronous || config.synchronous() {
                if let Some(task) = populated.last {
                    index.wait_task(&task).await?;
                }
            }
        }
        Ok(report)
    }

    /// Build each primary into `<name>.tmp` and atomically move it over the
    /// live index.
    pub async fn rebuild(&self, set: &ConfigurationSet<R>, options: &ReindexOptions) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();
        let env = self.reconciler.environment();
        for config in set.iter() {
            if config.indexing_disabled() || config.is_secondary() {
                continue;
            }
            let live = self.reconciler.ensure_configured(config.as_ref()).await?;
            let tmp_name = format!("{}{}", live.name(), TEMPORARY_SUFFIX);
            let tmp_config = config.temporary(tmp_name.clone(), !options.copy_from_primary);

            let tmp = if options.copy_from_primary {
                let task = live
                    .copy_to(&tmp_name, &[CopyScope::Settings, CopyScope::Synonyms, CopyScope::Rules])
                    .await?;
                live.wait_task(&task).await?;
                self.reconciler.ensure_configured(&tmp_config).await?
            } else {
                let current = live.get_settings().await?;
                let mut desired = merge(&current.values, &config.to_settings(env));
                take_secondary_listing(&mut desired);
                self.reconciler
                    .ensure_configured_with(&tmp_config, Some(desired))
                    .await?
            };
            // leftovers of an interrupted run must not survive the swap
            let cleared = tmp.clear().await?;

            let populated = self
                .populate(config, &tmp, options.batch_size, false, &mut report)
                .await?;

            if cleared.error.is_some() || populated.degraded {
                error!(
                    index = %live.name(),
                    tmp = %tmp_name,
                    "rebuild had failed writes, keeping the live index"
                );
                let dropped = tmp.delete().await;
                self.reconciler.forget(&tmp_config);
                dropped?;
                report.aborted.push(live.name().to_string());
                continue;
            }

            info!(from = %tmp_name, to = %live.name(), "swapping rebuilt index");
            let moved = tmp.move_to(live.name()).await;
            self.reconciler.forget(&tmp_config);
            let moved = moved?;
            if options.synchronous || config.synchronous() {
                live.wait_task(&moved).await?;
            }
        }
        Ok(report)
    }

    /// Stream all records into `index`. With `delete_stale`, conditional
    /// configurations also delete records that no longer qualify.
    async fn populate(
        &self,
        config: &Arc<IndexConfiguration<R>>,
        index: &SafeIndex,
        batch_size: usize,
        delete_stale: bool,
        report: &mut ReindexReport,
    ) -> Result<Populated> {
        let batch_size = batch_size.max(1);
        if let Some(o) = self.observer {
            o.index_started(index.name());
        }
        let mut last: Option<TaskInfo> = None;
        let mut degraded = false;
        let mut offset = 0;
        let mut indexed = 0;
        loop {
            let batch = self
                .adapter
                .find_batch(offset, batch_size)
                .await
                .map_err(SyncError::store)?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();
            let full = batch.len() == batch_size;

            let (keep, rejected): (Vec<&R>, Vec<&R>) = if config.is_conditional() {
                batch.iter().partition(|r| config.is_indexable(r))
            } else {
                (batch.iter().collect(), Vec::new())
            };

            if delete_stale {
                let stale: Vec<String> = rejected
                    .iter()
                    .map(|r| config.object_id_of(r))
                    .filter(|id| !is_blank(id))
                    .collect();
                if !stale.is_empty() {
                    let task = index.delete_objects(&stale).await?;
                    if task.error.is_some() {
                        degraded = true;
                    } else {
                        report.removed += stale.len();
                        last = Some(task);
                    }
                }
            }

            let documents = keep
                .into_iter()
                .map(|r| build_document(r, config, self.adapter))
                .collect::<Result<Vec<Document>>>()?;
            if !documents.is_empty() {
                let task = index.save_objects(&documents).await?;
                if task.error.is_some() {
                    degraded = true;
                } else {
                    indexed += documents.len();
                    report.indexed += documents.len();
                    last = Some(task);
                }
            }
            report.batches += 1;
            debug!(index = index.name(), offset, indexed, "batch written");
            if let Some(o) = self.observer {
                o.batch_done(index.name(), indexed);
            }
            if !full {
                break;
            }
        }
        report.indexes += 1;
        info!(model = config.model(), index = index.name(), indexed, "index populated");
        if let Some(o) = self.observer {
            o.index_done(index.name(), indexed);
        }
        Ok(Populated { last, degraded })
    }
}
