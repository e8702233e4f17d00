//! File spool for deferred index jobs.
//!
//! Models declared with `enqueue = true` append their index and remove jobs
//! to a JSON-lines spool instead of calling the remote service. `isync work`
//! drains the spool and replays each job through the model catalog.
//!
//! ```text
//! {"id":"6f1c…","enqueued_at":"2024-05-01T12:00:00Z","model":"Contact","object_id":"42","action":"index"}
//! ```
//!
//! A job leaves the spool only once it has been performed, so a run that
//! dies halfway leaves the unfinished jobs for the next one. Jobs that fail
//! during [`work`] move to the end of the spool and are retried next time.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use index_sync_core::catalog::ModelCatalog;
use index_sync_core::jobs::{IndexJob, JobQueue};
use index_sync_core::SyncError;

/// A job as stored in the spool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpooledJob {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    #[serde(flatten)]
    pub job: IndexJob,
}

/// Outcome of draining the spool once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkReport {
    pub performed: usize,
    pub failed: usize,
}

pub struct SpoolQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SpoolQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, jobs: &[SpooledJob]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create spool directory: {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open spool: {}", self.path.display()))?;
        for job in jobs {
            let line = serde_json::to_string(job)?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    /// Jobs currently spooled, oldest first.
    pub fn pending(&self) -> Result<Vec<SpooledJob>> {
        let _guard = self.lock.lock().unwrap();
        self.read()
    }

    fn read(&self) -> Result<Vec<SpooledJob>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read spool: {}", self.path.display()))?;
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("{}:{}: invalid job", self.path.display(), n + 1))
            })
            .collect()
    }

    /// Replace the spool contents through a temporary file and a rename.
    fn rewrite(&self, jobs: &[SpooledJob]) -> Result<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut body = String::new();
        for job in jobs {
            body.push_str(&serde_json::to_string(job)?);
            body.push('\n');
        }
        std::fs::write(&tmp, body)
            .with_context(|| format!("Failed to write spool: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace spool: {}", self.path.display()))?;
        Ok(())
    }

    /// Remove a performed job. Jobs enqueued meanwhile are kept.
    pub fn acknowledge(&self, id: Uuid) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        if !self.path.exists() {
            return Ok(());
        }
        let remaining: Vec<SpooledJob> = self.read()?.into_iter().filter(|j| j.id != id).collect();
        self.rewrite(&remaining)
    }

    /// Move jobs to the end of the spool.
    pub fn requeue(&self, jobs: &[SpooledJob]) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut remaining: Vec<SpooledJob> = self
            .read()?
            .into_iter()
            .filter(|j| !jobs.iter().any(|r| r.id == j.id))
            .collect();
        remaining.extend(jobs.iter().cloned());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create spool directory: {}", parent.display()))?;
        }
        self.rewrite(&remaining)
    }
}

impl JobQueue for SpoolQueue {
    fn enqueue(&self, job: IndexJob) -> index_sync_core::Result<()> {
        let spooled = SpooledJob {
            id: Uuid::new_v4(),
            enqueued_at: Utc::now(),
            job,
        };
        let _guard = self.lock.lock().unwrap();
        self.append(std::slice::from_ref(&spooled))
            .map_err(SyncError::store)
    }
}

/// Replay every job spooled so far. Each job is removed once performed and
/// failed ones are requeued.
pub async fn work(catalog: &ModelCatalog, spool: &SpoolQueue) -> Result<WorkReport> {
    let jobs = spool.pending()?;
    let mut report = WorkReport::default();
    let mut retry = Vec::new();

    for spooled in jobs {
        match catalog.perform(&spooled.job).await {
            Ok(()) => {
                spool.acknowledge(spooled.id)?;
                report.performed += 1;
            }
            Err(e) => {
                warn!(
                    job = %spooled.id,
                    model = %spooled.job.model,
                    object_id = %spooled.job.object_id,
                    error = %e,
                    "job failed; requeued"
                );
                report.failed += 1;
                retry.push(spooled);
            }
        }
    }

    if !retry.is_empty() {
        spool.requeue(&retry)?;
    }
    info!(performed = report.performed, failed = report.failed, "spool drained");
    Ok(report)
}
