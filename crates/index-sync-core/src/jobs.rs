//! Deferred indexing jobs.
//!
//! A configuration with an enqueue hook hands index and remove operations to
//! a [`JobQueue`] instead of calling the remote service inline. A worker
//! later replays each [`IndexJob`] through
//! [`Searchable::perform`](crate::searchable::Searchable::perform).

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a deferred job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    /// Reload the record and index it. A record that no longer exists is
    /// removed instead.
    Index,
    Remove,
}

/// One deferred index or remove operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexJob {
    pub model: String,
    pub object_id: String,
    pub action: JobAction,
}

impl IndexJob {
    pub fn index(model: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            object_id: object_id.into(),
            action: JobAction::Index,
        }
    }

    pub fn remove(model: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            object_id: object_id.into(),
            action: JobAction::Remove,
        }
    }
}

/// Sink for deferred jobs.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: IndexJob) -> Result<()>;
}

/// A queue that keeps jobs in memory until drained.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    jobs: Mutex<Vec<IndexJob>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every pending job, oldest first.
    pub fn drain(&self) -> Vec<IndexJob> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

impl JobQueue for MemoryQueue {
    fn enqueue(&self, job: IndexJob) -> Result<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_queue_drains_in_order() {
        let q = MemoryQueue::new();
        q.enqueue(IndexJob::index("Color", "1")).unwrap();
        q.enqueue(IndexJob::remove("Color", "2")).unwrap();
        assert_eq!(q.len(), 2);

        let jobs = q.drain();
        assert_eq!(jobs[0].action, JobAction::Index);
        assert_eq!(jobs[1], IndexJob::remove("Color", "2"));
        assert!(q.is_empty());
    }

    #[test]
    fn jobs_serialize_with_lowercase_action() {
        let json = serde_json::to_value(IndexJob::remove("Color", "9")).unwrap();
        assert_eq!(json["action"], "remove");
        assert_eq!(json["object_id"], "9");
    }
}
