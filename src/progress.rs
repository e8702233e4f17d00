//! Reindex progress reporting.
//!
//! Reports observable progress during `isync reindex` so users see which
//! index is being rebuilt and how many records have been pushed so far.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use index_sync_core::reindex::ReindexObserver;

/// A single progress event for a reindex run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReindexEvent {
    /// Population of this index started.
    Started { index: String },
    /// A batch was pushed; `n` records so far.
    Batch { index: String, n: u64 },
    /// Population finished with `n` records.
    Done { index: String, n: u64 },
}

/// Reports reindex progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ReindexEvent);
}

/// Human-friendly progress on stderr: "reindex Contact  1,000 records".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ReindexEvent) {
        let line = match &event {
            ReindexEvent::Started { index } => format!("reindex {}  started\n", index),
            ReindexEvent::Batch { index, n } => {
                format!("reindex {}  {} records\n", index, format_number(*n))
            }
            ReindexEvent::Done { index, n } => {
                format!("reindex {}  done, {} records\n", index, format_number(*n))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ReindexEvent) {
        let obj = match &event {
            ReindexEvent::Started { index } => serde_json::json!({
                "event": "progress",
                "index": index,
                "phase": "started"
            }),
            ReindexEvent::Batch { index, n } => serde_json::json!({
                "event": "progress",
                "index": index,
                "phase": "indexing",
                "n": n
            }),
            ReindexEvent::Done { index, n } => serde_json::json!({
                "event": "progress",
                "index": index,
                "phase": "done",
                "n": n
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ReindexEvent) {}
}

/// Adapts a [`ProgressReporter`] to the reindex coordinator's observer hook.
pub struct Progress(Box<dyn ProgressReporter>);

impl Progress {
    pub fn new(reporter: Box<dyn ProgressReporter>) -> Self {
        Self(reporter)
    }
}

impl ReindexObserver for Progress {
    fn index_started(&self, index: &str) {
        self.0.report(ReindexEvent::Started {
            index: index.to_string(),
        });
    }

    fn batch_done(&self, index: &str, indexed_so_far: usize) {
        self.0.report(ReindexEvent::Batch {
            index: index.to_string(),
            n: indexed_so_far as u64,
        });
    }

    fn index_done(&self, index: &str, indexed: usize) {
        self.0.report(ReindexEvent::Done {
            index: index.to_string(),
            n: indexed as u64,
        });
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn observer(&self) -> Progress {
        Progress::new(match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<ReindexEvent>>>);

    impl ProgressReporter for Recorder {
        fn report(&self, event: ReindexEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn observer_forwards_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let progress = Progress::new(Box::new(Recorder(events.clone())));
        progress.index_started("Contact");
        progress.batch_done("Contact", 1000);
        progress.index_done("Contact", 1500);

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ReindexEvent::Started { index: "Contact".into() },
                ReindexEvent::Batch { index: "Contact".into(), n: 1000 },
                ReindexEvent::Done { index: "Contact".into(), n: 1500 },
            ]
        );
    }
}
