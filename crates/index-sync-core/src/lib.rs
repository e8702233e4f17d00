//! # index-sync core
//!
//! Keeps a hosted full-text search index in sync with records from a data
//! store: declarative per-model index configuration, record extraction,
//! change detection, lazy settings reconciliation, and full reindexing
//! (optionally through a temporary index swapped in atomically).
//!
//! The crate does no I/O of its own. The remote service is reached through
//! [`client::SearchClient`] and records through [`store::StoreAdapter`];
//! in-memory implementations of both ship for tests.
//!
//! ```text
//! IndexConfiguration ──► Searchable<R> ──► SafeIndex ──► SearchClient
//!                            │    ▲
//!            StoreAdapter<R> ┘    └ RecordHooks (store lifecycle)
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod context;
pub mod dirty;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod models;
pub mod reconcile;
pub mod registry;
pub mod reindex;
pub mod safe_index;
pub mod searchable;
pub mod settings;
pub mod store;

pub use error::{ConfigError, RemoteError, Result, SyncError};
