//! # index-sync
//!
//! Keeps a hosted full-text search index in sync with your records.
//!
//! Models are declared in TOML, records are read from JSON-lines files, and
//! the synchronization logic itself lives in [`index_sync_core`]: attribute
//! extraction, change detection, settings reconciliation, and zero-downtime
//! reindexing through a temporary index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ isync.toml   │──▶│  ModelCatalog    │──▶│ HttpSearchClient │──▶ search service
//! │ [[models]]   │   │ (index-sync-core)│   └──────────────────┘
//! └──────────────┘   └────────┬─────────┘
//!                             │
//!              ┌──────────────┴───────────┐
//!              ▼                          ▼
//!        ┌────────────┐             ┌────────────┐
//!        │ JsonlStore │             │ SpoolQueue │
//!        │ (records)  │             │ (jobs)     │
//!        └────────────┘             └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! isync models                          # list models and index names
//! isync push-settings                   # reconcile declared settings
//! isync reindex --temp-index --sync     # zero-downtime rebuild
//! isync search "steve" --model Contact
//! isync work                            # replay enqueued jobs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`http_client`] | REST implementation of the remote client |
//! | [`jsonl_store`] | JSON-lines record source |
//! | [`models`] | `[[models]]` → index configurations |
//! | [`progress`] | Reindex progress on stderr |
//! | [`spool`] | File-backed job queue |

pub mod config;
pub mod http_client;
pub mod jsonl_store;
pub mod models;
pub mod progress;
pub mod spool;
