//! # docsync - File state reconciliation between storage and a document store
//!
//! docsync keeps a mutable directory tree ("storage") and a versioned,
//! replicated document store in agreement. For every path it decides whether
//! storage is ahead, the store is ahead, nothing changed, or both changed
//! concurrently, and drives the matching push, pull or conflict resolution.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docsync::{EngineBuilder, Direction, LocalStorage, MemoryStore, RedbStateCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = RedbStateCache::open("state.db".as_ref())?;
//!     let engine = EngineBuilder::new(
//!         Arc::new(LocalStorage::new("./vault")),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(cache),
//!     )
//!     .build()?;
//!     let report = engine.scan(Direction::Safe).await?;
//!     println!("{} transfers", report.transfers());
//!     Ok(())
//! }
//! ```
//!
//! ## Conflicts
//!
//! ```rust,ignore
//! use docsync::conflict::{ConflictPipeline, DeferMerger};
//!
//! let engine = Arc::new(engine);
//! let pipeline = ConflictPipeline::start(engine.clone(), Arc::new(DeferMerger))?;
//! engine.scan(Direction::Pull).await?;
//! engine.wait_conflicts_idle().await;
//! pipeline.shutdown();
//! ```

pub mod cache;
pub mod concurrency;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod path;
pub mod storage;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use cache::{MemoryStateCache, RedbStateCache, StateCache};
pub use config::Config;
pub use engine::{Engine, EngineBuilder};
pub use error::{CacheError, ConflictError, StorageError, StoreError, SyncError};
pub use storage::{LocalStorage, MemoryStorage, Storage};
pub use store::{DocumentStore, MemoryStore};
pub use types::{Direction, Outcome, ReconcileOptions, ScanReport, SkipReason, SyncRecord};

// vim: ts=4
