//! Reconciliation engine
//!
//! The engine owns the state cache and the concurrency primitives and talks to
//! the two collaborators through their traits. Every operation touching a
//! path first takes that path's lock, then a slot in the admission pool.
//! Methods ending in `_locked` expect both to be held by the caller.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::StateCache;
use crate::concurrency::{Coalescer, ConcurrencyPool, PathLockGuard, PathLocks};
use crate::config::Config;
use crate::conflict::{ConflictQueue, ConflictRuleSet};
use crate::error::{StoreError, SyncError};
use crate::events::{EventSink, NoEvents, SyncEvent};
use crate::logging::*;
use crate::path::{normalize, PathFilter, PathMapper};
use crate::storage::Storage;
use crate::store::DocumentStore;
use crate::types::{
	Outcome, ProcessedKey, ReconcileOptions, ScanReport, Side, SkipReason, StorageKey, StoreDocument,
	StoreKey, StoreRecord, SyncRecord,
};
use tokio::sync::OwnedSemaphorePermit;

mod reconcile;
mod scan;

/// Builder for `Engine`
pub struct EngineBuilder {
	storage: Arc<dyn Storage>,
	store: Arc<dyn DocumentStore>,
	cache: Arc<dyn StateCache>,
	config: Config,
	events: Arc<dyn EventSink>,
}

impl EngineBuilder {
	pub fn new(
		storage: Arc<dyn Storage>,
		store: Arc<dyn DocumentStore>,
		cache: Arc<dyn StateCache>,
	) -> Self {
		EngineBuilder { storage, store, cache, config: Config::default(), events: Arc::new(NoEvents) }
	}

	pub fn config(mut self, config: Config) -> Self {
		self.config = config;
		self
	}

	pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
		self.events = events;
		self
	}

	pub fn build(self) -> Result<Engine, SyncError> {
		let config = self.config;
		config.validate()?;
		Ok(Engine {
			storage: self.storage,
			store: self.store,
			cache: self.cache,
			mapper: PathMapper::new(&config.namespace, config.case_insensitive),
			filter: PathFilter::new(&config.include_patterns, &config.exclude_patterns)?,
			rules: ConflictRuleSet::from_config(&config)?,
			resolve_by_newer: config.resolve_by_newer,
			conflict_concurrency: config.conflict_concurrency,
			locks: PathLocks::new(),
			pool: ConcurrencyPool::new(config.max_concurrency),
			scans: Coalescer::new(),
			conflicts: ConflictQueue::new(),
			events: self.events,
			fetch_retries: config.fetch_retries,
			fetch_retry_delay: Duration::from_millis(config.fetch_retry_delay_ms),
		})
	}
}

pub struct Engine {
	pub(crate) storage: Arc<dyn Storage>,
	pub(crate) store: Arc<dyn DocumentStore>,
	pub(crate) cache: Arc<dyn StateCache>,
	pub(crate) mapper: PathMapper,
	pub(crate) filter: PathFilter,
	pub(crate) rules: ConflictRuleSet,
	pub(crate) resolve_by_newer: bool,
	pub(crate) conflict_concurrency: usize,
	pub(crate) locks: PathLocks,
	pub(crate) pool: ConcurrencyPool,
	scans: Coalescer<ScanReport>,
	pub(crate) conflicts: ConflictQueue,
	events: Arc<dyn EventSink>,
	fetch_retries: u32,
	fetch_retry_delay: Duration,
}

/// Path lock and pool slot, released together
pub(crate) struct Admission {
	_guard: PathLockGuard,
	_permit: OwnedSemaphorePermit,
}

impl Engine {
	pub fn mapper(&self) -> &PathMapper {
		&self.mapper
	}

	pub fn conflicts(&self) -> &ConflictQueue {
		&self.conflicts
	}

	/// Lock `path`, then wait for a pool slot
	pub(crate) async fn admit(&self, path: &str) -> Result<Admission, SyncError> {
		let guard = self.locks.acquire(&self.mapper.cache_key(path)).await?;
		let permit = self.pool.acquire().await?;
		Ok(Admission { _guard: guard, _permit: permit })
	}

	pub(crate) fn emit(&self, event: SyncEvent) {
		self.events.on_event(event);
	}

	/// Route one incoming record
	pub async fn dispatch(&self, record: SyncRecord) -> Result<Outcome, SyncError> {
		match record {
			SyncRecord::Storage { path } => self.push(&path, ReconcileOptions::default()).await,
			SyncRecord::Store(record) => {
				if !self.mapper.owns(&record.id) {
					return Ok(Outcome::Skipped(SkipReason::Excluded));
				}
				if !record.has_conflicts() && self.conflicts.cancel(&record.path) {
					debug!("Conflict on {} went away, cancelling manual merge", record.path);
				}
				self.pull(&record.path, ReconcileOptions::default()).await
			}
			SyncRecord::ConflictResolved { path } => {
				self.conflicts.cancel(&path);
				self.pull(&path, ReconcileOptions::default()).await
			}
		}
	}

	/// Queue `path` for the conflict pipeline
	pub(crate) fn enqueue_conflict(&self, path: &str) {
		if self.conflicts.enqueue(path) {
			debug!("Queued {} for conflict resolution", path);
		}
	}

	/// Resolves once the conflict pipeline has drained. Requires a running
	/// `ConflictPipeline`.
	pub async fn wait_conflicts_idle(&self) {
		self.conflicts.wait_idle().await;
	}

	/// Forget every processed key; the next scan re-examines all paths
	pub fn reset_cache(&self) -> Result<(), SyncError> {
		self.cache.clear(Side::Storage)?;
		self.cache.clear(Side::Store)?;
		info!("State cache cleared");
		Ok(())
	}

	/// Every processed key on `side`, sorted by path
	pub fn processed_keys(&self, side: Side) -> Result<Vec<(String, ProcessedKey)>, SyncError> {
		let mut entries = Vec::new();
		for path in self.cache.keys(side)? {
			if let Some(key) = self.cache.get(side, &path)? {
				entries.push((path, key));
			}
		}
		Ok(entries)
	}

	pub(crate) fn normalize_path(&self, path: &str) -> Result<String, SyncError> {
		normalize(path)
	}

	// ------------------------------------------------------------------------
	// Processed keys
	// ------------------------------------------------------------------------

	pub(crate) fn storage_key(&self, path: &str) -> Result<Option<StorageKey>, SyncError> {
		match self.cache.get(Side::Storage, &self.mapper.cache_key(path))? {
			Some(ProcessedKey::Storage(key)) => Ok(Some(key)),
			_ => Ok(None),
		}
	}

	pub(crate) fn store_key(&self, path: &str) -> Result<Option<StoreKey>, SyncError> {
		match self.cache.get(Side::Store, &self.mapper.cache_key(path))? {
			Some(ProcessedKey::Store(key)) => Ok(Some(key)),
			_ => Ok(None),
		}
	}

	pub(crate) fn set_storage_key(&self, path: &str, key: StorageKey) -> Result<(), SyncError> {
		let cache_key = self.mapper.cache_key(path);
		self.cache.set(Side::Storage, &cache_key, &ProcessedKey::Storage(key))?;
		Ok(())
	}

	pub(crate) fn set_store_key(&self, path: &str, key: StoreKey) -> Result<(), SyncError> {
		let cache_key = self.mapper.cache_key(path);
		self.cache.set(Side::Store, &cache_key, &ProcessedKey::Store(key))?;
		Ok(())
	}

	/// Adopt what was observed on both sides. A store record with competing
	/// revisions is not adopted: it has not been linearized yet.
	pub(crate) fn adopt_keys(
		&self,
		path: &str,
		storage: StorageKey,
		store: Option<&StoreRecord>,
	) -> Result<(), SyncError> {
		self.set_storage_key(path, storage)?;
		if let Some(record) = store.filter(|r| !r.has_conflicts()) {
			self.set_store_key(path, record.key())?;
		}
		Ok(())
	}

	// ------------------------------------------------------------------------
	// Store access
	// ------------------------------------------------------------------------

	/// Fetch a revision, waiting out content that is still arriving
	pub(crate) async fn fetch_content(
		&self,
		id: &str,
		rev: Option<&str>,
	) -> Result<Option<StoreDocument>, SyncError> {
		let mut attempt = 0;
		loop {
			match self.store.get_content(id, rev).await {
				Err(StoreError::NotReady { .. }) if attempt < self.fetch_retries => {
					attempt += 1;
					debug!("{} is not ready yet, retry {}/{}", id, attempt, self.fetch_retries);
					tokio::time::sleep(self.fetch_retry_delay * attempt).await;
				}
				result => return result.map_err(SyncError::from),
			}
		}
	}

	/// Metadata that must exist because we just wrote it
	pub(crate) async fn meta_after_write(&self, id: &str) -> Result<StoreRecord, SyncError> {
		self.store
			.get_meta(id, true)
			.await?
			.ok_or_else(|| SyncError::Store(StoreError::NotFound { id: id.to_string(), rev: None }))
	}

	/// Log and report the result of a single-path operation
	pub(crate) fn report(&self, path: &str, result: &Result<Outcome, SyncError>) {
		match result {
			Ok(outcome) => {
				self.emit(SyncEvent::Reconciled { path: path.to_string(), outcome: outcome.clone() })
			}
			Err(e) => {
				if e.is_transient() {
					warn!("Reconciliation of {} failed, retrying on the next scan: {}", path, e);
				} else {
					error!("Reconciliation of {} failed: {}", path, e);
				}
				self.emit(SyncEvent::Failed { path: path.to_string(), message: e.to_string() });
			}
		}
	}
}

// vim: ts=4
