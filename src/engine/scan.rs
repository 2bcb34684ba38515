//! Full sweeps over both sides
//!
//! A sweep lists storage and the store namespace once, pairs paths by their
//! cache key, then reconciles every pair with bounded parallelism. Failures
//! stay with their path. A confirmation pass afterwards re-reads every path
//! that reconciled cleanly and adopts what it sees.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeMap;

use super::Engine;
use crate::error::SyncError;
use crate::events::SyncEvent;
use crate::logging::*;
use crate::types::{
	compare_mtime, Direction, Outcome, ReconcileOptions, ScanReport, SkipReason, StorageKey,
	StorageStat, StoreRecord, TimeOrder,
};

/// One path as seen by both enumerations
#[derive(Debug, Default)]
struct Pair {
	storage: Option<String>,
	store: Option<StoreRecord>,
}

#[derive(Debug, Clone, Copy)]
enum Action {
	Push(ReconcileOptions),
	Pull(ReconcileOptions),
	DeleteInStore,
	/// Direction decided by comparing storage against this store mtime
	Safe { store_mtime: u64 },
}

impl Engine {
	/// Run a full sweep. A sweep already running in the same direction is
	/// joined instead of started again.
	pub async fn scan(&self, direction: Direction) -> Result<ScanReport, SyncError> {
		let key = format!("scan:{}", direction);
		self.scans.run(&key, || self.run_scan(direction)).await
	}

	async fn run_scan(&self, direction: Direction) -> Result<ScanReport, SyncError> {
		self.emit(SyncEvent::ScanStarted { direction });
		let pairs = self.collect_pairs().await?;

		let mut work = Vec::new();
		for pair in pairs.into_values() {
			if let Some((path, action)) = plan(direction, pair) {
				work.push((path, action));
			}
		}
		debug!("{} sweep: {} paths to reconcile", direction, work.len());

		let limit = self.pool.capacity();
		let results: Vec<(String, Result<Outcome, SyncError>)> = stream::iter(work)
			.map(|(path, action)| async move {
				let result = match action {
					Action::Push(opts) => self.push(&path, opts).await,
					Action::Pull(opts) => self.pull(&path, opts).await,
					Action::DeleteInStore => self.delete_in_store(&path).await,
					Action::Safe { store_mtime } => self.reconcile_newer(&path, store_mtime).await,
				};
				(path, result)
			})
			.buffer_unordered(limit)
			.collect()
			.await;

		let mut report = ScanReport::default();
		let mut confirm = Vec::new();
		for (path, result) in results {
			match result {
				Ok(outcome) => {
					report.record(&outcome);
					if !matches!(outcome, Outcome::Conflicted | Outcome::Refused(_)) {
						confirm.push(path);
					}
				}
				Err(e) => report.errors.push((path, e.to_string())),
			}
		}

		let confirmed: Vec<(String, Result<(), SyncError>)> = stream::iter(confirm)
			.map(|path| async move {
				let result = self.confirm(&path).await;
				(path, result)
			})
			.buffer_unordered(limit)
			.collect()
			.await;
		for (path, result) in confirmed {
			match result {
				Ok(()) => report.confirmed += 1,
				Err(e) => {
					warn!("Confirmation of {} failed: {}", path, e);
					report.errors.push((path, e.to_string()));
				}
			}
		}
		report.errors.sort();

		info!(
			"{} sweep done: {} pushed, {} pulled, {} deleted in store, {} deleted in storage, \
			 {} skipped, {} conflicted, {} refused, {} errors",
			direction,
			report.pushed,
			report.pulled,
			report.deleted_in_store,
			report.deleted_in_storage,
			report.skipped,
			report.conflicted,
			report.refused,
			report.errors.len()
		);
		self.emit(SyncEvent::ScanCompleted { direction, report: report.clone() });
		Ok(report)
	}

	/// Push or pull `path`, whichever side is newer
	async fn reconcile_newer(&self, path: &str, store_mtime: u64) -> Result<Outcome, SyncError> {
		let path = self.normalize_path(path)?;
		let _admission = self.admit(&path).await?;
		let result = self.reconcile_newer_locked(&path, store_mtime).await;
		self.report(&path, &result);
		result
	}

	/// Within the same second only a side that changed since it was last
	/// processed can be ahead. Storage gets the benefit of the doubt and the
	/// content comparison has the last word.
	async fn reconcile_newer_locked(
		&self,
		path: &str,
		store_mtime: u64,
	) -> Result<Outcome, SyncError> {
		let stat = self.storage.stat(path).await?;
		let storage_mtime = match &stat {
			Some(stat) if !stat.is_file() => return Ok(Outcome::Skipped(SkipReason::NotAFile)),
			Some(stat) => stat.mtime,
			None => 0,
		};
		let order = compare_mtime(storage_mtime, store_mtime);
		if order == TimeOrder::Even && self.only_store_changed(path, stat.as_ref()).await? {
			debug!("{}: store changed within the same second, pulling", path);
			return self.pull_locked(path, ReconcileOptions::default()).await;
		}
		match order {
			TimeOrder::BaseIsNew => self.push_locked(path, ReconcileOptions::only_new()).await,
			TimeOrder::TargetIsNew => self.pull_locked(path, ReconcileOptions::only_new()).await,
			TimeOrder::Even => self.push_locked(path, ReconcileOptions::default()).await,
		}
	}

	/// Storage matches its processed key while the store moved past its own
	async fn only_store_changed(
		&self,
		path: &str,
		stat: Option<&StorageStat>,
	) -> Result<bool, SyncError> {
		if self.storage_key(path)? != Some(StorageKey::from_stat(stat)) {
			return Ok(false);
		}
		let Some(meta) = self.store.get_meta(&self.mapper.doc_id(path), true).await? else {
			return Ok(false);
		};
		Ok(self.store_key(path)? != Some(meta.key()))
	}

	/// Winning records of every document in this engine's namespace
	pub async fn store_records(&self) -> Result<Vec<StoreRecord>, SyncError> {
		let (start, end) = self.mapper.range();
		let records: Vec<StoreRecord> = self.store.find_range(&start, &end).try_collect().await?;
		Ok(records)
	}

	async fn collect_pairs(&self) -> Result<BTreeMap<String, Pair>, SyncError> {
		let mut pairs: BTreeMap<String, Pair> = BTreeMap::new();
		for path in self.storage.list_recursive("").await? {
			if self.filter.is_allowed(&path) {
				let key = self.mapper.cache_key(&path);
				pairs.entry(key).or_default().storage = Some(path);
			}
		}
		for record in self.store_records().await? {
			if self.filter.is_allowed(&record.path) {
				let key = self.mapper.cache_key(&record.path);
				pairs.entry(key).or_default().store = Some(record);
			}
		}
		Ok(pairs)
	}
}

/// Decide what a sweep does with one pair
fn plan(direction: Direction, pair: Pair) -> Option<(String, Action)> {
	let Pair { storage, store } = pair;
	match (direction, storage, store) {
		(Direction::Push, Some(path), _) => Some((path, Action::Push(ReconcileOptions::default()))),
		(Direction::Push, None, Some(record)) if !record.deleted => {
			Some((record.path, Action::DeleteInStore))
		}
		(Direction::Pull, _, Some(record)) if !record.deleted => {
			Some((record.path, Action::Pull(ReconcileOptions::default())))
		}
		(Direction::Safe, Some(path), store) => {
			Some((path, Action::Safe { store_mtime: store.map(|r| r.mtime).unwrap_or(0) }))
		}
		(Direction::Safe, None, Some(record)) if !record.deleted => {
			Some((record.path, Action::Safe { store_mtime: record.mtime }))
		}
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(path: &str, mtime: u64, deleted: bool) -> StoreRecord {
		StoreRecord {
			id: format!("i:{}", path),
			path: path.to_string(),
			mtime,
			ctime: mtime,
			size: 1,
			rev: "1-a".to_string(),
			deleted,
			conflicts: vec![],
		}
	}

	#[test]
	fn test_push_plan_deletes_store_only_paths() {
		let pair = Pair { storage: None, store: Some(record("a.md", 1000, false)) };
		assert!(matches!(plan(Direction::Push, pair), Some((_, Action::DeleteInStore))));
		let tomb = Pair { storage: None, store: Some(record("a.md", 1000, true)) };
		assert!(plan(Direction::Push, tomb).is_none());
	}

	#[test]
	fn test_pull_plan_ignores_storage_only_and_deleted() {
		let local = Pair { storage: Some("a.md".to_string()), store: None };
		assert!(plan(Direction::Pull, local).is_none());
		let tomb = Pair { storage: Some("a.md".to_string()), store: Some(record("a.md", 1, true)) };
		assert!(plan(Direction::Pull, tomb).is_none());
	}

	#[test]
	fn test_safe_plan_uses_store_mtime() {
		let both = Pair { storage: Some("a.md".to_string()), store: Some(record("a.md", 4000, true)) };
		assert!(matches!(
			plan(Direction::Safe, both),
			Some((_, Action::Safe { store_mtime: 4000 }))
		));
		let gone = Pair { storage: None, store: Some(record("a.md", 4000, true)) };
		assert!(plan(Direction::Safe, gone).is_none());
	}
}

// vim: ts=4
