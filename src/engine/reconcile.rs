//! Single-path reconciliation in both directions
//!
//! Processed keys are only written after the step they describe completed,
//! and a store key is only ever one that was read back from the store.

use super::Engine;
use crate::error::SyncError;
use crate::logging::*;
use crate::storage::FileTimes;
use crate::types::{
	compare_mtime, now_millis, Outcome, ReconcileOptions, SkipReason, StorageKey, StoreDocument,
	StoreRecord, TimeOrder,
};

impl Engine {
	/// Storage to store for one path
	pub async fn push(&self, path: &str, opts: ReconcileOptions) -> Result<Outcome, SyncError> {
		let path = self.normalize_path(path)?;
		if !self.filter.is_allowed(&path) {
			return Ok(Outcome::Skipped(SkipReason::Excluded));
		}
		let _admission = self.admit(&path).await?;
		let result = self.push_locked(&path, opts).await;
		self.report(&path, &result);
		result
	}

	/// Store to storage for one path
	pub async fn pull(&self, path: &str, opts: ReconcileOptions) -> Result<Outcome, SyncError> {
		let path = self.normalize_path(path)?;
		if !self.filter.is_allowed(&path) {
			return Ok(Outcome::Skipped(SkipReason::Excluded));
		}
		let _admission = self.admit(&path).await?;
		let result = self.pull_locked(&path, opts).await;
		self.report(&path, &result);
		result
	}

	/// Propagate the absence of `path` on storage to the store, without
	/// consulting the storage processed key. Used for store-only paths found
	/// by a push sweep.
	pub async fn delete_in_store(&self, path: &str) -> Result<Outcome, SyncError> {
		let path = self.normalize_path(path)?;
		if !self.filter.is_allowed(&path) {
			return Ok(Outcome::Skipped(SkipReason::Excluded));
		}
		let _admission = self.admit(&path).await?;
		let result = match self.storage.stat(&path).await {
			// Created since the sweep listed storage
			Ok(Some(_)) => self.push_locked(&path, ReconcileOptions::default()).await,
			Ok(None) => match self.store.get_meta(&self.mapper.doc_id(&path), true).await {
				Ok(meta) => self.delete_in_store_locked(&path, meta).await,
				Err(e) => Err(e.into()),
			},
			Err(e) => Err(e.into()),
		};
		self.report(&path, &result);
		result
	}

	pub(crate) async fn push_locked(
		&self,
		path: &str,
		opts: ReconcileOptions,
	) -> Result<Outcome, SyncError> {
		let stat = self.storage.stat(path).await?;
		if let Some(stat) = &stat {
			if !stat.is_file() {
				return Ok(Outcome::Skipped(SkipReason::NotAFile));
			}
		}

		let current = StorageKey::from_stat(stat.as_ref());
		let last = self.storage_key(path)?;
		if !opts.force_write && last == Some(current) {
			debug!("{}: storage already processed", path);
			return Ok(Outcome::Skipped(SkipReason::AlreadyProcessed));
		}
		if current.is_missing() && last.map_or(true, |k| k.is_missing()) {
			debug!("{}: missing before and now", path);
			return Ok(Outcome::Skipped(SkipReason::Invalid));
		}

		let id = self.mapper.doc_id(path);
		let meta = self.store.get_meta(&id, true).await?;

		if opts.only_new {
			let storage_mtime = stat.map(|s| s.mtime).unwrap_or(0);
			let store_mtime = meta.as_ref().map(|m| m.mtime).unwrap_or(0);
			if compare_mtime(storage_mtime, store_mtime) != TimeOrder::BaseIsNew {
				debug!("{}: storage is not newer, adopting both sides", path);
				self.adopt_keys(path, current, meta.as_ref())?;
				return Ok(Outcome::Skipped(SkipReason::NotNewer));
			}
		}

		let Some(stat) = stat else {
			return self.delete_in_store_locked(path, meta).await;
		};

		let data = self.storage.read(path).await?;
		if let Some(meta) = meta.as_ref().filter(|m| !m.deleted && !opts.force_write) {
			if meta.size == data.len() as u64 {
				if let Some(doc) = self.fetch_content(&id, Some(&meta.rev)).await? {
					if doc.data == data {
						debug!("{}: content unchanged, metadata only", path);
						self.set_storage_key(path, current)?;
						return Ok(Outcome::Skipped(SkipReason::ContentUnchanged));
					}
				}
			}
		}

		let doc = StoreDocument {
			id: id.clone(),
			path: path.to_string(),
			mtime: stat.mtime,
			ctime: stat.ctime,
			deleted: false,
			data,
			rev: meta.map(|m| m.rev),
		};
		self.store.put(doc).await?;
		let after = self.meta_after_write(&id).await?;
		self.set_storage_key(path, current)?;
		self.set_store_key(path, after.key())?;
		info!("Pushed {} ({} bytes, rev {})", path, after.size, after.rev);

		if after.has_conflicts() {
			self.enqueue_conflict(path);
		}
		Ok(Outcome::Pushed)
	}

	pub(crate) async fn delete_in_store_locked(
		&self,
		path: &str,
		meta: Option<StoreRecord>,
	) -> Result<Outcome, SyncError> {
		let meta = match meta {
			None => {
				self.set_storage_key(path, StorageKey::Missing)?;
				return Ok(Outcome::Skipped(SkipReason::AlreadyAbsent));
			}
			Some(meta) if meta.deleted => {
				self.set_storage_key(path, StorageKey::Missing)?;
				self.set_store_key(path, meta.key())?;
				return Ok(Outcome::Skipped(SkipReason::AlreadyAbsent));
			}
			Some(meta) => meta,
		};

		if meta.has_conflicts() {
			let reason = format!("{} competing revisions outstanding", meta.conflicts.len());
			error!("Refusing to delete {} in the store: {}", path, reason);
			self.enqueue_conflict(path);
			return Ok(Outcome::Refused(reason));
		}

		let now = now_millis();
		let tombstone = StoreDocument {
			id: meta.id.clone(),
			path: path.to_string(),
			mtime: now,
			ctime: meta.ctime,
			deleted: true,
			data: Vec::new(),
			rev: Some(meta.rev.clone()),
		};
		self.store.put(tombstone).await?;
		let after = self.meta_after_write(&meta.id).await?;
		self.set_storage_key(path, StorageKey::Missing)?;
		self.set_store_key(path, after.key())?;
		info!("Deleted {} in the store", path);
		Ok(Outcome::DeletePushed)
	}

	pub(crate) async fn pull_locked(
		&self,
		path: &str,
		opts: ReconcileOptions,
	) -> Result<Outcome, SyncError> {
		let id = self.mapper.doc_id(path);
		let Some(meta) = self.store.get_meta(&id, true).await? else {
			debug!("{}: no longer in the store", path);
			return Ok(Outcome::Skipped(SkipReason::MissingInStore));
		};

		if meta.has_conflicts() {
			self.enqueue_conflict(path);
			if meta.deleted {
				let reason = format!("deleted with {} competing revisions", meta.conflicts.len());
				error!("Refusing to delete {} from storage: {}", path, reason);
				return Ok(Outcome::Refused(reason));
			}
			debug!("{}: {} competing revisions, routed to conflicts", path, meta.conflicts.len());
			return Ok(Outcome::Conflicted);
		}

		let last = self.store_key(path)?;
		if !opts.force_write && last.as_ref() == Some(&meta.key()) {
			debug!("{}: store already processed", path);
			return Ok(Outcome::Skipped(SkipReason::AlreadyProcessed));
		}

		let stat = self.storage.stat(path).await?;
		if let Some(stat) = &stat {
			if !stat.is_file() {
				return Ok(Outcome::Skipped(SkipReason::NotAFile));
			}
		}
		let current = StorageKey::from_stat(stat.as_ref());

		if meta.deleted && stat.is_none() {
			self.adopt_keys(path, StorageKey::Missing, Some(&meta))?;
			return Ok(Outcome::Skipped(SkipReason::AlreadyAbsent));
		}

		if opts.only_new {
			let storage_mtime = stat.map(|s| s.mtime).unwrap_or(0);
			if compare_mtime(meta.mtime, storage_mtime) != TimeOrder::BaseIsNew {
				debug!("{}: store is not newer, adopting both sides", path);
				self.adopt_keys(path, current, Some(&meta))?;
				return Ok(Outcome::Skipped(SkipReason::NotNewer));
			}
		}

		if meta.deleted {
			self.storage.remove(path).await?;
			self.adopt_keys(path, StorageKey::Missing, Some(&meta))?;
			info!("Deleted {} from storage", path);
			return Ok(Outcome::DeletePulled);
		}

		let Some(doc) = self.fetch_content(&id, Some(&meta.rev)).await? else {
			debug!("{}: revision {} vanished before fetch", path, meta.rev);
			return Ok(Outcome::Skipped(SkipReason::MissingInStore));
		};

		if let Some(stat) = stat.filter(|s| !opts.force_write && s.size == doc.size()) {
			let existing = self.storage.read(path).await?;
			if existing == doc.data {
				debug!("{}: content unchanged, metadata only", path);
				self.adopt_keys(path, StorageKey::Present(stat.signature()), Some(&meta))?;
				return Ok(Outcome::Skipped(SkipReason::ContentUnchanged));
			}
		}

		self.storage.ensure_parent_dirs(path).await?;
		self.storage
			.write(path, &doc.data, FileTimes { mtime: doc.mtime, ctime: doc.ctime })
			.await?;
		let written = self.storage.stat(path).await?;
		self.adopt_keys(path, StorageKey::from_stat(written.as_ref()), Some(&meta))?;
		info!("Pulled {} ({} bytes, rev {})", path, doc.size(), meta.rev);
		Ok(Outcome::Pulled)
	}

	/// Re-read both sides and adopt them as processed, whatever happened
	/// during the sweep
	pub(crate) async fn confirm(&self, path: &str) -> Result<(), SyncError> {
		let _admission = self.admit(path).await?;
		let stat = self.storage.stat(path).await?;
		if stat.map(|s| !s.is_file()).unwrap_or(false) {
			return Ok(());
		}
		let meta = self.store.get_meta(&self.mapper.doc_id(path), true).await?;
		self.adopt_keys(path, StorageKey::from_stat(stat.as_ref()), meta.as_ref())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cache::MemoryStateCache;
	use crate::engine::EngineBuilder;
	use crate::storage::{MemoryStorage, Storage};
	use crate::store::{DocumentStore, MemoryStore};
	use std::sync::Arc;

	fn engine() -> (Engine, Arc<MemoryStorage>, Arc<MemoryStore>) {
		let storage = Arc::new(MemoryStorage::new());
		let store = Arc::new(MemoryStore::new());
		let engine =
			EngineBuilder::new(storage.clone(), store.clone(), Arc::new(MemoryStateCache::new()))
				.build()
				.unwrap();
		(engine, storage, store)
	}

	#[tokio::test]
	async fn test_directory_is_skipped() {
		let (engine, storage, _) = engine();
		storage.add_dir("notes");
		let outcome = engine.push("notes", ReconcileOptions::default()).await.unwrap();
		assert_eq!(outcome, Outcome::Skipped(SkipReason::NotAFile));
	}

	#[tokio::test]
	async fn test_missing_twice_is_invalid() {
		let (engine, _, store) = engine();
		let outcome = engine.push("ghost.md", ReconcileOptions::default()).await.unwrap();
		assert_eq!(outcome, Outcome::Skipped(SkipReason::Invalid));
		assert_eq!(store.puts(), 0);
	}

	#[tokio::test]
	async fn test_force_write_bypasses_shortcuts() {
		let (engine, storage, store) = engine();
		storage.insert("a.md", b"same", 1000);
		engine.push("a.md", ReconcileOptions::default()).await.unwrap();
		assert_eq!(
			engine.push("a.md", ReconcileOptions::default()).await.unwrap(),
			Outcome::Skipped(SkipReason::AlreadyProcessed)
		);
		assert_eq!(engine.push("a.md", ReconcileOptions::force()).await.unwrap(), Outcome::Pushed);
		assert_eq!(store.puts(), 2);
	}

	#[tokio::test]
	async fn test_pull_creates_parent_dirs_and_keeps_mtime() {
		let (engine, storage, store) = engine();
		store
			.put(StoreDocument {
				id: "i:deep/dir/c.md".into(),
				path: "deep/dir/c.md".into(),
				mtime: 7000,
				ctime: 6000,
				deleted: false,
				data: b"from store".to_vec(),
				rev: None,
			})
			.await
			.unwrap();
		let outcome = engine.pull("deep/dir/c.md", ReconcileOptions::default()).await.unwrap();
		assert_eq!(outcome, Outcome::Pulled);
		assert_eq!(storage.contents("deep/dir/c.md").unwrap(), b"from store");
		assert_eq!(storage.mtime("deep/dir/c.md"), Some(7000));
		assert!(storage.stat("deep/dir").await.unwrap().is_some());

		// The storage-side echo of that write is already processed
		let echo = engine.push("deep/dir/c.md", ReconcileOptions::default()).await.unwrap();
		assert_eq!(echo, Outcome::Skipped(SkipReason::AlreadyProcessed));
	}

	#[tokio::test]
	async fn test_excluded_paths_are_skipped() {
		let storage = Arc::new(MemoryStorage::new());
		let store = Arc::new(MemoryStore::new());
		let config = crate::config::Config {
			exclude_patterns: vec!["**/workspace.json".to_string()],
			..crate::config::Config::default()
		};
		let cache = Arc::new(MemoryStateCache::new());
		let engine =
			EngineBuilder::new(storage.clone(), store.clone(), cache).config(config).build().unwrap();
		storage.insert("cfg/workspace.json", b"{}", 1000);
		let outcome = engine.push("cfg/workspace.json", ReconcileOptions::default()).await.unwrap();
		assert_eq!(outcome, Outcome::Skipped(SkipReason::Excluded));
		assert!(store.get_meta("i:cfg/workspace.json", false).await.unwrap().is_none());
	}
}

// vim: ts=4
