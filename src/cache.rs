//! State cache: the last processed key per path, per side
//!
//! Two key spaces are kept, one for storage signatures and one for store
//! signatures. Entries are only written after a reconciliation step completed.
//! Callers hold the per-path lock, so no ordering is guaranteed here beyond
//! last-write-wins per key.

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path;
use std::sync::Mutex;

use crate::error::CacheError;
use crate::types::{ProcessedKey, Side};

/// Table definition for storage-side keys
/// Key: cache key of the path
/// Value: json5-encoded ProcessedKey
const STORAGE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("storage_keys");

/// Table definition for store-side keys
const STORE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("store_keys");

fn table_for(side: Side) -> TableDefinition<'static, &'static str, &'static [u8]> {
	match side {
		Side::Storage => STORAGE_TABLE,
		Side::Store => STORE_TABLE,
	}
}

/// Persistent map of processed keys
pub trait StateCache: Send + Sync {
	fn get(&self, side: Side, path: &str) -> Result<Option<ProcessedKey>, CacheError>;

	fn set(&self, side: Side, path: &str, key: &ProcessedKey) -> Result<(), CacheError>;

	fn delete(&self, side: Side, path: &str) -> Result<(), CacheError>;

	fn clear(&self, side: Side) -> Result<(), CacheError>;

	/// All paths with an entry on `side`, sorted
	fn keys(&self, side: Side) -> Result<Vec<String>, CacheError>;
}

fn decode(path: &str, bytes: &[u8]) -> Result<ProcessedKey, CacheError> {
	let text = std::str::from_utf8(bytes)
		.map_err(|e| CacheError::Corrupted { key: path.to_string(), message: e.to_string() })?;
	json5::from_str(text)
		.map_err(|e| CacheError::Corrupted { key: path.to_string(), message: e.to_string() })
}

fn encode(path: &str, key: &ProcessedKey) -> Result<Vec<u8>, CacheError> {
	json5::to_string(key)
		.map(String::into_bytes)
		.map_err(|e| CacheError::Corrupted { key: path.to_string(), message: e.to_string() })
}

/// State cache backed by a redb database file
pub struct RedbStateCache {
	db: redb::Database,
}

impl RedbStateCache {
	/// Open or create the cache database
	pub fn open(db_path: &path::Path) -> Result<Self, CacheError> {
		if let Some(parent) = db_path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| CacheError::OpenFailed { source: Box::new(e) })?;
		}
		let db = redb::Database::create(db_path)?;
		// Ensure both tables exist so readers never see TableDoesNotExist
		{
			let write_txn = db.begin_write()?;
			let _ = write_txn.open_table(STORAGE_TABLE)?;
			let _ = write_txn.open_table(STORE_TABLE)?;
			write_txn.commit()?;
		}
		Ok(RedbStateCache { db })
	}
}

impl StateCache for RedbStateCache {
	fn get(&self, side: Side, path: &str) -> Result<Option<ProcessedKey>, CacheError> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(table_for(side))?;

		match table.get(path)? {
			Some(entry) => {
				let bytes = entry.value().to_vec();
				Ok(Some(decode(path, &bytes)?))
			}
			None => Ok(None),
		}
	}

	fn set(&self, side: Side, path: &str, key: &ProcessedKey) -> Result<(), CacheError> {
		let bytes = encode(path, key)?;

		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(table_for(side))?;
			table.insert(path, bytes.as_slice())?;
		}
		write_txn.commit()?;

		Ok(())
	}

	fn delete(&self, side: Side, path: &str) -> Result<(), CacheError> {
		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(table_for(side))?;
			table.remove(path)?;
		}
		write_txn.commit()?;
		Ok(())
	}

	fn clear(&self, side: Side) -> Result<(), CacheError> {
		let keys = self.keys(side)?;
		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(table_for(side))?;
			for key in keys {
				table.remove(key.as_str())?;
			}
		}
		write_txn.commit()?;
		Ok(())
	}

	fn keys(&self, side: Side) -> Result<Vec<String>, CacheError> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(table_for(side))?;
		let mut keys = Vec::new();
		for item in table.iter()? {
			let (key, _) = item?;
			keys.push(key.value().to_string());
		}
		Ok(keys)
	}
}

type Entries = HashMap<(Side, String), ProcessedKey>;

/// Non-persistent state cache
#[derive(Default)]
pub struct MemoryStateCache {
	entries: Mutex<Entries>,
}

impl MemoryStateCache {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> Result<std::sync::MutexGuard<'_, Entries>, CacheError> {
		self.entries.lock().map_err(|e| CacheError::Backend { message: e.to_string() })
	}
}

impl StateCache for MemoryStateCache {
	fn get(&self, side: Side, path: &str) -> Result<Option<ProcessedKey>, CacheError> {
		Ok(self.lock()?.get(&(side, path.to_string())).cloned())
	}

	fn set(&self, side: Side, path: &str, key: &ProcessedKey) -> Result<(), CacheError> {
		self.lock()?.insert((side, path.to_string()), key.clone());
		Ok(())
	}

	fn delete(&self, side: Side, path: &str) -> Result<(), CacheError> {
		self.lock()?.remove(&(side, path.to_string()));
		Ok(())
	}

	fn clear(&self, side: Side) -> Result<(), CacheError> {
		self.lock()?.retain(|(s, _), _| *s != side);
		Ok(())
	}

	fn keys(&self, side: Side) -> Result<Vec<String>, CacheError> {
		let mut keys: Vec<String> =
			self.lock()?.keys().filter(|(s, _)| *s == side).map(|(_, p)| p.clone()).collect();
		keys.sort();
		Ok(keys)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{StorageKey, StorageSignature, StoreKey};
	use tempfile::TempDir;

	fn storage_key(mtime: u64, size: u64) -> ProcessedKey {
		ProcessedKey::Storage(StorageKey::Present(StorageSignature { mtime, size }))
	}

	#[test]
	fn test_cache_create_and_set() {
		let tmp = TempDir::new().unwrap();
		let cache = RedbStateCache::open(&tmp.path().join("state.db")).unwrap();

		cache.set(Side::Storage, "a.md", &storage_key(1000, 12)).unwrap();

		assert_eq!(cache.get(Side::Storage, "a.md").unwrap(), Some(storage_key(1000, 12)));
		assert_eq!(cache.get(Side::Store, "a.md").unwrap(), None);
	}

	#[test]
	fn test_cache_survives_reopen() {
		let tmp = TempDir::new().unwrap();
		let db_path = tmp.path().join("state.db");
		let tomb = ProcessedKey::Store(StoreKey {
			mtime: 5000,
			size: 0,
			rev: "2-dead".to_string(),
			deleted: true,
		});
		{
			let cache = RedbStateCache::open(&db_path).unwrap();
			cache.set(Side::Store, "b.md", &tomb).unwrap();
			cache.set(Side::Storage, "b.md", &ProcessedKey::Storage(StorageKey::Missing)).unwrap();
		}
		let cache = RedbStateCache::open(&db_path).unwrap();
		assert_eq!(cache.get(Side::Store, "b.md").unwrap(), Some(tomb));
		assert_eq!(
			cache.get(Side::Storage, "b.md").unwrap(),
			Some(ProcessedKey::Storage(StorageKey::Missing))
		);
	}

	#[test]
	fn test_clear_only_touches_one_side() {
		let tmp = TempDir::new().unwrap();
		let cache = RedbStateCache::open(&tmp.path().join("state.db")).unwrap();
		cache.set(Side::Storage, "a", &storage_key(1, 1)).unwrap();
		cache.set(Side::Storage, "b", &storage_key(2, 2)).unwrap();
		cache.set(Side::Store, "a", &storage_key(3, 3)).unwrap();

		cache.clear(Side::Storage).unwrap();

		assert!(cache.keys(Side::Storage).unwrap().is_empty());
		assert_eq!(cache.keys(Side::Store).unwrap(), vec!["a".to_string()]);
	}

	#[test]
	fn test_delete() {
		let cache = MemoryStateCache::new();
		cache.set(Side::Storage, "a", &storage_key(1, 1)).unwrap();
		cache.delete(Side::Storage, "a").unwrap();
		assert_eq!(cache.get(Side::Storage, "a").unwrap(), None);
	}

	#[test]
	fn test_memory_keys_sorted_per_side() {
		let cache = MemoryStateCache::new();
		cache.set(Side::Store, "z", &storage_key(1, 1)).unwrap();
		cache.set(Side::Store, "a", &storage_key(1, 1)).unwrap();
		cache.set(Side::Storage, "m", &storage_key(1, 1)).unwrap();
		assert_eq!(cache.keys(Side::Store).unwrap(), vec!["a".to_string(), "z".to_string()]);
		cache.clear(Side::Store).unwrap();
		assert_eq!(cache.keys(Side::Storage).unwrap(), vec!["m".to_string()]);
	}
}

// vim: ts=4
