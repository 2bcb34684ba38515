//! In-process storage, used as a test double and for dry runs

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{FileTimes, Listing, Storage};
use crate::error::StorageError;
use crate::types::{FileKind, StorageStat};

#[derive(Clone, Debug)]
struct MemFile {
	data: Vec<u8>,
	mtime: u64,
	ctime: u64,
}

#[derive(Default)]
struct Tree {
	files: BTreeMap<String, MemFile>,
	dirs: BTreeSet<String>,
}

/// Storage held in memory. Counts writes and removes made through the trait.
#[derive(Default)]
pub struct MemoryStorage {
	tree: Mutex<Tree>,
	failing: Mutex<HashSet<String>>,
	writes: AtomicUsize,
	removes: AtomicUsize,
}

fn parent_of(path: &str) -> &str {
	match path.rfind('/') {
		Some(idx) => &path[..idx],
		None => "",
	}
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	fn tree(&self) -> Result<MutexGuard<'_, Tree>, StorageError> {
		self.tree.lock().map_err(|e| StorageError::Io {
			path: String::new(),
			source: io::Error::new(io::ErrorKind::Other, e.to_string()),
		})
	}

	fn check_failing(&self, path: &str) -> Result<(), StorageError> {
		let failing = self.failing.lock().map(|f| f.contains(path)).unwrap_or(false);
		if failing {
			return Err(StorageError::Io {
				path: path.to_string(),
				source: io::Error::new(io::ErrorKind::Other, "injected failure"),
			});
		}
		Ok(())
	}

	/// Place a file without counting it as a write
	pub fn insert(&self, path: &str, data: &[u8], mtime: u64) {
		if let Ok(mut tree) = self.tree.lock() {
			tree.files
				.insert(path.to_string(), MemFile { data: data.to_vec(), mtime, ctime: mtime });
		}
	}

	/// Change the mtime of an existing file, keeping its bytes
	pub fn touch(&self, path: &str, mtime: u64) {
		if let Ok(mut tree) = self.tree.lock() {
			if let Some(file) = tree.files.get_mut(path) {
				file.mtime = mtime;
			}
		}
	}

	/// Remove a file without counting it
	pub fn delete(&self, path: &str) {
		if let Ok(mut tree) = self.tree.lock() {
			tree.files.remove(path);
		}
	}

	pub fn add_dir(&self, path: &str) {
		if let Ok(mut tree) = self.tree.lock() {
			tree.dirs.insert(path.to_string());
		}
	}

	pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
		self.tree.lock().ok().and_then(|t| t.files.get(path).map(|f| f.data.clone()))
	}

	pub fn mtime(&self, path: &str) -> Option<u64> {
		self.tree.lock().ok().and_then(|t| t.files.get(path).map(|f| f.mtime))
	}

	/// Make every operation on `path` fail with an I/O error
	pub fn fail_on(&self, path: &str) {
		if let Ok(mut failing) = self.failing.lock() {
			failing.insert(path.to_string());
		}
	}

	pub fn heal(&self, path: &str) {
		if let Ok(mut failing) = self.failing.lock() {
			failing.remove(path);
		}
	}

	pub fn writes(&self) -> usize {
		self.writes.load(Ordering::SeqCst)
	}

	pub fn removes(&self) -> usize {
		self.removes.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Storage for MemoryStorage {
	async fn stat(&self, path: &str) -> Result<Option<StorageStat>, StorageError> {
		self.check_failing(path)?;
		let tree = self.tree()?;
		if let Some(file) = tree.files.get(path) {
			return Ok(Some(StorageStat {
				mtime: file.mtime,
				ctime: file.ctime,
				size: file.data.len() as u64,
				kind: FileKind::File,
			}));
		}
		if tree.dirs.contains(path) {
			return Ok(Some(StorageStat { mtime: 0, ctime: 0, size: 0, kind: FileKind::Dir }));
		}
		Ok(None)
	}

	async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
		self.check_failing(path)?;
		self.tree()?
			.files
			.get(path)
			.map(|f| f.data.clone())
			.ok_or_else(|| StorageError::NotFound { path: path.to_string() })
	}

	async fn write(&self, path: &str, data: &[u8], times: FileTimes) -> Result<(), StorageError> {
		self.check_failing(path)?;
		self.writes.fetch_add(1, Ordering::SeqCst);
		self.tree()?.files.insert(
			path.to_string(),
			MemFile { data: data.to_vec(), mtime: times.mtime, ctime: times.ctime },
		);
		Ok(())
	}

	async fn remove(&self, path: &str) -> Result<bool, StorageError> {
		self.check_failing(path)?;
		let removed = self.tree()?.files.remove(path).is_some();
		if removed {
			self.removes.fetch_add(1, Ordering::SeqCst);
		}
		Ok(removed)
	}

	async fn list(&self, dir: &str) -> Result<Listing, StorageError> {
		let tree = self.tree()?;
		let prefix = if dir.is_empty() { String::new() } else { format!("{}/", dir) };
		let mut listing = Listing::default();
		let mut dirs = BTreeSet::new();
		let all_dirs = tree.dirs.iter().map(|d| format!("{}/", d));
		for path in tree.files.keys().cloned().chain(all_dirs) {
			let Some(rest) = path.strip_prefix(&prefix) else { continue };
			match rest.find('/') {
				Some(idx) => {
					dirs.insert(format!("{}{}", prefix, &rest[..idx]));
				}
				None if !rest.is_empty() => listing.files.push(path.clone()),
				None => {}
			}
		}
		listing.dirs = dirs.into_iter().collect();
		Ok(listing)
	}

	async fn ensure_parent_dirs(&self, path: &str) -> Result<(), StorageError> {
		let mut tree = self.tree()?;
		let mut parent = parent_of(path);
		while !parent.is_empty() {
			tree.dirs.insert(parent.to_string());
			parent = parent_of(parent);
		}
		Ok(())
	}
}


// vim: ts=4
