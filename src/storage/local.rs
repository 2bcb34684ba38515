//! Storage backed by a directory on the local filesystem

use async_trait::async_trait;
use filetime::FileTime;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs as afs;

use super::{join, FileTimes, Listing, Storage};
use crate::error::StorageError;
use crate::path::{validate, TEMP_SUFFIX};
use crate::types::{FileKind, StorageStat};

fn to_millis(t: io::Result<SystemTime>) -> Option<u64> {
	t.ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_millis() as u64)
}

fn file_time(millis: u64) -> FileTime {
	FileTime::from_unix_time((millis / 1000) as i64, ((millis % 1000) * 1_000_000) as u32)
}

/// Directory-rooted storage. Writes go through a temporary file and a rename.
///
/// Only the modification time can be applied on write; creation time is
/// whatever the platform assigns.
pub struct LocalStorage {
	root: PathBuf,
}

impl LocalStorage {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		LocalStorage { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
		if path.is_empty() {
			return Ok(self.root.clone());
		}
		validate(path).map_err(|e| StorageError::InvalidPath {
			path: path.to_string(),
			reason: e.to_string(),
		})?;
		Ok(self.root.join(path))
	}
}

#[async_trait]
impl Storage for LocalStorage {
	async fn stat(&self, path: &str) -> Result<Option<StorageStat>, StorageError> {
		let full = self.resolve(path)?;
		let meta = match afs::metadata(&full).await {
			Ok(meta) => meta,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(StorageError::io(path, e)),
		};
		let kind = if meta.is_file() {
			FileKind::File
		} else if meta.is_dir() {
			FileKind::Dir
		} else {
			FileKind::Other
		};
		let mtime = to_millis(meta.modified()).unwrap_or(0);
		let ctime = to_millis(meta.created()).unwrap_or(mtime);
		Ok(Some(StorageStat { mtime, ctime, size: meta.len(), kind }))
	}

	async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
		let full = self.resolve(path)?;
		afs::read(&full).await.map_err(|e| StorageError::io(path, e))
	}

	async fn write(&self, path: &str, data: &[u8], times: FileTimes) -> Result<(), StorageError> {
		let full = self.resolve(path)?;
		let mut tmp_name = full.clone().into_os_string();
		tmp_name.push(TEMP_SUFFIX);
		let tmp = PathBuf::from(tmp_name);

		afs::write(&tmp, data).await.map_err(|e| StorageError::io(path, e))?;
		if let Err(e) = filetime::set_file_mtime(&tmp, file_time(times.mtime)) {
			let _ = afs::remove_file(&tmp).await;
			return Err(StorageError::io(path, e));
		}
		if let Err(e) = afs::rename(&tmp, &full).await {
			let _ = afs::remove_file(&tmp).await;
			return Err(StorageError::io(path, e));
		}
		Ok(())
	}

	async fn remove(&self, path: &str) -> Result<bool, StorageError> {
		let full = self.resolve(path)?;
		match afs::remove_file(&full).await {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(StorageError::io(path, e)),
		}
	}

	async fn list(&self, dir: &str) -> Result<Listing, StorageError> {
		let full = self.resolve(dir)?;
		let mut listing = Listing::default();
		let mut entries = match afs::read_dir(&full).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(listing),
			Err(e) => return Err(StorageError::io(dir, e)),
		};
		while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::io(dir, e))? {
			let name = entry.file_name().to_string_lossy().to_string();
			let file_type = entry.file_type().await.map_err(|e| StorageError::io(dir, e))?;
			if file_type.is_dir() {
				listing.dirs.push(join(dir, &name));
			} else if file_type.is_file() {
				listing.files.push(join(dir, &name));
			}
		}
		Ok(listing)
	}

	async fn ensure_parent_dirs(&self, path: &str) -> Result<(), StorageError> {
		let full = self.resolve(path)?;
		if let Some(parent) = full.parent() {
			afs::create_dir_all(parent).await.map_err(|e| StorageError::io(path, e))?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_write_applies_mtime() {
		let tmp = TempDir::new().unwrap();
		let storage = LocalStorage::new(tmp.path());

		storage.ensure_parent_dirs("notes/a.md").await.unwrap();
		storage
			.write("notes/a.md", b"hello", FileTimes { mtime: 1_600_000_000_000, ctime: 0 })
			.await
			.unwrap();

		let stat = storage.stat("notes/a.md").await.unwrap().unwrap();
		assert_eq!(stat.mtime, 1_600_000_000_000);
		assert_eq!(stat.size, 5);
		assert!(stat.is_file());
		assert!(!tmp.path().join("notes/a.md.docsync-tmp").exists());
	}

	#[tokio::test]
	async fn test_missing_paths() {
		let tmp = TempDir::new().unwrap();
		let storage = LocalStorage::new(tmp.path());
		assert!(storage.stat("nope.md").await.unwrap().is_none());
		assert!(!storage.remove("nope.md").await.unwrap());
		assert!(matches!(storage.read("nope.md").await, Err(StorageError::NotFound { .. })));
	}

	#[tokio::test]
	async fn test_list_recursive() {
		let tmp = TempDir::new().unwrap();
		std::fs::create_dir_all(tmp.path().join("a/b")).unwrap();
		std::fs::write(tmp.path().join("top.md"), b"1").unwrap();
		std::fs::write(tmp.path().join("a/one.md"), b"1").unwrap();
		std::fs::write(tmp.path().join("a/b/two.md"), b"1").unwrap();

		let storage = LocalStorage::new(tmp.path());
		let mut files = storage.list_recursive("").await.unwrap();
		files.sort();
		assert_eq!(files, vec!["a/b/two.md", "a/one.md", "top.md"]);
	}

	#[tokio::test]
	async fn test_rejects_escaping_paths() {
		let tmp = TempDir::new().unwrap();
		let storage = LocalStorage::new(tmp.path());
		assert!(matches!(
			storage.read("../secret").await,
			Err(StorageError::InvalidPath { .. })
		));
	}
}

// vim: ts=4
