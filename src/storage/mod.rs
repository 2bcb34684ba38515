//! Storage collaborator: the mutable, unversioned side of sync
//!
//! All paths are storage-relative and `/`-separated.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::StorageStat;

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Times to apply when writing a file. Milliseconds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileTimes {
	pub mtime: u64,
	pub ctime: u64,
}

/// Direct children of a directory, as full relative paths
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
	pub files: Vec<String>,
	pub dirs: Vec<String>,
}

/// Join a directory and a child name; the root directory is `""`
pub fn join(dir: &str, name: &str) -> String {
	if dir.is_empty() {
		name.to_string()
	} else {
		format!("{}/{}", dir.trim_end_matches('/'), name)
	}
}

#[async_trait]
pub trait Storage: Send + Sync {
	/// `None` when the path does not exist
	async fn stat(&self, path: &str) -> Result<Option<StorageStat>, StorageError>;

	async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

	async fn write(&self, path: &str, data: &[u8], times: FileTimes) -> Result<(), StorageError>;

	/// Returns false when there was nothing to remove
	async fn remove(&self, path: &str) -> Result<bool, StorageError>;

	async fn list(&self, dir: &str) -> Result<Listing, StorageError>;

	async fn ensure_parent_dirs(&self, path: &str) -> Result<(), StorageError>;

	async fn exists(&self, path: &str) -> Result<bool, StorageError> {
		Ok(self.stat(path).await?.is_some())
	}

	/// Every file below `dir`, depth first, sorted per directory
	async fn list_recursive(&self, dir: &str) -> Result<Vec<String>, StorageError> {
		let mut files = Vec::new();
		let mut pending = vec![dir.to_string()];
		while let Some(current) = pending.pop() {
			let mut listing = self.list(&current).await?;
			listing.files.sort();
			listing.dirs.sort();
			files.extend(listing.files);
			pending.extend(listing.dirs.into_iter().rev());
		}
		Ok(files)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_join() {
		assert_eq!(join("", "a.md"), "a.md");
		assert_eq!(join("notes", "a.md"), "notes/a.md");
		assert_eq!(join("notes/", "a.md"), "notes/a.md");
	}
}

// vim: ts=4
