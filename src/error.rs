//! Error types for docsync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Main error type for reconciliation operations
#[derive(Debug)]
pub enum SyncError {
	/// Storage side failed (stat/read/write/remove)
	Storage(StorageError),

	/// Document store failed
	Store(StoreError),

	/// State cache failed
	Cache(CacheError),

	/// Conflict resolution failed
	Conflict(ConflictError),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Lock or admission slot could not be acquired
	LockFailed { message: String },

	/// A destructive action was refused because it would violate an invariant
	Refused { path: String, reason: String },

	/// A coalesced operation failed in the caller that actually ran it
	Coalesced { key: String, message: String },

	/// I/O error outside of the storage collaborator (config, snapshots)
	Io(io::Error),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Storage(e) => write!(f, "Storage error: {}", e),
			SyncError::Store(e) => write!(f, "Store error: {}", e),
			SyncError::Cache(e) => write!(f, "State cache error: {}", e),
			SyncError::Conflict(e) => write!(f, "Conflict error: {}", e),
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::LockFailed { message } => {
				write!(f, "Lock acquisition failed: {}", message)
			}
			SyncError::Refused { path, reason } => write!(f, "Refused on {}: {}", path, reason),
			SyncError::Coalesced { key, message } => {
				write!(f, "Operation '{}' failed: {}", key, message)
			}
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::Storage(e) => Some(e),
			SyncError::Store(e) => Some(e),
			SyncError::Cache(e) => Some(e),
			SyncError::Conflict(e) => Some(e),
			SyncError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl SyncError {
	/// Transient failures leave bookkeeping untouched and are retried on the next scan
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			SyncError::Storage(StorageError::Io { .. })
				| SyncError::Store(StoreError::NotReady { .. })
				| SyncError::Store(StoreError::Backend { .. })
				| SyncError::Store(StoreError::RevisionConflict { .. })
		)
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<StorageError> for SyncError {
	fn from(e: StorageError) -> Self {
		SyncError::Storage(e)
	}
}

impl From<StoreError> for SyncError {
	fn from(e: StoreError) -> Self {
		SyncError::Store(e)
	}
}

impl From<CacheError> for SyncError {
	fn from(e: CacheError) -> Self {
		SyncError::Cache(e)
	}
}

impl From<ConflictError> for SyncError {
	fn from(e: ConflictError) -> Self {
		SyncError::Conflict(e)
	}
}

/// Storage collaborator errors
#[derive(Debug)]
pub enum StorageError {
	/// Underlying I/O failed for a path
	Io { path: String, source: io::Error },

	/// Path does not exist
	NotFound { path: String },

	/// Path is not acceptable (absolute, escapes the root, ...)
	InvalidPath { path: String, reason: String },
}

impl fmt::Display for StorageError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StorageError::Io { path, source } => write!(f, "I/O failed on {}: {}", path, source),
			StorageError::NotFound { path } => write!(f, "Not found: {}", path),
			StorageError::InvalidPath { path, reason } => {
				write!(f, "Invalid path {}: {}", path, reason)
			}
		}
	}
}

impl Error for StorageError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			StorageError::Io { source, .. } => Some(source),
			_ => None,
		}
	}
}

impl StorageError {
	/// Wrap an io::Error, mapping NotFound to its own variant
	pub fn io(path: &str, source: io::Error) -> Self {
		if source.kind() == io::ErrorKind::NotFound {
			StorageError::NotFound { path: path.to_string() }
		} else {
			StorageError::Io { path: path.to_string(), source }
		}
	}
}

/// Document store errors
#[derive(Debug)]
pub enum StoreError {
	/// Document or revision is unknown
	NotFound { id: String, rev: Option<String> },

	/// Document exists but its content has not fully arrived yet
	NotReady { id: String },

	/// `put` was based on a revision that is no longer current
	RevisionConflict { id: String, expected: Option<String>, actual: Option<String> },

	/// Revision exists but cannot be used for the requested operation
	InvalidRevision { id: String, rev: String, reason: String },

	/// Store snapshot could not be (de)serialized
	Serialization { message: String },

	/// Backend-specific failure
	Backend { message: String },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::NotFound { id, rev: Some(rev) } => {
				write!(f, "Document {} has no revision {}", id, rev)
			}
			StoreError::NotFound { id, rev: None } => write!(f, "Document {} not found", id),
			StoreError::NotReady { id } => write!(f, "Document {} is not fully available yet", id),
			StoreError::RevisionConflict { id, expected, actual } => write!(
				f,
				"Revision conflict on {}: based on {:?}, current is {:?}",
				id, expected, actual
			),
			StoreError::InvalidRevision { id, rev, reason } => {
				write!(f, "Invalid revision {} of {}: {}", rev, id, reason)
			}
			StoreError::Serialization { message } => {
				write!(f, "Store serialization failed: {}", message)
			}
			StoreError::Backend { message } => write!(f, "Store backend error: {}", message),
		}
	}
}

impl Error for StoreError {}

impl From<serde_json::Error> for StoreError {
	fn from(e: serde_json::Error) -> Self {
		StoreError::Serialization { message: e.to_string() }
	}
}

/// State cache errors
#[derive(Debug)]
pub enum CacheError {
	/// Failed to open the backing database
	OpenFailed { source: Box<dyn Error + Send + Sync> },

	/// Backend read/write failed
	Backend { message: String },

	/// A stored entry could not be decoded
	Corrupted { key: String, message: String },
}

impl fmt::Display for CacheError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CacheError::OpenFailed { source } => write!(f, "Failed to open cache: {}", source),
			CacheError::Backend { message } => write!(f, "Cache backend error: {}", message),
			CacheError::Corrupted { key, message } => {
				write!(f, "Cache entry {} corrupted: {}", key, message)
			}
		}
	}
}

impl Error for CacheError {}

impl From<redb::DatabaseError> for CacheError {
	fn from(e: redb::DatabaseError) -> Self {
		CacheError::OpenFailed { source: Box::new(e) }
	}
}

impl From<redb::TransactionError> for CacheError {
	fn from(e: redb::TransactionError) -> Self {
		CacheError::Backend { message: e.to_string() }
	}
}

impl From<redb::TableError> for CacheError {
	fn from(e: redb::TableError) -> Self {
		CacheError::Backend { message: e.to_string() }
	}
}

impl From<redb::StorageError> for CacheError {
	fn from(e: redb::StorageError) -> Self {
		CacheError::Backend { message: e.to_string() }
	}
}

impl From<redb::CommitError> for CacheError {
	fn from(e: redb::CommitError) -> Self {
		CacheError::Backend { message: e.to_string() }
	}
}

/// Conflict resolution errors
#[derive(Debug)]
pub enum ConflictError {
	/// The manual merge collaborator picked a revision that is not in the conflict
	InvalidChoice { path: String, rev: String },

	/// Conflict resolution strategy failed
	StrategyFailed { path: String, message: String },

	/// Every strategy was exhausted and the path stays conflicted
	Unresolvable { path: String },
}

impl fmt::Display for ConflictError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConflictError::InvalidChoice { path, rev } => {
				write!(f, "Revision {} is not part of the conflict on {}", rev, path)
			}
			ConflictError::StrategyFailed { path, message } => {
				write!(f, "Conflict resolution failed on {}: {}", path, message)
			}
			ConflictError::Unresolvable { path } => write!(f, "Conflict on {} is unresolvable", path),
		}
	}
}

impl Error for ConflictError {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_not_found_is_mapped() {
		let err = StorageError::io("a.md", io::Error::new(io::ErrorKind::NotFound, "gone"));
		assert!(matches!(err, StorageError::NotFound { .. }));
	}

	#[test]
	fn test_transient_classification() {
		let io_err = SyncError::Storage(StorageError::Io {
			path: "a".into(),
			source: io::Error::new(io::ErrorKind::Other, "disk"),
		});
		assert!(io_err.is_transient());
		let refused = SyncError::Refused { path: "a".into(), reason: "conflicted".into() };
		assert!(!refused.is_transient());
	}

	#[test]
	fn test_display_includes_context() {
		let err = SyncError::Store(StoreError::NotFound { id: "i:a".into(), rev: Some("2-x".into()) });
		assert!(err.to_string().contains("2-x"));
	}
}

// vim: ts=4
