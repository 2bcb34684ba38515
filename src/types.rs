//! Core data model: signatures, store records, processed keys and outcomes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the epoch
pub fn now_millis() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum FileKind {
	File,
	Dir,
	Other,
}

/// Result of `stat` on the storage side. Times are milliseconds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StorageStat {
	pub mtime: u64,
	pub ctime: u64,
	pub size: u64,
	pub kind: FileKind,
}

impl StorageStat {
	pub fn file(mtime: u64, size: u64) -> Self {
		StorageStat { mtime, ctime: mtime, size, kind: FileKind::File }
	}

	pub fn is_file(&self) -> bool {
		self.kind == FileKind::File
	}

	pub fn signature(&self) -> StorageSignature {
		StorageSignature { mtime: self.mtime, size: self.size }
	}
}

/// `(mtime, size)` as observed on storage
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct StorageSignature {
	#[serde(rename = "mt")]
	pub mtime: u64,
	#[serde(rename = "sz")]
	pub size: u64,
}

/// Storage-side processed key. `Missing` is distinct from a zeroed signature.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum StorageKey {
	#[serde(rename = "none")]
	Missing,
	#[serde(rename = "sig")]
	Present(StorageSignature),
}

impl StorageKey {
	pub fn from_stat(stat: Option<&StorageStat>) -> Self {
		match stat {
			Some(s) => StorageKey::Present(s.signature()),
			None => StorageKey::Missing,
		}
	}

	pub fn is_missing(&self) -> bool {
		matches!(self, StorageKey::Missing)
	}
}

/// Store-side processed key: `(mtime, size, revision, deleted)`
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StoreKey {
	#[serde(rename = "mt")]
	pub mtime: u64,
	#[serde(rename = "sz")]
	pub size: u64,
	#[serde(rename = "rv")]
	pub rev: String,
	#[serde(rename = "del")]
	pub deleted: bool,
}

/// Value held by the state cache for one side of one path
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ProcessedKey {
	#[serde(rename = "st")]
	Storage(StorageKey),
	#[serde(rename = "db")]
	Store(StoreKey),
}

/// Which side of the sync a cache entry belongs to
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Side {
	Storage,
	Store,
}

impl fmt::Display for Side {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Side::Storage => write!(f, "storage"),
			Side::Store => write!(f, "store"),
		}
	}
}

/// Metadata of a document as currently observed in the store
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StoreRecord {
	pub id: String,
	/// Storage-relative path with its original case
	pub path: String,
	pub mtime: u64,
	pub ctime: u64,
	pub size: u64,
	pub rev: String,
	pub deleted: bool,
	/// Competing leaf revisions the store could not linearize
	#[serde(default)]
	pub conflicts: Vec<String>,
}

impl StoreRecord {
	pub fn key(&self) -> StoreKey {
		StoreKey { mtime: self.mtime, size: self.size, rev: self.rev.clone(), deleted: self.deleted }
	}

	pub fn has_conflicts(&self) -> bool {
		!self.conflicts.is_empty()
	}
}

/// A full revision: metadata plus bytes
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StoreDocument {
	pub id: String,
	pub path: String,
	pub mtime: u64,
	pub ctime: u64,
	pub deleted: bool,
	pub data: Vec<u8>,
	/// Revision this document is (when read) or is based on (when written)
	pub rev: Option<String>,
}

impl StoreDocument {
	pub fn size(&self) -> u64 {
		self.data.len() as u64
	}
}

/// Outcome of the three-way time comparison
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimeOrder {
	/// The base (first) side is newer
	BaseIsNew,
	/// The target (second) side is newer
	TargetIsNew,
	Even,
}

/// Compare two millisecond timestamps at whole-second resolution.
///
/// This is the only place where sync direction is derived from time.
pub fn compare_mtime(base: u64, target: u64) -> TimeOrder {
	let base = base / 1000;
	let target = target / 1000;
	if base > target {
		TimeOrder::BaseIsNew
	} else if base < target {
		TimeOrder::TargetIsNew
	} else {
		TimeOrder::Even
	}
}

/// Flags for a single reconciliation
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ReconcileOptions {
	/// Only transfer when the source side is strictly newer
	pub only_new: bool,
	/// Skip the processed-key and unchanged-content short-circuits
	pub force_write: bool,
}

impl ReconcileOptions {
	pub fn only_new() -> Self {
		ReconcileOptions { only_new: true, force_write: false }
	}

	pub fn force() -> Self {
		ReconcileOptions { only_new: false, force_write: true }
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SkipReason {
	/// Directory or special file
	NotAFile,
	/// Signature equals the processed key
	AlreadyProcessed,
	/// Missing before and missing now
	Invalid,
	/// `only_new` and the source side is not strictly newer
	NotNewer,
	/// Metadata changed, bytes did not
	ContentUnchanged,
	/// Deletion requested but the target is already gone
	AlreadyAbsent,
	/// Store record vanished between notification and fetch
	MissingInStore,
	/// Filtered out by include/exclude patterns or namespace
	Excluded,
}

/// What a reconciliation did
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Outcome {
	Pushed,
	Pulled,
	DeletePushed,
	DeletePulled,
	Skipped(SkipReason),
	/// Routed to the conflict pipeline
	Conflicted,
	/// Destructive action refused while a conflict is outstanding
	Refused(String),
}

impl Outcome {
	pub fn is_transfer(&self) -> bool {
		matches!(
			self,
			Outcome::Pushed | Outcome::Pulled | Outcome::DeletePushed | Outcome::DeletePulled
		)
	}
}

/// Incoming work for the engine
#[derive(Clone, Debug)]
pub enum SyncRecord {
	/// A storage change notification
	Storage { path: String },
	/// A store change (replication feed or local write)
	Store(StoreRecord),
	/// A conflict on this path was resolved outside the pipeline
	ConflictResolved { path: String },
}

/// Direction of a full sweep
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
	/// Storage is authoritative
	Push,
	/// Store is authoritative
	Pull,
	/// Newer side wins per path
	Safe,
}

impl fmt::Display for Direction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Direction::Push => write!(f, "push"),
			Direction::Pull => write!(f, "pull"),
			Direction::Safe => write!(f, "safe"),
		}
	}
}

impl std::str::FromStr for Direction {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"push" => Ok(Direction::Push),
			"pull" => Ok(Direction::Pull),
			"safe" | "merge" => Ok(Direction::Safe),
			_ => Err(format!("Unknown direction: {}. Valid options: push, pull, safe", s)),
		}
	}
}

/// Summary of a full sweep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
	pub pushed: usize,
	pub pulled: usize,
	pub deleted_in_store: usize,
	pub deleted_in_storage: usize,
	pub skipped: usize,
	pub conflicted: usize,
	pub refused: usize,
	pub confirmed: usize,
	/// Per-path failures: `(path, message)`
	pub errors: Vec<(String, String)>,
}

impl ScanReport {
	pub fn record(&mut self, outcome: &Outcome) {
		match outcome {
			Outcome::Pushed => self.pushed += 1,
			Outcome::Pulled => self.pulled += 1,
			Outcome::DeletePushed => self.deleted_in_store += 1,
			Outcome::DeletePulled => self.deleted_in_storage += 1,
			Outcome::Skipped(_) => self.skipped += 1,
			Outcome::Conflicted => self.conflicted += 1,
			Outcome::Refused(_) => self.refused += 1,
		}
	}

	pub fn transfers(&self) -> usize {
		self.pushed + self.pulled + self.deleted_in_store + self.deleted_in_storage
	}
}


// vim: ts=4
