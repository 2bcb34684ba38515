//! Revision-tree document store held in memory, with JSON snapshots
//!
//! Revision ids are `<generation>-<digest>` where the digest is a blake3 hash
//! over the parent id and the revision body. The winner is the live leaf with
//! the highest generation, ties broken by id; when every leaf is deleted the
//! highest tombstone wins and the document reads as deleted.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::DocumentStore;
use crate::error::{StoreError, SyncError};
use crate::types::{now_millis, StoreDocument, StoreRecord};

/// Document bytes as base64 strings inside the JSON snapshot
mod b64 {
	use base64::engine::general_purpose::STANDARD;
	use base64::Engine as _;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&STANDARD.encode(data))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		let text = String::deserialize(d)?;
		STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Revision {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	parent: Option<String>,
	path: String,
	#[serde(rename = "mt")]
	mtime: u64,
	#[serde(rename = "ct")]
	ctime: u64,
	#[serde(rename = "del", default)]
	deleted: bool,
	#[serde(with = "b64")]
	data: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct DocEntry {
	revs: BTreeMap<String, Revision>,
}

fn generation(rev: &str) -> u64 {
	rev.split('-').next().and_then(|g| g.parse().ok()).unwrap_or(0)
}

fn rev_cmp(a: &str, b: &str) -> CmpOrdering {
	generation(a).cmp(&generation(b)).then_with(|| a.cmp(b))
}

fn revision_id(parent: Option<&str>, rev: &Revision) -> String {
	let mut hasher = blake3::Hasher::new();
	hasher.update(parent.unwrap_or("").as_bytes());
	hasher.update(&[0]);
	hasher.update(rev.path.as_bytes());
	hasher.update(&rev.mtime.to_le_bytes());
	hasher.update(&[rev.deleted as u8]);
	hasher.update(&rev.data);
	let digest = hex::encode(hasher.finalize().as_bytes());
	let gen = parent.map(generation).unwrap_or(0) + 1;
	format!("{}-{}", gen, &digest[..32])
}

impl DocEntry {
	fn leaves(&self) -> Vec<&str> {
		let parents: HashSet<&str> =
			self.revs.values().filter_map(|r| r.parent.as_deref()).collect();
		self.revs.keys().map(String::as_str).filter(|k| !parents.contains(k)).collect()
	}

	fn is_live(&self, rev: &str) -> bool {
		self.revs.get(rev).map(|r| !r.deleted).unwrap_or(false)
	}

	fn winner(&self) -> Option<&str> {
		let leaves = self.leaves();
		let live = leaves.iter().copied().filter(|r| self.is_live(r)).max_by(|a, b| rev_cmp(a, b));
		live.or_else(|| leaves.into_iter().max_by(|a, b| rev_cmp(a, b)))
	}

	/// Live leaves other than the winner, newest first
	fn conflicts(&self, winner: &str) -> Vec<String> {
		let mut conflicts: Vec<String> = self
			.leaves()
			.into_iter()
			.filter(|r| *r != winner && self.is_live(r))
			.map(str::to_string)
			.collect();
		conflicts.sort_by(|a, b| rev_cmp(b, a));
		conflicts
	}

	fn record(&self, id: &str, include_conflicts: bool) -> Option<StoreRecord> {
		let winner = self.winner()?;
		let rev = self.revs.get(winner)?;
		Some(StoreRecord {
			id: id.to_string(),
			path: rev.path.clone(),
			mtime: rev.mtime,
			ctime: rev.ctime,
			size: rev.data.len() as u64,
			rev: winner.to_string(),
			deleted: rev.deleted,
			conflicts: if include_conflicts { self.conflicts(winner) } else { Vec::new() },
		})
	}

	/// `rev` followed by its ancestors, nearest first
	fn lineage(&self, rev: &str) -> Vec<String> {
		let mut chain = Vec::new();
		let mut current = self.revs.get(rev).map(|_| rev.to_string());
		while let Some(r) = current {
			current = self.revs.get(&r).and_then(|x| x.parent.clone());
			chain.push(r);
		}
		chain
	}

	fn insert(&mut self, parent: Option<String>, rev: Revision) -> String {
		let id = revision_id(parent.as_deref(), &rev);
		self.revs.insert(id.clone(), Revision { parent, ..rev });
		id
	}
}

fn revision_from(doc: &StoreDocument) -> Revision {
	Revision {
		parent: None,
		path: doc.path.clone(),
		mtime: doc.mtime,
		ctime: doc.ctime,
		deleted: doc.deleted,
		data: if doc.deleted { Vec::new() } else { doc.data.clone() },
	}
}

type Docs = BTreeMap<String, DocEntry>;

/// In-memory document store with conflict support
#[derive(Default)]
pub struct MemoryStore {
	docs: Mutex<Docs>,
	pending: Mutex<HashMap<String, usize>>,
	puts: AtomicUsize,
	removals: AtomicUsize,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Restore from a snapshot; a missing file yields an empty store
	pub fn load(path: &Path) -> Result<Self, SyncError> {
		let text = match std::fs::read_to_string(path) {
			Ok(text) => text,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
			Err(e) => return Err(SyncError::Io(e)),
		};
		let docs: Docs = serde_json::from_str(&text).map_err(StoreError::from)?;
		Ok(MemoryStore { docs: Mutex::new(docs), ..Self::default() })
	}

	/// Write a snapshot through a temporary file
	pub fn save(&self, path: &Path) -> Result<(), SyncError> {
		let text = {
			let docs = self.docs()?;
			serde_json::to_string_pretty(&*docs).map_err(StoreError::from)?
		};
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let tmp = path.with_extension("tmp");
		std::fs::write(&tmp, text)?;
		std::fs::rename(&tmp, path)?;
		Ok(())
	}

	fn docs(&self) -> Result<MutexGuard<'_, Docs>, StoreError> {
		self.docs.lock().map_err(|e| StoreError::Backend { message: e.to_string() })
	}

	/// Insert a revision on top of `base` without checking the winner,
	/// the way a replicated write from another machine arrives
	pub fn replicate_branch(
		&self,
		doc: StoreDocument,
		base: Option<&str>,
	) -> Result<String, StoreError> {
		let mut docs = self.docs()?;
		let entry = docs.entry(doc.id.clone()).or_default();
		if let Some(base) = base {
			if !entry.revs.contains_key(base) {
				return Err(StoreError::NotFound { id: doc.id.clone(), rev: Some(base.to_string()) });
			}
		}
		Ok(entry.insert(base.map(str::to_string), revision_from(&doc)))
	}

	/// The next `count` content reads of `id` fail with `NotReady`
	pub fn mark_pending(&self, id: &str, count: usize) {
		if let Ok(mut pending) = self.pending.lock() {
			pending.insert(id.to_string(), count);
		}
	}

	/// Successful `put` calls
	pub fn puts(&self) -> usize {
		self.puts.load(Ordering::SeqCst)
	}

	/// Successful `remove_revision` calls
	pub fn removals(&self) -> usize {
		self.removals.load(Ordering::SeqCst)
	}

	pub fn ids(&self) -> Vec<String> {
		self.docs.lock().map(|d| d.keys().cloned().collect()).unwrap_or_default()
	}

	fn take_pending(&self, id: &str) -> bool {
		let Ok(mut pending) = self.pending.lock() else { return false };
		match pending.get_mut(id) {
			Some(n) if *n > 0 => {
				*n -= 1;
				true
			}
			_ => false,
		}
	}
}

#[async_trait]
impl DocumentStore for MemoryStore {
	async fn get_meta(
		&self,
		id: &str,
		include_conflicts: bool,
	) -> Result<Option<StoreRecord>, StoreError> {
		Ok(self.docs()?.get(id).and_then(|e| e.record(id, include_conflicts)))
	}

	async fn get_content(
		&self,
		id: &str,
		rev: Option<&str>,
	) -> Result<Option<StoreDocument>, StoreError> {
		if self.take_pending(id) {
			return Err(StoreError::NotReady { id: id.to_string() });
		}
		let docs = self.docs()?;
		let Some(entry) = docs.get(id) else { return Ok(None) };
		let Some(rev_id) = rev.or_else(|| entry.winner()) else { return Ok(None) };
		Ok(entry.revs.get(rev_id).map(|r| StoreDocument {
			id: id.to_string(),
			path: r.path.clone(),
			mtime: r.mtime,
			ctime: r.ctime,
			deleted: r.deleted,
			data: r.data.clone(),
			rev: Some(rev_id.to_string()),
		}))
	}

	async fn put(&self, doc: StoreDocument) -> Result<String, StoreError> {
		let mut docs = self.docs()?;
		let current = docs.get(&doc.id).and_then(|e| e.winner()).map(str::to_string);
		if current != doc.rev {
			return Err(StoreError::RevisionConflict {
				id: doc.id.clone(),
				expected: doc.rev.clone(),
				actual: current,
			});
		}
		let entry = docs.entry(doc.id.clone()).or_default();
		let rev = entry.insert(doc.rev.clone(), revision_from(&doc));
		self.puts.fetch_add(1, Ordering::SeqCst);
		Ok(rev)
	}

	async fn remove_revision(&self, id: &str, rev: &str) -> Result<(), StoreError> {
		let mut docs = self.docs()?;
		let entry = docs
			.get_mut(id)
			.ok_or_else(|| StoreError::NotFound { id: id.to_string(), rev: None })?;
		let Some(target) = entry.revs.get(rev).cloned() else {
			return Err(StoreError::NotFound { id: id.to_string(), rev: Some(rev.to_string()) });
		};
		if !entry.leaves().contains(&rev) || target.deleted {
			return Err(StoreError::InvalidRevision {
				id: id.to_string(),
				rev: rev.to_string(),
				reason: "not a live leaf".to_string(),
			});
		}
		let now = now_millis();
		let tombstone =
			Revision { parent: None, mtime: now, ctime: now, deleted: true, data: Vec::new(), ..target };
		entry.insert(Some(rev.to_string()), tombstone);
		self.removals.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn find_range(&self, start: &str, end: &str) -> BoxStream<'_, Result<StoreRecord, StoreError>> {
		if start >= end {
			return stream::empty().boxed();
		}
		let records: Vec<Result<StoreRecord, StoreError>> = match self.docs() {
			Ok(docs) => docs
				.range(start.to_string()..end.to_string())
				.filter_map(|(id, entry)| entry.record(id, true))
				.map(Ok)
				.collect(),
			Err(e) => vec![Err(e)],
		};
		stream::iter(records).boxed()
	}

	async fn common_ancestor(
		&self,
		id: &str,
		a: &str,
		b: &str,
	) -> Result<Option<String>, StoreError> {
		let docs = self.docs()?;
		let Some(entry) = docs.get(id) else { return Ok(None) };
		let mine: HashSet<String> = entry.lineage(a).into_iter().collect();
		Ok(entry.lineage(b).into_iter().find(|r| mine.contains(r)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::TryStreamExt;
	use tempfile::TempDir;

	fn doc(id: &str, data: &[u8], mtime: u64, rev: Option<&str>) -> StoreDocument {
		StoreDocument {
			id: id.to_string(),
			path: id.trim_start_matches("i:").to_string(),
			mtime,
			ctime: mtime,
			deleted: false,
			data: data.to_vec(),
			rev: rev.map(str::to_string),
		}
	}

	#[tokio::test]
	async fn test_put_requires_current_revision() {
		let store = MemoryStore::new();
		let r1 = store.put(doc("i:a", b"one", 1000, None)).await.unwrap();
		assert!(r1.starts_with("1-"));

		let r2 = store.put(doc("i:a", b"two", 2000, Some(&r1))).await.unwrap();
		assert!(r2.starts_with("2-"));

		let stale = store.put(doc("i:a", b"three", 3000, Some(&r1))).await;
		assert!(matches!(stale, Err(StoreError::RevisionConflict { .. })));

		let meta = store.get_meta("i:a", true).await.unwrap().unwrap();
		assert_eq!(meta.rev, r2);
		assert_eq!(meta.size, 3);
		assert!(meta.conflicts.is_empty());
	}

	#[tokio::test]
	async fn test_replicated_branch_becomes_conflict() {
		let store = MemoryStore::new();
		let base = store.put(doc("i:a", b"base", 1000, None)).await.unwrap();
		let mine = store.put(doc("i:a", b"mine", 2000, Some(&base))).await.unwrap();
		let theirs = store.replicate_branch(doc("i:a", b"theirs", 3000, None), Some(&base)).unwrap();

		let meta = store.get_meta("i:a", true).await.unwrap().unwrap();
		let (winner, loser) = if rev_cmp(&mine, &theirs) == CmpOrdering::Greater {
			(mine.clone(), theirs.clone())
		} else {
			(theirs.clone(), mine.clone())
		};
		assert_eq!(meta.rev, winner);
		assert_eq!(meta.conflicts, vec![loser.clone()]);
		assert!(store.get_meta("i:a", false).await.unwrap().unwrap().conflicts.is_empty());

		assert_eq!(store.common_ancestor("i:a", &mine, &theirs).await.unwrap(), Some(base));

		store.remove_revision("i:a", &loser).await.unwrap();
		let meta = store.get_meta("i:a", true).await.unwrap().unwrap();
		assert_eq!(meta.rev, winner);
		assert!(meta.conflicts.is_empty());
	}

	#[tokio::test]
	async fn test_removing_only_leaf_deletes_document() {
		let store = MemoryStore::new();
		let r1 = store.put(doc("i:a", b"x", 1000, None)).await.unwrap();
		store.remove_revision("i:a", &r1).await.unwrap();
		let meta = store.get_meta("i:a", true).await.unwrap().unwrap();
		assert!(meta.deleted);
		assert_eq!(meta.size, 0);

		// A tombstone is not a live leaf
		assert!(matches!(
			store.remove_revision("i:a", &meta.rev).await,
			Err(StoreError::InvalidRevision { .. })
		));
	}

	#[tokio::test]
	async fn test_pending_content() {
		let store = MemoryStore::new();
		store.put(doc("i:a", b"x", 1000, None)).await.unwrap();
		store.mark_pending("i:a", 1);
		assert!(matches!(store.get_content("i:a", None).await, Err(StoreError::NotReady { .. })));
		let content = store.get_content("i:a", None).await.unwrap().unwrap();
		assert_eq!(content.data, b"x");
	}

	#[tokio::test]
	async fn test_find_range_and_snapshot() {
		let tmp = TempDir::new().unwrap();
		let store = MemoryStore::new();
		store.put(doc("i:b", b"\x00\x01binary", 1000, None)).await.unwrap();
		store.put(doc("i:a", b"text", 1000, None)).await.unwrap();
		store.put(doc("other:c", b"c", 1000, None)).await.unwrap();

		let file = tmp.path().join("store.json");
		store.save(&file).unwrap();
		let restored = MemoryStore::load(&file).unwrap();

		let records: Vec<StoreRecord> =
			restored.find_range("i:", "i:\u{10ffff}").try_collect().await.unwrap();
		let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
		assert_eq!(ids, vec!["i:a", "i:b"]);
		let content = restored.get_content("i:b", None).await.unwrap().unwrap();
		assert_eq!(content.data, b"\x00\x01binary");
	}
}

// vim: ts=4
