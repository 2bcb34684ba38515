//! Full sweeps in every direction, the confirmation pass and serialization

mod common;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{doc, harness, test_config};
use docsync::error::StorageError;
use docsync::events::SyncEvent;
use docsync::storage::{FileTimes, Listing};
use docsync::types::StorageStat;
use docsync::{
	Direction, DocumentStore, EngineBuilder, MemoryStateCache, MemoryStorage, MemoryStore, Outcome,
	ReconcileOptions, SkipReason, Storage,
};

#[tokio::test]
async fn test_push_sweep_uploads_and_deletes() {
	let h = harness();
	h.storage.insert("a.md", b"alpha", 1000);
	h.storage.insert("dir/b.md", b"beta", 1000);
	h.store.put(doc("orphan.md", b"only in store", 1000)).await.unwrap();

	let report = h.engine.scan(Direction::Push).await.unwrap();
	assert_eq!(report.pushed, 2);
	assert_eq!(report.deleted_in_store, 1);
	assert!(report.errors.is_empty());
	assert!(h.store.get_meta("i:orphan.md", true).await.unwrap().unwrap().deleted);
	assert_eq!(h.store.get_meta("i:dir/b.md", true).await.unwrap().unwrap().size, 4);
}

#[tokio::test]
async fn test_pull_sweep_downloads_live_documents() {
	let h = harness();
	h.store.put(doc("x/one.md", b"1", 4000)).await.unwrap();
	h.store.put(doc("two.md", b"22", 4000)).await.unwrap();
	let dead = h.store.put(doc("dead.md", b"", 4000)).await.unwrap();
	let mut tomb = doc("dead.md", b"", 5000);
	tomb.deleted = true;
	tomb.rev = Some(dead);
	h.store.put(tomb).await.unwrap();
	h.storage.insert("local-only.md", b"untouched", 1000);

	let report = h.engine.scan(Direction::Pull).await.unwrap();
	assert_eq!(report.pulled, 2);
	assert_eq!(report.deleted_in_storage, 0);
	assert_eq!(h.storage.contents("x/one.md").unwrap(), b"1");
	assert_eq!(h.storage.contents("local-only.md").unwrap(), b"untouched");
	assert!(h.store.get_meta("i:local-only.md", true).await.unwrap().is_none());
}

#[tokio::test]
async fn test_safe_sweep_newer_side_wins() {
	let h = harness();
	h.storage.insert("local-newer.md", b"local", 10_000);
	h.store.put(doc("local-newer.md", b"stale remote", 5_000)).await.unwrap();
	h.storage.insert("remote-newer.md", b"stale local", 3_000);
	h.store.put(doc("remote-newer.md", b"remote", 9_000)).await.unwrap();
	h.storage.insert("new-local.md", b"n", 1_000);
	h.store.put(doc("new-remote.md", b"r", 1_000)).await.unwrap();

	let report = h.engine.scan(Direction::Safe).await.unwrap();
	assert_eq!(report.pushed, 2);
	assert_eq!(report.pulled, 2);

	let meta = h.store.get_meta("i:local-newer.md", true).await.unwrap().unwrap();
	let content = h.store.get_content("i:local-newer.md", Some(&meta.rev)).await.unwrap().unwrap();
	assert_eq!(content.data, b"local");
	assert_eq!(h.storage.contents("remote-newer.md").unwrap(), b"remote");
	assert_eq!(h.storage.contents("new-remote.md").unwrap(), b"r");
	assert!(h.store.get_meta("i:new-local.md", true).await.unwrap().is_some());
}

#[tokio::test]
async fn test_sweeps_converge() {
	let h = harness();
	h.storage.insert("a.md", b"alpha", 2_000);
	h.store.put(doc("b.md", b"beta", 2_000)).await.unwrap();
	h.storage.insert("c.md", b"same", 2_000);
	h.store.put(doc("c.md", b"same", 2_000)).await.unwrap();

	let first = h.engine.scan(Direction::Safe).await.unwrap();
	assert!(first.transfers() > 0);
	assert_eq!(first.confirmed, 3);
	let puts = h.store.puts();
	let writes = h.storage.writes();

	for direction in [Direction::Safe, Direction::Push, Direction::Pull] {
		let again = h.engine.scan(direction).await.unwrap();
		assert_eq!(again.transfers(), 0, "{} sweep moved data", direction);
	}
	assert_eq!(h.store.puts(), puts);
	assert_eq!(h.storage.writes(), writes);
}

#[tokio::test]
async fn test_equal_seconds_with_different_content_pushes() {
	let h = harness();
	h.storage.insert("e.md", b"local text", 7_100);
	h.store.put(doc("e.md", b"remote text", 7_900)).await.unwrap();

	let report = h.engine.scan(Direction::Safe).await.unwrap();
	assert_eq!(report.pushed, 1);
	let meta = h.store.get_meta("i:e.md", true).await.unwrap().unwrap();
	assert_eq!(meta.mtime, 7_100);
}

#[tokio::test]
async fn test_same_second_store_edit_is_pulled() {
	let h = harness();
	h.storage.insert("a.md", b"v1", 5_000);
	h.engine.scan(Direction::Safe).await.unwrap();

	let meta = h.store.get_meta("i:a.md", true).await.unwrap().unwrap();
	let mut edit = doc("a.md", b"remote edit", 5_500);
	edit.rev = Some(meta.rev);
	h.store.put(edit).await.unwrap();

	let report = h.engine.scan(Direction::Safe).await.unwrap();
	assert_eq!(report.pulled, 1);
	assert_eq!(report.pushed, 0);
	assert_eq!(h.storage.contents("a.md").unwrap(), b"remote edit");

	let again = h.engine.scan(Direction::Safe).await.unwrap();
	assert_eq!(again.transfers(), 0);
	assert_eq!(
		h.engine.pull("a.md", ReconcileOptions::default()).await.unwrap(),
		Outcome::Skipped(SkipReason::AlreadyProcessed)
	);

	// A storage edit within that same second still goes up
	h.storage.insert("a.md", b"local edit", 5_900);
	let report = h.engine.scan(Direction::Safe).await.unwrap();
	assert_eq!(report.pushed, 1);
	let meta = h.store.get_meta("i:a.md", true).await.unwrap().unwrap();
	let content = h.store.get_content("i:a.md", Some(&meta.rev)).await.unwrap().unwrap();
	assert_eq!(content.data, b"local edit");
}

#[tokio::test]
async fn test_sweep_isolates_failures() {
	let h = harness();
	h.storage.insert("good.md", b"ok", 1000);
	h.storage.insert("bad.md", b"broken", 1000);
	h.storage.fail_on("bad.md");

	let report = h.engine.scan(Direction::Push).await.unwrap();
	assert_eq!(report.pushed, 1);
	assert_eq!(report.errors.len(), 1);
	assert_eq!(report.errors[0].0, "bad.md");

	h.storage.heal("bad.md");
	let report = h.engine.scan(Direction::Push).await.unwrap();
	assert_eq!(report.pushed, 1);
	assert!(report.errors.is_empty());
}

#[tokio::test]
async fn test_sweep_skips_excluded_and_foreign() {
	let config = docsync::Config {
		exclude_patterns: vec![".trash/**".to_string()],
		..test_config()
	};
	let storage = Arc::new(MemoryStorage::new());
	let store = Arc::new(MemoryStore::new());
	let engine = EngineBuilder::new(storage.clone(), store.clone(), Arc::new(MemoryStateCache::new()))
		.config(config)
		.build()
		.unwrap();
	storage.insert(".trash/old.md", b"x", 1000);
	storage.insert("kept.md", b"y", 1000);
	let mut foreign = doc("elsewhere.md", b"z", 1000);
	foreign.id = "h:elsewhere.md".to_string();
	store.put(foreign).await.unwrap();

	let report = engine.scan(Direction::Safe).await.unwrap();
	assert_eq!(report.pushed, 1);
	assert!(store.get_meta("i:.trash/old.md", true).await.unwrap().is_none());
	assert!(storage.contents("elsewhere.md").is_none());
}

#[tokio::test]
async fn test_sweep_emits_start_and_completion() {
	let h = harness();
	h.storage.insert("a.md", b"a", 1000);
	let report = h.engine.scan(Direction::Push).await.unwrap();

	let events = h.events.events();
	assert!(matches!(events.first(), Some(SyncEvent::ScanStarted { direction: Direction::Push })));
	assert!(matches!(
		events.last(),
		Some(SyncEvent::ScanCompleted { direction: Direction::Push, report: r }) if *r == report
	));
}

#[tokio::test]
async fn test_concurrent_sweeps_do_not_duplicate_work() {
	let h = harness();
	for i in 0..10 {
		h.storage.insert(&format!("f{}.md", i), b"data", 1000);
	}
	let (a, b) = tokio::join!(h.engine.scan(Direction::Push), h.engine.scan(Direction::Push));
	a.unwrap();
	b.unwrap();
	assert_eq!(h.store.puts(), 10);
}

/// Storage wrapper that flags overlapping operations on the same path
struct OverlapDetector {
	inner: MemoryStorage,
	active: Mutex<HashMap<String, usize>>,
	overlapped: AtomicBool,
}

impl OverlapDetector {
	async fn guarded<T>(&self, path: &str, op: impl std::future::Future<Output = T>) -> T {
		{
			let mut active = self.active.lock().unwrap();
			let n = active.entry(path.to_string()).or_insert(0);
			*n += 1;
			if *n > 1 {
				self.overlapped.store(true, Ordering::SeqCst);
			}
		}
		tokio::time::sleep(Duration::from_millis(2)).await;
		let result = op.await;
		if let Some(n) = self.active.lock().unwrap().get_mut(path) {
			*n -= 1;
		}
		result
	}
}

#[async_trait]
impl Storage for OverlapDetector {
	async fn stat(&self, path: &str) -> Result<Option<StorageStat>, StorageError> {
		self.guarded(path, self.inner.stat(path)).await
	}

	async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
		self.guarded(path, self.inner.read(path)).await
	}

	async fn write(&self, path: &str, data: &[u8], times: FileTimes) -> Result<(), StorageError> {
		self.guarded(path, self.inner.write(path, data, times)).await
	}

	async fn remove(&self, path: &str) -> Result<bool, StorageError> {
		self.guarded(path, self.inner.remove(path)).await
	}

	async fn list(&self, dir: &str) -> Result<Listing, StorageError> {
		self.inner.list(dir).await
	}

	async fn ensure_parent_dirs(&self, path: &str) -> Result<(), StorageError> {
		self.inner.ensure_parent_dirs(path).await
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_path_operations_never_overlap() {
	let storage = Arc::new(OverlapDetector {
		inner: MemoryStorage::new(),
		active: Mutex::new(HashMap::new()),
		overlapped: AtomicBool::new(false),
	});
	let store = Arc::new(MemoryStore::new());
	let engine = Arc::new(
		EngineBuilder::new(storage.clone(), store.clone(), Arc::new(MemoryStateCache::new()))
			.config(test_config())
			.build()
			.unwrap(),
	);

	for round in 0..5u64 {
		storage.inner.insert("shared.md", format!("local {}", round).as_bytes(), 1000 + round);
		let mut remote = doc("shared.md", format!("remote {}", round).as_bytes(), 2000 + round);
		remote.rev = store.get_meta("i:shared.md", false).await.unwrap().map(|m| m.rev);
		store.put(remote).await.unwrap();

		let mut tasks = Vec::new();
		for i in 0..4 {
			let engine = engine.clone();
			tasks.push(tokio::spawn(async move {
				if i % 2 == 0 {
					let _ = engine.push("shared.md", ReconcileOptions::force()).await;
				} else {
					let _ = engine.pull("shared.md", ReconcileOptions::force()).await;
				}
			}));
		}
		for task in tasks {
			task.await.unwrap();
		}
	}
	assert!(!storage.overlapped.load(Ordering::SeqCst));
}

// vim: ts=4
