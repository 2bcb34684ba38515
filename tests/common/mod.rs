//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use docsync::events::{EventLog, SyncEvent};
use docsync::types::StoreDocument;
use docsync::{Config, Engine, EngineBuilder, MemoryStateCache, MemoryStorage, MemoryStore};

pub struct Harness {
	pub engine: Arc<Engine>,
	pub storage: Arc<MemoryStorage>,
	pub store: Arc<MemoryStore>,
	pub events: Arc<EventLog>,
}

/// Defaults tuned for tests: short fetch retries
pub fn test_config() -> Config {
	Config { fetch_retry_delay_ms: 1, ..Config::default() }
}

pub fn harness() -> Harness {
	harness_with(test_config())
}

pub fn harness_with(config: Config) -> Harness {
	let storage = Arc::new(MemoryStorage::new());
	let store = Arc::new(MemoryStore::new());
	let events = Arc::new(EventLog::new());
	let engine = EngineBuilder::new(storage.clone(), store.clone(), Arc::new(MemoryStateCache::new()))
		.config(config)
		.events(events.clone())
		.build()
		.unwrap();
	Harness { engine: Arc::new(engine), storage, store, events }
}

pub fn doc(path: &str, data: &[u8], mtime: u64) -> StoreDocument {
	StoreDocument {
		id: format!("i:{}", path),
		path: path.to_string(),
		mtime,
		ctime: mtime,
		deleted: false,
		data: data.to_vec(),
		rev: None,
	}
}

/// Poll `events` until `pred` matched once, or give up after two seconds
pub async fn wait_for_event(events: &EventLog, pred: impl Fn(&SyncEvent) -> bool) -> bool {
	for _ in 0..200 {
		if events.count(&pred) > 0 {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	false
}

// vim: ts=4
