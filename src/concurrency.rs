//! Per-path serialization, bounded admission and operation coalescing
//!
//! Lock order is always path lock first, then a pool slot. Nothing below
//! re-acquires a path lock it already holds.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use crate::error::SyncError;

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Named async locks, one per path key
#[derive(Default, Clone)]
pub struct PathLocks {
	locks: LockMap,
}

/// Guard that releases a path lock when dropped
pub struct PathLockGuard {
	key: String,
	guard: Option<OwnedMutexGuard<()>>,
	locks: LockMap,
}

impl PathLocks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Wait until no one else holds `key`
	pub async fn acquire(&self, key: &str) -> Result<PathLockGuard, SyncError> {
		let mutex = {
			let mut map = self.locks.lock().map_err(|e| SyncError::LockFailed {
				message: format!("path lock registry poisoned: {}", e),
			})?;
			map.entry(key.to_string()).or_default().clone()
		};
		let guard = mutex.lock_owned().await;
		Ok(PathLockGuard { key: key.to_string(), guard: Some(guard), locks: self.locks.clone() })
	}

	/// Number of paths currently locked or waited on
	pub fn active(&self) -> usize {
		self.locks.lock().map(|m| m.len()).unwrap_or(0)
	}
}

impl Drop for PathLockGuard {
	fn drop(&mut self) {
		drop(self.guard.take());
		if let Ok(mut map) = self.locks.lock() {
			// Only the registry holds it: nobody is waiting
			if map.get(&self.key).map(|m| Arc::strong_count(m) == 1).unwrap_or(false) {
				map.remove(&self.key);
			}
		}
	}
}

/// Fixed-size FIFO admission pool
#[derive(Clone)]
pub struct ConcurrencyPool {
	semaphore: Arc<Semaphore>,
	capacity: usize,
}

impl ConcurrencyPool {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		ConcurrencyPool { semaphore: Arc::new(Semaphore::new(capacity)), capacity }
	}

	/// Wait for a slot; waiters are served in arrival order
	pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, SyncError> {
		self.semaphore
			.clone()
			.acquire_owned()
			.await
			.map_err(|e| SyncError::LockFailed { message: format!("admission pool closed: {}", e) })
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn available(&self) -> usize {
		self.semaphore.available_permits()
	}
}

type Shared<T> = Option<Result<T, String>>;
type SlotMap<T> = Arc<Mutex<HashMap<String, watch::Receiver<Shared<T>>>>>;

/// Run-once-per-key: concurrent callers of the same key share one execution
pub struct Coalescer<T> {
	inflight: SlotMap<T>,
}

impl<T> Default for Coalescer<T> {
	fn default() -> Self {
		Coalescer { inflight: Arc::new(Mutex::new(HashMap::new())) }
	}
}

enum Role<T> {
	Leader(watch::Sender<Shared<T>>),
	Follower(watch::Receiver<Shared<T>>),
}

/// Removes the in-flight slot even if the leader is cancelled mid-run
struct SlotCleanup<T> {
	inflight: SlotMap<T>,
	key: String,
}

impl<T> Drop for SlotCleanup<T> {
	fn drop(&mut self) {
		if let Ok(mut map) = self.inflight.lock() {
			map.remove(&self.key);
		}
	}
}

impl<T: Clone> Coalescer<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Run `f` under `key`, or await the run already in flight
	pub async fn run<F, Fut>(&self, key: &str, f: F) -> Result<T, SyncError>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, SyncError>>,
	{
		let role = {
			let mut map = self.inflight.lock().map_err(|e| SyncError::LockFailed {
				message: format!("coalescer registry poisoned: {}", e),
			})?;
			match map.get(key) {
				Some(rx) => Role::Follower(rx.clone()),
				None => {
					let (tx, rx) = watch::channel(None);
					map.insert(key.to_string(), rx);
					Role::Leader(tx)
				}
			}
		};

		match role {
			Role::Leader(tx) => {
				let cleanup = SlotCleanup { inflight: self.inflight.clone(), key: key.to_string() };
				let result = f().await;
				let shared = match &result {
					Ok(value) => Ok(value.clone()),
					Err(e) => Err(e.to_string()),
				};
				let _ = tx.send(Some(shared));
				drop(cleanup);
				result
			}
			Role::Follower(mut rx) => {
				let shared = match rx.wait_for(|v| v.is_some()).await {
					Ok(value) => value.clone(),
					// Leader went away without a result
					Err(_) => None,
				};
				match shared {
					Some(Ok(value)) => Ok(value),
					Some(Err(message)) => {
						Err(SyncError::Coalesced { key: key.to_string(), message })
					}
					None => f().await,
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn test_same_path_is_serialized() {
		let locks = PathLocks::new();
		let inside = Arc::new(AtomicUsize::new(0));
		let max_inside = Arc::new(AtomicUsize::new(0));

		let mut tasks = Vec::new();
		for _ in 0..8 {
			let locks = locks.clone();
			let inside = inside.clone();
			let max_inside = max_inside.clone();
			tasks.push(tokio::spawn(async move {
				let _guard = locks.acquire("a.md").await.unwrap();
				let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
				max_inside.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(2)).await;
				inside.fetch_sub(1, Ordering::SeqCst);
			}));
		}
		for t in tasks {
			t.await.unwrap();
		}
		assert_eq!(max_inside.load(Ordering::SeqCst), 1);
		assert_eq!(locks.active(), 0);
	}

	#[tokio::test]
	async fn test_different_paths_do_not_block() {
		let locks = PathLocks::new();
		let _a = locks.acquire("a").await.unwrap();
		let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
		assert!(b.is_ok());
		assert_eq!(locks.active(), 2);
	}

	#[tokio::test]
	async fn test_pool_bounds_concurrency() {
		let pool = ConcurrencyPool::new(2);
		let p1 = pool.acquire().await.unwrap();
		let _p2 = pool.acquire().await.unwrap();
		assert_eq!(pool.available(), 0);
		let third = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
		assert!(third.is_err());
		drop(p1);
		assert!(pool.acquire().await.is_ok());
	}

	#[tokio::test]
	async fn test_coalescer_shares_inflight_result() {
		let coalescer: Arc<Coalescer<usize>> = Arc::new(Coalescer::new());
		let runs = Arc::new(AtomicUsize::new(0));

		let mut tasks = Vec::new();
		for _ in 0..4 {
			let coalescer = coalescer.clone();
			let runs = runs.clone();
			tasks.push(tokio::spawn(async move {
				coalescer
					.run("scan", || async {
						runs.fetch_add(1, Ordering::SeqCst);
						tokio::time::sleep(Duration::from_millis(30)).await;
						Ok(42)
					})
					.await
			}));
		}
		for t in tasks {
			assert_eq!(t.await.unwrap().unwrap(), 42);
		}
		assert_eq!(runs.load(Ordering::SeqCst), 1);
		assert!(coalescer.inflight.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_coalescer_runs_again_after_completion() {
		let coalescer: Coalescer<u32> = Coalescer::new();
		assert_eq!(coalescer.run("k", || async { Ok(1) }).await.unwrap(), 1);
		assert_eq!(coalescer.run("k", || async { Ok(2) }).await.unwrap(), 2);
	}
}

// vim: ts=4
