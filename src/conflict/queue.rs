//! Queue feeding the conflict pipeline, with idle tracking and cancellation
//!
//! A path is queued at most once at a time. The pending counter covers
//! queued paths as well as paths still inside either pipeline stage, so
//! `wait_idle` only returns once everything has drained.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

pub struct ConflictQueue {
	tx: mpsc::UnboundedSender<String>,
	rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
	queued: Mutex<HashSet<String>>,
	pending: watch::Sender<usize>,
	cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl Default for ConflictQueue {
	fn default() -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let (pending, _) = watch::channel(0);
		ConflictQueue {
			tx,
			rx: Mutex::new(Some(rx)),
			queued: Mutex::new(HashSet::new()),
			pending,
			cancels: Mutex::new(HashMap::new()),
		}
	}
}

impl ConflictQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queue `path` unless it is already waiting. Returns whether it was added.
	pub fn enqueue(&self, path: &str) -> bool {
		let Ok(mut queued) = self.queued.lock() else { return false };
		if !queued.insert(path.to_string()) {
			return false;
		}
		self.pending.send_modify(|n| *n += 1);
		if self.tx.send(path.to_string()).is_err() {
			queued.remove(path);
			self.complete();
			return false;
		}
		true
	}

	/// Receiver for the detection stage; only the first caller gets it
	pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<String>> {
		self.rx.lock().ok().and_then(|mut rx| rx.take())
	}

	/// The detection stage picked `path` up; it may be queued again from now on
	pub(crate) fn dequeued(&self, path: &str) {
		if let Ok(mut queued) = self.queued.lock() {
			queued.remove(path);
		}
	}

	/// One queued path has left the pipeline
	pub(crate) fn complete(&self) {
		self.pending.send_modify(|n| *n = n.saturating_sub(1));
	}

	pub fn pending(&self) -> usize {
		*self.pending.borrow()
	}

	pub fn is_queued(&self, path: &str) -> bool {
		self.queued.lock().map(|q| q.contains(path)).unwrap_or(false)
	}

	/// Resolves once no path is queued or being processed
	pub async fn wait_idle(&self) {
		let mut rx = self.pending.subscribe();
		let _ = rx.wait_for(|n| *n == 0).await;
	}

	/// Token raised by `cancel`, valid until `finish_cancel`
	pub(crate) fn register_cancel(&self, path: &str) -> watch::Receiver<bool> {
		let (tx, rx) = watch::channel(false);
		if let Ok(mut cancels) = self.cancels.lock() {
			cancels.insert(path.to_string(), tx);
		}
		rx
	}

	pub(crate) fn finish_cancel(&self, path: &str) {
		if let Ok(mut cancels) = self.cancels.lock() {
			cancels.remove(path);
		}
	}

	/// Abort a manual merge waiting on `path`. Returns whether one was waiting.
	pub fn cancel(&self, path: &str) -> bool {
		let Ok(cancels) = self.cancels.lock() else { return false };
		match cancels.get(path) {
			Some(tx) => {
				tx.send_replace(true);
				true
			}
			None => false,
		}
	}
}


// vim: ts=4
