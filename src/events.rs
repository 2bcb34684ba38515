//! Outbound events emitted by the engine
//!
//! Events are delivered synchronously, at least once per occurrence, to an
//! `EventSink`. Anything slow (notifications, UI) belongs behind a channel
//! on the consumer side.

use std::sync::Mutex;

use crate::types::{Direction, Outcome, ScanReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
	/// A single path was reconciled
	Reconciled { path: String, outcome: Outcome },

	/// A path failed and will be retried on the next pass
	Failed { path: String, message: String },

	/// A full sweep started
	ScanStarted { direction: Direction },

	/// A full sweep finished, confirmation pass included
	ScanCompleted { direction: Direction, report: ScanReport },

	/// Competing revisions observed for a path
	ConflictDetected { path: String, revisions: usize },

	/// One competing revision was eliminated
	ConflictProgress { path: String, remaining: usize },

	/// No competing revisions remain
	ConflictResolved { path: String },

	/// Automatic strategies are exhausted; waiting on the manual merger
	ManualMergeRequired { path: String },

	/// The manual merger gave up or was cancelled
	ManualMergeCancelled { path: String },
}

/// Receiver of engine events
pub trait EventSink: Send + Sync {
	fn on_event(&self, _event: SyncEvent) {}
}

impl<T: Fn(SyncEvent) + Send + Sync> EventSink for T {
	fn on_event(&self, event: SyncEvent) {
		self(event);
	}
}

/// Sink that drops everything
pub struct NoEvents;

impl EventSink for NoEvents {}

/// Sink that keeps every event, for tests and reports
#[derive(Default)]
pub struct EventLog {
	events: Mutex<Vec<SyncEvent>>,
}

impl EventLog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn events(&self) -> Vec<SyncEvent> {
		self.events.lock().map(|e| e.clone()).unwrap_or_default()
	}

	pub fn count(&self, pred: impl Fn(&SyncEvent) -> bool) -> usize {
		self.events.lock().map(|e| e.iter().filter(|ev| pred(ev)).count()).unwrap_or(0)
	}
}

impl EventSink for EventLog {
	fn on_event(&self, event: SyncEvent) {
		if let Ok(mut events) = self.events.lock() {
			events.push(event);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	#[test]
	fn test_closure_sink() {
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();
		let sink = move |_e: SyncEvent| {
			counter.fetch_add(1, Ordering::SeqCst);
		};
		sink.on_event(SyncEvent::ConflictResolved { path: "a.json".into() });
		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_event_log_counts() {
		let log = EventLog::new();
		log.on_event(SyncEvent::ScanStarted { direction: Direction::Safe });
		log.on_event(SyncEvent::ConflictDetected { path: "a".into(), revisions: 2 });
		assert_eq!(log.count(|e| matches!(e, SyncEvent::ConflictDetected { .. })), 1);
		assert_eq!(log.events().len(), 2);
	}
}

// vim: ts=4
