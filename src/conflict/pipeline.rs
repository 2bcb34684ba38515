//! Two-stage conflict pipeline
//!
//! Stage one (detection) takes paths from the `ConflictQueue` and runs
//! automatic resolution steps, a few paths at a time. Pairs that need a
//! decision are passed over a channel to stage two, which asks the manual
//! merger about one path at a time. A manual wait is abandoned when the
//! path's cancel token is raised.

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use super::{ConflictStep, ManualMerger, ManualRequest, Resolution};
use crate::engine::Engine;
use crate::error::SyncError;
use crate::events::SyncEvent;
use crate::logging::*;

pub struct ConflictPipeline {
	detect: JoinHandle<()>,
	manual: JoinHandle<()>,
}

impl ConflictPipeline {
	/// Start both stages. Only one pipeline can run per engine.
	pub fn start(engine: Arc<Engine>, merger: Arc<dyn ManualMerger>) -> Result<Self, SyncError> {
		let mut queue = engine.conflicts.take_receiver().ok_or_else(|| SyncError::Other {
			message: "Conflict pipeline already started for this engine".to_string(),
		})?;
		let (manual_tx, manual_rx) = mpsc::channel::<ManualRequest>(1);
		let slots = Arc::new(Semaphore::new(engine.conflict_concurrency.max(1)));

		let detect = {
			let engine = engine.clone();
			tokio::spawn(async move {
				while let Some(path) = queue.recv().await {
					engine.conflicts.dequeued(&path);
					let Ok(permit) = slots.clone().acquire_owned().await else { break };
					let engine = engine.clone();
					let manual_tx = manual_tx.clone();
					tokio::spawn(async move {
						detect_path(&engine, &path, &manual_tx).await;
						drop(permit);
					});
				}
			})
		};
		let manual = tokio::spawn(manual_stage(engine, merger, manual_rx));

		Ok(ConflictPipeline { detect, manual })
	}

	/// Stop both stages; paths in flight are dropped and picked up again by
	/// the next scan
	pub fn shutdown(self) {
		self.detect.abort();
		self.manual.abort();
	}
}

async fn detect_path(engine: &Engine, path: &str, manual: &mpsc::Sender<ManualRequest>) {
	loop {
		match engine.resolve_step(path).await {
			Ok(ConflictStep::Progress { remaining }) => {
				debug!("{}: {} competing revisions left", path, remaining);
			}
			Ok(ConflictStep::Manual(request)) => {
				// Stage two completes this path
				if manual.send(request).await.is_ok() {
					return;
				}
				warn!("Manual merge stage is gone, leaving {} conflicted", path);
				break;
			}
			Ok(ConflictStep::Clear) | Ok(ConflictStep::Stale) => break,
			Err(e) => {
				warn!("Conflict resolution of {} failed: {}", path, e);
				engine.emit(SyncEvent::Failed { path: path.to_string(), message: e.to_string() });
				break;
			}
		}
	}
	engine.conflicts.complete();
}

async fn manual_stage(
	engine: Arc<Engine>,
	merger: Arc<dyn ManualMerger>,
	mut requests: mpsc::Receiver<ManualRequest>,
) {
	while let Some(request) = requests.recv().await {
		let path = request.path.clone();
		if let Err(e) = run_manual(&engine, merger.as_ref(), request).await {
			warn!("Manual merge of {} failed: {}", path, e);
			engine.emit(SyncEvent::Failed { path, message: e.to_string() });
		}
		engine.conflicts.complete();
	}
}

async fn run_manual(
	engine: &Engine,
	merger: &dyn ManualMerger,
	request: ManualRequest,
) -> Result<(), SyncError> {
	let path = request.path.clone();
	if !engine.manual_is_current(&request).await? {
		debug!("{}: conflict changed before manual merge, re-checking", path);
		engine.requeue_if_conflicted(&path).await?;
		return Ok(());
	}

	let mut cancel = engine.conflicts.register_cancel(&path);
	engine.emit(SyncEvent::ManualMergeRequired { path: path.clone() });
	let resolution = tokio::select! {
		resolution = merger.merge(request.clone()) => resolution,
		Ok(()) = async { cancel.wait_for(|cancelled| *cancelled).await.map(|_| ()) } => {
			Ok(Resolution::Cancelled)
		}
	};
	engine.conflicts.finish_cancel(&path);

	match resolution? {
		Resolution::Cancelled => {
			info!("Manual merge of {} cancelled, conflict left outstanding", path);
			engine.emit(SyncEvent::ManualMergeCancelled { path });
		}
		resolution => match engine.apply_manual(&request, resolution).await? {
			ConflictStep::Progress { .. } | ConflictStep::Manual(_) => {
				engine.requeue_if_conflicted(&path).await?;
			}
			ConflictStep::Clear | ConflictStep::Stale => {}
		},
	}
	Ok(())
}

// vim: ts=4
