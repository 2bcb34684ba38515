//! Resolution steps for one conflicted path
//!
//! Each step looks at the store's winner and its newest competitor and
//! eliminates one of them:
//! 1. identical bytes: drop the competitor
//! 2. overwrite rule: newer wins
//! 3. manual rule: hand over to the manual merger
//! 4. otherwise structured merge for JSON, then newer wins or manual

use super::merge::{is_structured, merge_json};
use super::{ConflictStep, ManualMerger, ManualRequest, Resolution, ResolutionStrategy};
use crate::engine::Engine;
use crate::error::{ConflictError, SyncError};
use crate::events::SyncEvent;
use crate::logging::*;
use crate::types::{
	compare_mtime, now_millis, ReconcileOptions, StoreDocument, StoreRecord, TimeOrder,
};

impl Engine {
	/// Run one resolution step for `path`
	pub async fn resolve_step(&self, path: &str) -> Result<ConflictStep, SyncError> {
		let path = self.normalize_path(path)?;
		let _admission = self.admit(&path).await?;
		self.resolve_step_locked(&path).await
	}

	/// Resolve `path` completely, asking `merger` whenever automatic
	/// strategies run out. Returns `Manual` when the merger cancelled.
	pub async fn resolve_conflicts(
		&self,
		path: &str,
		merger: &dyn ManualMerger,
	) -> Result<ConflictStep, SyncError> {
		loop {
			match self.resolve_step(path).await? {
				ConflictStep::Progress { .. } => continue,
				ConflictStep::Manual(request) => {
					self.emit(SyncEvent::ManualMergeRequired { path: request.path.clone() });
					match merger.merge(request.clone()).await? {
						Resolution::Cancelled => {
							self.emit(SyncEvent::ManualMergeCancelled { path: request.path.clone() });
							return Ok(ConflictStep::Manual(request));
						}
						resolution => match self.apply_manual(&request, resolution).await? {
							ConflictStep::Progress { .. } | ConflictStep::Manual(_) => continue,
							done => return Ok(done),
						},
					}
				}
				done => return Ok(done),
			}
		}
	}

	async fn resolve_step_locked(&self, path: &str) -> Result<ConflictStep, SyncError> {
		let id = self.mapper.doc_id(path);
		let Some(meta) = self.store.get_meta(&id, true).await? else {
			debug!("{}: gone from the store, nothing to resolve", path);
			return Ok(ConflictStep::Stale);
		};
		let Some(competitor_rev) = meta.conflicts.first().cloned() else {
			return self.finish_locked(path).await;
		};
		self.emit(SyncEvent::ConflictDetected {
			path: path.to_string(),
			revisions: meta.conflicts.len() + 1,
		});

		let current = self.fetch_content(&id, Some(&meta.rev)).await?;
		let competitor = self.fetch_content(&id, Some(&competitor_rev)).await?;
		let (Some(current), Some(competitor)) = (current, competitor) else {
			debug!("{}: competing revision vanished before fetch", path);
			return Ok(ConflictStep::Stale);
		};

		if current.data == competitor.data {
			debug!("{}: competitor {} has identical content", path, competitor_rev);
			self.store.remove_revision(&id, &competitor_rev).await?;
			return self.after_elimination_locked(path).await;
		}

		match self.rules.strategy_for_path(path) {
			ResolutionStrategy::NewerWins => {
				self.newer_wins_locked(path, &current, &competitor).await
			}
			ResolutionStrategy::Manual => {
				Ok(ConflictStep::Manual(manual_request(path, &id, current, competitor)))
			}
			ResolutionStrategy::AutoMerge => {
				if is_structured(path) {
					let merged =
						self.structured_merge_locked(path, &meta, &current, &competitor).await?;
					if let Some(step) = merged {
						return Ok(step);
					}
				}
				if self.resolve_by_newer {
					self.newer_wins_locked(path, &current, &competitor).await
				} else {
					Ok(ConflictStep::Manual(manual_request(path, &id, current, competitor)))
				}
			}
		}
	}

	/// Three-way merge against the common ancestor. `None` when the merge
	/// does not apply.
	async fn structured_merge_locked(
		&self,
		path: &str,
		meta: &StoreRecord,
		current: &StoreDocument,
		competitor: &StoreDocument,
	) -> Result<Option<ConflictStep>, SyncError> {
		let id = &meta.id;
		let competitor_rev = competitor.rev.as_deref().unwrap_or_default();
		let ancestor = match self.store.common_ancestor(id, &meta.rev, competitor_rev).await? {
			Some(rev) => self.fetch_content(id, Some(&rev)).await?,
			None => None,
		};
		let base = ancestor.as_ref().filter(|a| !a.deleted).map(|a| a.data.as_slice());
		let Some(merged) = merge_json(base, &current.data, &competitor.data) else {
			debug!("{}: structured merge not applicable", path);
			return Ok(None);
		};

		self.put_merged_locked(path, meta, current, merged).await?;
		self.store.remove_revision(id, competitor_rev).await?;
		info!("Merged competing revision {} into {}", competitor_rev, path);
		Ok(Some(self.after_elimination_locked(path).await?))
	}

	/// Write `data` as the successor of the current winner
	async fn put_merged_locked(
		&self,
		path: &str,
		meta: &StoreRecord,
		current: &StoreDocument,
		data: Vec<u8>,
	) -> Result<String, SyncError> {
		let now = now_millis();
		let doc = StoreDocument {
			id: meta.id.clone(),
			path: path.to_string(),
			mtime: now,
			ctime: current.ctime,
			deleted: false,
			data,
			rev: Some(meta.rev.clone()),
		};
		Ok(self.store.put(doc).await?)
	}

	async fn newer_wins_locked(
		&self,
		path: &str,
		current: &StoreDocument,
		competitor: &StoreDocument,
	) -> Result<ConflictStep, SyncError> {
		let loser = match compare_mtime(current.mtime, competitor.mtime) {
			TimeOrder::TargetIsNew => current,
			TimeOrder::BaseIsNew | TimeOrder::Even => competitor,
		};
		let loser_rev = loser.rev.as_deref().unwrap_or_default();
		self.store.remove_revision(&current.id, loser_rev).await?;
		info!("{}: newer revision wins, dropped {}", path, loser_rev);
		self.after_elimination_locked(path).await
	}

	async fn after_elimination_locked(&self, path: &str) -> Result<ConflictStep, SyncError> {
		let meta = self.meta_after_write(&self.mapper.doc_id(path)).await?;
		if meta.has_conflicts() {
			self.emit(SyncEvent::ConflictProgress {
				path: path.to_string(),
				remaining: meta.conflicts.len(),
			});
			return Ok(ConflictStep::Progress { remaining: meta.conflicts.len() });
		}
		self.finish_locked(path).await
	}

	/// No competitor left: extract the resolved content to storage
	async fn finish_locked(&self, path: &str) -> Result<ConflictStep, SyncError> {
		let outcome = self.pull_locked(path, ReconcileOptions::default()).await?;
		debug!("{}: conflict clear, extraction {:?}", path, outcome);
		self.emit(SyncEvent::ConflictResolved { path: path.to_string() });
		Ok(ConflictStep::Clear)
	}

	/// Whether both revisions of `request` are still the ones competing
	pub(crate) async fn manual_is_current(&self, request: &ManualRequest) -> Result<bool, SyncError> {
		let meta = self.store.get_meta(&request.id, true).await?;
		Ok(meta
			.map(|m| {
				m.rev == request.current_rev()
					&& m.conflicts.iter().any(|r| r == request.competitor_rev())
			})
			.unwrap_or(false))
	}

	/// Apply the manual merger's answer. Revisions that moved while the
	/// merger was deciding are left alone.
	pub async fn apply_manual(
		&self,
		request: &ManualRequest,
		resolution: Resolution,
	) -> Result<ConflictStep, SyncError> {
		let _admission = self.admit(&request.path).await?;
		let path = request.path.as_str();
		let Some(meta) = self.store.get_meta(&request.id, true).await? else {
			return Ok(ConflictStep::Stale);
		};
		let current_rev = request.current_rev();
		let competitor_rev = request.competitor_rev();
		if meta.rev != current_rev || !meta.conflicts.iter().any(|r| r == competitor_rev) {
			debug!("{}: revisions moved during manual merge", path);
			if meta.has_conflicts() {
				return Ok(ConflictStep::Progress { remaining: meta.conflicts.len() });
			}
			return Ok(ConflictStep::Stale);
		}

		match resolution {
			Resolution::Keep(rev) if rev == current_rev => {
				self.store.remove_revision(&request.id, competitor_rev).await?;
			}
			Resolution::Keep(rev) if rev == competitor_rev => {
				self.store.remove_revision(&request.id, current_rev).await?;
			}
			Resolution::Keep(rev) => {
				return Err(ConflictError::InvalidChoice { path: path.to_string(), rev }.into());
			}
			Resolution::Merged(data) => {
				self.put_merged_locked(path, &meta, &request.current, data).await?;
				self.store.remove_revision(&request.id, competitor_rev).await?;
			}
			Resolution::Cancelled => return Ok(ConflictStep::Manual(request.clone())),
		}
		info!("{}: manual resolution applied", path);
		self.after_elimination_locked(path).await
	}

	/// Queue `path` again if it still has competing revisions
	pub(crate) async fn requeue_if_conflicted(&self, path: &str) -> Result<bool, SyncError> {
		let meta = self.store.get_meta(&self.mapper.doc_id(path), true).await?;
		if meta.map(|m| m.has_conflicts()).unwrap_or(false) {
			self.enqueue_conflict(path);
			return Ok(true);
		}
		Ok(false)
	}
}

fn manual_request(
	path: &str,
	id: &str,
	current: StoreDocument,
	competitor: StoreDocument,
) -> ManualRequest {
	ManualRequest { path: path.to_string(), id: id.to_string(), current, competitor }
}


// vim: ts=4
