//! Conflict detection and resolution
//!
//! A path is conflicted while the store reports competing leaf revisions for
//! it. Each resolution step eliminates exactly one competitor, so repeated
//! steps drive the conflict set down to empty. Content reaches storage only
//! once no competitor is left.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::StoreDocument;

pub mod merge;
pub mod pipeline;
pub mod queue;
pub mod resolver;
pub mod rules;

pub use pipeline::ConflictPipeline;
pub use queue::ConflictQueue;
pub use rules::{ConflictRule, ConflictRuleSet, ResolutionStrategy};

/// Two competing revisions of one path, handed to the manual merger
#[derive(Debug, Clone)]
pub struct ManualRequest {
	pub path: String,
	pub id: String,
	/// The store's current winner
	pub current: StoreDocument,
	pub competitor: StoreDocument,
}

impl ManualRequest {
	pub fn current_rev(&self) -> &str {
		self.current.rev.as_deref().unwrap_or("")
	}

	pub fn competitor_rev(&self) -> &str {
		self.competitor.rev.as_deref().unwrap_or("")
	}
}

/// Answer of the manual merger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	/// Keep this revision, drop the other
	Keep(String),
	/// Replace both with this content
	Merged(Vec<u8>),
	/// Leave the conflict outstanding
	Cancelled,
}

/// Where one resolution step left a path
#[derive(Debug, Clone)]
pub enum ConflictStep {
	/// No competitor left; resolved content was extracted to storage
	Clear,
	/// One competitor eliminated, `remaining` still to go
	Progress { remaining: usize },
	/// Automatic strategies are exhausted for this pair
	Manual(ManualRequest),
	/// The document vanished or changed under us; nothing was done
	Stale,
}

/// External merge step, usually a user
#[async_trait]
pub trait ManualMerger: Send + Sync {
	async fn merge(&self, request: ManualRequest) -> Result<Resolution, SyncError>;
}

/// Merger that never decides, leaving every manual conflict for later
pub struct DeferMerger;

#[async_trait]
impl ManualMerger for DeferMerger {
	async fn merge(&self, _request: ManualRequest) -> Result<Resolution, SyncError> {
		Ok(Resolution::Cancelled)
	}
}

// vim: ts=4
