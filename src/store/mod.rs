//! Document store collaborator: the versioned, replicated side of sync
//!
//! Documents are addressed by id (see `PathMapper::doc_id`). Each document has
//! a revision tree; the store picks a winning revision and reports the other
//! live leaves as conflicts.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StoreError;
use crate::types::{StoreDocument, StoreRecord};

pub mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait DocumentStore: Send + Sync {
	/// Metadata of the winning revision, `None` when the id was never written
	async fn get_meta(
		&self,
		id: &str,
		include_conflicts: bool,
	) -> Result<Option<StoreRecord>, StoreError>;

	/// Full content of a revision, the winner when `rev` is `None`.
	///
	/// Fails with `StoreError::NotReady` while the content is still arriving.
	async fn get_content(
		&self,
		id: &str,
		rev: Option<&str>,
	) -> Result<Option<StoreDocument>, StoreError>;

	/// Write a new revision on top of `doc.rev` and return its id.
	///
	/// `doc.rev` must be the current winner (or `None` for a new document),
	/// otherwise `StoreError::RevisionConflict`.
	async fn put(&self, doc: StoreDocument) -> Result<String, StoreError>;

	/// Close a leaf revision so it no longer competes
	async fn remove_revision(&self, id: &str, rev: &str) -> Result<(), StoreError>;

	/// Winning records with `start <= id < end`, in id order, conflicts included
	fn find_range(&self, start: &str, end: &str) -> BoxStream<'_, Result<StoreRecord, StoreError>>;

	/// Nearest revision both `a` and `b` descend from
	async fn common_ancestor(&self, id: &str, a: &str, b: &str)
		-> Result<Option<String>, StoreError>;
}

// vim: ts=4
