//! Path identity: namespacing, case folding, validation and filtering
//!
//! Storage paths are relative, `/`-separated strings. Store documents are keyed
//! by the namespaced form of that path. Whether two paths differing only in case
//! are the same path is decided once per deployment by `case_insensitive`.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};

use crate::error::SyncError;

/// Suffix of temporary files written by `LocalStorage`; never synchronized
pub const TEMP_SUFFIX: &str = ".docsync-tmp";

/// Maps storage paths to store ids and cache keys
#[derive(Debug, Clone)]
pub struct PathMapper {
	prefix: String,
	case_insensitive: bool,
}

impl PathMapper {
	pub fn new(prefix: &str, case_insensitive: bool) -> Self {
		PathMapper { prefix: prefix.to_string(), case_insensitive }
	}

	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	pub fn case_insensitive(&self) -> bool {
		self.case_insensitive
	}

	fn fold(&self, path: &str) -> String {
		if self.case_insensitive {
			path.to_lowercase()
		} else {
			path.to_string()
		}
	}

	/// Store document id for a storage path
	pub fn doc_id(&self, path: &str) -> String {
		format!("{}{}", self.prefix, self.fold(path))
	}

	/// Key under which both processed keys and locks are held
	pub fn cache_key(&self, path: &str) -> String {
		self.fold(path)
	}

	/// Whether a store id belongs to this namespace
	pub fn owns(&self, id: &str) -> bool {
		id.starts_with(&self.prefix)
	}

	/// Inclusive start and exclusive end for a range scan over the namespace
	pub fn range(&self) -> (String, String) {
		(self.prefix.clone(), format!("{}{}", self.prefix, char::MAX))
	}
}

/// Normalize a storage path: forward slashes, no leading `./` or `/`
pub fn normalize(path: &str) -> Result<String, SyncError> {
	let replaced = path.replace('\\', "/");
	let trimmed = replaced.trim_start_matches("./").trim_start_matches('/');
	validate(trimmed)?;
	Ok(trimmed.to_string())
}

/// Reject empty paths and paths that could escape the storage root
pub fn validate(path: &str) -> Result<(), SyncError> {
	if path.is_empty() {
		return Err(SyncError::Other { message: "Empty path".to_string() });
	}
	let p = Path::new(path);
	if p.is_absolute() {
		return Err(SyncError::Other { message: format!("Path must be relative: {}", path) });
	}
	if p.components().any(|c| matches!(c, Component::ParentDir)) {
		return Err(SyncError::Other {
			message: format!("Path contains parent directory reference (..): {}", path),
		});
	}
	Ok(())
}

/// Include/exclude glob filter
pub struct PathFilter {
	include: Option<GlobSet>,
	exclude: GlobSet,
	always_exclude: GlobSet,
}

impl PathFilter {
	pub fn new(include: &[String], exclude: &[String]) -> Result<Self, SyncError> {
		let include = if include.is_empty() { None } else { Some(build_glob_set(include)?) };
		let always = vec![format!("**/*{}", TEMP_SUFFIX)];
		Ok(PathFilter {
			include,
			exclude: build_glob_set(exclude)?,
			always_exclude: build_glob_set(&always)?,
		})
	}

	/// Filter accepting every path except temporaries
	pub fn allow_all() -> Result<Self, SyncError> {
		Self::new(&[], &[])
	}

	pub fn is_allowed(&self, path: &str) -> bool {
		if self.always_exclude.is_match(path) || self.exclude.is_match(path) {
			return false;
		}
		match &self.include {
			Some(set) => set.is_match(path),
			None => true,
		}
	}
}

pub(crate) fn build_glob_set(patterns: &[String]) -> Result<GlobSet, SyncError> {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = Glob::new(pattern).map_err(|e| SyncError::InvalidConfig {
			message: format!("Invalid glob pattern {}: {}", pattern, e),
		})?;
		builder.add(glob);
	}
	builder.build().map_err(|e| SyncError::InvalidConfig {
		message: format!("Failed to build pattern set: {}", e),
	})
}


// vim: ts=4
