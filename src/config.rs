//! Configuration for docsync
//!
//! Priority chain, lowest first:
//! 1. Built-in defaults (`Config::default()`)
//! 2. Config file (TOML)
//! 3. Environment variables (`DOCSYNC_*`)
//! 4. CLI flags

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::logging::LogFormat;
use crate::path::build_glob_set;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// RUNTIME & STATE
	// ========================================================================
	/// Home directory for docsync state (~/.docsync)
	pub state_dir: PathBuf,

	/// Profile name; each profile has its own cache and store snapshot
	pub profile: String,

	// ========================================================================
	// PATH IDENTITY
	// ========================================================================
	/// Prefix of store document ids owned by this engine
	pub namespace: String,

	/// Fold case when mapping paths. Fixed for the lifetime of a profile.
	pub case_insensitive: bool,

	/// Only these paths are synchronized (empty = everything)
	pub include_patterns: Vec<String>,

	/// Never synchronized, checked before includes
	pub exclude_patterns: Vec<String>,

	// ========================================================================
	// CONFLICT RESOLUTION
	// ========================================================================
	/// Paths resolved by newer-wins without attempting a merge
	pub overwrite_patterns: Vec<String>,

	/// Paths that always go to the manual merger
	pub manual_patterns: Vec<String>,

	/// When structured merge is not possible, let the newer revision win
	/// instead of asking the manual merger
	pub resolve_by_newer: bool,

	/// Detection stage workers
	pub conflict_concurrency: usize,

	// ========================================================================
	// CONCURRENCY & RETRIES
	// ========================================================================
	/// Reconciliations running at once, system-wide
	pub max_concurrency: usize,

	/// Attempts at fetching store content that is still arriving
	pub fetch_retries: u32,

	pub fetch_retry_delay_ms: u64,

	/// Interval of the safe sweep in `watch`
	pub scan_interval_secs: u64,

	// ========================================================================
	// LOGGING
	// ========================================================================
	pub log_level: String,

	pub log_format: LogFormat,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			state_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".docsync"))
				.unwrap_or_else(|| PathBuf::from(".docsync")),
			profile: "default".to_string(),

			namespace: "i:".to_string(),
			case_insensitive: false,
			include_patterns: vec![],
			exclude_patterns: vec![],

			overwrite_patterns: vec![],
			manual_patterns: vec![],
			resolve_by_newer: false,
			conflict_concurrency: 2,

			max_concurrency: 4,
			fetch_retries: 3,
			fetch_retry_delay_ms: 200,
			scan_interval_secs: 60,

			log_level: "info".to_string(),
			log_format: LogFormat::Text,
		}
	}
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, SyncError> {
	value.trim().parse().map_err(|_| SyncError::InvalidConfig {
		message: format!("{} has an invalid value: {}", name, value),
	})
}

impl Config {
	/// Defaults overlaid with the config file (when given) and the environment
	pub fn load(file: Option<&Path>) -> Result<Config, SyncError> {
		let mut config = match file {
			Some(path) => {
				let text = std::fs::read_to_string(path).map_err(|e| SyncError::InvalidConfig {
					message: format!("Cannot read {}: {}", path.display(), e),
				})?;
				Config::from_toml_str(&text)?
			}
			None => Config::default(),
		};
		config.apply_env(|name| std::env::var(name).ok())?;
		Ok(config)
	}

	pub fn from_toml_str(text: &str) -> Result<Config, SyncError> {
		toml::from_str(text).map_err(|e| SyncError::InvalidConfig { message: e.to_string() })
	}

	/// Apply `DOCSYNC_*` overrides read through `lookup`
	pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SyncError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(profile) = lookup("DOCSYNC_PROFILE") {
			self.profile = profile;
		}
		if let Some(dir) = lookup("DOCSYNC_STATE_DIR") {
			self.state_dir = PathBuf::from(dir);
		}
		if let Some(value) = lookup("DOCSYNC_CONCURRENCY") {
			self.max_concurrency = parse_env("DOCSYNC_CONCURRENCY", &value)?;
		}
		if let Some(level) = lookup("DOCSYNC_LOG_LEVEL") {
			self.log_level = level;
		}
		Ok(())
	}

	pub fn validate(&self) -> Result<(), SyncError> {
		let invalid = |message: &str| -> Result<(), SyncError> {
			Err(SyncError::InvalidConfig { message: message.to_string() })
		};
		if self.profile.trim().is_empty() {
			return invalid("profile must not be empty");
		}
		if self.profile.contains(['/', '\\']) {
			return invalid("profile must not contain path separators");
		}
		if self.max_concurrency == 0 {
			return invalid("maxConcurrency must be at least 1");
		}
		if self.conflict_concurrency == 0 {
			return invalid("conflictConcurrency must be at least 1");
		}
		for patterns in [
			&self.include_patterns,
			&self.exclude_patterns,
			&self.overwrite_patterns,
			&self.manual_patterns,
		] {
			build_glob_set(patterns)?;
		}
		Ok(())
	}

	pub fn profile_dir(&self) -> PathBuf {
		self.state_dir.join(&self.profile)
	}

	/// redb file holding the processed keys
	pub fn cache_path(&self) -> PathBuf {
		self.profile_dir().join("state.db")
	}

	/// JSON snapshot of the local document store
	pub fn store_path(&self) -> PathBuf {
		self.profile_dir().join("store.json")
	}
}


// vim: ts=4
