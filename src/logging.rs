//! Logging prelude and subscriber setup
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("pushed {}", path);
//! ```
//!
//! Severity follows the failure class: stale metadata and skips are `debug`,
//! transfers are `info`, transient per-path failures are `warn`, refused
//! destructive actions are `error`.

use serde::{Deserialize, Serialize};

pub use tracing::{debug, error, info, warn};

/// Output format of the stderr subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

impl std::str::FromStr for LogFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"text" | "" => Ok(LogFormat::Text),
			"json" => Ok(LogFormat::Json),
			_ => Err(format!("Unknown log format: {}. Valid options: text, json", s)),
		}
	}
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set:
///
/// ```bash
/// RUST_LOG=docsync=debug docsync safe ./vault
/// RUST_LOG=docsync::conflict=trace docsync watch ./vault
/// ```
pub fn init_tracing(level: &str, format: LogFormat) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
	let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
	// try_init: a second initialisation (tests, embedding) is not an error
	let _ = match format {
		LogFormat::Text => builder.try_init(),
		LogFormat::Json => builder.json().try_init(),
	};
}


// vim: ts=4
