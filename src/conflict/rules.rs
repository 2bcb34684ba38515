//! Per-pattern conflict resolution rules

use globset::{Glob, GlobMatcher};

use crate::config::Config;
use crate::error::SyncError;

/// How a conflicted path is resolved once identical revisions are ruled out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
	/// Structured merge when the content allows it, then the configured fallback
	AutoMerge,
	/// The revision with the later modification time survives
	NewerWins,
	/// Straight to the manual merger
	Manual,
}

/// A resolution rule for paths matching a glob
#[derive(Debug, Clone)]
pub struct ConflictRule {
	pattern: String,
	matcher: GlobMatcher,
	strategy: ResolutionStrategy,
}

impl ConflictRule {
	/// Create a rule for `pattern` (e.g. `"**/*.css"`)
	pub fn new(pattern: &str, strategy: ResolutionStrategy) -> Result<Self, SyncError> {
		let glob = Glob::new(pattern).map_err(|e| SyncError::InvalidConfig {
			message: format!("Invalid glob pattern {}: {}", pattern, e),
		})?;
		Ok(ConflictRule { pattern: pattern.to_string(), matcher: glob.compile_matcher(), strategy })
	}

	pub fn matches(&self, path: &str) -> bool {
		self.matcher.is_match(path)
	}

	pub fn strategy(&self) -> ResolutionStrategy {
		self.strategy
	}

	pub fn pattern(&self) -> &str {
		&self.pattern
	}
}

/// Ordered rules; the first match wins
#[derive(Debug, Clone)]
pub struct ConflictRuleSet {
	rules: Vec<ConflictRule>,
	default_strategy: ResolutionStrategy,
}

impl ConflictRuleSet {
	pub fn new(default_strategy: ResolutionStrategy) -> Self {
		ConflictRuleSet { rules: Vec::new(), default_strategy }
	}

	/// Overwrite patterns take precedence over manual patterns
	pub fn from_config(config: &Config) -> Result<Self, SyncError> {
		let mut set = ConflictRuleSet::default();
		for pattern in &config.overwrite_patterns {
			set.add_rule(ConflictRule::new(pattern, ResolutionStrategy::NewerWins)?);
		}
		for pattern in &config.manual_patterns {
			set.add_rule(ConflictRule::new(pattern, ResolutionStrategy::Manual)?);
		}
		Ok(set)
	}

	pub fn add_rule(&mut self, rule: ConflictRule) {
		self.rules.push(rule);
	}

	pub fn strategy_for_path(&self, path: &str) -> ResolutionStrategy {
		self.rules
			.iter()
			.find(|rule| rule.matches(path))
			.map(|rule| rule.strategy())
			.unwrap_or(self.default_strategy)
	}

	pub fn rule_count(&self) -> usize {
		self.rules.len()
	}
}

impl Default for ConflictRuleSet {
	fn default() -> Self {
		Self::new(ResolutionStrategy::AutoMerge)
	}
}


// vim: ts=4
