//! Three-way structured merge for JSON documents
//!
//! Objects are merged key by key against the common ancestor. Any other value
//! (arrays included) is atomic: it merges only when one side left it as it was
//! in the ancestor, or both sides agree.

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Whether a path holds structured content the merge understands
pub fn is_structured(path: &str) -> bool {
	path.to_lowercase().ends_with(".json")
}

/// Merge `mine` and `theirs` against `base`.
///
/// Returns `Err` with the dotted paths of every key both sides changed
/// differently. A missing base is treated as an empty object.
pub fn merge_values(
	base: Option<&Value>,
	mine: &Value,
	theirs: &Value,
) -> Result<Value, Vec<String>> {
	let empty = Value::Object(Map::new());
	let base = base.unwrap_or(&empty);
	let mut conflicts = Vec::new();
	let merged = merge_slot(Some(base), Some(mine), Some(theirs), "", &mut conflicts);
	if !conflicts.is_empty() {
		return Err(conflicts);
	}
	Ok(merged.unwrap_or(Value::Null))
}

fn merge_slot(
	base: Option<&Value>,
	mine: Option<&Value>,
	theirs: Option<&Value>,
	at: &str,
	conflicts: &mut Vec<String>,
) -> Option<Value> {
	if mine == theirs {
		return mine.cloned();
	}
	if base == mine {
		return theirs.cloned();
	}
	if base == theirs {
		return mine.cloned();
	}
	match (mine, theirs) {
		(Some(Value::Object(m)), Some(Value::Object(t))) => {
			let b = match base {
				Some(Value::Object(b)) => Some(b),
				_ => None,
			};
			let mut out = Map::new();
			let mut seen = HashSet::new();
			let keys = m.keys().chain(t.keys()).chain(b.into_iter().flat_map(|b| b.keys()));
			for key in keys {
				if !seen.insert(key) {
					continue;
				}
				let child = if at.is_empty() { key.clone() } else { format!("{}.{}", at, key) };
				let value = merge_slot(
					b.and_then(|b| b.get(key)),
					m.get(key),
					t.get(key),
					&child,
					conflicts,
				);
				if let Some(value) = value {
					out.insert(key.clone(), value);
				}
			}
			Some(Value::Object(out))
		}
		_ => {
			conflicts.push(if at.is_empty() { "$".to_string() } else { at.to_string() });
			mine.cloned()
		}
	}
}

/// Merge raw JSON documents. `None` when any side does not parse or the
/// merge has conflicting keys.
pub fn merge_json(base: Option<&[u8]>, mine: &[u8], theirs: &[u8]) -> Option<Vec<u8>> {
	let mine: Value = serde_json::from_slice(mine).ok()?;
	let theirs: Value = serde_json::from_slice(theirs).ok()?;
	let base: Option<Value> = match base {
		Some(bytes) => Some(serde_json::from_slice(bytes).ok()?),
		None => None,
	};
	let merged = merge_values(base.as_ref(), &mine, &theirs).ok()?;
	serde_json::to_vec_pretty(&merged).ok()
}


// vim: ts=4
