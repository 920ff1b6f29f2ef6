//! Best-practice rules loading.
//!
//! Rules are plain `.md`/`.txt` documents under a directory; they are
//! concatenated once at startup and appended to every specialist's
//! instructions.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

const RULE_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// Load and concatenate all rule documents under `rules_path`.
///
/// A missing directory is not an error: it yields `None` with a warning.
pub fn load_rules_text(rules_path: &Path) -> Result<Option<String>> {
    if !rules_path.exists() {
        warn!("Rules path does not exist: {}", rules_path.display());
        return Ok(None);
    }

    let mut blobs = Vec::new();
    for entry in WalkDir::new(rules_path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", rules_path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_rule = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| RULE_EXTENSIONS.contains(&ext));
        if !is_rule {
            continue;
        }

        match std::fs::read_to_string(entry.path()) {
            Ok(text) if !text.trim().is_empty() => blobs.push(text),
            Ok(_) => {}
            Err(e) => warn!("Failed to read rules file {}: {}", entry.path().display(), e),
        }
    }

    let joined = blobs.join("\n\n");
    debug!(
        "Loaded rules text from {} (chars={})",
        rules_path.display(),
        joined.len()
    );
    Ok((!joined.is_empty()).then_some(joined))
}

/// Merge loaded rules with free-form prompt overrides.
pub fn combine(rules: Option<String>, prompt_overrides: Option<&str>) -> Option<String> {
    let overrides = prompt_overrides.map(str::trim).filter(|s| !s.is_empty());
    match (rules, overrides) {
        (Some(r), Some(o)) => Some(format!("{}\n\n{}", r.trim(), o)),
        (Some(r), None) => Some(r),
        (None, Some(o)) => Some(o.to_string()),
        (None, None) => None,
    }
}
