use std::fs;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Declarative "is this patch's effect present" contract carried by each
/// registry record. The type tag leaves room for other check families.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CheckApplied {
    FileContains { checks: Vec<ContentCheck> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCheck {
    pub path: String,
    pub patterns: Vec<String>,
}

/// Load-time validation: at least one check, paths stay under the tree
/// root, `regex:` patterns compile. Keeps pattern faults out of the apply
/// loop, where a mutation may already have happened.
pub fn validate_check(check: &CheckApplied) -> Result<()> {
    match check {
        CheckApplied::FileContains { checks } => {
            if checks.is_empty() {
                return Err(Error::config("checkApplied has no checks"));
            }
            for c in checks {
                validate_rel_path(&c.path)?;
                if c.patterns.is_empty() {
                    return Err(Error::config(format!(
                        "checkApplied entry for '{}' has no patterns",
                        c.path
                    )));
                }
                for pat in &c.patterns {
                    if let Some(expr) = pat.strip_prefix("regex:") {
                        regex::Regex::new(expr.trim()).map_err(|e| {
                            Error::config(format!("invalid verification pattern '{pat}': {e}"))
                        })?;
                    }
                }
            }
            Ok(())
        }
    }
}

/// A patch is satisfied only when every one of its checks is satisfied.
/// Read-only: never touches the tree beyond opening files.
pub fn patch_satisfied(tree_root: &Path, check: &CheckApplied) -> Result<bool> {
    match check {
        CheckApplied::FileContains { checks } => {
            for c in checks {
                if !content_check_satisfied(tree_root, c)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

fn content_check_satisfied(tree_root: &Path, check: &ContentCheck) -> Result<bool> {
    let rel = validate_rel_path(&check.path)?;
    let full = tree_root.join(rel);
    if !full.is_file() {
        return Ok(false);
    }
    let text = match fs::read_to_string(&full) {
        Ok(t) => t,
        Err(e) => {
            // Unreadable counts as unsatisfied, not as a hard failure.
            tracing::warn!("verification could not read {}: {e}", full.display());
            return Ok(false);
        }
    };
    for pat in &check.patterns {
        if !pattern_matches(&text, pat)? {
            return Ok(false);
        }
    }
    Ok(true)
}

// Plain substring by default; a `regex:` prefix opts into regex matching.
fn pattern_matches(text: &str, pattern: &str) -> Result<bool> {
    if let Some(expr) = pattern.strip_prefix("regex:") {
        let re = regex::Regex::new(expr.trim()).map_err(|e| {
            Error::config(format!("invalid verification pattern '{pattern}': {e}"))
        })?;
        return Ok(re.is_match(text));
    }
    Ok(text.contains(pattern))
}

// Check paths must stay under the tree root.
fn validate_rel_path(p: &str) -> Result<&str> {
    let path = p.trim();
    if path.is_empty() {
        return Err(Error::config("verification check path is empty"));
    }
    let pb = Path::new(path);
    if pb.is_absolute() {
        return Err(Error::config(format!(
            "verification check path '{}' must be relative to the tree root",
            path
        )));
    }
    if pb.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::config(format!(
            "verification check path '{}' contains '..'",
            path
        )));
    }
    Ok(path)
}
