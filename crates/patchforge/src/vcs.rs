use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};

/// Outcome of a dry-run validation. A rejection is a normal answer, not a
/// process error; the diagnostic is the tool's own explanation.
#[derive(Debug, Clone)]
pub enum DryRun {
    Clean,
    Rejected(String),
}

/// The version-control capability the applier consumes. Kept behind a trait
/// so tests can script outcomes without a git checkout.
pub trait Vcs {
    /// Errors when `tree_root` is not a working tree.
    fn ensure_work_tree(&self, tree_root: &Path) -> Result<()>;
    /// Check whether the artifact's hunks would apply cleanly. Never mutates.
    fn check_patch(&self, tree_root: &Path, artifact: &Path) -> Result<DryRun>;
    /// Apply the artifact for real. All-or-nothing per artifact.
    fn apply_patch(&self, tree_root: &Path, artifact: &Path) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct GitVcs;

impl Vcs for GitVcs {
    fn ensure_work_tree(&self, tree_root: &Path) -> Result<()> {
        if !tree_root.is_dir() {
            return Err(Error::environment(format!(
                "target tree {} does not exist",
                tree_root.display()
            )));
        }
        let out = git(tree_root)
            .args(["rev-parse", "--is-inside-work-tree"])
            .output()
            .map_err(|e| Error::environment(format!("failed to run git: {e}")))?;
        if !out.status.success() {
            return Err(Error::environment(format!(
                "{} is not a git working tree: {}",
                tree_root.display(),
                diagnostic_text(&out.stderr)
            )));
        }
        Ok(())
    }

    fn check_patch(&self, tree_root: &Path, artifact: &Path) -> Result<DryRun> {
        let out = git(tree_root)
            .args(["apply", "--check"])
            .arg(artifact)
            .output()
            .map_err(|e| Error::environment(format!("failed to run git apply --check: {e}")))?;
        if out.status.success() {
            Ok(DryRun::Clean)
        } else {
            Ok(DryRun::Rejected(diagnostic_text(&out.stderr)))
        }
    }

    fn apply_patch(&self, tree_root: &Path, artifact: &Path) -> Result<()> {
        let out = git(tree_root)
            .args(["apply", "--whitespace=nowarn"])
            .arg(artifact)
            .output()
            .map_err(|e| Error::environment(format!("failed to run git apply: {e}")))?;
        if !out.status.success() {
            return Err(Error::application(format!(
                "git apply {} failed: {}",
                artifact.display(),
                diagnostic_text(&out.stderr)
            )));
        }
        Ok(())
    }
}

fn git(tree_root: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(tree_root);
    cmd
}

const MAX_DIAGNOSTIC_CHARS: usize = 2048;

// Subprocess stderr gets embedded into diagnostics and log files; fold the
// lines together and strip anything that could mangle a terminal.
pub fn diagnostic_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut out = String::with_capacity(text.len().min(MAX_DIAGNOSTIC_CHARS));
    let mut last_was_sep = true;
    for c in text.chars() {
        if out.len() >= MAX_DIAGNOSTIC_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
        if c == '\n' || c == '\r' {
            if !last_was_sep {
                out.push_str("; ");
                last_was_sep = true;
            }
            continue;
        }
        if c == '\t' {
            out.push(' ');
        } else if c.is_control() {
            continue;
        } else {
            out.push(c);
        }
        last_was_sep = false;
    }
    out.trim_end_matches([' ', ';']).to_string()
}
