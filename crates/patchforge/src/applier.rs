use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::registry::PatchDescriptor;
use crate::vcs::{DryRun, Vcs};
use crate::verify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AlreadySatisfied,
    Applied,
    Failed,
}

/// Per-patch, per-run outcome. Never persisted.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub patch_id: String,
    pub outcome: Outcome,
    pub diagnostic: Option<String>,
}

impl ApplyResult {
    fn new(patch_id: &str, outcome: Outcome, diagnostic: Option<String>) -> Self {
        Self {
            patch_id: patch_id.to_string(),
            outcome,
            diagnostic,
        }
    }
}

/// Applies one patch at a time, idempotently. The target tree is mutated in
/// exactly one place: the real apply after a clean dry run.
pub struct Applier<'a> {
    tree_root: &'a Path,
    patch_dir: &'a Path,
    vcs: &'a dyn Vcs,
    dry_run: bool,
}

impl<'a> Applier<'a> {
    pub fn new(tree_root: &'a Path, patch_dir: &'a Path, vcs: &'a dyn Vcs, dry_run: bool) -> Self {
        Self {
            tree_root,
            patch_dir,
            vcs,
            dry_run,
        }
    }

    pub fn artifact_path(&self, patch: &PatchDescriptor) -> PathBuf {
        self.patch_dir.join(patch.file.trim())
    }

    /// Verify -> dry-run -> apply -> re-verify. A `Failed` outcome is an
    /// answer, not an error; hard errors are reserved for a broken
    /// environment mid-run.
    pub fn apply(&self, patch: &PatchDescriptor) -> Result<ApplyResult> {
        let artifact = self.artifact_path(patch);
        if !artifact.is_file() {
            return Err(Error::environment(format!(
                "patch artifact for '{}' is missing: {}",
                patch.id,
                artifact.display()
            )));
        }

        if verify::patch_satisfied(self.tree_root, &patch.check_applied)? {
            return Ok(ApplyResult::new(
                &patch.id,
                Outcome::AlreadySatisfied,
                None,
            ));
        }

        match self.vcs.check_patch(self.tree_root, &artifact)? {
            DryRun::Clean => {
                if self.dry_run {
                    return Ok(ApplyResult::new(
                        &patch.id,
                        Outcome::Applied,
                        Some("dry run only, tree untouched".into()),
                    ));
                }
                if let Err(e) = self.vcs.apply_patch(self.tree_root, &artifact) {
                    return Ok(ApplyResult::new(
                        &patch.id,
                        Outcome::Failed,
                        Some(e.to_string()),
                    ));
                }
                if verify::patch_satisfied(self.tree_root, &patch.check_applied)? {
                    Ok(ApplyResult::new(&patch.id, Outcome::Applied, None))
                } else {
                    // The hunks landed but the declared content did not
                    // appear; the artifact no longer produces its contract.
                    Ok(ApplyResult::new(
                        &patch.id,
                        Outcome::Failed,
                        Some(
                            "patch applied cleanly but verification patterns are still missing \
                             (stale artifact?)"
                                .into(),
                        ),
                    ))
                }
            }
            DryRun::Rejected(diag) => {
                // The tree may already hold the change in a shape the dry run
                // rejects; idempotence wins over the rejection.
                if verify::patch_satisfied(self.tree_root, &patch.check_applied)? {
                    tracing::warn!(
                        patch = %patch.id,
                        "dry run rejected but verification passes; the artifact is stale or the \
                         verification patterns are too weak to catch a real mismatch ({diag})"
                    );
                    return Ok(ApplyResult::new(
                        &patch.id,
                        Outcome::AlreadySatisfied,
                        Some(diag),
                    ));
                }
                Ok(ApplyResult::new(&patch.id, Outcome::Failed, Some(diag)))
            }
        }
    }
}
