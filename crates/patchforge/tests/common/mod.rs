//! Shared fixture for the driver-level integration tests: a temp workspace
//! with a registry document, a patch directory, a target tree, and a
//! scriptable fake VCS whose "patches" are `path|content` lines.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use patchforge::driver::{ReportEvent, ReportSink};
use patchforge::error::{Error, Result};
use patchforge::registry::Registry;
use patchforge::vcs::{DryRun, Vcs};
use tempfile::TempDir;

pub struct Fixture {
    dir: TempDir,
    pub config_path: PathBuf,
    pub tree_root: PathBuf,
    pub patch_dir: PathBuf,
}

pub const REGISTRY: &str = r##"
[categories.core]
name = "Core"
description = "Baseline fixes"

[categories.extras]
name = "Extras"
description = "Optional behavior"

[[patches]]
id = "alpha"
name = "Alpha"
file = "alpha.patch"
description = "Baseline define"
category = "core"

[patches.checkApplied]
type = "file-contains"
checks = [{ path = "src/alpha.h", patterns = ["#define ALPHA 1"] }]

[[patches]]
id = "bravo"
name = "Bravo"
file = "bravo.patch"
category = "core"
dependencies = ["alpha"]

[patches.checkApplied]
type = "file-contains"
checks = [{ path = "src/bravo.h", patterns = ["#define BRAVO 1"] }]

[[patches]]
id = "charlie"
name = "Charlie"
file = "charlie.patch"
category = "extras"
enabled = false
dependencies = ["alpha"]

[patches.checkApplied]
type = "file-contains"
checks = [{ path = "src/charlie.h", patterns = ["#define CHARLIE 1"] }]
"##;

impl Fixture {
    pub fn new() -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let tree_root = dir.path().join("upstream");
        let patch_dir = dir.path().join("patches");
        fs::create_dir_all(tree_root.join("src")).expect("tree dirs");
        fs::create_dir_all(&patch_dir).expect("patch dir");

        fs::write(
            patch_dir.join("alpha.patch"),
            "src/alpha.h|#define ALPHA 1\n",
        )
        .expect("alpha artifact");
        fs::write(
            patch_dir.join("bravo.patch"),
            "src/bravo.h|#define BRAVO 1\n",
        )
        .expect("bravo artifact");
        fs::write(
            patch_dir.join("charlie.patch"),
            "src/charlie.h|#define CHARLIE 1\n",
        )
        .expect("charlie artifact");

        let config_path = patch_dir.join("patches.toml");
        fs::write(&config_path, REGISTRY).expect("registry doc");

        Fixture {
            dir,
            config_path,
            tree_root,
            patch_dir,
        }
    }

    pub fn registry(&self) -> Registry {
        Registry::load(&self.config_path).expect("registry loads")
    }

    pub fn tree_file(&self, rel: &str) -> String {
        fs::read_to_string(self.tree_root.join(rel)).unwrap_or_default()
    }
}

/// Scriptable stand-in for git. Dry runs answer from `rejects`; a real apply
/// interprets each artifact line `rel/path|content` as "write that file".
#[derive(Default)]
pub struct FakeVcs {
    pub calls: RefCell<Vec<String>>,
    pub rejects: RefCell<BTreeMap<String, String>>,
    pub fail_apply: RefCell<BTreeSet<String>>,
    // artifact -> (rel path, content) written into the tree during the dry
    // run itself; simulates state changing under the applier's feet.
    pub write_on_check: RefCell<BTreeMap<String, (String, String)>>,
}

impl FakeVcs {
    pub fn reject(&self, artifact: &str, diagnostic: &str) {
        self.rejects
            .borrow_mut()
            .insert(artifact.into(), diagnostic.into());
    }

    pub fn write_on_check_of(&self, artifact: &str, rel: &str, content: &str) {
        self.write_on_check
            .borrow_mut()
            .insert(artifact.into(), (rel.into(), content.into()));
    }

    pub fn fail_apply_of(&self, artifact: &str) {
        self.fail_apply.borrow_mut().insert(artifact.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, what: &str, artifact: &Path) {
        let name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("<none>")
            .to_string();
        self.calls.borrow_mut().push(format!("{what}:{name}"));
    }

    fn artifact_name(artifact: &Path) -> String {
        artifact
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string()
    }
}

impl Vcs for FakeVcs {
    fn ensure_work_tree(&self, tree_root: &Path) -> Result<()> {
        if !tree_root.is_dir() {
            return Err(Error::environment(format!(
                "{} is not a working tree",
                tree_root.display()
            )));
        }
        Ok(())
    }

    fn check_patch(&self, tree_root: &Path, artifact: &Path) -> Result<DryRun> {
        self.record("check", artifact);
        let name = Self::artifact_name(artifact);
        if let Some((rel, content)) = self.write_on_check.borrow().get(&name) {
            let dest = tree_root.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| Error::environment(format!("mkdir {}: {e}", parent.display())))?;
            }
            fs::write(&dest, format!("{content}\n"))
                .map_err(|e| Error::environment(format!("write {}: {e}", dest.display())))?;
        }
        match self.rejects.borrow().get(&name) {
            Some(diag) => Ok(DryRun::Rejected(diag.clone())),
            None => Ok(DryRun::Clean),
        }
    }

    fn apply_patch(&self, tree_root: &Path, artifact: &Path) -> Result<()> {
        self.record("apply", artifact);
        let name = Self::artifact_name(artifact);
        if self.fail_apply.borrow().contains(&name) {
            return Err(Error::application(format!("scripted failure for {name}")));
        }
        let text = fs::read_to_string(artifact)
            .map_err(|e| Error::environment(format!("read {}: {e}", artifact.display())))?;
        for line in text.lines() {
            let Some((rel, content)) = line.split_once('|') else {
                continue;
            };
            let dest = tree_root.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| Error::environment(format!("mkdir {}: {e}", parent.display())))?;
            }
            fs::write(&dest, format!("{content}\n"))
                .map_err(|e| Error::environment(format!("write {}: {e}", dest.display())))?;
        }
        Ok(())
    }
}

/// Collects events instead of printing; tests assert against the stream.
#[derive(Default)]
pub struct VecSink {
    pub events: RefCell<Vec<ReportEvent>>,
}

impl ReportSink for VecSink {
    fn emit(&self, ev: ReportEvent) {
        self.events.borrow_mut().push(ev);
    }
}
