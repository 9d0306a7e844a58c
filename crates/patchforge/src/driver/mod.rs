use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

use crate::applier::{Applier, ApplyResult, Outcome};
use crate::error::{Error, Result};
use crate::registry::{Registry, ToggleOutcome};
use crate::resolver;
use crate::vcs::Vcs;
use crate::verify;

#[derive(Debug, Clone)]
pub enum ReportEvent {
    PatchStarted {
        id: String,
        dry_run: bool,
    },
    PatchFinished {
        id: String,
        outcome: Outcome,
        diagnostic: Option<String>,
    },
    Note {
        line: String,
    },
    RunDone {
        ok: bool,
    },
}

pub trait ReportSink {
    fn emit(&self, ev: ReportEvent);
}

#[derive(Default)]
struct StdoutState {
    applied: usize,
    already: usize,
    failed: usize,
    failed_ids: Vec<String>,
    error_logs_dir: Option<PathBuf>,
    error_log_paths: Vec<PathBuf>,
}

/// Terse operator-facing progress on stdout, a `SUMMARY:` block at the end,
/// and one log file per failed patch.
pub struct StdoutSink {
    log_dir: Option<PathBuf>,
    state: Mutex<StdoutState>,
}

impl StdoutSink {
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self {
            log_dir,
            state: Mutex::new(StdoutState::default()),
        }
    }
}

impl ReportSink for StdoutSink {
    fn emit(&self, ev: ReportEvent) {
        match ev {
            ReportEvent::PatchStarted { id, dry_run } => {
                if dry_run {
                    println!("CHECK: {id}");
                } else {
                    println!("APPLY: {id}");
                }
            }
            ReportEvent::PatchFinished {
                id,
                outcome,
                diagnostic,
            } => {
                let mut written_log = None::<PathBuf>;
                if let Ok(mut s) = self.state.lock() {
                    match outcome {
                        Outcome::Applied => s.applied += 1,
                        Outcome::AlreadySatisfied => s.already += 1,
                        Outcome::Failed => {
                            s.failed += 1;
                            s.failed_ids.push(id.clone());
                            if let Some(dir) = self.log_dir.as_deref() {
                                match write_failure_log(&mut s, dir, &id, diagnostic.as_deref()) {
                                    Ok(path) => written_log = Some(path),
                                    Err(e) => {
                                        println!("WARN: failed to write failure log for {id}: {e}")
                                    }
                                }
                            }
                        }
                    }
                }
                match outcome {
                    Outcome::Applied => println!("DONE: {id}"),
                    Outcome::AlreadySatisfied => println!("SKIP: {id} (already satisfied)"),
                    Outcome::Failed => {
                        println!("FAIL: {id} {}", diagnostic.unwrap_or_default())
                    }
                }
                if let Some(path) = written_log {
                    println!("ERROR_LOG: {id} => {}", path.display());
                }
            }
            ReportEvent::Note { line } => println!("{line}"),
            ReportEvent::RunDone { ok } => {
                if let Ok(mut s) = self.state.lock() {
                    println!("SUMMARY:");
                    println!("  status: {}", if ok { "ok" } else { "failed" });
                    println!(
                        "  patches: applied={} already-satisfied={} failed={}",
                        s.applied, s.already, s.failed
                    );
                    if !s.failed_ids.is_empty() {
                        println!("  failed_patches: {}", s.failed_ids.join(", "));
                    }
                    for p in &s.error_log_paths {
                        println!("  error_log: {}", p.display());
                    }
                    *s = StdoutState::default();
                }
            }
        }
    }
}

fn write_failure_log(
    state: &mut StdoutState,
    log_dir: &Path,
    patch_id: &str,
    diagnostic: Option<&str>,
) -> Result<PathBuf> {
    let dir = match state.error_logs_dir.as_ref() {
        Some(d) => d.clone(),
        None => {
            let d = log_dir.join(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
            fs::create_dir_all(&d).map_err(|e| {
                Error::environment(format!("failed to create log dir {}: {e}", d.display()))
            })?;
            state.error_logs_dir = Some(d.clone());
            d
        }
    };

    let path = dir.join(format!("{}.log", sanitize_filename_component(patch_id)));
    let mut body = format!("patch: {patch_id}\nstatus: failed\n");
    if let Some(d) = diagnostic
        && !d.trim().is_empty()
    {
        body.push_str(&format!("diagnostic: {d}\n"));
    }
    fs::write(&path, body).map_err(|e| {
        Error::environment(format!("failed to write {}: {e}", path.display()))
    })?;
    state.error_log_paths.push(path.clone());
    Ok(path)
}

fn sanitize_filename_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() { "patch".into() } else { out }
}

/// How the `apply` operation picks its root set; everything named here is a
/// root request, prerequisites join through the resolver.
#[derive(Debug, Clone, Default)]
pub struct ApplySelection {
    /// Explicit ids; the force path for disabled patches.
    pub patches: Vec<String>,
    pub category: Option<String>,
    /// Every declared patch, enabled or not.
    pub all: bool,
    /// Validate only; the tree is never mutated.
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub results: Vec<ApplyResult>,
}

impl RunOutcome {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Failed)
            .map(|r| r.patch_id.as_str())
            .collect()
    }

    pub fn ok(&self) -> bool {
        self.failed_ids().is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct PatchStatus {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub applied: bool,
}

#[derive(Debug, Serialize)]
pub struct CategoryStatus {
    pub key: String,
    pub name: String,
    pub patches: Vec<PatchStatus>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub categories: Vec<CategoryStatus>,
    /// `*.patch` files on disk that no registry record references.
    pub orphaned_artifacts: Vec<String>,
}

impl StatusReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for cat in &self.categories {
            out.push_str(&format!("{} ({})\n", cat.name, cat.key));
            for p in &cat.patches {
                out.push_str(&format!(
                    "  [{}] {:<24} {}\n",
                    if p.enabled { "x" } else { " " },
                    p.id,
                    if p.applied { "applied" } else { "not applied" }
                ));
            }
        }
        if !self.orphaned_artifacts.is_empty() {
            out.push_str("orphaned artifacts (not referenced by any patch):\n");
            for a in &self.orphaned_artifacts {
                out.push_str(&format!("  {a}\n"));
            }
        }
        out
    }
}

#[derive(Debug, Serialize)]
pub struct PatchListing {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CategoryListing {
    pub key: String,
    pub name: String,
    pub patches: Vec<PatchListing>,
}

#[derive(Debug, Serialize)]
pub struct ListReport {
    pub categories: Vec<CategoryListing>,
}

impl ListReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for cat in &self.categories {
            out.push_str(&format!("{} ({})\n", cat.name, cat.key));
            for p in &cat.patches {
                out.push_str(&format!(
                    "  [{}] {:<24} {}\n",
                    if p.enabled { "x" } else { " " },
                    p.id,
                    p.name
                ));
                if !p.dependencies.is_empty() {
                    out.push_str(&format!("      after: {}\n", p.dependencies.join(", ")));
                }
            }
        }
        out
    }
}

/// Ties registry, resolver, applier, and verifier together for one
/// invocation. All roots are explicit; nothing resolves against the
/// process working directory.
pub struct Driver<'a> {
    registry: Registry,
    tree_root: PathBuf,
    patch_dir: PathBuf,
    vcs: &'a dyn Vcs,
    sink: &'a dyn ReportSink,
}

impl<'a> Driver<'a> {
    pub fn new(
        registry: Registry,
        tree_root: PathBuf,
        patch_dir: PathBuf,
        vcs: &'a dyn Vcs,
        sink: &'a dyn ReportSink,
    ) -> Self {
        Self {
            registry,
            tree_root,
            patch_dir,
            vcs,
            sink,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve the selection and apply in order, one patch at a time. A
    /// failed patch never stops later, independent patches; configuration
    /// and environment faults abort before any mutation.
    pub fn apply(&self, sel: &ApplySelection) -> Result<RunOutcome> {
        let requested = self.requested_ids(sel)?;
        let order = resolver::resolve(&self.registry, &requested)?;
        tracing::debug!(?requested, ?order, "resolved apply order");
        if order.is_empty() {
            self.sink.emit(ReportEvent::Note {
                line: "nothing to apply".into(),
            });
            self.sink.emit(ReportEvent::RunDone { ok: true });
            return Ok(RunOutcome {
                results: Vec::new(),
            });
        }

        self.vcs.ensure_work_tree(&self.tree_root)?;

        let applier = Applier::new(&self.tree_root, &self.patch_dir, self.vcs, sel.dry_run);

        // Preflight every artifact so a missing file aborts the whole run
        // before the first hunk lands.
        for id in &order {
            let patch = self.patch(id)?;
            let artifact = applier.artifact_path(patch);
            if !artifact.is_file() {
                return Err(Error::environment(format!(
                    "patch artifact for '{id}' is missing: {}",
                    artifact.display()
                )));
            }
        }

        let mut results = Vec::with_capacity(order.len());
        for id in &order {
            let patch = self.patch(id)?;
            self.sink.emit(ReportEvent::PatchStarted {
                id: id.clone(),
                dry_run: sel.dry_run,
            });
            let res = applier.apply(patch)?;
            self.sink.emit(ReportEvent::PatchFinished {
                id: id.clone(),
                outcome: res.outcome,
                diagnostic: res.diagnostic.clone(),
            });
            results.push(res);
        }

        let outcome = RunOutcome { results };
        self.sink.emit(ReportEvent::RunDone { ok: outcome.ok() });
        Ok(outcome)
    }

    /// Union of the explicit selection, the category filter, and the
    /// defaults: all enabled ids when nothing narrows the set, every id
    /// under `--all`. Order-preserving, first mention wins.
    fn requested_ids(&self, sel: &ApplySelection) -> Result<Vec<String>> {
        let mut requested: Vec<String> = Vec::new();
        let mut seen = BTreeSet::new();
        let mut push = |id: String, requested: &mut Vec<String>| {
            if seen.insert(id.clone()) {
                requested.push(id);
            }
        };

        for id in &sel.patches {
            if !self.registry.contains(id) {
                return Err(Error::config(format!("unknown patch id '{id}'")));
            }
            push(id.clone(), &mut requested);
        }
        if let Some(cat) = sel.category.as_deref() {
            for id in self.registry.enabled_ids_in_category(cat)? {
                push(id, &mut requested);
            }
        }
        if sel.all {
            for id in self.registry.all_ids() {
                push(id, &mut requested);
            }
        }
        if sel.patches.is_empty() && sel.category.is_none() && !sel.all {
            for id in self.registry.enabled_ids() {
                push(id, &mut requested);
            }
        }
        Ok(requested)
    }

    /// Read-only view: enabled flag plus a live verification probe per
    /// patch, grouped by category, plus unreferenced artifacts on disk.
    pub fn status(&self, category: Option<&str>) -> Result<StatusReport> {
        let mut categories = Vec::new();
        for (key, cat) in self.filtered_categories(category)? {
            let mut patches = Vec::new();
            for p in self.registry.patches().iter().filter(|p| p.category == *key) {
                patches.push(PatchStatus {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    enabled: p.enabled,
                    applied: verify::patch_satisfied(&self.tree_root, &p.check_applied)?,
                });
            }
            categories.push(CategoryStatus {
                key: key.clone(),
                name: cat.name.clone(),
                patches,
            });
        }
        Ok(StatusReport {
            categories,
            orphaned_artifacts: self.orphaned_artifacts(),
        })
    }

    pub fn list(&self, category: Option<&str>) -> Result<ListReport> {
        let mut categories = Vec::new();
        for (key, cat) in self.filtered_categories(category)? {
            let mut patches = Vec::new();
            for p in self.registry.patches().iter().filter(|p| p.category == *key) {
                patches.push(PatchListing {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    description: p.description.clone(),
                    enabled: p.enabled,
                    dependencies: p.dependencies.clone(),
                });
            }
            categories.push(CategoryListing {
                key: key.clone(),
                name: cat.name.clone(),
                patches,
            });
        }
        Ok(ListReport { categories })
    }

    /// Flip the flag and persist; a no-op state is reported, not saved.
    pub fn enable(&mut self, id: &str) -> Result<ToggleOutcome> {
        let outcome = self.registry.enable(id)?;
        if outcome == ToggleOutcome::Changed {
            self.registry.save()?;
        }
        Ok(outcome)
    }

    pub fn disable(&mut self, id: &str) -> Result<ToggleOutcome> {
        let outcome = self.registry.disable(id)?;
        if outcome == ToggleOutcome::Changed {
            self.registry.save()?;
        }
        Ok(outcome)
    }

    fn patch(&self, id: &str) -> Result<&crate::registry::PatchDescriptor> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::config(format!("unknown patch id '{id}'")))
    }

    fn filtered_categories(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<(&String, &crate::registry::CategoryDescriptor)>> {
        if let Some(cat) = category {
            self.registry.ensure_category(cat)?;
        }
        Ok(self
            .registry
            .categories()
            .iter()
            .filter(|(key, _)| category.is_none_or(|c| c == key.as_str()))
            .collect())
    }

    fn orphaned_artifacts(&self) -> Vec<String> {
        if !self.patch_dir.is_dir() {
            return Vec::new();
        }
        let referenced: BTreeSet<&str> = self
            .registry
            .patches()
            .iter()
            .map(|p| p.file.trim())
            .collect();
        let mut orphans = Vec::new();
        for entry in walkdir::WalkDir::new(&self.patch_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("patch") {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.patch_dir) else {
                continue;
            };
            let rel = rel.to_string_lossy();
            if !referenced.contains(rel.as_ref()) {
                orphans.push(rel.into_owned());
            }
        }
        orphans.sort();
        orphans
    }
}
