use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::verify::CheckApplied;

fn default_true() -> bool {
    true
}

/// One patch record as it appears in the registry document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchDescriptor {
    pub id: String,
    pub name: String,
    /// Artifact filename, relative to the patch directory.
    pub file: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(rename = "checkApplied")]
    pub check_applied: CheckApplied,
}

/// Grouping metadata only; no behavior hangs off a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryDoc {
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryDescriptor>,
    #[serde(default)]
    pub patches: Vec<PatchDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Changed,
    AlreadySet,
}

/// In-memory snapshot of the registry document. Loaded once per invocation;
/// `enable`/`disable` mutate the snapshot and `save` replaces the document
/// atomically. Nothing else writes.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
    doc: RegistryDoc,
    index: BTreeMap<String, usize>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            Error::environment(format!("failed to read registry {}: {e}", path.display()))
        })?;
        let doc: RegistryDoc = toml::from_str(&data).map_err(|e| {
            Error::environment(format!("TOML parse error in {}: {e}", path.display()))
        })?;
        Self::from_doc(path.to_path_buf(), doc)
    }

    pub fn from_doc(path: PathBuf, doc: RegistryDoc) -> Result<Self> {
        let index = validate(&doc)?;
        Ok(Self { path, doc, index })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn patches(&self) -> &[PatchDescriptor] {
        &self.doc.patches
    }

    pub fn categories(&self) -> &BTreeMap<String, CategoryDescriptor> {
        &self.doc.categories
    }

    pub fn get(&self, id: &str) -> Option<&PatchDescriptor> {
        self.index.get(id).map(|&i| &self.doc.patches[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Declaration-order ids of every enabled patch.
    pub fn enabled_ids(&self) -> Vec<String> {
        self.doc
            .patches
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.doc.patches.iter().map(|p| p.id.clone()).collect()
    }

    /// Declaration-order ids of the enabled patches in one category.
    pub fn enabled_ids_in_category(&self, category: &str) -> Result<Vec<String>> {
        self.ensure_category(category)?;
        Ok(self
            .doc
            .patches
            .iter()
            .filter(|p| p.enabled && p.category == category)
            .map(|p| p.id.clone())
            .collect())
    }

    pub fn ensure_category(&self, category: &str) -> Result<()> {
        if self.doc.categories.contains_key(category) {
            return Ok(());
        }
        let known = self
            .doc
            .categories
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::config(format!(
            "unknown category '{category}' (known: {known})"
        )))
    }

    pub fn enable(&mut self, id: &str) -> Result<ToggleOutcome> {
        let idx = self.index_of(id)?;
        if self.doc.patches[idx].enabled {
            return Ok(ToggleOutcome::AlreadySet);
        }
        self.doc.patches[idx].enabled = true;
        Ok(ToggleOutcome::Changed)
    }

    /// Refused while any currently-enabled patch still depends on `id`;
    /// enabling cascades freely, disabling must not break a dependent.
    pub fn disable(&mut self, id: &str) -> Result<ToggleOutcome> {
        let idx = self.index_of(id)?;
        if !self.doc.patches[idx].enabled {
            return Ok(ToggleOutcome::AlreadySet);
        }
        let dependents: Vec<&str> = self
            .doc
            .patches
            .iter()
            .filter(|p| p.enabled && p.id != id && p.dependencies.iter().any(|d| d == id))
            .map(|p| p.id.as_str())
            .collect();
        if !dependents.is_empty() {
            return Err(Error::config(format!(
                "cannot disable '{id}': still required by enabled patch(es) {}",
                dependents.join(", ")
            )));
        }
        self.doc.patches[idx].enabled = false;
        Ok(ToggleOutcome::Changed)
    }

    /// Serialize the whole snapshot and replace the document in one rename.
    pub fn save(&self) -> Result<()> {
        let text = toml::to_string_pretty(&self.doc)
            .map_err(|e| Error::environment(format!("failed to serialize registry: {e}")))?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            Error::environment(format!(
                "failed to create temp file in {}: {e}",
                dir.display()
            ))
        })?;
        tmp.write_all(text.as_bytes()).map_err(|e| {
            Error::environment(format!("failed to write registry snapshot: {e}"))
        })?;
        tmp.persist(&self.path).map_err(|e| {
            Error::environment(format!(
                "failed to replace registry {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(())
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::config(format!("unknown patch id '{id}'")))
    }
}

fn validate(doc: &RegistryDoc) -> Result<BTreeMap<String, usize>> {
    let mut index = BTreeMap::new();
    for (i, patch) in doc.patches.iter().enumerate() {
        let id = patch.id.trim();
        if id.is_empty() {
            return Err(Error::config(format!(
                "patch record {} has an empty id",
                i + 1
            )));
        }
        if index.insert(id.to_string(), i).is_some() {
            return Err(Error::config(format!("duplicate patch id '{id}'")));
        }
    }

    for patch in &doc.patches {
        if patch.file.trim().is_empty() {
            return Err(Error::config(format!(
                "patch '{}' has an empty artifact file",
                patch.id
            )));
        }
        if !doc.categories.contains_key(&patch.category) {
            return Err(Error::config(format!(
                "patch '{}' references undeclared category '{}'",
                patch.id, patch.category
            )));
        }
        for dep in &patch.dependencies {
            if !index.contains_key(dep) {
                return Err(Error::config(format!(
                    "patch '{}' depends on unknown patch id '{dep}'",
                    patch.id
                )));
            }
        }
        crate::verify::validate_check(&patch.check_applied)
            .map_err(|e| Error::config(format!("patch '{}': {e}", patch.id)))?;
    }

    Ok(index)
}
