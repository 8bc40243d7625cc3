//! Case file discovery and loading
//!
//! Case files are YAML documents describing one group of command cases.
//! Discovery walks directories in sorted order so the submitted case
//! sequence is the same on every run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::command::{CommandCase, CommandSpec};
use super::{TestCase, TestGroup};

/// File name suffixes recognised as case files
pub const CASE_FILE_SUFFIXES: &[&str] = &[".case.yaml", ".case.yml"];

/// Case file structure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseFile {
    /// Group name, defaults to the file name without its suffix
    #[serde(default)]
    pub group: Option<String>,

    /// Environment shared by every case in the file
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub cases: Vec<CommandSpec>,
}

impl CaseFile {
    /// Load a case file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read case file: {}", path.display()))?;

        let file: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse case file: {}", path.display()))?;

        if let Some(index) = file.cases.iter().position(|c| c.description.trim().is_empty()) {
            anyhow::bail!(
                "Case #{} in {} has an empty description",
                index + 1,
                path.display()
            );
        }

        Ok(file)
    }

    /// Build the group this file describes
    pub fn group_for(&self, path: &Path) -> TestGroup {
        let name = self.group.clone().unwrap_or_else(|| group_name_from_path(path));
        TestGroup {
            name,
            source: path.to_path_buf(),
            workdir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            env: self.env.clone(),
        }
    }
}

/// Check whether a path names a case file
pub fn is_case_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| CASE_FILE_SUFFIXES.iter().any(|s| n.ends_with(s)))
        .unwrap_or(false)
}

fn group_name_from_path(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    CASE_FILE_SUFFIXES
        .iter()
        .find_map(|s| name.strip_suffix(s))
        .unwrap_or(name)
        .to_string()
}

/// Resolve paths to an ordered list of case files
///
/// Directories are searched recursively; files are kept when they exist and
/// carry a case file suffix; anything else is ignored. When nothing usable
/// is found, `default_dir` is searched instead.
pub fn discover(paths: &[PathBuf], default_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for path in paths {
        if path.is_dir() {
            walk(path, &mut found)?;
        } else if is_case_file(path) && path.is_file() {
            found.push(path.clone());
        } else {
            debug!("Ignoring {}: not a case file or directory", path.display());
        }
    }

    if found.is_empty() && default_dir.is_dir() {
        debug!("Searching default case directory {}", default_dir.display());
        walk(default_dir, &mut found)?;
    }

    let mut seen = HashSet::new();
    found.retain(|p| seen.insert(p.clone()));
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            walk(&entry, found)?;
        } else if is_case_file(&entry) {
            found.push(entry);
        }
    }
    Ok(())
}

/// Load every case of every file, in file order then case order
pub fn load_cases(files: &[PathBuf]) -> Result<Vec<Box<dyn TestCase>>> {
    let mut cases: Vec<Box<dyn TestCase>> = Vec::new();

    for path in files {
        let file = CaseFile::load(path)?;
        let group = Arc::new(file.group_for(path));
        debug!("Loaded {} case(s) from {}", file.cases.len(), path.display());

        for spec in file.cases {
            cases.push(Box::new(CommandCase::new(group.clone(), spec)));
        }
    }

    Ok(cases)
}
