use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ManifestFile {
    version: u32,
    completed: BTreeSet<String>,
}

/// Set of match ids whose detail record is already on disk.
///
/// This is the only resume mechanism of the fetch stage: an id in the set is
/// never requested again.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    completed: BTreeSet<String>,
}

impl Manifest {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            completed: BTreeSet::new(),
        }
    }

    /// Reads the manifest (missing or unreadable means empty) and reconciles it
    /// with the detail files actually present in `matches_dir`.
    pub fn load(path: &Path, matches_dir: &Path) -> Result<Self> {
        let mut manifest = Self::empty(path);
        if let Ok(raw) = fs::read_to_string(path) {
            match serde_json::from_str::<ManifestFile>(&raw) {
                Ok(file) if file.version == MANIFEST_VERSION => {
                    manifest.completed = file.completed;
                }
                Ok(file) => warn!(
                    "ignoring manifest {} with version {}",
                    path.display(),
                    file.version
                ),
                Err(err) => warn!("ignoring unreadable manifest {}: {err}", path.display()),
            }
        }
        manifest.reconcile(matches_dir)?;
        Ok(manifest)
    }

    fn reconcile(&mut self, matches_dir: &Path) -> Result<()> {
        let on_disk = detail_ids_in(matches_dir)?;
        self.completed.retain(|id| on_disk.contains(id));
        self.completed.extend(on_disk);
        Ok(())
    }

    pub fn contains(&self, match_id: &str) -> bool {
        self.completed.contains(match_id)
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.completed.iter().map(String::as_str)
    }

    /// Records `match_id` and rewrites the manifest file.
    pub fn mark_completed(&mut self, match_id: &str) -> Result<()> {
        self.completed.insert(match_id.to_string());
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let file = ManifestFile {
            version: MANIFEST_VERSION,
            completed: self.completed.clone(),
        };
        let json = serde_json::to_string_pretty(&file).context("serialize manifest")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).context("write manifest")?;
        fs::rename(&tmp, &self.path).context("swap manifest")?;
        Ok(())
    }
}

/// Path of the detail record for `match_id`.
pub fn detail_path(matches_dir: &Path, match_id: &str) -> PathBuf {
    matches_dir.join(format!("{match_id}.json"))
}

/// Match ids with a detail file in `dir`, i.e. the stems of its `*.json` files.
pub fn detail_ids_in(dir: &Path) -> Result<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err).with_context(|| format!("list {}", dir.display())),
    };
    for entry in entries {
        let path = entry.context("read dir entry")?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            out.insert(stem.to_string());
        }
    }
    Ok(out)
}
