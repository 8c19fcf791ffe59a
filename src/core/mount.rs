//! Purpose: Mount configurations and the overlap-free mount table.
//! Exports: `MountConfig`, `MountTable`.
//! Role: The config half of the engine state; keys are directory paths.
//! Invariants: No mount path is an ancestor or descendant of another.
//! Invariants: Table mutations keep the map ordered by path.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::error::{ApiResult, Error};
use crate::core::path::VPath;

/// One mount's configuration. The JSON shape is `{"type": "file", "root":
/// "/srv/data"}` or `{"type": "memory"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MountConfig {
    File { root: PathBuf },
    Memory,
}

impl MountConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            MountConfig::File { .. } => "file",
            MountConfig::Memory => "memory",
        }
    }

    /// Kind-specific placement rule, checked before any backend validator
    /// runs: both bundled kinds mount at directory paths only.
    pub fn validate_at(&self, path: &VPath) -> ApiResult<()> {
        if !path.is_dir() {
            return Err(Error::path_invalid(
                path,
                format!("a {} mount requires a directory path", self.kind_name()),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MountTable {
    entries: BTreeMap<VPath, MountConfig>,
}

impl MountTable {
    pub fn new() -> MountTable {
        MountTable::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, path: &VPath) -> Option<&MountConfig> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &VPath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VPath, &MountConfig)> {
        self.entries.iter()
    }

    /// Rejects a candidate path that is ancestor-or-equal of an existing
    /// mount, or vice versa. Callers skip this check when updating an
    /// existing mount in place.
    pub fn check_overlap(&self, candidate: &VPath) -> ApiResult<()> {
        for existing in self.entries.keys() {
            if existing.overlaps(candidate) {
                return Err(Error::path_conflict(
                    candidate,
                    format!("overlaps the mount at {existing}"),
                ));
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, path: VPath, config: MountConfig) -> Option<MountConfig> {
        self.entries.insert(path, config)
    }

    pub fn remove(&mut self, path: &VPath) -> Option<MountConfig> {
        self.entries.remove(path)
    }
}
