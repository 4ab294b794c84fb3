use crate::models::{ModMetadata, SafetyVerdict};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::time::SystemTime;

/// Cheap content identity of an archive: size and modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveFingerprint {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl ArchiveFingerprint {
    pub fn read(path: &Utf8Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

/// Result of inspecting one archive, reused while its fingerprint holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedClassification {
    pub fingerprint: ArchiveFingerprint,
    pub verdict: SafetyVerdict,
    pub valid: bool,
    pub metadata: Option<ModMetadata>,
}

/// Classification results keyed by absolute archive path.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    entries: HashMap<Utf8PathBuf, CachedClassification>,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for `path`, only if the archive is unchanged.
    pub fn lookup(
        &self,
        path: &Utf8Path,
        fingerprint: &ArchiveFingerprint,
    ) -> Option<&CachedClassification> {
        self.entries
            .get(path)
            .filter(|cached| cached.fingerprint == *fingerprint)
    }

    pub fn get(&self, path: &Utf8Path) -> Option<&CachedClassification> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, path: Utf8PathBuf, classification: CachedClassification) {
        self.entries.insert(path, classification);
    }

    pub fn remove(&mut self, path: &Utf8Path) -> Option<CachedClassification> {
        self.entries.remove(path)
    }

    /// Drop every path not in `present`.
    ///
    /// # Returns
    /// The number of dropped entries
    pub fn retain_present(&mut self, present: &HashSet<Utf8PathBuf>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| present.contains(path));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
