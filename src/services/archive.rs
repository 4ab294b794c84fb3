use crate::error::{ModError, ModResult};
use crate::models::ModMetadata;
use crate::services::metadata::MetadataReader;
use crate::services::safety::SafetyClassifier;
use camino::Utf8Path;
use std::fs::File;
use std::io::BufReader;
use zip::ZipArchive;

/// Outcome of opening one mod archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub online_safe: bool,
    pub metadata: Option<ModMetadata>,
}

/// Opens an archive once and runs both the safety classifier and the
/// descriptor reader over the same handle.
#[derive(Clone)]
pub struct ArchiveInspector {
    classifier: SafetyClassifier,
}

impl ArchiveInspector {
    pub fn new(classifier: SafetyClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &SafetyClassifier {
        &self.classifier
    }

    /// Inspect the archive at `path`.
    ///
    /// # Returns
    /// The safety verdict and descriptor, or [`ModError::ArchiveUnreadable`]
    /// if the archive cannot be opened
    pub fn inspect(&self, path: &Utf8Path) -> ModResult<ArchiveReport> {
        let file = File::open(path).map_err(|e| ModError::ArchiveUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| ModError::ArchiveUnreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let online_safe = self.classifier.classify(&mut archive, path)?;
        let metadata = MetadataReader::read(&mut archive);

        Ok(ArchiveReport {
            online_safe,
            metadata,
        })
    }
}
