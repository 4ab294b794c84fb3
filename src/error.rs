//! Error types for repository, classification and backup operations.
//!
//! Library code returns [`ModError`]; the binary and configuration layers wrap
//! these with `anyhow` context. Malformed mod metadata is never an error and has
//! no variant here: it only leaves display fields unset.

use crate::config::SettingsError;
use crate::state::OperationKind;
use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// Errors produced while scanning, classifying or moving mod archives.
#[derive(Error, Debug)]
pub enum ModError {
    /// The archive could not be opened or its central directory read.
    ///
    /// Classification fails closed: the entry is recorded as invalid and unsafe.
    #[error("Archive {path} could not be read: {reason}")]
    ArchiveUnreadable { path: Utf8PathBuf, reason: String },

    /// A file with the same name already exists at the destination.
    #[error("{file_name} already exists in {destination}")]
    MoveCollision {
        file_name: String,
        destination: Utf8PathBuf,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    MoveFailed {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to delete {path}: {source}")]
    DeleteFailed {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to copy {from} to {to}: {source}")]
    CopyFailed {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    /// The target disappeared between selection and execution.
    #[error("{0} no longer exists")]
    Vanished(Utf8PathBuf),

    #[error("The {name} directory is missing: {path}")]
    DirectoryMissing {
        name: &'static str,
        path: Utf8PathBuf,
    },

    #[error("{0} is not a .zip archive (unsupported format)")]
    UnsupportedFormat(Utf8PathBuf),

    #[error("{0} is not inside a managed mods directory")]
    NotManaged(Utf8PathBuf),

    /// Another exclusive operation holds the repository.
    #[error("Repository is busy: {running} in progress")]
    Busy { running: OperationKind },

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ModError {
    /// True for the explicit "busy" rejection, which callers may retry later.
    pub fn is_busy(&self) -> bool {
        matches!(self, ModError::Busy { .. })
    }
}

pub type ModResult<T> = Result<T, ModError>;
