//! Services module - archive inspection and game-file maintenance.
//!
//! These services are synchronous and hold no shared state of their own; the
//! repository and reconciler decide when they run.
//!
//! # Components
//!
//! - [`SafetyClassifier`]: decides whether a mod archive is safe for online play.
//!   Entries are walked once through a [`ClassificationState`] which tracks:
//!   - allow-listed cosmetic resources
//!   - critical containers and banned legacy models
//!   - `assetsinfo` descriptors deferred to a second pass
//!
//! - [`MetadataReader`]: reads the optional `EternalMod.json` descriptor. Malformed
//!   descriptors are logged at debug level and treated as absent.
//!
//! - [`ArchiveInspector`]: opens an archive once and runs both of the above.
//!
//! - [`BackupManager`]: restores or resets the `.backup` copies the injector
//!   leaves next to patched game files.

pub mod archive;
pub mod backup;
pub mod metadata;
pub mod safety;

pub use archive::{ArchiveInspector, ArchiveReport};
pub use backup::{BackupManager, BackupReport};
pub use metadata::{METADATA_ENTRY, MetadataReader};
pub use safety::{
    ClassificationState, EntryDisposition, GameSoundBanks, NoSoundBanks, Resolution,
    SafetyClassifier, SafetyRules, SoundBankIndex, UnsafeReason,
};
