//! Data models for the mod manager.
//!
//! - [`ModEntry`]: one mod archive with its activation state, safety verdict and descriptor
//! - [`ModBucket`]: the `Mods` / `DisabledMods` pair whose location encodes activation
//! - [`ModMetadata`] / [`AssetsInfo`]: JSON descriptors embedded in mod archives
//! - [`GameLayout`]: well-known paths inside the game installation
//! - [`ManagerConfig`]: manager settings loaded from `EternalModManager.yaml`
//! - [`InjectorSettings`]: settings shared with the mod injector
//! - [`BatchReport`]: aggregate result of best-effort batch operations

pub mod config;
pub mod layout;
pub mod metadata;
pub mod mod_entry;
pub mod report;

pub use config::{InjectorSettings, ManagerConfig};
pub use layout::{GameLayout, INJECTOR_SETTINGS_FILE};
pub use metadata::{AssetsInfo, ModMetadata};
pub use mod_entry::{ActivationState, ModBucket, ModEntry, SafetyVerdict};
pub use report::{BatchFailure, BatchReport};
