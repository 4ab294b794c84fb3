// EternalMM - DOOM Eternal mod manager
//
// This is the library crate containing the repository, classifier and reconciler.
// The binary crate (main.rs) provides the command-line entry point.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod reconciler;
pub mod repository;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::{ConfigManager, InjectorSettingsFile, SettingsStore};
pub use error::{ModError, ModResult};
pub use metrics::Metrics;
pub use models::{
    ActivationState, BatchReport, GameLayout, ManagerConfig, ModBucket, ModEntry, ModMetadata,
    SafetyVerdict,
};
pub use reconciler::{ChangeReconciler, FsNotification, FsWatcher, ReconcilerHandle};
pub use repository::{CollisionPolicy, ModRepository};
pub use services::{BackupManager, MetadataReader, SafetyClassifier};
pub use state::{OperationKind, StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
