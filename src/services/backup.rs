//! Restore and reset of the game-file backups made by the mod injector.
//!
//! The injector copies every file it patches to `<file>.backup`. Backups live in:
//! - `base/packagemapspec.json.backup`
//! - `base/*.resources.backup`
//! - `base/game/**/*.resources.backup`
//! - `base/sound/soundbanks/pc/*.snd.backup`
//!
//! Restore copies each backup over its original; reset deletes the backups and
//! strips the resource bookkeeping from the injector settings file. Both are
//! best-effort and hold the repository's exclusive operation gate.

use crate::config::InjectorSettingsFile;
use crate::error::{ModError, ModResult};
use crate::models::{BatchReport, GameLayout};
use crate::state::{OperationKind, StateManager};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use walkdir::WalkDir;

const BACKUP_EXTENSION: &str = ".backup";

/// Outcome of a restore or reset: restored/deleted files plus per-file failures.
pub type BackupReport = BatchReport;

/// Where backups are searched for and which file names qualify.
struct BackupScope {
    dir: Utf8PathBuf,
    recursive: bool,
    suffix: &'static str,
}

pub struct BackupManager {
    layout: GameLayout,
    state: StateManager,
    settings_file: InjectorSettingsFile,
}

impl BackupManager {
    pub fn new(layout: GameLayout, state: StateManager) -> Self {
        let settings_file = InjectorSettingsFile::for_game(&layout);
        Self {
            layout,
            state,
            settings_file,
        }
    }

    fn scopes(&self) -> Vec<BackupScope> {
        let base = self.layout.base_dir();
        vec![
            BackupScope {
                dir: base.clone(),
                recursive: false,
                suffix: ".resources.backup",
            },
            BackupScope {
                dir: base.join("game"),
                recursive: true,
                suffix: ".resources.backup",
            },
            BackupScope {
                dir: self.layout.soundbanks_dir(),
                recursive: false,
                suffix: ".snd.backup",
            },
        ]
    }

    /// Every backup file currently present, in a stable order.
    pub fn find_backups(&self) -> Vec<Utf8PathBuf> {
        let mut backups = Vec::new();

        let package_map = self.layout.base_dir().join("packagemapspec.json.backup");
        if package_map.is_file() {
            backups.push(package_map);
        }

        for scope in self.scopes() {
            if !scope.dir.is_dir() {
                continue;
            }

            let walker = WalkDir::new(&scope.dir)
                .min_depth(1)
                .max_depth(if scope.recursive { usize::MAX } else { 1 })
                .sort_by_file_name();

            for entry in walker.into_iter().filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable path while searching backups: {}", e);
                    None
                }
            }) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else {
                    continue;
                };
                if path
                    .file_name()
                    .is_some_and(|name| name.to_lowercase().ends_with(scope.suffix))
                {
                    backups.push(path);
                }
            }
        }

        backups
    }

    /// Copy every backup over the file it was taken from.
    ///
    /// # Returns
    /// Per-file outcome, or [`ModError::Busy`] if another operation is running
    pub fn restore(&self) -> ModResult<BackupReport> {
        let _guard = self.state.try_begin_operation(OperationKind::RestoreBackups)?;
        let metrics = self.state.metrics();
        let mut report = BatchReport::new();

        for backup in self.find_backups() {
            let target = original_path(&backup);
            match fs::copy(&backup, &target) {
                Ok(_) => {
                    tracing::debug!("Restored {}", target);
                    metrics.record_file_operation();
                    report.record_success(target);
                }
                Err(source) => {
                    metrics.record_file_operation_failure();
                    report.record_failure(
                        backup.clone(),
                        ModError::CopyFailed {
                            from: backup,
                            to: target,
                            source,
                        },
                    );
                }
            }
        }

        tracing::info!("Backup restore finished: {}", report.summary());
        Ok(report)
    }

    /// Delete every backup and strip resource references from the injector settings.
    pub fn reset(&self) -> ModResult<BackupReport> {
        let _guard = self.state.try_begin_operation(OperationKind::ResetBackups)?;
        let metrics = self.state.metrics();
        let mut report = BatchReport::new();

        for backup in self.find_backups() {
            match fs::remove_file(&backup) {
                Ok(()) => {
                    metrics.record_file_operation();
                    report.record_success(backup);
                }
                Err(source) => {
                    metrics.record_file_operation_failure();
                    report.record_failure(
                        backup.clone(),
                        ModError::DeleteFailed {
                            path: backup,
                            source,
                        },
                    );
                }
            }
        }

        if let Err(e) = self.settings_file.strip_resource_references() {
            report.record_failure(self.settings_file.path().to_path_buf(), e.into());
        }

        tracing::info!("Backup reset finished: {}", report.summary());
        Ok(report)
    }
}

/// `foo.resources.backup` -> `foo.resources`
fn original_path(backup: &Utf8Path) -> Utf8PathBuf {
    let text = backup.as_str();
    let trimmed = text
        .len()
        .checked_sub(BACKUP_EXTENSION.len())
        .and_then(|end| text.get(..end))
        .filter(|_| text.to_lowercase().ends_with(BACKUP_EXTENSION))
        .unwrap_or(text);
    Utf8PathBuf::from(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn game_with_backups() -> (GameLayout, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let layout = GameLayout::new(&root);

        let base = layout.base_dir();
        fs::create_dir_all(base.join("game").join("sp").join("e1m1_intro")).unwrap();
        fs::create_dir_all(layout.soundbanks_dir()).unwrap();

        fs::write(base.join("packagemapspec.json.backup"), "pristine map").unwrap();
        fs::write(base.join("gameresources.resources.backup"), "pristine res").unwrap();
        fs::write(
            base.join("game/sp/e1m1_intro/e1m1_intro.resources.backup"),
            "pristine level",
        )
        .unwrap();
        fs::write(layout.soundbanks_dir().join("music.snd.backup"), "pristine snd").unwrap();

        // Not a backup in scope: nested below base without the game/ tree.
        fs::create_dir_all(base.join("other")).unwrap();
        fs::write(base.join("other/x.resources.backup"), "ignored").unwrap();

        (layout, temp_dir)
    }

    #[test]
    fn test_find_backups_in_all_scopes() {
        let (layout, _temp_dir) = game_with_backups();
        let manager = BackupManager::new(layout, StateManager::new());

        let backups = manager.find_backups();
        assert_eq!(backups.len(), 4);
        assert!(backups.iter().all(|b| !b.as_str().contains("other")));
    }

    #[test]
    fn test_restore_copies_backups_over_originals() {
        let (layout, _temp_dir) = game_with_backups();
        let base = layout.base_dir();
        fs::write(base.join("gameresources.resources"), "modded").unwrap();

        let manager = BackupManager::new(layout.clone(), StateManager::new());
        let report = manager.restore().unwrap();

        assert_eq!(report.success_count(), 4);
        assert!(report.is_clean());
        assert_eq!(
            fs::read_to_string(base.join("gameresources.resources")).unwrap(),
            "pristine res"
        );
        assert!(base.join("gameresources.resources.backup").exists());
    }

    #[test]
    fn test_reset_deletes_backups_and_strips_settings() {
        let (layout, _temp_dir) = game_with_backups();
        fs::write(
            layout.injector_settings_file(),
            ":ONLINE_SAFE=1\n\ngameresources.resources\n",
        )
        .unwrap();

        let manager = BackupManager::new(layout.clone(), StateManager::new());
        let report = manager.reset().unwrap();

        assert_eq!(report.success_count(), 4);
        assert!(manager.find_backups().is_empty());
        assert_eq!(
            fs::read_to_string(layout.injector_settings_file()).unwrap(),
            ":ONLINE_SAFE=1\n"
        );
    }

    #[test]
    fn test_restore_rejected_while_busy() {
        let (layout, _temp_dir) = game_with_backups();
        let state = StateManager::new();
        let manager = BackupManager::new(layout, state.clone());

        let _guard = state.try_begin_operation(OperationKind::Scan).unwrap();
        assert!(matches!(manager.restore(), Err(ModError::Busy { .. })));
    }

    #[test]
    fn test_restore_failure_does_not_stop_batch() {
        let (layout, _temp_dir) = game_with_backups();
        // A directory in place of the original makes that single copy fail.
        fs::create_dir_all(layout.base_dir().join("gameresources.resources")).unwrap();

        let manager = BackupManager::new(layout, StateManager::new());
        let report = manager.restore().unwrap();

        assert_eq!(report.failure_count(), 1);
        assert_eq!(report.success_count(), 3);
    }

    #[test]
    fn test_original_path() {
        assert_eq!(
            original_path(Utf8Path::new("/g/base/a.resources.backup")),
            Utf8PathBuf::from("/g/base/a.resources")
        );
        assert_eq!(
            original_path(Utf8Path::new("/g/base/a.resources")),
            Utf8PathBuf::from("/g/base/a.resources")
        );
    }
}
