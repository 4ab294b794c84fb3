//! Integration tests for the injector settings file and manager configuration
//!
//! These tests verify that:
//! - The online-safe toggle round-trips through the settings file
//! - Unknown lines and resource bookkeeping survive a save
//! - A missing settings file is reported as unavailable
//! - The manager configuration loads from YAML with defaults

use camino::Utf8PathBuf;
use eternalmm::config::{InjectorSettingsFile, SettingsError, SettingsStore};
use eternalmm::services::{ArchiveInspector, NoSoundBanks, SafetyClassifier, SafetyRules};
use eternalmm::{ConfigManager, GameLayout, ManagerConfig, ModRepository, StateChange, StateManager};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_game() -> (GameLayout, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let layout = GameLayout::new(&root);
    fs::create_dir_all(layout.mods_dir()).unwrap();
    fs::create_dir_all(layout.disabled_mods_dir()).unwrap();
    (layout, temp_dir)
}

fn repository(layout: &GameLayout) -> ModRepository {
    let classifier = SafetyClassifier::new(SafetyRules::default(), Arc::new(NoSoundBanks));
    ModRepository::new(
        layout.clone(),
        ArchiveInspector::new(classifier),
        StateManager::new(),
    )
}

#[test]
fn test_online_safe_round_trip_preserves_other_lines() {
    let (layout, _temp_dir) = create_test_game();
    let original = ":AUTO_LAUNCH_GAME=1\r\n:ONLINE_SAFE=0\r\n:CUSTOM_KEY=keep me\r\n\r\ngameresources.resources\r\n";
    fs::write(layout.injector_settings_file(), original).unwrap();

    let repo = repository(&layout);
    let store = InjectorSettingsFile::for_game(&layout);
    assert!(!repo.sync_online_safe(&store).unwrap());

    let mut rx = repo.state().subscribe();
    repo.set_online_safe(&store, true, store.path()).unwrap();
    assert_eq!(
        rx.try_recv().unwrap(),
        StateChange::OnlineSafeChanged { enabled: true }
    );

    let saved = fs::read_to_string(layout.injector_settings_file()).unwrap();
    assert!(saved.contains(":ONLINE_SAFE=1\r\n"));
    assert!(saved.contains(":AUTO_LAUNCH_GAME=1\r\n"));
    assert!(saved.contains(":CUSTOM_KEY=keep me\r\n"));
    assert!(saved.contains("gameresources.resources"));

    let reloaded = store.load().unwrap().unwrap();
    assert!(reloaded.online_safe);
    assert!(reloaded.auto_launch_game);
}

#[test]
fn test_missing_settings_file_is_unavailable() {
    let (layout, _temp_dir) = create_test_game();
    let repo = repository(&layout);
    let store = InjectorSettingsFile::for_game(&layout);

    assert!(store.load().unwrap().is_none());
    assert!(!repo.sync_online_safe(&store).unwrap());

    let result = repo.set_online_safe(&store, true, store.path());
    assert!(matches!(result, Err(SettingsError::Unavailable(_))));
    assert!(!layout.injector_settings_file().exists());
    assert!(!repo.state().snapshot().online_safe_only);
}

#[test]
fn test_manager_config_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = Utf8PathBuf::try_from(temp_dir.path().join("config")).unwrap();
    let manager = ConfigManager::new(&config_dir).unwrap();

    let config = ManagerConfig {
        game_folder: "/games/DOOMEternal".to_string(),
        debug_mode: true,
        ..Default::default()
    };
    manager.save_manager_config(&config).unwrap();

    let loaded = manager.load_manager_config().unwrap();
    assert_eq!(loaded, config);
}
