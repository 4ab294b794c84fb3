//! Persistence of the settings shared with the mod injector.
//!
//! `EternalModInjector Settings.txt` starts with a block of `:KEY=value`
//! lines terminated by the first empty line; the injector appends its own
//! resource bookkeeping after that block. Saving only rewrites the setting
//! lines and leaves everything else untouched.

use crate::models::{GameLayout, InjectorSettings};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(
        "Mod injector settings file not found at {0}; run the mod injector at least once to create it"
    )]
    Unavailable(Utf8PathBuf),

    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write settings file {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Loads and saves the injector settings, including the online-safe toggle.
#[cfg_attr(test, mockall::automock)]
pub trait SettingsStore: Send + Sync {
    /// # Returns
    /// `None` when no settings exist yet
    fn load(&self) -> Result<Option<InjectorSettings>, SettingsError>;

    fn save(&self, settings: &InjectorSettings) -> Result<(), SettingsError>;
}

/// Parsed settings file, kept line by line so it can be written back.
#[derive(Debug, Clone)]
pub struct SettingsDocument {
    lines: Vec<String>,
    crlf: bool,
    line_pattern: Regex,
}

impl SettingsDocument {
    fn parse(text: &str, line_pattern: &Regex) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            crlf: text.contains("\r\n"),
            line_pattern: line_pattern.clone(),
        }
    }

    fn split_setting<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let captures = self.line_pattern.captures(line)?;
        let key = captures.get(1)?.as_str();
        let value = captures.get(2)?.as_str();
        Some((key, value))
    }

    /// Every `:KEY=value` pair in file order.
    pub fn values(&self) -> IndexMap<String, String> {
        self.lines
            .iter()
            .filter_map(|line| self.split_setting(line))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    pub fn settings(&self) -> InjectorSettings {
        let mut settings = InjectorSettings::default();
        for (key, value) in self.values() {
            settings.apply(&key, &value);
        }
        settings
    }

    /// Rewrite known keys inside the settings block.
    ///
    /// Known keys missing from the block are appended to its end.
    pub fn apply(&mut self, settings: &InjectorSettings) {
        let mut seen = HashSet::new();
        let mut block_end = self.lines.len();

        for index in 0..self.lines.len() {
            if self.lines[index].trim().is_empty() {
                block_end = index;
                break;
            }

            let Some(key) = self
                .split_setting(&self.lines[index])
                .map(|(key, _)| key.to_string())
            else {
                continue;
            };

            if let Some(value) = settings.value_of(&key) {
                self.lines[index] = format!("{key}={value}");
                seen.insert(key);
            }
        }

        let missing: Vec<String> = InjectorSettings::KEYS
            .iter()
            .filter(|key| !seen.contains(**key))
            .filter_map(|key| settings.value_of(key).map(|value| format!("{key}={value}")))
            .collect();

        self.lines.splice(block_end..block_end, missing);
    }

    /// Drop every line that is not a setting.
    ///
    /// # Returns
    /// The number of removed lines
    pub fn retain_settings_only(&mut self) -> usize {
        let before = self.lines.len();
        self.lines.retain(|line| line.starts_with(':'));
        before - self.lines.len()
    }

    pub fn render(&self) -> String {
        let newline = if self.crlf { "\r\n" } else { "\n" };
        let mut text = self.lines.join(newline);
        text.push_str(newline);
        text
    }
}

/// [`SettingsStore`] backed by `EternalModInjector Settings.txt`.
#[derive(Debug, Clone)]
pub struct InjectorSettingsFile {
    path: Utf8PathBuf,
    line_pattern: Regex,
}

impl InjectorSettingsFile {
    pub fn new<P: AsRef<Utf8Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            line_pattern: Regex::new(r"^(:[A-Za-z0-9_]+)=(.*)$")
                .expect("Invalid settings line regex"),
        }
    }

    pub fn for_game(layout: &GameLayout) -> Self {
        Self::new(layout.injector_settings_file())
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn parse_document(&self, text: &str) -> SettingsDocument {
        SettingsDocument::parse(text, &self.line_pattern)
    }

    /// Read the settings file, `None` if it does not exist.
    pub fn read_document(&self) -> Result<Option<SettingsDocument>, SettingsError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(&self.path).map_err(|source| SettingsError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(self.parse_document(&text)))
    }

    fn write_document(&self, document: &SettingsDocument) -> Result<(), SettingsError> {
        fs::write(&self.path, document.render()).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// Remove the injector's resource bookkeeping, keeping only settings.
    ///
    /// A missing file is left alone.
    ///
    /// # Returns
    /// The number of removed lines
    pub fn strip_resource_references(&self) -> Result<usize, SettingsError> {
        let Some(mut document) = self.read_document()? else {
            return Ok(0);
        };

        let removed = document.retain_settings_only();
        self.write_document(&document)?;
        tracing::info!("Removed {} resource references from {}", removed, self.path);
        Ok(removed)
    }
}

impl SettingsStore for InjectorSettingsFile {
    fn load(&self) -> Result<Option<InjectorSettings>, SettingsError> {
        let Some(document) = self.read_document()? else {
            tracing::warn!("Injector settings file not found at {}", self.path);
            return Ok(None);
        };
        Ok(Some(document.settings()))
    }

    fn save(&self, settings: &InjectorSettings) -> Result<(), SettingsError> {
        let Some(mut document) = self.read_document()? else {
            return Err(SettingsError::Unavailable(self.path.clone()));
        };

        document.apply(settings);
        self.write_document(&document)?;
        tracing::info!("Saved injector settings to {}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = ":ONLINE_SAFE=0\n:VERBOSE=1\n:GAME_PARAMETERS=+com_skipIntroVideo 1\n\ngameresources.resources\nwarehouse.resources\n";

    fn settings_file(contents: Option<&str>) -> (InjectorSettingsFile, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(temp_dir.path().join("EternalModInjector Settings.txt"))
            .unwrap();
        if let Some(contents) = contents {
            fs::write(&path, contents).unwrap();
        }
        (InjectorSettingsFile::new(&path), temp_dir)
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let (store, _temp_dir) = settings_file(None);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_missing_file_is_unavailable() {
        let (store, _temp_dir) = settings_file(None);
        let result = store.save(&InjectorSettings::default());
        assert!(matches!(result, Err(SettingsError::Unavailable(_))));
    }

    #[test]
    fn test_load_settings() {
        let (store, _temp_dir) = settings_file(Some(SAMPLE));
        let settings = store.load().unwrap().unwrap();

        assert!(!settings.online_safe);
        assert!(settings.verbose);
        assert_eq!(settings.game_parameters, "+com_skipIntroVideo 1");
    }

    #[test]
    fn test_save_preserves_other_lines() {
        let (store, _temp_dir) = settings_file(Some(SAMPLE));
        let mut settings = store.load().unwrap().unwrap();
        settings.online_safe = true;
        store.save(&settings).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], ":ONLINE_SAFE=1");
        assert_eq!(lines[1], ":VERBOSE=1");
        assert!(text.contains("\ngameresources.resources\nwarehouse.resources\n"));
        assert!(store.load().unwrap().unwrap().online_safe);
    }

    #[test]
    fn test_save_appends_missing_keys_inside_block() {
        let (store, _temp_dir) = settings_file(Some(":ONLINE_SAFE=0\n\nfoo.resources\n"));
        let settings = InjectorSettings {
            slow_mode: true,
            ..Default::default()
        };
        store.save(&settings).unwrap();

        let document = store.read_document().unwrap().unwrap();
        let values = document.values();
        assert_eq!(values.get(":SLOW").map(String::as_str), Some("1"));
        assert_eq!(values.len(), InjectorSettings::KEYS.len());

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.ends_with("\nfoo.resources\n"));
    }

    #[test]
    fn test_values_keep_file_order() {
        let (store, _temp_dir) = settings_file(None);
        let document = store.parse_document(":VERBOSE=1\n:AUTO_LAUNCH_GAME=0\n");
        let keys: Vec<String> = document.values().into_keys().collect();
        assert_eq!(keys, vec![":VERBOSE", ":AUTO_LAUNCH_GAME"]);
    }

    #[test]
    fn test_crlf_preserved() {
        let (store, _temp_dir) = settings_file(None);
        let document = store.parse_document(":VERBOSE=1\r\n:SLOW=0\r\n");
        assert_eq!(document.render(), ":VERBOSE=1\r\n:SLOW=0\r\n");
    }

    #[test]
    fn test_strip_resource_references() {
        let (store, _temp_dir) = settings_file(Some(SAMPLE));
        let removed = store.strip_resource_references().unwrap();

        assert_eq!(removed, 3);
        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            text,
            ":ONLINE_SAFE=0\n:VERBOSE=1\n:GAME_PARAMETERS=+com_skipIntroVideo 1\n"
        );
    }

    #[test]
    fn test_strip_missing_file_is_noop() {
        let (store, _temp_dir) = settings_file(None);
        assert_eq!(store.strip_resource_references().unwrap(), 0);
        assert!(!store.path().exists());
    }
}
