use crate::models::ModBucket;
use camino::{Utf8Path, Utf8PathBuf};

/// Name of the injector's settings file in the game folder.
pub const INJECTOR_SETTINGS_FILE: &str = "EternalModInjector Settings.txt";

/// Well-known locations inside a DOOM Eternal installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLayout {
    root: Utf8PathBuf,
}

impl GameLayout {
    /// Layout rooted at `game_folder`, made absolute against the current directory.
    ///
    /// Archive identities and watcher events are both absolute, so a relative
    /// root would never match them.
    pub fn new<P: AsRef<Utf8Path>>(game_folder: P) -> Self {
        Self {
            root: absolute_root(game_folder.as_ref()),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn bucket_dir(&self, bucket: ModBucket) -> Utf8PathBuf {
        self.root.join(bucket.dir_name())
    }

    pub fn mods_dir(&self) -> Utf8PathBuf {
        self.bucket_dir(ModBucket::Enabled)
    }

    pub fn disabled_mods_dir(&self) -> Utf8PathBuf {
        self.bucket_dir(ModBucket::Disabled)
    }

    pub fn base_dir(&self) -> Utf8PathBuf {
        self.root.join("base")
    }

    /// Directory holding the installed `<container>.snd` sound banks.
    pub fn soundbanks_dir(&self) -> Utf8PathBuf {
        self.base_dir().join("sound").join("soundbanks").join("pc")
    }

    pub fn injector_settings_file(&self) -> Utf8PathBuf {
        self.root.join(INJECTOR_SETTINGS_FILE)
    }

    /// The bucket whose directory directly contains `path`, if any.
    pub fn bucket_of(&self, path: &Utf8Path) -> Option<ModBucket> {
        let parent = path.parent()?;
        ModBucket::ALL
            .into_iter()
            .find(|bucket| parent == self.bucket_dir(*bucket))
    }
}

fn absolute_root(game_folder: &Utf8Path) -> Utf8PathBuf {
    if game_folder.is_absolute() {
        return game_folder.to_path_buf();
    }
    match std::path::absolute(game_folder).map(Utf8PathBuf::try_from) {
        Ok(Ok(root)) => root,
        Ok(Err(e)) => {
            tracing::warn!("Game folder {} is not valid UTF-8 once absolute: {}", game_folder, e);
            game_folder.to_path_buf()
        }
        Err(e) => {
            tracing::warn!("Could not resolve game folder {}: {}", game_folder, e);
            game_folder.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = GameLayout::new("/games/DOOMEternal");
        assert_eq!(layout.mods_dir(), Utf8PathBuf::from("/games/DOOMEternal/Mods"));
        assert_eq!(
            layout.disabled_mods_dir(),
            Utf8PathBuf::from("/games/DOOMEternal/DisabledMods")
        );
        assert_eq!(
            layout.soundbanks_dir(),
            Utf8PathBuf::from("/games/DOOMEternal/base/sound/soundbanks/pc")
        );
    }

    #[test]
    fn test_bucket_of() {
        let layout = GameLayout::new("/games/DOOMEternal");
        assert_eq!(
            layout.bucket_of(Utf8Path::new("/games/DOOMEternal/Mods/a.zip")),
            Some(ModBucket::Enabled)
        );
        assert_eq!(
            layout.bucket_of(Utf8Path::new("/games/DOOMEternal/DisabledMods/a.zip")),
            Some(ModBucket::Disabled)
        );
        assert_eq!(
            layout.bucket_of(Utf8Path::new("/games/DOOMEternal/Mods/nested/a.zip")),
            None
        );
    }

    #[test]
    fn test_relative_game_folder_becomes_absolute() {
        let layout = GameLayout::new("relative/DOOMEternal");
        let cwd = Utf8PathBuf::try_from(std::env::current_dir().unwrap()).unwrap();

        assert!(layout.root().is_absolute());
        assert_eq!(layout.root(), cwd.join("relative/DOOMEternal"));
        assert_eq!(
            layout.bucket_of(&cwd.join("relative/DOOMEternal/Mods/a.zip")),
            Some(ModBucket::Enabled)
        );
    }
}
