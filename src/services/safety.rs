//! Multiplayer safety classification of mod archives.
//!
//! An archive is safe for online play when it only touches cosmetic resources.
//! Classification walks every entry once through a [`ClassificationState`],
//! then resolves with a fixed precedence:
//!
//! 1. a banned legacy model (`.lwo`, including `$`-parameterized names) is always unsafe
//! 2. if every in-scope declaration matched the allow-list, the archive is safe
//! 3. otherwise touching a critical container makes it unsafe
//! 4. otherwise the `assetsinfo` descriptors decide, and the archive is tolerated
//!    unless one of them injects resources into a critical container

use crate::error::{ModError, ModResult};
use crate::models::AssetsInfo;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::File;
use std::io::{Read, Seek};
use std::sync::Arc;
use zip::ZipArchive;

/// Path fragments of resources that never affect networked game state.
pub const ALLOW_KEYWORDS: &[&str] = &[
    "/eternalmod/",
    ".tga",
    ".png",
    ".swf",
    ".bimage",
    "/advancedscreenviewshake/",
    "/audiolog/",
    "/audiologstory/",
    "/automap/",
    "/automapplayerprofile/",
    "/automapproperties/",
    "/automapsoundprofile/",
    "/env/",
    "/font/",
    "/fontfx/",
    "/fx/",
    "/gameitem/",
    "/globalfonttable/",
    "/gorebehavior/",
    "/gorecontainer/",
    "/gorewounds/",
    "/handsbobcycle/",
    "/highlightlos/",
    "/highlights/",
    "/hitconfirmationsoundsinfo/",
    "/hud/",
    "/hudelement/",
    "/lightrig/",
    "/lodgroup/",
    "/material2/",
    "/md6def/",
    "/modelasset/",
    "/particle/",
    "/particlestage/",
    "/renderlayerdefinition/",
    "/renderparm/",
    "/renderparmmeta/",
    "/renderprogflag/",
    "/ribbon2/",
    "/rumble/",
    "/soundevent/",
    "/soundpack/",
    "/soundrtpc/",
    "/soundstate/",
    "/soundswitch/",
    "/speaker/",
    "/staticimage/",
    "/swfresources/",
    "/uianchor/",
    "/uicolor/",
    "/weaponreticle/",
    "/weaponreticleswfinfo/",
    "/entitydef/light/",
    "/entitydef/fx",
    "/impacteffect/",
    "/uiweapon/",
    "/globalinitialwarehouse/",
    "/globalshell/",
    "/warehouseitem/",
    "/warehouseofflinecontainer/",
    "/tooltip/",
    "/livetile/",
    "/tutorialevent/",
    "maps/game/dlc/",
    "maps/game/dlc2/",
    "maps/game/horde/",
    "maps/game/hub/",
    "maps/game/shell/",
    "maps/game/sp/",
    "maps/game/tutorials/",
    "/decls/campaign/",
];

/// Resource container prefixes whose modification affects online play.
pub const DENY_PREFIXES: &[&str] = &["gameresources", "generated", "pvp", "shell", "warehouse"];

/// Namespace of the per-container resource descriptors.
pub const ASSETS_INFO_PREFIX: &str = "EternalMod/assetsinfo/";

/// Legacy model format that is never allowed online.
const BANNED_EXTENSION: &str = "lwo";

/// Lookup of sound banks installed with the game.
///
/// Replacing an installed sound bank is always allowed.
#[cfg_attr(test, mockall::automock)]
pub trait SoundBankIndex: Send + Sync {
    fn is_installed(&self, container: &str) -> bool;
}

/// Sound banks of a live game installation: `<dir>/<container>.snd` directories.
#[derive(Debug, Clone)]
pub struct GameSoundBanks {
    dir: Utf8PathBuf,
}

impl GameSoundBanks {
    pub fn new<P: AsRef<Utf8Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl SoundBankIndex for GameSoundBanks {
    fn is_installed(&self, container: &str) -> bool {
        self.dir.join(format!("{container}.snd")).is_dir()
    }
}

/// Index for environments without a game installation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSoundBanks;

impl SoundBankIndex for NoSoundBanks {
    fn is_installed(&self, _container: &str) -> bool {
        false
    }
}

/// Allow-list and deny-list used by the classifier.
#[derive(Debug, Clone)]
pub struct SafetyRules {
    allow_keywords: Vec<String>,
    deny_prefixes: Vec<String>,
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            allow_keywords: ALLOW_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            deny_prefixes: DENY_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl SafetyRules {
    /// True if the lower-cased relative path contains an allow-list keyword.
    pub fn is_allow_listed(&self, relative_lower: &str) -> bool {
        self.allow_keywords
            .iter()
            .any(|keyword| relative_lower.contains(keyword.as_str()))
    }

    /// True if the container name starts with a deny-list prefix (exact case).
    pub fn is_critical(&self, container: &str) -> bool {
        self.deny_prefixes
            .iter()
            .any(|prefix| container.starts_with(prefix.as_str()))
    }

    /// Deny-list test used by the descriptor pass, ignoring case.
    pub fn is_critical_descriptor(&self, container: &str) -> bool {
        self.deny_prefixes
            .iter()
            .any(|prefix| starts_with_ignore_case(container, prefix))
    }
}

/// What the classifier did with a single archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDisposition {
    Directory,
    RootLevel,
    SoundBank,
    /// `assetsinfo` descriptor held back for the descriptor pass
    Deferred,
    BannedExtension,
    OutOfScope,
    Allowed,
    NotAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsafeReason {
    BannedExtension,
    CriticalResource,
    /// A descriptor injects resources into this critical container
    CriticalDescriptor(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Safe,
    Unsafe(UnsafeReason),
    /// The single pass was inconclusive; the descriptors decide
    NeedsDescriptors,
}

impl Resolution {
    pub fn is_safe(&self) -> bool {
        matches!(self, Resolution::Safe)
    }
}

/// Flags accumulated while walking one archive.
#[derive(Debug, Clone)]
pub struct ClassificationState {
    safe_so_far: bool,
    critical: bool,
    hard_banned: bool,
    deferred: Vec<String>,
}

impl Default for ClassificationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassificationState {
    pub fn new() -> Self {
        Self {
            safe_so_far: true,
            critical: false,
            hard_banned: false,
            deferred: Vec::new(),
        }
    }

    /// Feed one archive entry name into the state machine.
    pub fn observe(
        &mut self,
        full_name: &str,
        rules: &SafetyRules,
        sound_banks: &dyn SoundBankIndex,
    ) -> EntryDisposition {
        if full_name.ends_with('/') {
            return EntryDisposition::Directory;
        }

        let Some((container, relative)) = full_name.split_once('/') else {
            return EntryDisposition::RootLevel;
        };

        if sound_banks.is_installed(container) {
            return EntryDisposition::SoundBank;
        }

        if is_assets_info(full_name) {
            self.deferred.push(full_name.to_string());
            return EntryDisposition::Deferred;
        }

        if rules.is_critical(container) {
            self.critical = true;
        }

        if has_banned_extension(relative) {
            self.hard_banned = true;
            return EntryDisposition::BannedExtension;
        }

        if !is_in_scope(relative) {
            return EntryDisposition::OutOfScope;
        }

        if rules.is_allow_listed(&relative.to_lowercase()) {
            EntryDisposition::Allowed
        } else {
            self.safe_so_far = false;
            EntryDisposition::NotAllowed
        }
    }

    /// Descriptor entries held back by [`observe`](Self::observe).
    pub fn deferred_descriptors(&self) -> &[String] {
        &self.deferred
    }

    /// Verdict after the single pass.
    pub fn resolve(&self) -> Resolution {
        if self.hard_banned {
            Resolution::Unsafe(UnsafeReason::BannedExtension)
        } else if self.safe_so_far {
            Resolution::Safe
        } else if self.critical {
            Resolution::Unsafe(UnsafeReason::CriticalResource)
        } else {
            Resolution::NeedsDescriptors
        }
    }

    /// Final verdict once the deferred descriptors have been parsed.
    ///
    /// # Arguments
    /// * `descriptors` - `(entry name, parsed descriptor)` pairs; unparseable ones are left out
    pub fn resolve_with_descriptors<'a, I>(&self, rules: &SafetyRules, descriptors: I) -> Resolution
    where
        I: IntoIterator<Item = (&'a str, AssetsInfo)>,
    {
        let resolution = self.resolve();
        if resolution != Resolution::NeedsDescriptors {
            return resolution;
        }

        for (name, assets_info) in descriptors {
            let container = descriptor_container(name);
            if assets_info.declares_resources() && rules.is_critical_descriptor(container) {
                return Resolution::Unsafe(UnsafeReason::CriticalDescriptor(container.to_string()));
            }
        }

        Resolution::Safe
    }
}

/// Decides whether mod archives are safe for online play.
#[derive(Clone)]
pub struct SafetyClassifier {
    rules: SafetyRules,
    sound_banks: Arc<dyn SoundBankIndex>,
}

impl SafetyClassifier {
    pub fn new(rules: SafetyRules, sound_banks: Arc<dyn SoundBankIndex>) -> Self {
        Self { rules, sound_banks }
    }

    /// Classifier using the default rules and the sound banks under `soundbanks_dir`.
    pub fn for_game<P: AsRef<Utf8Path>>(soundbanks_dir: P) -> Self {
        Self::new(
            SafetyRules::default(),
            Arc::new(GameSoundBanks::new(soundbanks_dir)),
        )
    }

    pub fn rules(&self) -> &SafetyRules {
        &self.rules
    }

    /// Open and classify the archive at `path`.
    pub fn classify_path(&self, path: &Utf8Path) -> ModResult<bool> {
        let file = File::open(path).map_err(|e| unreadable(path, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| unreadable(path, e))?;
        self.classify(&mut archive, path)
    }

    /// Classify an open archive.
    ///
    /// # Returns
    /// `true` if the archive is safe for online play
    pub fn classify<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        path: &Utf8Path,
    ) -> ModResult<bool> {
        let resolution = self.evaluate(archive, path)?;
        if let Resolution::Unsafe(reason) = &resolution {
            tracing::debug!("{} is not online-safe: {:?}", path, reason);
        }
        Ok(resolution.is_safe())
    }

    /// Classify an open archive and report why it resolved the way it did.
    pub fn evaluate<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
        path: &Utf8Path,
    ) -> ModResult<Resolution> {
        let mut state = ClassificationState::new();

        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index).map_err(|e| unreadable(path, e))?;
            let name = entry.name().to_string();
            drop(entry);
            state.observe(&name, &self.rules, self.sound_banks.as_ref());
        }

        let resolution = state.resolve();
        if resolution != Resolution::NeedsDescriptors {
            return Ok(resolution);
        }

        let mut descriptors = Vec::with_capacity(state.deferred_descriptors().len());
        for name in state.deferred_descriptors() {
            if let Some(assets_info) = read_assets_info(archive, name) {
                descriptors.push((name.as_str(), assets_info));
            }
        }

        Ok(state.resolve_with_descriptors(&self.rules, descriptors))
    }
}

fn read_assets_info<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<AssetsInfo> {
    let mut text = String::new();
    let mut entry = archive.by_name(name).ok()?;
    if let Err(e) = entry.read_to_string(&mut text) {
        tracing::debug!("Skipping unreadable descriptor {}: {}", name, e);
        return None;
    }

    match serde_json::from_str(text.trim_start_matches('\u{feff}')) {
        Ok(assets_info) => Some(assets_info),
        Err(e) => {
            tracing::debug!("Skipping malformed descriptor {}: {}", name, e);
            None
        }
    }
}

fn unreadable(path: &Utf8Path, error: impl std::fmt::Display) -> ModError {
    ModError::ArchiveUnreadable {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

fn is_assets_info(full_name: &str) -> bool {
    starts_with_ignore_case(full_name, ASSETS_INFO_PREFIX) && ends_with_ignore_case(full_name, ".json")
}

fn is_in_scope(relative: &str) -> bool {
    starts_with_ignore_case(relative, "generated/decls/")
        || starts_with_ignore_case(relative, "decls/")
        || ends_with_ignore_case(relative, ".entities")
}

/// `model.lwo` and parameterized variants such as `model.lwo$uvlayout_lightmap=1`.
fn has_banned_extension(relative: &str) -> bool {
    let file_name = relative.rsplit('/').next().unwrap_or(relative);
    let base = file_name.split('$').next().unwrap_or(file_name);
    base.rsplit_once('.')
        .is_some_and(|(_, extension)| extension.eq_ignore_ascii_case(BANNED_EXTENSION))
}

/// Container of a descriptor entry: the first path segment, like any other entry.
fn descriptor_container(full_name: &str) -> &str {
    full_name.split('/').next().unwrap_or(full_name)
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value
        .len()
        .checked_sub(suffix.len())
        .and_then(|start| value.get(start..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}
