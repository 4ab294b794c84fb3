use crate::models::ModMetadata;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

/// One of the two directories a mod archive can live in.
///
/// The directory an archive sits in *is* its activation state; nothing else
/// records whether a mod is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModBucket {
    Enabled,
    Disabled,
}

impl ModBucket {
    pub const ALL: [ModBucket; 2] = [ModBucket::Enabled, ModBucket::Disabled];

    pub const fn dir_name(self) -> &'static str {
        match self {
            ModBucket::Enabled => "Mods",
            ModBucket::Disabled => "DisabledMods",
        }
    }

    pub const fn activation(self) -> ActivationState {
        match self {
            ModBucket::Enabled => ActivationState::Active,
            ModBucket::Disabled => ActivationState::Inactive,
        }
    }

    pub const fn opposite(self) -> ModBucket {
        match self {
            ModBucket::Enabled => ModBucket::Disabled,
            ModBucket::Disabled => ModBucket::Enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationState {
    Active,
    Inactive,
}

impl ActivationState {
    pub const fn bucket(self) -> ModBucket {
        match self {
            ActivationState::Active => ModBucket::Enabled,
            ActivationState::Inactive => ModBucket::Disabled,
        }
    }
}

/// Multiplayer compatibility of an archive.
///
/// `Unknown` only exists before the first classification of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SafetyVerdict {
    #[default]
    Unknown,
    Safe,
    Unsafe,
}

impl From<bool> for SafetyVerdict {
    fn from(safe: bool) -> Self {
        if safe {
            SafetyVerdict::Safe
        } else {
            SafetyVerdict::Unsafe
        }
    }
}

impl fmt::Display for SafetyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SafetyVerdict::Unknown => "unknown",
            SafetyVerdict::Safe => "online-safe",
            SafetyVerdict::Unsafe => "online-unsafe",
        };
        f.write_str(label)
    }
}

/// In-memory view of a single mod archive.
///
/// Entries are rebuilt on every scan and never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModEntry {
    /// Absolute path of the archive, also the classification cache key
    pub identity: Utf8PathBuf,

    /// File name, used when the archive has no descriptor name
    pub display_name: String,

    /// Derived from the directory the scan found the archive in
    pub activation: ActivationState,

    pub multiplayer_safe: SafetyVerdict,

    /// False when the archive could not be opened or read
    pub valid: bool,

    pub metadata: Option<ModMetadata>,
}

impl ModEntry {
    /// Build an entry for an archive found in `bucket`.
    pub fn new(
        identity: Utf8PathBuf,
        bucket: ModBucket,
        multiplayer_safe: SafetyVerdict,
        valid: bool,
        metadata: Option<ModMetadata>,
    ) -> Self {
        let display_name = identity.file_name().unwrap_or(identity.as_str()).to_string();
        Self {
            identity,
            display_name,
            activation: bucket.activation(),
            multiplayer_safe,
            valid,
            metadata,
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.identity
    }

    pub fn bucket(&self) -> ModBucket {
        self.activation.bucket()
    }

    pub fn is_active(&self) -> bool {
        self.activation == ActivationState::Active
    }

    pub fn is_online_safe(&self) -> bool {
        self.multiplayer_safe == SafetyVerdict::Safe
    }

    /// Descriptor name when present, otherwise the file name.
    pub fn title(&self) -> &str {
        match &self.metadata {
            Some(metadata) => metadata.display_name(&self.display_name),
            None => &self.display_name,
        }
    }

    /// Whether the injector will actually load this mod.
    ///
    /// # Arguments
    /// * `online_safe_only` - The injector's online-safe enforcement setting
    pub fn will_load(&self, online_safe_only: bool) -> bool {
        self.valid && self.is_active() && (!online_safe_only || self.is_online_safe())
    }
}
