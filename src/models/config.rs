use serde::{Deserialize, Serialize};

/// Manager configuration from `EternalModManager.yaml`
///
/// Every field may also be overridden from the environment with the
/// `ETERNALMM_` prefix (for example `ETERNALMM_GAME_FOLDER`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// DOOM Eternal installation folder containing `Mods` and `DisabledMods`
    #[serde(default)]
    pub game_folder: String,

    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default = "default_console_logging")]
    pub console_logging: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Delay before the reconciler retries a rescan rejected as busy
    #[serde(default = "default_busy_retry_ms")]
    pub busy_retry_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            game_folder: String::new(),
            debug_mode: false,
            console_logging: default_console_logging(),
            log_dir: default_log_dir(),
            busy_retry_ms: default_busy_retry_ms(),
        }
    }
}

fn default_console_logging() -> bool {
    true
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_busy_retry_ms() -> u64 {
    250
}

/// Settings shared with the mod injector through `EternalModInjector Settings.txt`.
///
/// Booleans are stored as `0`/`1`; any non-zero integer reads as enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectorSettings {
    pub auto_launch_game: bool,
    pub reset_backups: bool,
    pub verbose: bool,
    pub slow_mode: bool,
    pub compress_textures: bool,
    /// Only online-safe mods are loaded by the injector
    pub online_safe: bool,
    pub disable_multithreading: bool,
    pub game_parameters: String,
}

impl InjectorSettings {
    /// Setting keys in the order the injector writes them.
    pub const KEYS: [&'static str; 8] = [
        ":AUTO_LAUNCH_GAME",
        ":RESET_BACKUPS",
        ":VERBOSE",
        ":SLOW",
        ":COMPRESS_TEXTURES",
        ":ONLINE_SAFE",
        ":DISABLE_MULTITHREADING",
        ":GAME_PARAMETERS",
    ];

    /// Apply one raw `:KEY=value` pair. Unknown keys are ignored.
    pub fn apply(&mut self, key: &str, raw: &str) {
        if key == ":GAME_PARAMETERS" {
            self.game_parameters = raw.trim().to_string();
            return;
        }

        let enabled = raw.trim().parse::<i64>().map(|v| v != 0).unwrap_or(false);
        match key {
            ":AUTO_LAUNCH_GAME" => self.auto_launch_game = enabled,
            ":RESET_BACKUPS" => self.reset_backups = enabled,
            ":VERBOSE" => self.verbose = enabled,
            ":SLOW" => self.slow_mode = enabled,
            ":COMPRESS_TEXTURES" => self.compress_textures = enabled,
            ":ONLINE_SAFE" => self.online_safe = enabled,
            ":DISABLE_MULTITHREADING" => self.disable_multithreading = enabled,
            _ => {}
        }
    }

    /// Serialized value for a known key, `None` for anything else.
    pub fn value_of(&self, key: &str) -> Option<String> {
        let flag = |b: bool| if b { "1" } else { "0" }.to_string();
        match key {
            ":AUTO_LAUNCH_GAME" => Some(flag(self.auto_launch_game)),
            ":RESET_BACKUPS" => Some(flag(self.reset_backups)),
            ":VERBOSE" => Some(flag(self.verbose)),
            ":SLOW" => Some(flag(self.slow_mode)),
            ":COMPRESS_TEXTURES" => Some(flag(self.compress_textures)),
            ":ONLINE_SAFE" => Some(flag(self.online_safe)),
            ":DISABLE_MULTITHREADING" => Some(flag(self.disable_multithreading)),
            ":GAME_PARAMETERS" => Some(self.game_parameters.trim().to_string()),
            _ => None,
        }
    }
}
