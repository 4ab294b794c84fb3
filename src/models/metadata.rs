use serde::{Deserialize, Serialize};

/// Fallback shown for missing description and version fields.
pub const NOT_SPECIFIED: &str = "Not specified.";

/// Fallback shown when a mod does not declare the loader version it needs.
pub const UNKNOWN_VERSION: &str = "Unknown.";

/// Mod descriptor embedded as `EternalMod.json` at the archive root.
///
/// Serializes with the loader's camelCase field names. Reading is handled by
/// [`crate::services::metadata::MetadataReader`], which matches keys
/// case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModMetadata {
    pub name: String,
    pub author: String,
    pub description: String,
    pub version: String,
    pub load_priority: i64,
    pub required_version: i64,
}

impl ModMetadata {
    /// Loader version written into new descriptors.
    pub const CURRENT_LOADER_VERSION: i64 = 8;

    /// Pretty-printed descriptor template for mod authors.
    pub fn template_json() -> String {
        let template = ModMetadata {
            required_version: Self::CURRENT_LOADER_VERSION,
            ..Default::default()
        };
        // Serializing a plain struct of strings and integers cannot fail.
        serde_json::to_string_pretty(&template).unwrap_or_default()
    }

    /// Display name, falling back to the archive file name.
    pub fn display_name<'a>(&'a self, file_name: &'a str) -> &'a str {
        if self.name.is_empty() {
            file_name
        } else {
            &self.name
        }
    }

    pub fn description_display(&self) -> &str {
        non_empty_or(&self.description, NOT_SPECIFIED)
    }

    pub fn version_display(&self) -> &str {
        non_empty_or(&self.version, NOT_SPECIFIED)
    }

    pub fn required_version_display(&self) -> String {
        if self.required_version == 0 {
            UNKNOWN_VERSION.to_string()
        } else {
            self.required_version.to_string()
        }
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

/// Resource descriptor found under `EternalMod/assetsinfo/<container>.json`.
///
/// Only the presence of `resources` matters to the safety classifier; the
/// list entries are kept opaque.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetsInfo {
    #[serde(default)]
    pub resources: Option<Vec<serde_json::Value>>,
}

impl AssetsInfo {
    pub fn declares_resources(&self) -> bool {
        self.resources.is_some()
    }
}
