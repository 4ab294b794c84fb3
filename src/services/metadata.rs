use crate::models::ModMetadata;
use serde::Deserialize;
use std::io::{Read, Seek};
use zip::ZipArchive;
use zip::result::ZipError;

/// Root-level descriptor entry read from every mod archive.
pub const METADATA_ENTRY: &str = "EternalMod.json";

/// Reads the optional `EternalMod.json` descriptor from mod archives.
///
/// Absence and every kind of malformation (bad encoding, invalid JSON,
/// wrong field types) yield `None`; nothing here returns an error.
pub struct MetadataReader;

/// Descriptor fields after keys were lower-cased.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMetadata {
    name: Option<String>,
    author: Option<String>,
    description: Option<String>,
    version: Option<String>,
    requiredversion: Option<i64>,
    loadpriority: Option<i64>,
}

impl From<RawMetadata> for ModMetadata {
    fn from(raw: RawMetadata) -> Self {
        ModMetadata {
            name: raw.name.unwrap_or_default(),
            author: raw.author.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            version: raw.version.unwrap_or_default(),
            required_version: raw.requiredversion.unwrap_or_default(),
            load_priority: raw.loadpriority.unwrap_or_default(),
        }
    }
}

impl MetadataReader {
    /// Read the descriptor from an open archive.
    ///
    /// # Returns
    /// The parsed descriptor, or `None` when it is missing or malformed
    pub fn read<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Option<ModMetadata> {
        let mut bytes = Vec::new();
        match archive.by_name(METADATA_ENTRY) {
            Ok(mut entry) => {
                if let Err(e) = entry.read_to_end(&mut bytes) {
                    tracing::debug!("Failed to read {}: {}", METADATA_ENTRY, e);
                    return None;
                }
            }
            Err(ZipError::FileNotFound) => return None,
            Err(e) => {
                tracing::debug!("Failed to open {}: {}", METADATA_ENTRY, e);
                return None;
            }
        }

        Self::parse(&bytes)
    }

    /// Parse descriptor bytes, matching field names case-insensitively.
    pub fn parse(bytes: &[u8]) -> Option<ModMetadata> {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text.trim_start_matches('\u{feff}'),
            Err(e) => {
                tracing::debug!("Descriptor is not valid UTF-8: {}", e);
                return None;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Descriptor is not valid JSON: {}", e);
                return None;
            }
        };

        let serde_json::Value::Object(fields) = value else {
            tracing::debug!("Descriptor is not a JSON object");
            return None;
        };

        let lowered: serde_json::Map<String, serde_json::Value> = fields
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .collect();

        match serde_json::from_value::<RawMetadata>(serde_json::Value::Object(lowered)) {
            Ok(raw) => Some(raw.into()),
            Err(e) => {
                tracing::debug!("Descriptor has unexpected field types: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn archive_with(entries: &[(&str, &[u8])]) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        let cursor = writer.finish().unwrap();
        ZipArchive::new(cursor).unwrap()
    }

    #[test]
    fn test_read_full_descriptor() {
        let json = br#"{"name":"Clean HUD","author":"Someone","description":"Less clutter","version":"1.0","loadPriority":-5,"requiredVersion":20}"#;
        let mut archive = archive_with(&[(METADATA_ENTRY, json)]);

        let metadata = MetadataReader::read(&mut archive).unwrap();
        assert_eq!(metadata.name, "Clean HUD");
        assert_eq!(metadata.author, "Someone");
        assert_eq!(metadata.load_priority, -5);
        assert_eq!(metadata.required_version, 20);
    }

    #[test]
    fn test_missing_descriptor_is_none() {
        let mut archive = archive_with(&[("gameresources/decls/a.decl", b"x")]);
        assert!(MetadataReader::read(&mut archive).is_none());
    }

    #[test]
    fn test_keys_match_case_insensitively() {
        let metadata =
            MetadataReader::parse(br#"{"Name":"Upper","LOADPRIORITY":3,"requiredversion":9}"#)
                .unwrap();
        assert_eq!(metadata.name, "Upper");
        assert_eq!(metadata.load_priority, 3);
        assert_eq!(metadata.required_version, 9);
    }

    #[test]
    fn test_missing_fields_default() {
        let metadata = MetadataReader::parse(br#"{"author":"Only Author"}"#).unwrap();
        assert_eq!(metadata.author, "Only Author");
        assert!(metadata.name.is_empty());
        assert_eq!(metadata.load_priority, 0);
        assert_eq!(metadata.required_version, 0);
    }

    #[test]
    fn test_null_fields_default() {
        let metadata = MetadataReader::parse(br#"{"name":null,"version":"2"}"#).unwrap();
        assert!(metadata.name.is_empty());
        assert_eq!(metadata.version, "2");
    }

    #[test]
    fn test_malformed_descriptors_are_none() {
        assert!(MetadataReader::parse(b"{not json").is_none());
        assert!(MetadataReader::parse(b"[1, 2, 3]").is_none());
        assert!(MetadataReader::parse(&[0xff, 0xfe, 0x00]).is_none());
        assert!(MetadataReader::parse(br#"{"loadPriority":"high"}"#).is_none());
    }

    #[test]
    fn test_byte_order_mark_is_accepted() {
        let metadata = MetadataReader::parse("\u{feff}{\"name\":\"Bom\"}".as_bytes()).unwrap();
        assert_eq!(metadata.name, "Bom");
    }
}
