//! Remote metadata types
//!
//! Defines the metadata payloads returned by the remote folder API. Unknown
//! fields are preserved in `extra` so that cached metadata round-trips to
//! the same JSON the remote sent.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Deserialize a size that might be encoded as a number, a string or null.
fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleU64Visitor;

    impl<'de> de::Visitor<'de> for FlexibleU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| de::Error::custom("negative value for u64"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.parse::<u64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(FlexibleU64Visitor)
}

/// Metadata for a single file, as returned by a metadata or content call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Full path within the access root, e.g. `/notes/a.txt`
    pub path: String,
    /// Revision token identifying this exact version of the content
    pub rev: String,
    /// Content length in bytes
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub bytes: u64,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub is_deleted: bool,
    /// Remaining fields, kept opaque
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileMetadata {
    /// Create metadata with only the fields the cache depends on
    pub fn new(path: impl Into<String>, rev: impl Into<String>, bytes: u64) -> Self {
        Self {
            path: path.into(),
            rev: rev.into(),
            bytes,
            modified: None,
            is_dir: false,
            is_deleted: false,
            extra: Map::new(),
        }
    }

    /// Get the base name (last component of path)
    pub fn base_name(&self) -> &str {
        let name = self.path.trim_end_matches('/');
        name.rsplit('/').next().unwrap_or(name)
    }
}

/// One entry of a folder listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub path: String,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata for the tracked folder, including its listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderMetadata {
    pub path: String,
    /// Listing hash; sent back on the next conditional fetch
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub contents: Vec<EntryMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FolderMetadata {
    /// Names of the listed entries, relative to `folder`.
    ///
    /// The first occurrence of the folder path and any leading slashes are
    /// stripped from each entry path.
    pub fn file_names(&self, folder: &str) -> Vec<String> {
        let folder = folder.trim_matches('/');
        self.contents
            .iter()
            .map(|entry| relative_name(&entry.path, folder))
            .collect()
    }
}

fn relative_name(path: &str, folder: &str) -> String {
    let path = path.trim_start_matches('/');
    let stripped = match path.strip_prefix(folder) {
        // Only a whole path segment counts as the folder
        Some(rest) if !folder.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => path,
    };
    stripped.trim_start_matches('/').to_string()
}
