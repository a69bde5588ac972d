//! Storage Domain Models
//!
//! - `StorageReference`: existing content in a backend, not yet a version
//! - `VersionRecord`: one immutable, backend-agnostic version of an asset
//! - `AssetMetadata` / `CustomData`: caller-supplied metadata envelope
//! - `AssetPath`: validated logical asset identity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

use crate::error::{Result, StorageError};

/// Maximum nesting depth accepted in `custom_data`
pub const MAX_CUSTOM_DATA_DEPTH: usize = 32;

/// Number of storage pointer characters kept as the stable version id prefix
const VERSION_KEY_LEN: usize = 16;

// ═══════════════════════════════════════════════════════════════════════════
// Backend / Reference Kinds
// ═══════════════════════════════════════════════════════════════════════════

/// Storage backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Content-addressed local disk store
    Disk,
    /// Commit-based VCS (git)
    Git,
    /// Centralized VCS (perforce changelists)
    Perforce,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Disk => "disk",
            StorageType::Git => "git",
            StorageType::Perforce => "perforce",
        }
    }

    /// The reference type this backend kind resolves natively
    pub fn native_reference(&self) -> ReferenceType {
        match self {
            StorageType::Disk => ReferenceType::File,
            StorageType::Git => ReferenceType::Commit,
            StorageType::Perforce => ReferenceType::Changelist,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disk" => Ok(StorageType::Disk),
            "git" => Ok(StorageType::Git),
            "perforce" | "p4" => Ok(StorageType::Perforce),
            other => Err(StorageError::invalid_input(format!(
                "Unknown storage type: {}",
                other
            ))),
        }
    }
}

/// Kind of content a `StorageReference` names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    /// Content-addressed blob
    File,
    /// Commit in a commit-based VCS
    Commit,
    /// Submitted changelist in a centralized VCS
    Changelist,
    /// Generic point-in-time reference
    Snapshot,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::File => "file",
            ReferenceType::Commit => "commit",
            ReferenceType::Changelist => "changelist",
            ReferenceType::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(ReferenceType::File),
            "commit" => Ok(ReferenceType::Commit),
            "changelist" => Ok(ReferenceType::Changelist),
            "snapshot" => Ok(ReferenceType::Snapshot),
            other => Err(StorageError::invalid_input(format!(
                "Unknown reference type: {}",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Asset Path
// ═══════════════════════════════════════════════════════════════════════════

/// Logical asset identity ("the file path the user thinks in terms of")
///
/// Always relative, `/`-separated, without `.` or `..` components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetPath(String);

impl AssetPath {
    pub fn new(path: impl AsRef<str>) -> Result<Self> {
        let raw = path.as_ref().replace('\\', "/");
        if raw.starts_with('/') {
            return Err(StorageError::invalid_input(format!(
                "Asset path must be relative: {}",
                raw
            )));
        }

        let mut parts = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(StorageError::invalid_input(format!(
                        "Asset path must not contain '..': {}",
                        raw
                    )))
                }
                p if p.chars().any(char::is_control) => {
                    return Err(StorageError::invalid_input(format!(
                        "Asset path contains control characters: {:?}",
                        raw
                    )))
                }
                p => parts.push(p),
            }
        }

        if parts.is_empty() {
            return Err(StorageError::invalid_input("Asset path is empty"));
        }
        if parts[0].ends_with(':') {
            return Err(StorageError::invalid_input(format!(
                "Asset path must be relative: {}",
                raw
            )));
        }

        Ok(Self(parts.join("/")))
    }

    /// Build from a filesystem path made only of normal components
    pub fn from_relative_path(path: &Path) -> Result<Self> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(StorageError::invalid_input(format!(
                        "Not a relative asset path: {}",
                        path.display()
                    )))
                }
            }
        }
        Self::new(parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path component
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Stable fixed-length key for filesystem and ref naming
    pub fn key(&self) -> String {
        content_hash(self.0.as_bytes())
    }

    /// Moves must change the path
    pub fn check_move_target(&self, new_path: &AssetPath) -> Result<()> {
        if self == new_path {
            return Err(StorageError::invalid_input(format!(
                "Cannot move {} onto itself",
                self
            ))
            .with_asset(self.as_str()));
        }
        Ok(())
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AssetPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AssetPath {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AssetPath> for String {
    fn from(path: AssetPath) -> Self {
        path.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Storage Reference
// ═══════════════════════════════════════════════════════════════════════════

/// Reference to content that already exists in a backend
///
/// Transient: constructed, resolved once through
/// `VersionStore::create_version_from_reference`, discarded. Holding a
/// reference never implies that a `VersionRecord` exists for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageReference {
    /// Backend kind the reference belongs to
    pub storage_type: StorageType,
    /// Backend-native identity (content hash, commit id, changelist number)
    pub storage_id: String,
    /// Logical path in the backend namespace at the time of reference
    pub path: String,
    /// Which backend operations are legal on this reference
    pub reference_type: ReferenceType,
    /// Backend-supplied facts (size, author, message, ...)
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl StorageReference {
    pub fn new(
        storage_type: StorageType,
        storage_id: impl Into<String>,
        path: impl Into<String>,
        reference_type: ReferenceType,
    ) -> Self {
        Self {
            storage_type,
            storage_id: storage_id.into(),
            path: path.into(),
            reference_type,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Reject references whose kind the target backend cannot resolve
    pub fn ensure_type(&self, backend: StorageType, expected: ReferenceType) -> Result<()> {
        if self.reference_type != expected {
            return Err(StorageError::unsupported_reference(format!(
                "{} backend cannot resolve '{}' references (expected '{}')",
                backend, self.reference_type, expected
            ))
            .with_asset(self.path.clone()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Metadata
// ═══════════════════════════════════════════════════════════════════════════

/// Open, recursively structured `custom_data` envelope
///
/// Only well-formedness is checked: non-empty keys at every level and a
/// bounded nesting depth. No schema is ever imposed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomData(serde_json::Map<String, serde_json::Value>);

impl CustomData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; it must be an object
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => {
                let data = Self(map);
                data.validate()?;
                Ok(data)
            }
            serde_json::Value::Null => Ok(Self::default()),
            other => Err(StorageError::invalid_input(format!(
                "custom_data must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    pub fn validate(&self) -> Result<()> {
        fn check(value: &serde_json::Value, depth: usize) -> Result<()> {
            if depth > MAX_CUSTOM_DATA_DEPTH {
                return Err(StorageError::invalid_input(format!(
                    "custom_data nesting exceeds {} levels",
                    MAX_CUSTOM_DATA_DEPTH
                )));
            }
            match value {
                serde_json::Value::Object(map) => {
                    for (key, nested) in map {
                        if key.is_empty() {
                            return Err(StorageError::invalid_input(
                                "custom_data keys must not be empty",
                            ));
                        }
                        check(nested, depth + 1)?;
                    }
                    Ok(())
                }
                serde_json::Value::Array(items) => {
                    items.iter().try_for_each(|item| check(item, depth + 1))
                }
                _ => Ok(()),
            }
        }

        for (key, value) in &self.0 {
            if key.is_empty() {
                return Err(StorageError::invalid_input(
                    "custom_data keys must not be empty",
                ));
            }
            check(value, 1)?;
        }
        Ok(())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Version metadata supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Name of the creator (required)
    pub creator: String,
    /// Version of the tool that produced the content (required)
    pub tool_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub custom_data: CustomData,
}

impl AssetMetadata {
    pub fn new(creator: impl Into<String>, tool_version: impl Into<String>) -> Self {
        Self {
            creator: creator.into(),
            tool_version: tool_version.into(),
            description: None,
            tags: BTreeSet::new(),
            custom_data: CustomData::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_custom_data(mut self, custom_data: CustomData) -> Self {
        self.custom_data = custom_data;
        self
    }

    /// Validate and normalize (trimmed creator/tool version/tags)
    pub fn validated(mut self) -> Result<Self> {
        self.creator = self.creator.trim().to_string();
        self.tool_version = self.tool_version.trim().to_string();
        if self.creator.is_empty() {
            return Err(StorageError::invalid_input("metadata.creator is required"));
        }
        if self.tool_version.is_empty() {
            return Err(StorageError::invalid_input(
                "metadata.tool_version is required",
            ));
        }

        let mut tags = BTreeSet::new();
        for tag in &self.tags {
            let tag = tag.trim();
            if tag.is_empty() {
                return Err(StorageError::invalid_input("tags must not be empty"));
            }
            if tag.chars().any(char::is_control) {
                return Err(StorageError::invalid_input(format!(
                    "tag contains control characters: {:?}",
                    tag
                )));
            }
            tags.insert(tag.to_string());
        }
        self.tags = tags;

        self.custom_data.validate()?;
        Ok(self)
    }

    pub fn has_all_tags<'a>(&self, tags: impl IntoIterator<Item = &'a String>) -> bool {
        tags.into_iter().all(|tag| self.tags.contains(tag))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Version Record
// ═══════════════════════════════════════════════════════════════════════════

/// How a version came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionEvent {
    /// Fresh bytes stored through `store_version`
    Created,
    /// Existing content adopted through a `StorageReference`
    Referenced,
    /// Rename of an existing version
    Moved,
}

impl VersionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionEvent::Created => "created",
            VersionEvent::Referenced => "referenced",
            VersionEvent::Moved => "moved",
        }
    }
}

impl fmt::Display for VersionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionEvent {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(VersionEvent::Created),
            "referenced" => Ok(VersionEvent::Referenced),
            "moved" => Ok(VersionEvent::Moved),
            other => Err(StorageError::serialization(format!(
                "Unknown version event: {}",
                other
            ))),
        }
    }
}

/// Link to the immediate predecessor of a version within one backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// Previous `version_id` for the same asset in the same backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    /// Set when this version is a rename: the path it was moved from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
}

impl Lineage {
    pub fn after(previous_version: Option<String>) -> Self {
        Self {
            previous_version,
            previous_path: None,
        }
    }

    pub fn is_move(&self) -> bool {
        self.previous_path.is_some()
    }
}

/// One immutable version of an asset, bound to exactly one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Unique within its backend, never reused
    pub version_id: String,
    pub storage_type: StorageType,
    /// Physical content identity inside the backend (blob hash / git blob oid)
    pub storage_pointer: String,
    /// Backend-native revision carrying the content (commit sha, changelist)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub asset_path: AssetPath,
    pub metadata: AssetMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub lineage: Lineage,
    pub event: VersionEvent,
}

impl VersionRecord {
    /// Stable content key shared by every version of identical content
    pub fn content_key(&self) -> &str {
        self.version_id
            .split_once('-')
            .map(|(key, _)| key)
            .unwrap_or(&self.version_id)
    }

    /// Identity across the whole deployment
    pub fn key(&self) -> (StorageType, &str) {
        (self.storage_type, &self.version_id)
    }
}

/// Compute SHA256 hex digest of content
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Mint a version id: stable content prefix + unique creation instant
///
/// Format: `"<first 16 chars of pointer>-<%Y%m%dT%H%M%S%6fZ>"`
pub fn mint_version_id(storage_pointer: &str, created_at: &DateTime<Utc>) -> String {
    let key: String = storage_pointer
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(VERSION_KEY_LEN)
        .collect();
    format!("{}-{}", key, created_at.format("%Y%m%dT%H%M%S%6fZ"))
}

/// Version ids only ever contain ASCII alphanumerics, `-`, `_` and `.`
pub fn is_valid_version_id(version_id: &str) -> bool {
    !version_id.is_empty()
        && version_id.len() <= 128
        && version_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !version_id.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_asset_path_normalization() {
        assert_eq!(AssetPath::new("chars/hero.fbx").unwrap().as_str(), "chars/hero.fbx");
        assert_eq!(AssetPath::new("./chars//hero.fbx").unwrap().as_str(), "chars/hero.fbx");
        assert_eq!(AssetPath::new("chars\\hero.fbx").unwrap().as_str(), "chars/hero.fbx");
        assert_eq!(AssetPath::new("chars/hero.fbx").unwrap().file_name(), "hero.fbx");
    }

    #[test]
    fn test_asset_path_rejects_escapes() {
        assert!(AssetPath::new("").is_err());
        assert!(AssetPath::new("./").is_err());
        assert!(AssetPath::new("/abs/hero.fbx").is_err());
        assert!(AssetPath::new("../hero.fbx").is_err());
        assert!(AssetPath::new("chars/../../hero.fbx").is_err());
        assert!(AssetPath::new("C:/hero.fbx").is_err());
    }

    #[test]
    fn test_asset_path_serde() {
        let path = AssetPath::new("props/crate.obj").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"props/crate.obj\"");

        let bad: std::result::Result<AssetPath, _> = serde_json::from_str("\"../x\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_storage_type_parsing() {
        assert_eq!("disk".parse::<StorageType>().unwrap(), StorageType::Disk);
        assert_eq!("GIT".parse::<StorageType>().unwrap(), StorageType::Git);
        assert_eq!("p4".parse::<StorageType>().unwrap(), StorageType::Perforce);
        assert!("svn".parse::<StorageType>().is_err());
        assert_eq!(StorageType::Git.native_reference(), ReferenceType::Commit);
    }

    #[test]
    fn test_reference_type_check() {
        let reference = StorageReference::new(StorageType::Disk, "abc", "a.png", ReferenceType::Commit);
        let err = reference
            .ensure_type(StorageType::Disk, ReferenceType::File)
            .unwrap_err();
        assert!(err.is(crate::ErrorKind::UnsupportedReference));
        assert_eq!(err.asset_path.as_deref(), Some("a.png"));
    }

    #[test]
    fn test_metadata_validation() {
        let meta = AssetMetadata::new("  jane ", "maya_2024")
            .with_tags([" texture", "character", "texture"])
            .validated()
            .unwrap();
        assert_eq!(meta.creator, "jane");
        assert_eq!(meta.tags.len(), 2);
        assert!(meta.tags.contains("texture"));

        assert!(AssetMetadata::new("", "maya").validated().is_err());
        assert!(AssetMetadata::new("jane", " ").validated().is_err());
        assert!(AssetMetadata::new("jane", "maya")
            .with_tags([""])
            .validated()
            .is_err());
    }

    #[test]
    fn test_custom_data_well_formedness() {
        let ok = CustomData::from_value(serde_json::json!({
            "resolution": "4k",
            "lods": [1, 2, {"name": "lod3"}],
            "nested": {"a": {"b": true}}
        }))
        .unwrap();
        assert_eq!(ok.get("resolution").unwrap(), "4k");

        assert!(CustomData::from_value(serde_json::json!([1, 2])).is_err());
        assert!(CustomData::from_value(serde_json::json!({"": 1})).is_err());
        assert!(CustomData::from_value(serde_json::json!({"a": {"": 1}})).is_err());

        let mut deep = serde_json::json!(1);
        for _ in 0..(MAX_CUSTOM_DATA_DEPTH + 1) {
            deep = serde_json::json!({ "k": deep });
        }
        assert!(CustomData::from_value(deep).is_err());
    }

    #[test]
    fn test_version_id_minting() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let hash = content_hash(b"model data");
        let id = mint_version_id(&hash, &at);

        assert!(id.starts_with(&hash[..16]));
        assert!(id.ends_with("20240115T103000000000Z"));
        assert!(is_valid_version_id(&id));

        let later = at + chrono::Duration::microseconds(1);
        assert_ne!(id, mint_version_id(&hash, &later));
    }

    #[test]
    fn test_version_id_validation() {
        assert!(is_valid_version_id("abc-123"));
        assert!(!is_valid_version_id(""));
        assert!(!is_valid_version_id("../etc"));
        assert!(!is_valid_version_id("a/b"));
        assert!(!is_valid_version_id(".hidden"));
    }

    #[test]
    fn test_content_hash() {
        let hash1 = content_hash(b"texture");
        let hash2 = content_hash(b"texture");
        let hash3 = content_hash(b"texture v2");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }
}
