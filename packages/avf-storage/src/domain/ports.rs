//! Storage Ports (Trait Interfaces)
//!
//! - `VersionStore`: capability every storage backend implements
//! - `VersionRepository`: persistent, queryable index over version records

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::models::{AssetMetadata, AssetPath, ReferenceType, StorageReference, StorageType, VersionRecord};
use crate::error::Result;

/// Finite, restartable sequence of references
///
/// Each call to `list_references` produces a fresh snapshot; no cursor
/// stability is promised across calls.
pub type ReferenceIter<'a> = Box<dyn Iterator<Item = Result<StorageReference>> + 'a>;

/// Storage backend capability
///
/// Implemented by every backend variant (disk, git, perforce) and dispatched
/// by `StorageBackend`.
pub trait VersionStore: Send + Sync {
    /// Backend kind
    fn storage_type(&self) -> StorageType;

    /// Copy content into the backend's addressing scheme
    ///
    /// Identical content reuses the existing storage pointer (no duplicated
    /// bytes) but still mints a new `VersionRecord`.
    ///
    /// # Errors
    ///
    /// - `StorageWrite` on I/O or backend-native write failure; partial
    ///   writes leave no visible artifact
    fn store_version(
        &self,
        content: &[u8],
        asset_path: &AssetPath,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord>;

    /// Bind a new version to content already present in the backend
    ///
    /// Never copies data. Resolving the same reference twice never creates
    /// a second physical storage pointer, though it mints a second record.
    ///
    /// # Errors
    ///
    /// - `UnsupportedReference` if the reference type is not native here
    /// - `InvalidReference` if `storage_id` is malformed
    /// - `NotFound` if the referenced content does not exist
    fn create_version_from_reference(
        &self,
        reference: &StorageReference,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord>;

    /// Materialize the bytes of a version at `target`
    ///
    /// # Errors
    ///
    /// - `NotFound` if `version_id` is unknown to this backend
    fn retrieve_version(&self, version_id: &str, target: &Path) -> Result<PathBuf>;

    /// Enumerate backend-native content, optionally filtered
    ///
    /// `path_pattern` is a substring match on the reference path. A filter
    /// type this backend does not produce yields an empty sequence.
    fn list_references(
        &self,
        reference_type: Option<ReferenceType>,
        path_pattern: Option<&str>,
    ) -> Result<ReferenceIter<'_>>;

    /// Record a rename of `version_id` from `old_path` to `new_path`
    ///
    /// The returned record has `lineage.previous_path == old_path` and
    /// `lineage.previous_version == version_id`.
    fn track_move(
        &self,
        old_path: &AssetPath,
        new_path: &AssetPath,
        version_id: &str,
    ) -> Result<VersionRecord>;

    /// Look up a version minted by this backend
    fn get_version(&self, version_id: &str) -> Result<VersionRecord>;

    /// Current head of an asset in this backend
    fn latest_version(&self, asset_path: &AssetPath) -> Result<Option<VersionRecord>>;

    /// Lineage chain ending at the asset's head, oldest first
    fn history(&self, asset_path: &AssetPath) -> Result<Vec<VersionRecord>>;
}

/// Version search predicates (AND semantics across all provided fields)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionQuery {
    /// Record must carry ALL of these tags
    pub tags: Vec<String>,
    pub creator: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub before: Option<DateTime<Utc>>,
    pub storage_type: Option<StorageType>,
    pub asset_path: Option<AssetPath>,
    pub limit: Option<usize>,
}

impl VersionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    pub fn after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    pub fn storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = Some(storage_type);
        self
    }

    pub fn asset_path(mut self, asset_path: AssetPath) -> Self {
        self.asset_path = Some(asset_path);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate the predicates against one record
    pub fn matches(&self, record: &VersionRecord) -> bool {
        record.metadata.has_all_tags(self.tags.iter())
            && self
                .creator
                .as_ref()
                .map_or(true, |c| &record.metadata.creator == c)
            && self.after.map_or(true, |after| record.created_at >= after)
            && self.before.map_or(true, |before| record.created_at <= before)
            && self
                .storage_type
                .map_or(true, |st| record.storage_type == st)
            && self
                .asset_path
                .as_ref()
                .map_or(true, |p| &record.asset_path == p)
    }
}

/// Repository statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    /// Total number of version records
    pub total_versions: usize,

    /// Number of distinct asset paths
    pub total_assets: usize,

    /// Number of distinct tags
    pub total_tags: usize,

    /// Records per backend kind
    pub versions_by_storage: BTreeMap<StorageType, usize>,
}

/// Version Repository Port
///
/// Append-only: records are never updated. Inserts are atomic per call.
pub trait VersionRepository: Send + Sync {
    /// Idempotent schema initialization
    fn create_tables(&self) -> Result<()>;

    /// Append one record
    ///
    /// # Errors
    ///
    /// - `DuplicateVersion` if `(storage_type, version_id)` already exists
    fn insert(&self, record: &VersionRecord) -> Result<()>;

    /// Append many records as one logical batch (all or none)
    fn insert_batch(&self, records: &[VersionRecord]) -> Result<()>;

    /// # Errors
    ///
    /// - `NotFound` if the record does not exist
    fn get_version(&self, storage_type: StorageType, version_id: &str) -> Result<VersionRecord>;

    /// History of an asset, `created_at` ascending
    ///
    /// Follows lineage across renames and merges chains of different
    /// backends by timestamp.
    fn get_version_history(&self, asset_path: &AssetPath) -> Result<Vec<VersionRecord>>;

    /// Conjunctive search; an empty result is not an error
    fn find_versions(&self, query: &VersionQuery) -> Result<Vec<VersionRecord>>;

    /// Distinct tags, sorted
    fn list_tags(&self) -> Result<Vec<String>>;

    fn stats(&self) -> Result<RepositoryStats>;

    /// Administrative removal of every record of an asset
    ///
    /// Not transactional with respect to backends; returns the number of
    /// records removed.
    fn prune_history(&self, asset_path: &AssetPath) -> Result<usize>;
}
