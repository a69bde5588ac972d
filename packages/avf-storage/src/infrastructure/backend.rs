//! Closed set of storage backend variants
//!
//! Adding a backend means adding a variant here and its `VersionStore`
//! implementation; there is no open-ended registration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::disk::DiskStorage;
use super::git::{GitConfig, GitStorage};
use super::perforce::{DepotClient, PerforceConfig, PerforceStorage};
use crate::domain::{
    AssetMetadata, AssetPath, ReferenceIter, ReferenceType, StorageReference, StorageType,
    VersionRecord, VersionStore,
};
use crate::error::Result;

#[derive(Debug)]
pub enum StorageBackend {
    Disk(DiskStorage),
    Git(GitStorage),
    Perforce(PerforceStorage),
}

impl StorageBackend {
    pub fn disk(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(StorageBackend::Disk(DiskStorage::open(root)?))
    }

    pub fn git(path: impl AsRef<Path>, config: GitConfig) -> Result<Self> {
        Ok(StorageBackend::Git(GitStorage::open(path, config)?))
    }

    pub fn perforce(client: Arc<dyn DepotClient>, config: PerforceConfig) -> Result<Self> {
        Ok(StorageBackend::Perforce(PerforceStorage::new(client, config)?))
    }

    fn store(&self) -> &dyn VersionStore {
        match self {
            StorageBackend::Disk(store) => store,
            StorageBackend::Git(store) => store,
            StorageBackend::Perforce(store) => store,
        }
    }
}

impl VersionStore for StorageBackend {
    fn storage_type(&self) -> StorageType {
        self.store().storage_type()
    }

    fn store_version(
        &self,
        content: &[u8],
        asset_path: &AssetPath,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord> {
        self.store().store_version(content, asset_path, metadata)
    }

    fn create_version_from_reference(
        &self,
        reference: &StorageReference,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord> {
        self.store().create_version_from_reference(reference, metadata)
    }

    fn retrieve_version(&self, version_id: &str, target: &Path) -> Result<PathBuf> {
        self.store().retrieve_version(version_id, target)
    }

    fn list_references(
        &self,
        reference_type: Option<ReferenceType>,
        path_pattern: Option<&str>,
    ) -> Result<ReferenceIter<'_>> {
        self.store().list_references(reference_type, path_pattern)
    }

    fn track_move(
        &self,
        old_path: &AssetPath,
        new_path: &AssetPath,
        version_id: &str,
    ) -> Result<VersionRecord> {
        self.store().track_move(old_path, new_path, version_id)
    }

    fn get_version(&self, version_id: &str) -> Result<VersionRecord> {
        self.store().get_version(version_id)
    }

    fn latest_version(&self, asset_path: &AssetPath) -> Result<Option<VersionRecord>> {
        self.store().latest_version(asset_path)
    }

    fn history(&self, asset_path: &AssetPath) -> Result<Vec<VersionRecord>> {
        self.store().history(asset_path)
    }
}

impl From<DiskStorage> for StorageBackend {
    fn from(store: DiskStorage) -> Self {
        StorageBackend::Disk(store)
    }
}

impl From<GitStorage> for StorageBackend {
    fn from(store: GitStorage) -> Self {
        StorageBackend::Git(store)
    }
}

impl From<PerforceStorage> for StorageBackend {
    fn from(store: PerforceStorage) -> Self {
        StorageBackend::Perforce(store)
    }
}
