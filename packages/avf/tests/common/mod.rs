//! Common test utilities for avf
//!
//! A three-backend orchestrator fixture plus failure-injecting depot and
//! repository doubles.

#![allow(dead_code)]

use avf::storage::{
    AssetMetadata, AssetPath, Changelist, DepotClient, InMemoryDepot, PerforceConfig,
    RepositoryStats, SqliteVersionRepository, StorageBackend, StorageError, StorageType,
    VersionQuery, VersionRecord, VersionRepository,
};
use avf::{AssetVersion, AssetVersionBuilder};
use std::sync::Arc;
use tempfile::TempDir;

pub const DEPOT_ROOT: &str = "//depot/assets";

pub fn meta(creator: &str) -> AssetMetadata {
    AssetMetadata::new(creator, "maya_2024.2")
}

pub fn asset(path: &str) -> AssetPath {
    AssetPath::new(path).unwrap()
}

/// Depot whose server rejects every submit
#[derive(Debug, Default)]
pub struct FailingDepot;

impl DepotClient for FailingDepot {
    fn submit(&self, _user: &str, _description: &str, _files: &[(String, Vec<u8>)]) -> avf::storage::Result<u64> {
        Err(StorageError::write("depot offline: submit rejected"))
    }

    fn sync(&self, changelist: u64, depot_path: &str) -> avf::storage::Result<Vec<u8>> {
        Err(StorageError::not_found(format!("{}@{}", depot_path, changelist)))
    }

    fn describe(&self, _changelist: u64) -> avf::storage::Result<Option<Changelist>> {
        Ok(None)
    }

    fn changes(&self, _path_prefix: &str) -> avf::storage::Result<Vec<Changelist>> {
        Ok(Vec::new())
    }

    fn head_revision(&self, _depot_path: &str) -> avf::storage::Result<Option<u64>> {
        Ok(None)
    }

    fn move_file(&self, _user: &str, _description: &str, _from: &str, _to: &str) -> avf::storage::Result<u64> {
        Err(StorageError::write("depot offline: move rejected"))
    }
}

/// Repository that accepts reads but rejects every write
#[derive(Debug, Default)]
pub struct ReadOnlyRepository;

impl VersionRepository for ReadOnlyRepository {
    fn create_tables(&self) -> avf::storage::Result<()> {
        Ok(())
    }

    fn insert(&self, _record: &VersionRecord) -> avf::storage::Result<()> {
        Err(StorageError::database("database is read-only"))
    }

    fn insert_batch(&self, _records: &[VersionRecord]) -> avf::storage::Result<()> {
        Err(StorageError::database("database is read-only"))
    }

    fn get_version(&self, _storage_type: StorageType, version_id: &str) -> avf::storage::Result<VersionRecord> {
        Err(StorageError::version_not_found(version_id))
    }

    fn get_version_history(&self, _asset_path: &AssetPath) -> avf::storage::Result<Vec<VersionRecord>> {
        Ok(Vec::new())
    }

    fn find_versions(&self, _query: &VersionQuery) -> avf::storage::Result<Vec<VersionRecord>> {
        Ok(Vec::new())
    }

    fn list_tags(&self) -> avf::storage::Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn stats(&self) -> avf::storage::Result<RepositoryStats> {
        Ok(RepositoryStats::default())
    }

    fn prune_history(&self, _asset_path: &AssetPath) -> avf::storage::Result<usize> {
        Ok(0)
    }
}

/// Disk `local`, git `vcs` and perforce `depot` backends without a repository
pub fn backends(dir: &TempDir, depot: Arc<dyn DepotClient>) -> AssetVersionBuilder {
    AssetVersion::builder()
        .backend("local", StorageBackend::disk(dir.path().join("store")).unwrap())
        .backend(
            "vcs",
            StorageBackend::git(dir.path().join("repo"), Default::default()).unwrap(),
        )
        .backend(
            "depot",
            StorageBackend::perforce(
                depot,
                PerforceConfig::new(DEPOT_ROOT, dir.path().join("p4-index")),
            )
            .unwrap(),
        )
}

/// All three backends plus an in-memory SQLite repository
pub fn orchestrator() -> (TempDir, AssetVersion) {
    let dir = TempDir::new().unwrap();
    let avf = backends(&dir, Arc::new(InMemoryDepot::new()))
        .repository(SqliteVersionRepository::in_memory().unwrap())
        .build()
        .unwrap();
    (dir, avf)
}

/// Write `content` to `name` under the scratch dir and return its path
pub fn scratch_file(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}
