//! Common test utilities for avf-storage
//!
//! Fixtures for metadata, asset paths and scratch backends.

#![allow(dead_code)]

use avf_storage::{
    AssetMetadata, AssetPath, DiskStorage, GitConfig, GitStorage, InMemoryDepot, PerforceConfig,
    PerforceStorage, StorageBackend, VersionRecord,
};
use std::sync::Arc;
use tempfile::TempDir;

pub const DEPOT_ROOT: &str = "//depot/assets";

pub fn meta(creator: &str) -> AssetMetadata {
    AssetMetadata::new(creator, "maya_2024.2")
}

pub fn tagged(creator: &str, tags: &[&str]) -> AssetMetadata {
    meta(creator).with_tags(tags.iter().copied())
}

pub fn asset(path: &str) -> AssetPath {
    AssetPath::new(path).unwrap()
}

pub fn disk_store() -> (TempDir, DiskStorage) {
    let dir = TempDir::new().unwrap();
    let store = DiskStorage::open(dir.path().join("store")).unwrap();
    (dir, store)
}

pub fn git_store() -> (TempDir, GitStorage) {
    let dir = TempDir::new().unwrap();
    let store = GitStorage::open(dir.path().join("repo"), GitConfig::default()).unwrap();
    (dir, store)
}

pub fn perforce_store() -> (TempDir, Arc<InMemoryDepot>, PerforceStorage) {
    let dir = TempDir::new().unwrap();
    let depot = Arc::new(InMemoryDepot::new());
    let store = PerforceStorage::new(
        depot.clone(),
        PerforceConfig::new(DEPOT_ROOT, dir.path().join("p4-index")),
    )
    .unwrap();
    (dir, depot, store)
}

/// One backend of each kind, sharing a scratch directory
pub fn all_backends() -> (TempDir, Vec<StorageBackend>) {
    let dir = TempDir::new().unwrap();
    let backends = vec![
        StorageBackend::disk(dir.path().join("disk")).unwrap(),
        StorageBackend::git(dir.path().join("repo"), GitConfig::default()).unwrap(),
        StorageBackend::perforce(
            Arc::new(InMemoryDepot::new()),
            PerforceConfig::new(DEPOT_ROOT, dir.path().join("p4-index")),
        )
        .unwrap(),
    ];
    (dir, backends)
}

pub fn ids(records: &[VersionRecord]) -> Vec<&str> {
    records.iter().map(|r| r.version_id.as_str()).collect()
}

/// Follow `previous_version` links from `latest`; returns the number of hops
pub fn lineage_steps(records: &[VersionRecord], latest: &VersionRecord) -> usize {
    let mut steps = 0;
    let mut current = latest;
    while let Some(previous) = &current.lineage.previous_version {
        match records.iter().find(|r| &r.version_id == previous) {
            Some(found) => {
                current = found;
                steps += 1;
            }
            None => break,
        }
    }
    steps
}
