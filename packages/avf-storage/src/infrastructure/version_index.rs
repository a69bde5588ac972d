//! Per-backend version index
//!
//! Backends keep their own record of minted versions, out-of-band from the
//! content itself (commits are immutable, blobs carry no metadata):
//!
//! ```text
//! <root>/versions/<version_id>.json   one side-file per record, exclusive create
//! <root>/heads/<sha256(asset_path)>   current head version id of an asset
//! <root>/tmp/                         staging for atomic writes
//! ```
//!
//! Head updates of one asset are serialized inside the process. Two
//! processes racing on the same asset both succeed; the head ends up on the
//! later writer and the earlier record stays reachable by id.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::fs_atomic;
use crate::domain::{
    collect_history, is_valid_version_id, mint_version_id, AssetMetadata, AssetPath, Lineage,
    StorageType, VersionEvent, VersionRecord,
};
use crate::error::{Result, StorageError};

const MAX_MINT_ATTEMPTS: usize = 16;

/// Clock issuing strictly increasing, microsecond-truncated instants
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next instant, strictly after every previous one and after `floor`
    pub fn next_after(&self, floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let tick = Duration::microseconds(1);
        let mut last = self.last.lock();

        let mut candidate = Utc::now().trunc_subsecs(6);
        if let Some(prev) = *last {
            candidate = candidate.max(prev + tick);
        }
        if let Some(floor) = floor {
            candidate = candidate.max(floor.trunc_subsecs(6) + tick);
        }

        *last = Some(candidate);
        candidate
    }
}

/// Everything a backend decides about a new version; the index fills in
/// identity, time and (unless overridden) lineage
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub storage_pointer: String,
    pub revision: Option<String>,
    pub metadata: AssetMetadata,
    pub event: VersionEvent,
    /// `None`: chain onto the asset's current head
    pub lineage: Option<Lineage>,
}

impl RecordDraft {
    pub fn new(storage_pointer: impl Into<String>, metadata: AssetMetadata, event: VersionEvent) -> Self {
        Self {
            storage_pointer: storage_pointer.into(),
            revision: None,
            metadata,
            event,
            lineage: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_lineage(mut self, lineage: Lineage) -> Self {
        self.lineage = Some(lineage);
        self
    }
}

/// Version side-file store shared by every backend variant
#[derive(Debug)]
pub struct VersionIndex {
    root: PathBuf,
    storage_type: StorageType,
    clock: MonotonicClock,
    head_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VersionIndex {
    pub fn open(root: impl Into<PathBuf>, storage_type: StorageType) -> Result<Self> {
        let root = root.into();
        for dir in ["versions", "heads", "tmp"] {
            fs::create_dir_all(root.join(dir)).map_err(|e| {
                StorageError::write(format!(
                    "Cannot create version index at {}",
                    root.display()
                ))
                .with_source(e)
            })?;
        }
        Ok(Self {
            root,
            storage_type,
            clock: MonotonicClock::new(),
            head_locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn version_path(&self, version_id: &str) -> PathBuf {
        self.root.join("versions").join(format!("{}.json", version_id))
    }

    fn head_path(&self, asset_path: &AssetPath) -> PathBuf {
        self.root.join("heads").join(asset_path.key())
    }

    /// Current head version id of an asset
    pub fn head(&self, asset_path: &AssetPath) -> Result<Option<String>> {
        match fs::read_to_string(self.head_path(asset_path)) {
            Ok(id) => {
                let id = id.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a record; malformed or unknown ids yield `None`
    pub fn get(&self, version_id: &str) -> Result<Option<VersionRecord>> {
        if !is_valid_version_id(version_id) {
            return Ok(None);
        }
        let bytes = match fs::read(self.version_path(version_id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: VersionRecord = serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::serialization(format!("Corrupt version side-file: {}", version_id))
                .with_source(e)
        })?;
        Ok(Some(record))
    }

    /// Look up a record, `NotFound` if absent
    pub fn require(&self, version_id: &str) -> Result<VersionRecord> {
        self.get(version_id)?.ok_or_else(|| {
            StorageError::version_not_found(version_id).with_backend(self.storage_type.as_str())
        })
    }

    pub fn latest(&self, asset_path: &AssetPath) -> Result<Option<VersionRecord>> {
        match self.head(asset_path)? {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    /// Lineage chain ending at the asset's head, oldest first
    pub fn history(&self, asset_path: &AssetPath) -> Result<Vec<VersionRecord>> {
        let seed: Vec<VersionRecord> = self.latest(asset_path)?.into_iter().collect();
        collect_history(seed, |_, id| self.get(id))
    }

    /// Mint a version for `asset_path` and make it the asset's head
    ///
    /// `created_at` is strictly greater than the previous head's. The
    /// side-file is created exclusively; a collision (another process minted
    /// the same id) retries with a later instant.
    pub fn publish(&self, asset_path: &AssetPath, draft: RecordDraft) -> Result<VersionRecord> {
        let lock = self
            .head_locks
            .entry(asset_path.key())
            .or_default()
            .clone();
        let _guard = lock.lock();

        let head = self.latest(asset_path)?;
        let lineage = draft
            .lineage
            .unwrap_or_else(|| Lineage::after(head.as_ref().map(|h| h.version_id.clone())));

        let mut floor = head.as_ref().map(|h| h.created_at);
        for _ in 0..MAX_MINT_ATTEMPTS {
            let created_at = self.clock.next_after(floor);
            let record = VersionRecord {
                version_id: mint_version_id(&draft.storage_pointer, &created_at),
                storage_type: self.storage_type,
                storage_pointer: draft.storage_pointer.clone(),
                revision: draft.revision.clone(),
                asset_path: asset_path.clone(),
                metadata: draft.metadata.clone(),
                created_at,
                lineage: lineage.clone(),
                event: draft.event,
            };

            let bytes = serde_json::to_vec_pretty(&record)?;
            let created = fs_atomic::write_atomic(
                &self.staging_dir(),
                &self.version_path(&record.version_id),
                &bytes,
                false,
            )
            .map_err(|e| self.write_error(asset_path, "version side-file", e))?;

            if !created {
                tracing::debug!(
                    version_id = %record.version_id,
                    "version id already taken, retrying with a later instant"
                );
                floor = Some(created_at);
                continue;
            }

            fs_atomic::write_atomic(
                &self.staging_dir(),
                &self.head_path(asset_path),
                record.version_id.as_bytes(),
                true,
            )
            .map_err(|e| self.write_error(asset_path, "head", e))?;

            return Ok(record);
        }

        Err(StorageError::write(format!(
            "Could not mint a unique version id after {} attempts",
            MAX_MINT_ATTEMPTS
        ))
        .with_backend(self.storage_type.as_str())
        .with_asset(asset_path.as_str()))
    }

    fn write_error(&self, asset_path: &AssetPath, what: &str, err: io::Error) -> StorageError {
        StorageError::write(format!("Failed to write {}: {}", what, err))
            .with_backend(self.storage_type.as_str())
            .with_asset(asset_path.as_str())
            .with_source(err)
    }
}
