//! Content-addressed local disk backend
//!
//! ```text
//! <root>/objects/aa/bb/<sha256>   read-only deduplicated blobs
//! <root>/files/<asset_path>       namespace: latest content per asset
//! <root>/index/                   version index (see `version_index`)
//! <root>/tmp/                     staging for atomic writes
//! ```
//!
//! Namespace entries are hard links to their blob when the filesystem allows
//! it, copies otherwise. Files dropped into `files/` by other tools are
//! adoptable through `FILE` references.
//!
//! The namespace mirrors asset paths, so asset `a` and asset `a/b` cannot
//! both have an entry. Whichever claims the location first keeps it; the
//! other is still stored and versioned, only without a namespace entry.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::fs_atomic;
use super::version_index::{RecordDraft, VersionIndex};
use crate::domain::{
    content_hash, AssetMetadata, AssetPath, Lineage, ReferenceIter, ReferenceType,
    StorageReference, StorageType, VersionEvent, VersionRecord, VersionStore,
};
use crate::error::{ErrorKind, Result, StorageError};

const BACKEND: &str = "disk";

/// Local content-addressed store
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
    index: VersionIndex,
}

impl DiskStorage {
    /// Open (creating if needed) a disk store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in ["objects", "files", "tmp"] {
            fs::create_dir_all(root.join(dir)).map_err(|e| {
                StorageError::write(format!("Cannot create disk store at {}", root.display()))
                    .with_backend(BACKEND)
                    .with_source(e)
            })?;
        }
        let index = VersionIndex::open(root.join("index"), StorageType::Disk)?;
        Ok(Self { root, index })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Object location of a blob; `hash` must be a lowercase SHA-256 digest
    pub fn blob_path(&self, hash: &str) -> Result<PathBuf> {
        if !is_sha256_hex(hash) {
            return Err(StorageError::serialization(format!(
                "Not a SHA-256 storage pointer: {:?}",
                hash
            ))
            .with_backend(BACKEND));
        }
        Ok(self
            .root
            .join("objects")
            .join(&hash[..2])
            .join(&hash[2..4])
            .join(hash))
    }

    /// Namespace location of an asset
    pub fn namespace_path(&self, asset_path: &AssetPath) -> PathBuf {
        asset_path
            .as_str()
            .split('/')
            .fold(self.root.join("files"), |path, part| path.join(part))
    }

    pub fn has_blob(&self, hash: &str) -> bool {
        self.blob_path(hash).map_or(false, |blob| blob.is_file())
    }

    /// Number of physical blobs held
    pub fn object_count(&self) -> Result<usize> {
        let mut count = 0;
        for entry in WalkDir::new(self.root.join("objects")) {
            let entry = entry.map_err(walk_error)?;
            if entry.file_type().is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Write a blob unless present. Returns `(hash, newly_written)`.
    fn put_blob(&self, content: &[u8], asset_path: &AssetPath) -> Result<(String, bool)> {
        let hash = content_hash(content);
        let blob = self.blob_path(&hash)?;
        if blob.is_file() {
            return Ok((hash, false));
        }

        let written = fs_atomic::write_atomic(&self.staging_dir(), &blob, content, false)
            .map_err(|e| write_error(asset_path, "blob", e))?;
        if written {
            fs_atomic::make_read_only(&blob).map_err(|e| write_error(asset_path, "blob", e))?;
        }
        Ok((hash, written))
    }

    /// Point the namespace entry at a blob
    ///
    /// Returns `false` when another asset occupies the location (a file on
    /// one of its parents, or a directory at the entry itself).
    fn link_namespace(&self, asset_path: &AssetPath, hash: &str) -> Result<bool> {
        let entry = self.namespace_path(asset_path);
        match fs_atomic::replace_with_link(&self.staging_dir(), &self.blob_path(hash)?, &entry) {
            Ok(()) => Ok(true),
            Err(_) if self.namespace_occupied(asset_path) => {
                tracing::warn!(
                    asset = %asset_path,
                    "namespace location held by another asset, skipping namespace entry"
                );
                Ok(false)
            }
            Err(e) => Err(write_error(asset_path, "namespace entry", e)),
        }
    }

    fn namespace_occupied(&self, asset_path: &AssetPath) -> bool {
        let files_root = self.root.join("files");
        let entry = self.namespace_path(asset_path);
        if entry.is_dir() {
            return true;
        }
        entry
            .ancestors()
            .skip(1)
            .take_while(|ancestor| *ancestor != files_root)
            .any(|ancestor| ancestor.exists() && !ancestor.is_dir())
    }

    /// Adopt a foreign namespace file into `objects/` after verifying it
    fn adopt_namespace_file(&self, asset_path: &AssetPath, expected: &str) -> Result<()> {
        let source = self.namespace_path(asset_path);
        if !source.is_file() {
            return Err(StorageError::not_found(format!(
                "No blob {} and no file at {}",
                expected, asset_path
            ))
            .with_backend(BACKEND)
            .with_asset(asset_path.as_str()));
        }

        let (actual, _) = fs_atomic::hash_file(&source)?;
        if actual != expected {
            return Err(StorageError::invalid_reference(format!(
                "Content of {} hashes to {}, not {}",
                asset_path, actual, expected
            ))
            .with_backend(BACKEND)
            .with_asset(asset_path.as_str()));
        }

        let blob = self.blob_path(expected)?;
        if fs_atomic::link_or_copy(&self.staging_dir(), &source, &blob)
            .map_err(|e| write_error(asset_path, "blob", e))?
        {
            fs_atomic::make_read_only(&blob).map_err(|e| write_error(asset_path, "blob", e))?;
        }
        tracing::debug!(asset = %asset_path, blob = %expected, "adopted namespace file");
        Ok(())
    }

    fn file_reference(&self, path: &Path) -> Result<Option<StorageReference>> {
        let relative = match path.strip_prefix(self.root.join("files")) {
            Ok(relative) => relative,
            Err(_) => return Ok(None),
        };
        let asset_path = match AssetPath::from_relative_path(relative) {
            Ok(asset_path) => asset_path,
            Err(_) => return Ok(None),
        };

        let (hash, size) = fs_atomic::hash_file(path)?;
        let mut reference = StorageReference::new(
            StorageType::Disk,
            hash,
            asset_path.as_str(),
            ReferenceType::File,
        )
        .with_metadata("size", size);

        if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
            let modified: DateTime<Utc> = modified.into();
            reference = reference.with_metadata("modified", modified.to_rfc3339());
        }
        Ok(Some(reference))
    }
}

impl VersionStore for DiskStorage {
    fn storage_type(&self) -> StorageType {
        StorageType::Disk
    }

    fn store_version(
        &self,
        content: &[u8],
        asset_path: &AssetPath,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord> {
        let metadata = metadata.validated()?;
        let (hash, written) = self.put_blob(content, asset_path)?;
        if !written {
            tracing::debug!(asset = %asset_path, blob = %hash, "dedup hit, reusing blob");
        }
        self.link_namespace(asset_path, &hash)?;

        let record = self
            .index
            .publish(asset_path, RecordDraft::new(hash, metadata, VersionEvent::Created))?;
        tracing::info!(
            backend = BACKEND,
            asset = %asset_path,
            version_id = %record.version_id,
            size = content.len(),
            "stored version"
        );
        Ok(record)
    }

    fn create_version_from_reference(
        &self,
        reference: &StorageReference,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord> {
        reference.ensure_type(StorageType::Disk, ReferenceType::File)?;
        if !is_sha256_hex(&reference.storage_id) {
            return Err(StorageError::invalid_reference(format!(
                "Not a SHA-256 content hash: {}",
                reference.storage_id
            ))
            .with_backend(BACKEND)
            .with_asset(reference.path.clone()));
        }
        let asset_path = AssetPath::new(&reference.path)?;
        let metadata = metadata.validated()?;
        let hash = reference.storage_id.as_str();

        if self.blob_path(hash)?.is_file() {
            tracing::debug!(asset = %asset_path, blob = %hash, "reference bound to existing blob");
        } else {
            self.adopt_namespace_file(&asset_path, hash)?;
        }
        let entry = self.namespace_path(&asset_path);
        if !entry.exists() && !self.namespace_occupied(&asset_path) {
            self.link_namespace(&asset_path, hash)?;
        }

        let record = self.index.publish(
            &asset_path,
            RecordDraft::new(hash, metadata, VersionEvent::Referenced),
        )?;
        tracing::info!(
            backend = BACKEND,
            asset = %asset_path,
            version_id = %record.version_id,
            "version created from reference"
        );
        Ok(record)
    }

    fn retrieve_version(&self, version_id: &str, target: &Path) -> Result<PathBuf> {
        let record = self.index.require(version_id)?;
        let blob = self
            .blob_path(&record.storage_pointer)
            .map_err(|e| e.with_asset(record.asset_path.as_str()))?;
        if !blob.is_file() {
            return Err(StorageError::not_found(format!(
                "Blob {} of version {} is missing",
                record.storage_pointer, version_id
            ))
            .with_backend(BACKEND)
            .with_asset(record.asset_path.as_str()));
        }

        let target = fs_atomic::resolve_target(target, record.asset_path.file_name());
        fs_atomic::copy_atomic(&fs_atomic::sibling_staging(&target), &blob, &target, true)
            .map_err(|e| write_error(&record.asset_path, "retrieval target", e))?;
        Ok(target)
    }

    fn list_references(
        &self,
        reference_type: Option<ReferenceType>,
        path_pattern: Option<&str>,
    ) -> Result<ReferenceIter<'_>> {
        if reference_type.map_or(false, |t| t != ReferenceType::File) {
            return Ok(Box::new(std::iter::empty()));
        }

        let files_root = self.root.join("files");
        let pattern = path_pattern.map(str::to_string);
        let iter = WalkDir::new(&files_root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(walk_error(e))),
                };
                if !entry.file_type().is_file() {
                    return None;
                }
                if let Some(pattern) = &pattern {
                    let relative = entry.path().strip_prefix(&files_root).ok()?;
                    let relative = relative.to_string_lossy().replace('\\', "/");
                    if !relative.contains(pattern.as_str()) {
                        return None;
                    }
                }
                self.file_reference(entry.path()).transpose()
            });
        Ok(Box::new(iter))
    }

    fn track_move(
        &self,
        old_path: &AssetPath,
        new_path: &AssetPath,
        version_id: &str,
    ) -> Result<VersionRecord> {
        old_path.check_move_target(new_path)?;
        let moved = self.index.require(version_id)?;
        if &moved.asset_path != old_path {
            return Err(StorageError::invalid_input(format!(
                "Version {} belongs to {}, not {}",
                version_id, moved.asset_path, old_path
            ))
            .with_backend(BACKEND)
            .with_asset(old_path.as_str()));
        }

        self.link_namespace(new_path, &moved.storage_pointer)?;
        let old_entry = self.namespace_path(old_path);
        if !old_entry.is_dir() {
            match fs::remove_file(&old_entry) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(write_error(old_path, "namespace entry", e)),
            }
        }

        let draft = RecordDraft::new(
            moved.storage_pointer.clone(),
            moved.metadata.clone(),
            VersionEvent::Moved,
        )
        .with_lineage(Lineage {
            previous_version: Some(moved.version_id.clone()),
            previous_path: Some(old_path.to_string()),
        });
        let record = self.index.publish(new_path, draft)?;
        tracing::info!(
            backend = BACKEND,
            from = %old_path,
            to = %new_path,
            version_id = %record.version_id,
            "tracked move"
        );
        Ok(record)
    }

    fn get_version(&self, version_id: &str) -> Result<VersionRecord> {
        self.index.require(version_id)
    }

    fn latest_version(&self, asset_path: &AssetPath) -> Result<Option<VersionRecord>> {
        self.index.latest(asset_path)
    }

    fn history(&self, asset_path: &AssetPath) -> Result<Vec<VersionRecord>> {
        self.index.history(asset_path)
    }
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn write_error(asset_path: &AssetPath, what: &str, err: io::Error) -> StorageError {
    StorageError::write(format!("Failed to write {}: {}", what, err))
        .with_backend(BACKEND)
        .with_asset(asset_path.as_str())
        .with_source(err)
}

fn walk_error(err: walkdir::Error) -> StorageError {
    StorageError::new(ErrorKind::IO, format!("Failed to walk disk store: {}", err))
        .with_backend(BACKEND)
        .with_source(err)
}
