//! Centralized VCS backend (perforce changelists)
//!
//! The server protocol is an external collaborator behind [`DepotClient`].
//! [`InMemoryDepot`] implements it in-process for tests and local use.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::fs_atomic;
use super::version_index::{RecordDraft, VersionIndex};
use crate::domain::{
    content_hash, AssetMetadata, AssetPath, Lineage, ReferenceIter, ReferenceType,
    StorageReference, StorageType, VersionEvent, VersionRecord, VersionStore,
};
use crate::error::{Result, StorageError};

const BACKEND: &str = "perforce";

// ═══════════════════════════════════════════════════════════════════════════
// Depot protocol
// ═══════════════════════════════════════════════════════════════════════════

/// What a changelist did to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Add,
    Edit,
    Delete,
    MoveAdd,
    MoveDelete,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Add => "add",
            FileAction::Edit => "edit",
            FileAction::Delete => "delete",
            FileAction::MoveAdd => "move/add",
            FileAction::MoveDelete => "move/delete",
        }
    }

    /// Whether the file exists after this action
    pub fn is_live(&self) -> bool {
        !matches!(self, FileAction::Delete | FileAction::MoveDelete)
    }
}

/// One file revision inside a changelist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepotFile {
    pub depot_path: String,
    pub action: FileAction,
    /// SHA-256 of the revision content (empty for deletes)
    pub digest: String,
    pub size: u64,
}

/// A submitted changelist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changelist {
    pub number: u64,
    pub user: String,
    pub description: String,
    pub submitted_at: DateTime<Utc>,
    pub files: Vec<DepotFile>,
}

/// Primitive operations of a centralized VCS server
pub trait DepotClient: Send + Sync {
    /// Submit new revisions of `files` in one changelist
    fn submit(&self, user: &str, description: &str, files: &[(String, Vec<u8>)]) -> Result<u64>;

    /// Content of `depot_path` as of `changelist`
    fn sync(&self, changelist: u64, depot_path: &str) -> Result<Vec<u8>>;

    fn describe(&self, changelist: u64) -> Result<Option<Changelist>>;

    /// Changelists touching paths under `path_prefix`, newest first
    fn changes(&self, path_prefix: &str) -> Result<Vec<Changelist>>;

    /// Changelist of the head revision, `None` if absent or deleted
    fn head_revision(&self, depot_path: &str) -> Result<Option<u64>>;

    /// Rename a file, preserving its history
    fn move_file(&self, user: &str, description: &str, from: &str, to: &str) -> Result<u64>;
}

#[derive(Debug, Default)]
struct DepotState {
    last_change: u64,
    changelists: BTreeMap<u64, Changelist>,
    /// depot path -> changelist -> content (`None` once deleted)
    revisions: HashMap<String, BTreeMap<u64, Option<Arc<Vec<u8>>>>>,
}

impl DepotState {
    fn head(&self, depot_path: &str) -> Option<(u64, Arc<Vec<u8>>)> {
        let (change, content) = self.revisions.get(depot_path)?.iter().next_back()?;
        content.as_ref().map(|c| (*change, Arc::clone(c)))
    }

    fn commit(&mut self, user: &str, description: &str, files: Vec<(DepotFile, Option<Arc<Vec<u8>>>)>) -> u64 {
        self.last_change += 1;
        let number = self.last_change;
        let mut listed = Vec::with_capacity(files.len());
        for (file, content) in files {
            self.revisions
                .entry(file.depot_path.clone())
                .or_default()
                .insert(number, content);
            listed.push(file);
        }
        self.changelists.insert(
            number,
            Changelist {
                number,
                user: user.to_string(),
                description: description.to_string(),
                submitted_at: Utc::now(),
                files: listed,
            },
        );
        number
    }
}

/// In-process depot with perforce changelist semantics
#[derive(Debug, Default)]
pub struct InMemoryDepot {
    state: RwLock<DepotState>,
}

impl InMemoryDepot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DepotClient for InMemoryDepot {
    fn submit(&self, user: &str, description: &str, files: &[(String, Vec<u8>)]) -> Result<u64> {
        if files.is_empty() {
            return Err(StorageError::write("No files to submit").with_backend(BACKEND));
        }
        let mut state = self.state.write();
        let entries = files
            .iter()
            .map(|(depot_path, content)| {
                let action = if state.head(depot_path).is_some() {
                    FileAction::Edit
                } else {
                    FileAction::Add
                };
                let file = DepotFile {
                    depot_path: depot_path.clone(),
                    action,
                    digest: content_hash(content),
                    size: content.len() as u64,
                };
                (file, Some(Arc::new(content.clone())))
            })
            .collect();
        Ok(state.commit(user, description, entries))
    }

    fn sync(&self, changelist: u64, depot_path: &str) -> Result<Vec<u8>> {
        let state = self.state.read();
        state
            .revisions
            .get(depot_path)
            .and_then(|revs| revs.range(..=changelist).next_back())
            .and_then(|(_, content)| content.as_ref())
            .map(|content| content.to_vec())
            .ok_or_else(|| {
                StorageError::not_found(format!("{}@{} does not exist", depot_path, changelist))
                    .with_backend(BACKEND)
            })
    }

    fn describe(&self, changelist: u64) -> Result<Option<Changelist>> {
        Ok(self.state.read().changelists.get(&changelist).cloned())
    }

    fn changes(&self, path_prefix: &str) -> Result<Vec<Changelist>> {
        let state = self.state.read();
        Ok(state
            .changelists
            .values()
            .rev()
            .filter(|cl| cl.files.iter().any(|f| f.depot_path.starts_with(path_prefix)))
            .cloned()
            .collect())
    }

    fn head_revision(&self, depot_path: &str) -> Result<Option<u64>> {
        Ok(self.state.read().head(depot_path).map(|(change, _)| change))
    }

    fn move_file(&self, user: &str, description: &str, from: &str, to: &str) -> Result<u64> {
        let mut state = self.state.write();
        let (_, content) = state.head(from).ok_or_else(|| {
            StorageError::not_found(format!("{} does not exist", from)).with_backend(BACKEND)
        })?;
        let digest = content_hash(&content);
        let size = content.len() as u64;
        let files = vec![
            (
                DepotFile {
                    depot_path: from.to_string(),
                    action: FileAction::MoveDelete,
                    digest: String::new(),
                    size: 0,
                },
                None,
            ),
            (
                DepotFile {
                    depot_path: to.to_string(),
                    action: FileAction::MoveAdd,
                    digest,
                    size,
                },
                Some(content),
            ),
        ];
        Ok(state.commit(user, description, files))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Backend
// ═══════════════════════════════════════════════════════════════════════════

/// Perforce backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerforceConfig {
    /// Depot location holding versioned assets, e.g. `//depot/assets`
    pub depot_root: String,
    /// Local directory for the version index
    pub index_root: PathBuf,
}

impl PerforceConfig {
    pub fn new(depot_root: impl Into<String>, index_root: impl Into<PathBuf>) -> Self {
        Self {
            depot_root: depot_root.into(),
            index_root: index_root.into(),
        }
    }
}

/// Changelist-backed version store
///
/// Check-then-submit sequences on one depot path are serialized inside the
/// process, so identical concurrent stores submit at most one changelist.
pub struct PerforceStorage {
    client: Arc<dyn DepotClient>,
    config: PerforceConfig,
    index: VersionIndex,
    depot_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl fmt::Debug for PerforceStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerforceStorage")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PerforceStorage {
    pub fn new(client: Arc<dyn DepotClient>, config: PerforceConfig) -> Result<Self> {
        if !config.depot_root.starts_with("//") {
            return Err(StorageError::invalid_input(format!(
                "Depot root must start with '//': {}",
                config.depot_root
            ))
            .with_backend(BACKEND));
        }
        let index = VersionIndex::open(&config.index_root, StorageType::Perforce)?;
        Ok(Self {
            client,
            config,
            index,
            depot_locks: DashMap::new(),
        })
    }

    pub fn config(&self) -> &PerforceConfig {
        &self.config
    }

    pub fn depot_path(&self, asset_path: &AssetPath) -> String {
        format!("{}/{}", self.config.depot_root.trim_end_matches('/'), asset_path)
    }

    fn depot_lock(&self, depot_path: &str) -> Arc<Mutex<()>> {
        self.depot_locks
            .entry(depot_path.to_string())
            .or_default()
            .clone()
    }

    /// Content digest of the head revision, `None` if absent or deleted
    fn head_digest(&self, depot_path: &str) -> Result<Option<(u64, String)>> {
        match self.client.head_revision(depot_path)? {
            Some(head) => {
                let current = self.client.sync(head, depot_path)?;
                Ok(Some((head, content_hash(&current))))
            }
            None => Ok(None),
        }
    }

    fn asset_for_depot_path(&self, depot_path: &str) -> Option<AssetPath> {
        let root = self.config.depot_root.trim_end_matches('/');
        let relative = depot_path.strip_prefix(root)?.strip_prefix('/')?;
        AssetPath::new(relative).ok()
    }

    /// Reference paths may be asset paths or full depot paths
    fn reference_asset(&self, path: &str) -> Result<AssetPath> {
        if path.starts_with("//") {
            return self.asset_for_depot_path(path).ok_or_else(|| {
                StorageError::invalid_reference(format!(
                    "{} is outside depot root {}",
                    path, self.config.depot_root
                ))
                .with_backend(BACKEND)
                .with_asset(path)
            });
        }
        AssetPath::new(path)
    }

    fn changelist_references(&self, changelist: Changelist, pattern: Option<&str>) -> Vec<StorageReference> {
        changelist
            .files
            .iter()
            .filter(|file| file.action.is_live())
            .filter_map(|file| {
                let asset = self.asset_for_depot_path(&file.depot_path)?;
                if pattern.map_or(false, |p| !asset.as_str().contains(p)) {
                    return None;
                }
                Some(
                    StorageReference::new(
                        StorageType::Perforce,
                        changelist.number.to_string(),
                        asset.as_str(),
                        ReferenceType::Changelist,
                    )
                    .with_metadata("depot_path", file.depot_path.as_str())
                    .with_metadata("action", file.action.as_str())
                    .with_metadata("digest", file.digest.as_str())
                    .with_metadata("size", file.size)
                    .with_metadata("user", changelist.user.as_str())
                    .with_metadata("description", changelist.description.as_str())
                    .with_metadata("submitted_at", changelist.submitted_at.to_rfc3339()),
                )
            })
            .collect()
    }
}

impl VersionStore for PerforceStorage {
    fn storage_type(&self) -> StorageType {
        StorageType::Perforce
    }

    fn store_version(
        &self,
        content: &[u8],
        asset_path: &AssetPath,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord> {
        let metadata = metadata.validated()?;
        let hash = content_hash(content);
        let depot_path = self.depot_path(asset_path);

        let lock = self.depot_lock(&depot_path);
        let _guard = lock.lock();

        let unchanged_head = self
            .head_digest(&depot_path)?
            .and_then(|(head, digest)| (digest == hash).then_some(head));

        let changelist = match unchanged_head {
            Some(head) => {
                tracing::debug!(asset = %asset_path, changelist = head, "dedup hit, head revision unchanged");
                head
            }
            None => {
                let description = metadata
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Version {}", asset_path));
                self.client
                    .submit(&metadata.creator, &description, &[(depot_path, content.to_vec())])
                    .map_err(|e| {
                        StorageError::write(format!("Submit failed: {}", e.message))
                            .with_backend(BACKEND)
                            .with_asset(asset_path.as_str())
                            .with_source(e)
                    })?
            }
        };

        let record = self.index.publish(
            asset_path,
            RecordDraft::new(hash, metadata, VersionEvent::Created)
                .with_revision(changelist.to_string()),
        )?;
        tracing::info!(
            backend = BACKEND,
            asset = %asset_path,
            version_id = %record.version_id,
            changelist,
            "stored version"
        );
        Ok(record)
    }

    fn create_version_from_reference(
        &self,
        reference: &StorageReference,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord> {
        reference.ensure_type(StorageType::Perforce, ReferenceType::Changelist)?;
        let number = parse_changelist(&reference.storage_id).ok_or_else(|| {
            StorageError::invalid_reference(format!(
                "Not a changelist number: {}",
                reference.storage_id
            ))
            .with_backend(BACKEND)
            .with_asset(reference.path.clone())
        })?;
        let asset_path = self.reference_asset(&reference.path)?;
        let metadata = metadata.validated()?;

        let changelist = self.client.describe(number)?.ok_or_else(|| {
            StorageError::not_found(format!("Changelist {} not found", number))
                .with_backend(BACKEND)
                .with_asset(asset_path.as_str())
        })?;
        let depot_path = self.depot_path(&asset_path);
        let file = changelist
            .files
            .iter()
            .find(|f| f.depot_path == depot_path && f.action.is_live())
            .ok_or_else(|| {
                StorageError::not_found(format!(
                    "Changelist {} does not contain {}",
                    number, depot_path
                ))
                .with_backend(BACKEND)
                .with_asset(asset_path.as_str())
            })?;

        tracing::debug!(asset = %asset_path, changelist = number, "reference resolved to changelist");
        let record = self.index.publish(
            &asset_path,
            RecordDraft::new(file.digest.clone(), metadata, VersionEvent::Referenced)
                .with_revision(number.to_string()),
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
        let changelist = record
            .revision
            .as_deref()
            .and_then(parse_changelist)
            .ok_or_else(|| {
                StorageError::vcs(format!("Version {} has no changelist", version_id))
                    .with_backend(BACKEND)
                    .with_asset(record.asset_path.as_str())
            })?;

        let content = self
            .client
            .sync(changelist, &self.depot_path(&record.asset_path))
            .map_err(|e| e.or_backend(BACKEND).with_asset(record.asset_path.as_str()))?;
        if content_hash(&content) != record.storage_pointer {
            return Err(StorageError::vcs(format!(
                "Changelist {} content does not match version {}",
                changelist, version_id
            ))
            .with_backend(BACKEND)
            .with_asset(record.asset_path.as_str()));
        }

        let target = fs_atomic::resolve_target(target, record.asset_path.file_name());
        fs_atomic::write_atomic(&fs_atomic::sibling_staging(&target), &target, &content, true)
            .map_err(|e| {
                StorageError::write(format!("Failed to write retrieval target: {}", e))
                    .with_backend(BACKEND)
                    .with_asset(record.asset_path.as_str())
                    .with_source(e)
            })?;
        Ok(target)
    }

    fn list_references(
        &self,
        reference_type: Option<ReferenceType>,
        path_pattern: Option<&str>,
    ) -> Result<ReferenceIter<'_>> {
        if reference_type.map_or(false, |t| t != ReferenceType::Changelist) {
            return Ok(Box::new(std::iter::empty()));
        }

        let changes = self.client.changes(self.config.depot_root.trim_end_matches('/'))?;
        let pattern = path_pattern.map(str::to_string);
        let iter = changes.into_iter().flat_map(move |changelist| {
            self.changelist_references(changelist, pattern.as_deref())
                .into_iter()
                .map(Ok)
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

        let old_depot = self.depot_path(old_path);
        let new_depot = self.depot_path(new_path);
        let revision = moved
            .revision
            .as_deref()
            .and_then(parse_changelist)
            .ok_or_else(|| {
                StorageError::vcs(format!("Version {} has no changelist", version_id))
                    .with_backend(BACKEND)
                    .with_asset(old_path.as_str())
            })?;

        let lock = self.depot_lock(&old_depot);
        let _guard = lock.lock();

        // The depot moves its head revision; a non-head version needs its own
        // bytes resubmitted at the new path
        let head = self.head_digest(&old_depot)?;
        let head_matches = head
            .as_ref()
            .map_or(false, |(_, digest)| *digest == moved.storage_pointer);
        let restore = if head_matches {
            None
        } else {
            Some(
                self.client
                    .sync(revision, &old_depot)
                    .map_err(|e| e.or_backend(BACKEND).with_asset(old_path.as_str()))?,
            )
        };

        let move_error = |e: StorageError| {
            StorageError::write(format!("Move failed: {}", e.message))
                .with_backend(BACKEND)
                .with_asset(old_path.as_str())
                .with_source(e)
        };
        let mut changelist = None;
        if head.is_some() {
            changelist = Some(
                self.client
                    .move_file(
                        &moved.metadata.creator,
                        &format!("Move {} -> {}", old_path, new_path),
                        &old_depot,
                        &new_depot,
                    )
                    .map_err(move_error)?,
            );
        }
        if let Some(content) = restore {
            tracing::debug!(
                asset = %new_path,
                from_changelist = revision,
                "moved version is not the depot head, resubmitting its content"
            );
            changelist = Some(
                self.client
                    .submit(
                        &moved.metadata.creator,
                        &format!("Restore {} at {}", version_id, new_path),
                        &[(new_depot, content)],
                    )
                    .map_err(move_error)?,
            );
        }
        let changelist = changelist.ok_or_else(|| {
            StorageError::vcs(format!("Nothing submitted for move of {}", version_id))
                .with_backend(BACKEND)
                .with_asset(old_path.as_str())
        })?;

        let draft = RecordDraft::new(
            moved.storage_pointer.clone(),
            moved.metadata.clone(),
            VersionEvent::Moved,
        )
        .with_revision(changelist.to_string())
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
            changelist,
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

/// Positive decimal changelist number
fn parse_changelist(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<u64>().ok().filter(|n| *n > 0)
}
