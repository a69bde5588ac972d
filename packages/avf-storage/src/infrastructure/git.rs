//! Commit-based VCS backend (git via `git2`)
//!
//! Every asset gets its own branch `refs/heads/<prefix>/<asset_path>`. When
//! that name is not a valid ref, or another asset's branch already claims
//! its slot (asset `a` owns `<prefix>/a`, so `a/b` cannot nest under it),
//! the branch is `refs/heads/<prefix>-hashed/<sha256(asset_path)>`.
//! Versions are commits on that branch, built from an in-memory index so the
//! caller's branch, index and worktree are never touched. Metadata lives in
//! the version index under `.git/avf/`, never in the (immutable) commits.

use chrono::{TimeZone, Utc};
use git2::{
    BranchType, Commit, Delta, ErrorCode, Index, IndexEntry, IndexTime, ObjectType, Oid,
    Reference, Repository, Signature, Sort,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::fs_atomic;
use super::version_index::{RecordDraft, VersionIndex};
use crate::domain::{
    AssetMetadata, AssetPath, Lineage, ReferenceIter, ReferenceType, StorageReference,
    StorageType, VersionEvent, VersionRecord, VersionStore,
};
use crate::error::{Result, StorageError};

const BACKEND: &str = "git";

/// Attempts at moving a branch tip when another writer moved it first
const MAX_REF_RETRIES: usize = 8;

const BLOB_FILE_MODE: u32 = 0o100644;

/// Git backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Branch namespace for per-asset branches
    pub branch_prefix: String,
    pub committer_name: String,
    pub committer_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "avf".to_string(),
            committer_name: "avf".to_string(),
            committer_email: "avf@localhost".to_string(),
        }
    }
}

impl GitConfig {
    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }
}

/// Git-backed version store
pub struct GitStorage {
    repo: Mutex<Repository>,
    git_dir: PathBuf,
    config: GitConfig,
    index: VersionIndex,
}

impl fmt::Debug for GitStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitStorage")
            .field("git_dir", &self.git_dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GitStorage {
    /// Open the repository at `path`, initializing one if none exists
    pub fn open(path: impl AsRef<Path>, config: GitConfig) -> Result<Self> {
        let path = path.as_ref();
        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(e) if e.code() == ErrorCode::NotFound => {
                tracing::info!(path = %path.display(), "initializing git repository");
                Repository::init(path).map_err(|e| {
                    StorageError::write(format!(
                        "Failed to initialize repository at {}",
                        path.display()
                    ))
                    .with_backend(BACKEND)
                    .with_source(e)
                })?
            }
            Err(e) => return Err(StorageError::from(e).with_backend(BACKEND)),
        };

        let git_dir = repo.path().to_path_buf();
        let index = VersionIndex::open(git_dir.join("avf"), StorageType::Git)?;
        Ok(Self {
            repo: Mutex::new(repo),
            git_dir,
            config,
            index,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    /// Full ref name of the branch carrying an asset's versions
    pub fn branch_ref(&self, asset_path: &AssetPath) -> Result<String> {
        let repo = self.repo.lock();
        self.branch_ref_in(&repo, asset_path)
    }

    /// Branch naming against the current refs; callers hold the repo lock
    /// through the commit so the choice cannot go stale in-process
    fn branch_ref_in(&self, repo: &Repository, asset_path: &AssetPath) -> Result<String> {
        let readable = format!("refs/heads/{}/{}", self.config.branch_prefix, asset_path);
        if Reference::is_valid_name(&readable) && !ref_slot_taken(repo, &readable)? {
            return Ok(readable);
        }
        Ok(format!(
            "refs/heads/{}-hashed/{}",
            self.config.branch_prefix,
            asset_path.key()
        ))
    }

    /// Current tip commit id of an asset branch
    pub fn branch_tip(&self, asset_path: &AssetPath) -> Result<Option<String>> {
        let repo = self.repo.lock();
        let refname = self.branch_ref_in(&repo, asset_path)?;
        let tip = resolve_tip(&repo, &refname)?;
        Ok(tip.map(|c| c.id().to_string()))
    }

    fn committer(&self) -> Result<Signature<'static>> {
        Signature::now(&self.config.committer_name, &self.config.committer_email)
            .map_err(|e| StorageError::from(e).with_backend(BACKEND))
    }

    /// Author signature: the creator's name, with `custom_data.email` when
    /// it is a string and the configured committer email otherwise
    fn author(&self, metadata: &AssetMetadata) -> Result<Signature<'static>> {
        let email = metadata
            .custom_data
            .get("email")
            .and_then(|value| value.as_str())
            .unwrap_or(self.config.committer_email.as_str());
        Signature::now(&metadata.creator, email).map_err(|e| {
            StorageError::invalid_input(format!(
                "Not a valid git author: {} <{}>",
                metadata.creator, email
            ))
            .with_backend(BACKEND)
            .with_source(e)
        })
    }

    /// Commit `tree_oid` onto `refname`, compare-and-swapping the tip
    ///
    /// `build` produces the tree and extra parents for a given tip; it is
    /// re-run when another writer moved the branch in between.
    fn commit_to_branch<F>(
        &self,
        repo: &Repository,
        refname: &str,
        asset_path: &AssetPath,
        author: &Signature<'_>,
        message: &str,
        mut build: F,
    ) -> Result<CommitOutcome>
    where
        F: FnMut(&Repository, Option<&Commit<'_>>) -> Result<TreePlan>,
    {
        let committer = self.committer()?;

        for attempt in 0..MAX_REF_RETRIES {
            let tip = resolve_tip(repo, refname)?;
            let (tree_oid, parent_oids) = match build(repo, tip.as_ref())? {
                TreePlan::Reuse(existing) => return Ok(CommitOutcome::Reused(existing)),
                TreePlan::Commit { tree, parents } => (tree, parents),
            };
            let tree = repo.find_tree(tree_oid)?;

            let extra_parents = parent_oids
                .iter()
                .map(|oid| repo.find_commit(*oid))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut parents: Vec<&Commit<'_>> = extra_parents.iter().collect();
            if let Some(tip) = &tip {
                if !parents.iter().any(|p| p.id() == tip.id()) {
                    parents.push(tip);
                }
            }

            let commit_oid = repo
                .commit(None, author, &committer, message, &tree, &parents)
                .map_err(|e| self.write_error(asset_path, "commit", e))?;

            let log_message = format!("avf: {}", asset_path);
            let moved = match &tip {
                Some(tip) => repo.reference_matching(refname, commit_oid, true, tip.id(), &log_message),
                None => repo.reference(refname, commit_oid, false, &log_message),
            };
            match moved {
                Ok(_) => return Ok(CommitOutcome::Created(commit_oid)),
                Err(e) if matches!(e.code(), ErrorCode::Modified | ErrorCode::Exists | ErrorCode::Locked) => {
                    tracing::debug!(
                        refname,
                        attempt,
                        "branch moved concurrently, retrying commit"
                    );
                }
                Err(e) => return Err(self.write_error(asset_path, "branch update", e)),
            }
        }

        Err(StorageError::write(format!(
            "Branch {} kept moving after {} attempts",
            refname, MAX_REF_RETRIES
        ))
        .with_backend(BACKEND)
        .with_asset(asset_path.as_str()))
    }

    fn commit_references(&self, oid: Oid, pattern: Option<&str>) -> Result<Vec<StorageReference>> {
        let repo = self.repo.lock();
        let commit = repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(_) => None,
        };
        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

        let author = commit.author();
        let committed_at = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .map(|t| t.to_rfc3339());

        let mut references = Vec::new();
        for delta in diff.deltas() {
            if delta.status() == Delta::Deleted {
                continue;
            }
            let path = match delta.new_file().path().and_then(Path::to_str) {
                Some(path) => path.to_string(),
                None => continue,
            };
            if pattern.map_or(false, |p| !path.contains(p)) {
                continue;
            }

            let mut reference = StorageReference::new(
                StorageType::Git,
                commit.id().to_string(),
                path,
                ReferenceType::Commit,
            )
            .with_metadata("blob", delta.new_file().id().to_string())
            .with_metadata("author", author.name().unwrap_or_default())
            .with_metadata("email", author.email().unwrap_or_default())
            .with_metadata("message", commit.summary().unwrap_or_default());
            if let Some(committed_at) = &committed_at {
                reference = reference.with_metadata("committed_at", committed_at.as_str());
            }
            references.push(reference);
        }
        Ok(references)
    }

    fn write_error(&self, asset_path: &AssetPath, what: &str, err: git2::Error) -> StorageError {
        StorageError::write(format!("Git {} failed: {}", what, err.message()))
            .with_backend(BACKEND)
            .with_asset(asset_path.as_str())
            .with_source(err)
    }
}

enum TreePlan {
    /// Tip already carries the wanted content
    Reuse(Oid),
    Commit { tree: Oid, parents: Vec<Oid> },
}

enum CommitOutcome {
    Reused(Oid),
    Created(Oid),
}

impl CommitOutcome {
    fn oid(&self) -> Oid {
        match self {
            CommitOutcome::Reused(oid) | CommitOutcome::Created(oid) => *oid,
        }
    }
}

impl VersionStore for GitStorage {
    fn storage_type(&self) -> StorageType {
        StorageType::Git
    }

    fn store_version(
        &self,
        content: &[u8],
        asset_path: &AssetPath,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord> {
        let metadata = metadata.validated()?;
        let author = self.author(&metadata)?;
        let message = commit_message(asset_path, &metadata);

        let (blob_oid, outcome) = {
            let repo = self.repo.lock();
            let refname = self.branch_ref_in(&repo, asset_path)?;
            let blob_oid = repo
                .blob(content)
                .map_err(|e| self.write_error(asset_path, "blob write", e))?;

            let outcome = self.commit_to_branch(
                &repo,
                &refname,
                asset_path,
                &author,
                &message,
                |repo, tip| {
                    if let Some(tip) = tip {
                        if blob_at(tip, asset_path)? == Some(blob_oid) {
                            return Ok(TreePlan::Reuse(tip.id()));
                        }
                    }
                    let tree = write_tree(repo, tip, None, Some((asset_path, blob_oid)))?;
                    Ok(TreePlan::Commit {
                        tree,
                        parents: Vec::new(),
                    })
                },
            )?;
            (blob_oid, outcome)
        };

        if let CommitOutcome::Reused(tip) = &outcome {
            tracing::debug!(asset = %asset_path, commit = %tip, "dedup hit, tip already holds blob");
        }

        let record = self.index.publish(
            asset_path,
            RecordDraft::new(blob_oid.to_string(), metadata, VersionEvent::Created)
                .with_revision(outcome.oid().to_string()),
        )?;
        tracing::info!(
            backend = BACKEND,
            asset = %asset_path,
            version_id = %record.version_id,
            commit = %outcome.oid(),
            "stored version"
        );
        Ok(record)
    }

    fn create_version_from_reference(
        &self,
        reference: &StorageReference,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord> {
        reference.ensure_type(StorageType::Git, ReferenceType::Commit)?;
        if !is_commit_hex(&reference.storage_id) {
            return Err(StorageError::invalid_reference(format!(
                "Not a commit id: {}",
                reference.storage_id
            ))
            .with_backend(BACKEND)
            .with_asset(reference.path.clone()));
        }
        let asset_path = AssetPath::new(&reference.path)?;
        let metadata = metadata.validated()?;

        let (commit_oid, blob_oid) = {
            let repo = self.repo.lock();
            let commit = repo
                .revparse_single(&reference.storage_id)
                .and_then(|object| object.peel_to_commit())
                .map_err(|e| {
                    StorageError::not_found(format!("Commit not found: {}", reference.storage_id))
                        .with_backend(BACKEND)
                        .with_asset(asset_path.as_str())
                        .with_source(e)
                })?;
            let blob = blob_at(&commit, &asset_path)?.ok_or_else(|| {
                StorageError::not_found(format!(
                    "Commit {} has no file {}",
                    commit.id(),
                    asset_path
                ))
                .with_backend(BACKEND)
                .with_asset(asset_path.as_str())
            })?;
            (commit.id(), blob)
        };

        tracing::debug!(asset = %asset_path, commit = %commit_oid, "reference resolved to commit");
        let record = self.index.publish(
            &asset_path,
            RecordDraft::new(blob_oid.to_string(), metadata, VersionEvent::Referenced)
                .with_revision(commit_oid.to_string()),
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
        let content = {
            let repo = self.repo.lock();
            let blob = Oid::from_str(&record.storage_pointer)
                .and_then(|oid| repo.find_blob(oid))
                .map_err(|e| {
                    StorageError::not_found(format!(
                        "Blob {} of version {} is missing",
                        record.storage_pointer, version_id
                    ))
                    .with_backend(BACKEND)
                    .with_asset(record.asset_path.as_str())
                    .with_source(e)
                })?;
            blob.content().to_vec()
        };

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
        if reference_type.map_or(false, |t| t != ReferenceType::Commit) {
            return Ok(Box::new(std::iter::empty()));
        }

        let commits: Vec<Oid> = {
            let repo = self.repo.lock();
            let mut walk = repo.revwalk()?;
            walk.set_sorting(Sort::TIME)?;
            for branch in repo.branches(Some(BranchType::Local))? {
                let (branch, _) = branch?;
                if let Some(oid) = branch.get().target() {
                    walk.push(oid)?;
                }
            }
            walk.collect::<std::result::Result<_, _>>()?
        };

        let pattern = path_pattern.map(str::to_string);
        let iter = commits.into_iter().flat_map(move |oid| {
            match self.commit_references(oid, pattern.as_deref()) {
                Ok(references) => references.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            }
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
        let revision = moved.revision.as_deref().ok_or_else(|| {
            StorageError::vcs(format!("Version {} has no commit", version_id))
                .with_backend(BACKEND)
                .with_asset(old_path.as_str())
        })?;
        let moved_commit = Oid::from_str(revision)?;
        let blob_oid = Oid::from_str(&moved.storage_pointer)?;

        let author = self.author(&moved.metadata)?;
        let message = format!("Move {} -> {}", old_path, new_path);

        let outcome = {
            let repo = self.repo.lock();
            let refname = self.branch_ref_in(&repo, new_path)?;
            self.commit_to_branch(&repo, &refname, new_path, &author, &message, |repo, _tip| {
                let base = repo.find_commit(moved_commit)?;
                let tree = write_tree(repo, Some(&base), Some(old_path), Some((new_path, blob_oid)))?;
                Ok(TreePlan::Commit {
                    tree,
                    parents: vec![moved_commit],
                })
            })?
        };

        let draft = RecordDraft::new(
            moved.storage_pointer.clone(),
            moved.metadata.clone(),
            VersionEvent::Moved,
        )
        .with_revision(outcome.oid().to_string())
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

fn resolve_tip<'r>(repo: &'r Repository, refname: &str) -> Result<Option<Commit<'r>>> {
    match repo.find_reference(refname) {
        Ok(reference) => Ok(Some(reference.peel_to_commit()?)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether another ref blocks creating `refname`: either a ref at one of
/// its parent paths, or refs nested below it. An existing `refname` is free.
fn ref_slot_taken(repo: &Repository, refname: &str) -> Result<bool> {
    if ref_exists(repo, refname)? {
        return Ok(false);
    }

    let mut parent = refname;
    while let Some((head, _)) = parent.rsplit_once('/') {
        if head == "refs/heads" || head == "refs" {
            break;
        }
        if ref_exists(repo, head)? {
            return Ok(true);
        }
        parent = head;
    }

    let nested = format!("{}/", refname);
    for name in repo.references()?.names() {
        if name?.starts_with(&nested) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn ref_exists(repo: &Repository, refname: &str) -> Result<bool> {
    match repo.find_reference(refname) {
        Ok(_) => Ok(true),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Blob id stored at `asset_path` in a commit's tree
fn blob_at(commit: &Commit<'_>, asset_path: &AssetPath) -> Result<Option<Oid>> {
    let tree = commit.tree()?;
    match tree.get_path(Path::new(asset_path.as_str())) {
        Ok(entry) if entry.kind() == Some(ObjectType::Blob) => Ok(Some(entry.id())),
        Ok(_) => Ok(None),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Tree of `base` with one path removed and/or one blob added
fn write_tree(
    repo: &Repository,
    base: Option<&Commit<'_>>,
    remove: Option<&AssetPath>,
    add: Option<(&AssetPath, Oid)>,
) -> Result<Oid> {
    let mut index = Index::new()?;
    if let Some(base) = base {
        index.read_tree(&base.tree()?)?;
    }
    if let Some(path) = remove {
        let path = Path::new(path.as_str());
        if index.get_path(path, 0).is_some() {
            index.remove_path(path)?;
        }
    }
    if let Some((path, blob)) = add {
        index.add(&IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: BLOB_FILE_MODE,
            uid: 0,
            gid: 0,
            file_size: 0,
            id: blob,
            flags: 0,
            flags_extended: 0,
            path: path.as_str().as_bytes().to_vec(),
        })?;
    }
    Ok(index.write_tree_to(repo)?)
}

fn commit_message(asset_path: &AssetPath, metadata: &AssetMetadata) -> String {
    let summary = metadata
        .description
        .clone()
        .unwrap_or_else(|| format!("Version {}", asset_path));
    format!(
        "{}\n\nAsset: {}\nTool-Version: {}\n",
        summary, asset_path, metadata.tool_version
    )
}

fn is_commit_hex(value: &str) -> bool {
    (7..=40).contains(&value.len()) && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CustomData;
    use tempfile::TempDir;

    #[test]
    fn test_branch_ref_naming() {
        let dir = TempDir::new().unwrap();
        let store = GitStorage::open(dir.path(), GitConfig::default()).unwrap();

        let asset = AssetPath::new("chars/hero.fbx").unwrap();
        assert_eq!(
            store.branch_ref(&asset).unwrap(),
            "refs/heads/avf/chars/hero.fbx"
        );

        // Components ending in ".lock" are not valid in ref names
        let odd = AssetPath::new("chars/hero.lock").unwrap();
        let name = store.branch_ref(&odd).unwrap();
        assert!(name.starts_with("refs/heads/avf-hashed/"));
        assert!(Reference::is_valid_name(&name));
    }

    #[test]
    fn test_branch_ref_avoids_claimed_slots() {
        let dir = TempDir::new().unwrap();
        let store = GitStorage::open(dir.path(), GitConfig::default()).unwrap();
        let parent = AssetPath::new("textures").unwrap();
        let child = AssetPath::new("textures/wood.png").unwrap();
        let sibling = AssetPath::new("textures/wood.png/lod0").unwrap();

        store
            .store_version(b"atlas", &parent, AssetMetadata::new("jane", "gimp"))
            .unwrap();
        assert_eq!(store.branch_ref(&parent).unwrap(), "refs/heads/avf/textures");
        assert!(store
            .branch_ref(&child)
            .unwrap()
            .starts_with("refs/heads/avf-hashed/"));

        // A readable branch below claims its parent slot too
        let other = AssetPath::new("models/rock.fbx").unwrap();
        store
            .store_version(b"rock", &other, AssetMetadata::new("jane", "maya"))
            .unwrap();
        let models = AssetPath::new("models").unwrap();
        assert!(store
            .branch_ref(&models)
            .unwrap()
            .starts_with("refs/heads/avf-hashed/"));
        assert!(store
            .branch_ref(&sibling)
            .unwrap()
            .starts_with("refs/heads/avf-hashed/"));
    }

    #[test]
    fn test_author_email_from_custom_data() {
        let dir = TempDir::new().unwrap();
        let store = GitStorage::open(dir.path(), GitConfig::default()).unwrap();

        let plain = AssetMetadata::new("jane", "maya");
        let author = store.author(&plain).unwrap();
        assert_eq!(author.email(), Some("avf@localhost"));

        let mut custom = CustomData::new();
        custom.insert("email", "jane@studio.example");
        let with_email = AssetMetadata::new("jane", "maya").with_custom_data(custom);
        let author = store.author(&with_email).unwrap();
        assert_eq!(author.name(), Some("jane"));
        assert_eq!(author.email(), Some("jane@studio.example"));
    }

    #[test]
    fn test_commit_hex_check() {
        assert!(is_commit_hex("abc1234"));
        assert!(is_commit_hex(&"a".repeat(40)));
        assert!(!is_commit_hex("abc12"));
        assert!(!is_commit_hex(&"a".repeat(41)));
        assert!(!is_commit_hex("main"));
    }

    #[test]
    fn test_commit_message_uses_description() {
        let asset = AssetPath::new("hero.fbx").unwrap();
        let meta = AssetMetadata::new("jane", "maya").with_description("Fix UVs");
        let message = commit_message(&asset, &meta);
        assert!(message.starts_with("Fix UVs\n"));
        assert!(message.contains("Tool-Version: maya"));
    }

    #[test]
    fn test_open_initializes_repository() {
        let dir = TempDir::new().unwrap();
        let store = GitStorage::open(dir.path().join("assets"), GitConfig::default()).unwrap();
        assert!(store.git_dir().join("avf/versions").is_dir());
    }
}
