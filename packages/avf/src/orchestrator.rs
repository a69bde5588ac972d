//! Multi-backend version orchestration
//!
//! `AssetVersion` fans one request out to the selected backends in parallel,
//! collects every per-backend result and records the successful ones in the
//! metadata repository as a single batch. Backend stores and repository
//! inserts are not transactional with each other: a failed insert never
//! rolls back stored content.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use avf_storage::{
    sort_chronologically, AssetMetadata, AssetPath, DepotClient, PerforceConfig, ReferenceIter,
    ReferenceType, StorageBackend, StorageError, StorageReference, VersionQuery, VersionRecord,
    VersionRepository, VersionStore,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{AvfConfig, BackendConfig, ConfigError};
use crate::errors::{AssetVersionError, Result};

/// Per-backend results of one orchestrated operation
#[derive(Debug)]
pub struct VersionOutcome {
    pub asset_path: AssetPath,
    /// Records created, keyed by backend name
    pub records: BTreeMap<String, VersionRecord>,
    /// Backend failures, keyed by backend name
    pub failures: BTreeMap<String, StorageError>,
    /// Repository batch failure; `records` were stored but not recorded
    pub persist_error: Option<StorageError>,
}

impl VersionOutcome {
    fn new(asset_path: AssetPath) -> Self {
        Self {
            asset_path,
            records: BTreeMap::new(),
            failures: BTreeMap::new(),
            persist_error: None,
        }
    }

    /// Number of backends that produced a result
    pub fn attempted(&self) -> usize {
        self.records.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.persist_error.is_none()
    }

    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Records that still need a repository insert
    pub fn unpersisted_records(&self) -> Vec<VersionRecord> {
        if self.persist_error.is_some() {
            self.records.values().cloned().collect()
        } else {
            Vec::new()
        }
    }
}

/// Asset version orchestrator
///
/// Owns named backends (iterated in name order) and an optional metadata
/// repository. Safe to share across threads.
pub struct AssetVersion {
    backends: BTreeMap<String, StorageBackend>,
    repository: Option<Box<dyn VersionRepository>>,
    asset_root: Option<PathBuf>,
}

impl fmt::Debug for AssetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetVersion")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("repository", &self.repository.is_some())
            .field("asset_root", &self.asset_root)
            .finish()
    }
}

impl AssetVersion {
    pub fn builder() -> AssetVersionBuilder {
        AssetVersionBuilder::default()
    }

    /// Open every configured backend and the repository
    ///
    /// Perforce backends need [`AssetVersionBuilder::depot_client`]; use the
    /// builder directly for those.
    pub fn from_config(config: &AvfConfig) -> Result<Self> {
        Self::builder().from_config(config)?.build()
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    pub fn backend(&self, name: &str) -> Result<&StorageBackend> {
        self.backends
            .get(name)
            .ok_or_else(|| self.unknown_backend(name))
    }

    pub fn backends(&self) -> impl Iterator<Item = (&str, &StorageBackend)> {
        self.backends.iter().map(|(name, backend)| (name.as_str(), backend))
    }

    pub fn repository(&self) -> Option<&dyn VersionRepository> {
        self.repository.as_deref()
    }

    pub fn asset_root(&self) -> Option<&Path> {
        self.asset_root.as_deref()
    }

    /// Logical asset path of a file on disk
    ///
    /// Relative to the asset root when the file lies under it, otherwise the
    /// bare file name.
    pub fn asset_path_for(&self, file: &Path) -> Result<AssetPath> {
        if let Some(root) = &self.asset_root {
            let file_abs = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
            let root_abs = root.canonicalize().unwrap_or_else(|_| root.clone());
            if let Ok(relative) = file_abs.strip_prefix(&root_abs) {
                return Ok(AssetPath::from_relative_path(relative)?);
            }
        }

        let name = file.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            StorageError::invalid_input(format!("No usable file name in {}", file.display()))
        })?;
        Ok(AssetPath::new(name)?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Version creation
    // ═══════════════════════════════════════════════════════════════════════

    /// Version a file on every selected backend
    ///
    /// `backends` names the targets; an empty slice selects every configured
    /// backend. The file is read once.
    ///
    /// # Errors
    ///
    /// - `UnknownBackend` before anything is stored
    /// - `PartialOrchestration` if any backend failed (successes included)
    /// - `Unpersisted` if every backend succeeded but the repository batch failed
    pub fn create_version(
        &self,
        file: impl AsRef<Path>,
        metadata: AssetMetadata,
        backends: &[&str],
    ) -> Result<BTreeMap<String, VersionRecord>> {
        let file = file.as_ref();
        let selected = self.select(backends)?;
        let asset_path = self.asset_path_for(file)?;
        let content = std::fs::read(file)?;

        self.store_selected(&content, asset_path, metadata, selected)
    }

    /// Version in-memory content under an explicit asset path
    pub fn create_version_at(
        &self,
        content: &[u8],
        asset_path: &AssetPath,
        metadata: AssetMetadata,
        backends: &[&str],
    ) -> Result<BTreeMap<String, VersionRecord>> {
        let selected = self.select(backends)?;
        self.store_selected(content, asset_path.clone(), metadata, selected)
    }

    fn store_selected(
        &self,
        content: &[u8],
        asset_path: AssetPath,
        metadata: AssetMetadata,
        selected: Vec<(&str, &StorageBackend)>,
    ) -> Result<BTreeMap<String, VersionRecord>> {
        let metadata = metadata.validated()?;
        let _span = tracing::info_span!("create_version", asset = %asset_path).entered();

        let outcome = fan_out(asset_path.clone(), &selected, |backend| {
            backend
                .store_version(content, &asset_path, metadata.clone())
                .map(Some)
        });
        info!(
            asset = %outcome.asset_path,
            bytes = content.len(),
            stored = outcome.records.len(),
            failed = outcome.failures.len(),
            "version created"
        );
        self.conclude(outcome)
    }

    /// Bind a version to content already present in one backend
    pub fn create_version_from_reference(
        &self,
        backend_name: &str,
        reference: &StorageReference,
        metadata: AssetMetadata,
    ) -> Result<VersionRecord> {
        let backend = self.backend(backend_name)?;
        if reference.storage_type != backend.storage_type() {
            return Err(StorageError::unsupported_reference(format!(
                "{} reference cannot be resolved by {} backend '{}'",
                reference.storage_type,
                backend.storage_type(),
                backend_name
            ))
            .with_backend(backend_name)
            .with_asset(reference.path.clone())
            .into());
        }

        let record = backend.create_version_from_reference(reference, metadata)?;
        info!(
            backend = backend_name,
            storage_id = %reference.storage_id,
            version_id = %record.version_id,
            "version created from reference"
        );

        let mut outcome = VersionOutcome::new(record.asset_path.clone());
        outcome.records.insert(backend_name.to_string(), record.clone());
        self.persist(&mut outcome);
        if outcome.persist_error.is_some() {
            return Err(AssetVersionError::Unpersisted(Box::new(outcome)));
        }
        Ok(record)
    }

    /// Record a rename of the latest version in each selected backend
    ///
    /// Backends holding no version of `old_path` are skipped.
    pub fn move_asset(
        &self,
        old_path: &AssetPath,
        new_path: &AssetPath,
        backends: &[&str],
    ) -> Result<BTreeMap<String, VersionRecord>> {
        old_path.check_move_target(new_path)?;
        let selected = self.select(backends)?;
        let _span =
            tracing::info_span!("move_asset", from = %old_path, to = %new_path).entered();

        let outcome = fan_out(new_path.clone(), &selected, |backend| {
            match backend.latest_version(old_path)? {
                Some(latest) => backend
                    .track_move(old_path, new_path, &latest.version_id)
                    .map(Some),
                None => Ok(None),
            }
        });

        if outcome.attempted() == 0 {
            return Err(StorageError::not_found(format!(
                "No versions of {} in the selected backends",
                old_path
            ))
            .with_asset(old_path.as_str())
            .into());
        }
        info!(moved = outcome.records.len(), failed = outcome.failures.len(), "asset moved");
        self.conclude(outcome)
    }

    fn persist(&self, outcome: &mut VersionOutcome) {
        let Some(repository) = &self.repository else {
            return;
        };
        if outcome.records.is_empty() {
            return;
        }

        let batch: Vec<VersionRecord> = outcome.records.values().cloned().collect();
        match repository.insert_batch(&batch) {
            Ok(()) => debug!(count = batch.len(), "version records persisted"),
            Err(err) => {
                warn!(asset = %outcome.asset_path, error = %err, "version records not persisted");
                outcome.persist_error = Some(err);
            }
        }
    }

    fn conclude(&self, mut outcome: VersionOutcome) -> Result<BTreeMap<String, VersionRecord>> {
        self.persist(&mut outcome);

        if !outcome.failures.is_empty() {
            warn!(
                asset = %outcome.asset_path,
                failures = %outcome.failure_summary(),
                "partial orchestration failure"
            );
            return Err(AssetVersionError::PartialOrchestration(Box::new(outcome)));
        }
        if outcome.persist_error.is_some() {
            return Err(AssetVersionError::Unpersisted(Box::new(outcome)));
        }
        Ok(outcome.records)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// Materialize a version's bytes at `target`
    pub fn get_version(
        &self,
        backend_name: &str,
        version_id: &str,
        target: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        let backend = self.backend(backend_name)?;
        Ok(backend.retrieve_version(version_id, target.as_ref())?)
    }

    /// Version record as minted by a backend
    pub fn get_record(&self, backend_name: &str, version_id: &str) -> Result<VersionRecord> {
        Ok(self.backend(backend_name)?.get_version(version_id)?)
    }

    pub fn list_references(
        &self,
        backend_name: &str,
        reference_type: Option<ReferenceType>,
        path_pattern: Option<&str>,
    ) -> Result<ReferenceIter<'_>> {
        let backend = self.backend(backend_name)?;
        Ok(backend.list_references(reference_type, path_pattern)?)
    }

    /// Conjunctive search over the repository
    pub fn find_versions(&self, query: &VersionQuery) -> Result<Vec<VersionRecord>> {
        let repository = self.repository.as_ref().ok_or(AssetVersionError::NoRepository)?;
        Ok(repository.find_versions(query)?)
    }

    /// History of an asset, `created_at` ascending
    ///
    /// Served by the repository when one is configured, otherwise merged
    /// from the backends' own version indexes.
    pub fn get_version_history(&self, asset_path: &AssetPath) -> Result<Vec<VersionRecord>> {
        if let Some(repository) = &self.repository {
            return Ok(repository.get_version_history(asset_path)?);
        }

        let mut merged = Vec::new();
        for (name, backend) in &self.backends {
            let history = backend
                .history(asset_path)
                .map_err(|e| e.or_backend(name.as_str()))?;
            merged.extend(history);
        }
        sort_chronologically(&mut merged);
        merged.dedup_by(|a, b| a.key() == b.key());
        Ok(merged)
    }

    fn select(&self, names: &[&str]) -> Result<Vec<(&str, &StorageBackend)>> {
        if names.is_empty() {
            return Ok(self.backends().collect());
        }

        let mut selected: Vec<(&str, &StorageBackend)> = Vec::with_capacity(names.len());
        for name in names {
            let (key, backend) = self
                .backends
                .get_key_value(*name)
                .ok_or_else(|| self.unknown_backend(name))?;
            if !selected.iter().any(|(n, _)| *n == key.as_str()) {
                selected.push((key.as_str(), backend));
            }
        }
        Ok(selected)
    }

    fn unknown_backend(&self, name: &str) -> AssetVersionError {
        AssetVersionError::UnknownBackend {
            name: name.to_string(),
            configured: self.backends.keys().cloned().collect(),
        }
    }
}

/// Run `op` on every selected backend in parallel
///
/// `Ok(None)` means the backend had nothing to do and is left out of the
/// outcome.
fn fan_out<F>(
    asset_path: AssetPath,
    selected: &[(&str, &StorageBackend)],
    op: F,
) -> VersionOutcome
where
    F: Fn(&StorageBackend) -> avf_storage::Result<Option<VersionRecord>> + Sync,
{
    let results: Vec<(String, avf_storage::Result<Option<VersionRecord>>)> = selected
        .par_iter()
        .map(|(name, backend)| (name.to_string(), op(backend)))
        .collect();

    let mut outcome = VersionOutcome::new(asset_path);
    for (name, result) in results {
        match result {
            Ok(Some(record)) => {
                debug!(backend = %name, version_id = %record.version_id, "backend succeeded");
                outcome.records.insert(name, record);
            }
            Ok(None) => debug!(backend = %name, "backend skipped"),
            Err(err) => {
                warn!(backend = %name, error = %err, "backend failed");
                outcome.failures.insert(name, err);
            }
        }
    }
    outcome
}

// ═══════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════

/// Builder for [`AssetVersion`]
#[derive(Default)]
pub struct AssetVersionBuilder {
    backends: BTreeMap<String, StorageBackend>,
    repository: Option<Box<dyn VersionRepository>>,
    asset_root: Option<PathBuf>,
    depot_client: Option<Arc<dyn DepotClient>>,
}

impl AssetVersionBuilder {
    pub fn backend(mut self, name: impl Into<String>, backend: impl Into<StorageBackend>) -> Self {
        self.backends.insert(name.into(), backend.into());
        self
    }

    pub fn repository(mut self, repository: impl VersionRepository + 'static) -> Self {
        self.repository = Some(Box::new(repository));
        self
    }

    pub fn boxed_repository(mut self, repository: Box<dyn VersionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn asset_root(mut self, asset_root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(asset_root.into());
        self
    }

    /// Depot connection used by perforce backends opened from config
    pub fn depot_client(mut self, client: Arc<dyn DepotClient>) -> Self {
        self.depot_client = Some(client);
        self
    }

    /// Open the backends, repository and asset root named by `config`
    pub fn from_config(mut self, config: &AvfConfig) -> Result<Self> {
        config.validate()?;

        for (name, backend_config) in &config.backends {
            let backend = match backend_config {
                BackendConfig::Disk { root } => StorageBackend::disk(root.clone()),
                BackendConfig::Git { path, .. } => StorageBackend::git(
                    path,
                    backend_config.git_config().unwrap_or_default(),
                ),
                BackendConfig::Perforce {
                    depot_root,
                    index_root,
                } => {
                    let client = self.depot_client.clone().ok_or_else(|| {
                        ConfigError::MissingDepotClient {
                            backend: name.clone(),
                        }
                    })?;
                    StorageBackend::perforce(
                        client,
                        PerforceConfig::new(depot_root.clone(), index_root.clone()),
                    )
                }
            }
            .map_err(|e| e.or_backend(name.as_str()))?;

            debug!(backend = %name, kind = %backend.storage_type(), "backend opened");
            self.backends.insert(name.clone(), backend);
        }

        if let Some(connection) = &config.repository {
            self.repository = Some(open_repository(connection)?);
        }
        if let Some(root) = &config.asset_root {
            self.asset_root = Some(root.clone());
        }
        Ok(self)
    }

    pub fn build(self) -> Result<AssetVersion> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends.into());
        }
        Ok(AssetVersion {
            backends: self.backends,
            repository: self.repository,
            asset_root: self.asset_root,
        })
    }
}

#[cfg(feature = "sqlite")]
fn open_repository(connection: &str) -> Result<Box<dyn VersionRepository>> {
    Ok(Box::new(avf_storage::SqliteVersionRepository::connect(
        connection,
    )?))
}

#[cfg(not(feature = "sqlite"))]
fn open_repository(connection: &str) -> Result<Box<dyn VersionRepository>> {
    Err(ConfigError::RepositoryUnavailable(connection.to_string()).into())
}
