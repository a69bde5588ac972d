//! Asset version storage
//!
//! Storage references, version records and the backends that hold version
//! content.
//!
//! ## Core Principles
//!
//! 1. **Content addressing**: identical bytes share one storage pointer per
//!    backend; every ingestion still mints its own `VersionRecord`
//! 2. **Zero-copy references**: content already in a backend becomes a
//!    version without being copied
//! 3. **Append-only history**: records are immutable, renames are recorded
//!    as `moved` versions chained through `lineage`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use avf_storage::{AssetMetadata, AssetPath, DiskStorage, VersionStore};
//!
//! let disk = DiskStorage::open("/var/lib/avf/disk")?;
//! let asset = AssetPath::new("chars/hero.fbx")?;
//!
//! let record = disk.store_version(&bytes, &asset, AssetMetadata::new("jane", "maya_2024"))?;
//! disk.retrieve_version(&record.version_id, Path::new("/tmp/hero.fbx"))?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    collect_history, content_hash, mint_version_id, sort_chronologically, AssetMetadata,
    AssetPath, CustomData, Lineage, ReferenceIter, ReferenceType, RepositoryStats,
    StorageReference, StorageType, VersionEvent, VersionQuery, VersionRecord, VersionRepository,
    VersionStore,
};

pub use infrastructure::{
    Changelist, DepotClient, DepotFile, DiskStorage, FileAction, GitConfig, GitStorage,
    InMemoryDepot, PerforceConfig, PerforceStorage, StorageBackend,
};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteVersionRepository;
