//! Domain layer for asset version storage
//!
//! # Domain Models
//!
//! - `StorageReference`: content already present in a backend
//! - `VersionRecord`: one immutable version, bound to one backend pointer
//! - `AssetMetadata`: creator, tool version, description, tags, custom data
//!
//! # Port Traits
//!
//! - `VersionStore`: backend capability (disk, git, perforce)
//! - `VersionRepository`: persistent version index with search

pub mod history;
pub mod models;
pub mod ports;

pub use history::{collect_history, sort_chronologically};
pub use models::{
    content_hash, is_valid_version_id, mint_version_id, AssetMetadata, AssetPath, CustomData,
    Lineage, ReferenceType, StorageReference, StorageType, VersionEvent, VersionRecord,
    MAX_CUSTOM_DATA_DEPTH,
};
pub use ports::{ReferenceIter, RepositoryStats, VersionQuery, VersionRepository, VersionStore};
