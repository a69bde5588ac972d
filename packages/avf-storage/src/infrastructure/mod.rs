//! Infrastructure layer - Storage adapters
//!
//! - `disk`, `git`, `perforce`: backend variants behind `VersionStore`
//! - `backend`: closed enum dispatching to the variants
//! - `sqlite`: `VersionRepository` adapter

pub mod backend;
pub mod disk;
pub(crate) mod fs_atomic;
pub mod git;
pub mod perforce;
pub mod version_index;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backend::StorageBackend;
pub use disk::DiskStorage;
pub use git::{GitConfig, GitStorage};
pub use perforce::{
    Changelist, DepotClient, DepotFile, FileAction, InMemoryDepot, PerforceConfig,
    PerforceStorage,
};
pub use version_index::{MonotonicClock, RecordDraft, VersionIndex};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteVersionRepository;
