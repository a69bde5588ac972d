//! Error types for avf
//!
//! Storage failures pass through unchanged; multi-backend outcomes that are
//! only partly successful carry every record that was created.

use crate::config::ConfigError;
use crate::orchestrator::VersionOutcome;
use avf_storage::StorageError;
use thiserror::Error;

/// Main error type for orchestration
#[derive(Debug, Error)]
pub enum AssetVersionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// At least one backend failed; successful records are in the outcome
    #[error("{} of {} backend(s) failed for {}: {}", .0.failures.len(), .0.attempted(), .0.asset_path, .0.failure_summary())]
    PartialOrchestration(Box<VersionOutcome>),

    /// Every backend succeeded but the repository batch did not
    #[error("Versions of {} stored but not recorded in the repository: {}", .0.asset_path, .0.persist_error.as_ref().map(|e| e.to_string()).unwrap_or_default())]
    Unpersisted(Box<VersionOutcome>),

    #[error("Unknown backend '{name}'. Configured backends: {}", .configured.join(", "))]
    UnknownBackend { name: String, configured: Vec<String> },

    #[error("No version repository configured")]
    NoRepository,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AssetVersionError {
    /// Outcome carried by partial or unpersisted results
    pub fn outcome(&self) -> Option<&VersionOutcome> {
        match self {
            AssetVersionError::PartialOrchestration(outcome)
            | AssetVersionError::Unpersisted(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn into_outcome(self) -> Option<VersionOutcome> {
        match self {
            AssetVersionError::PartialOrchestration(outcome)
            | AssetVersionError::Unpersisted(outcome) => Some(*outcome),
            _ => None,
        }
    }

    /// Underlying storage error, if this is one
    pub fn storage(&self) -> Option<&StorageError> {
        match self {
            AssetVersionError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for orchestration
pub type Result<T> = std::result::Result<T, AssetVersionError>;
