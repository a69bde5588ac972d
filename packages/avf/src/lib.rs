/*
 * avf - Asset Version Framework
 *
 * Versions binary creative assets across heterogeneous storage backends
 * (local disk, git, perforce) while keeping one queryable history.
 *
 * Architecture:
 * - Orchestrator: parallel fan-out of one request to named backends
 * - Repository: single batch insert of the successful records
 * - History: chronological summaries across backends and renames
 * - Config: versioned YAML schema
 */

// Public modules
pub mod config;
pub mod errors;
pub mod history;
pub mod orchestrator;
pub mod telemetry;

// Re-exports
pub use config::{AvfConfig, BackendConfig, ConfigError, ConfigResult, LoggingConfig};
pub use errors::{AssetVersionError, Result};
pub use history::{AssetHistory, HistoryOptions, StorageSummary, TimelineEvent};
pub use orchestrator::{AssetVersion, AssetVersionBuilder, VersionOutcome};
pub use telemetry::init_tracing;

pub use avf_storage as storage;
