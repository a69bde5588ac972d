//! Configuration
//!
//! A versioned YAML schema naming the metadata repository, the asset root,
//! logging and the set of storage backends.
//!
//! # Examples
//!
//! ```yaml
//! version: 1
//! repository: sqlite://meta/versions.db
//! asset_root: assets
//! logging:
//!   level: info
//! backends:
//!   local:
//!     type: disk
//!     root: store
//!   vcs:
//!     type: git
//!     path: repo
//!     branch_prefix: avf
//!   depot:
//!     type: perforce
//!     depot_root: //depot/assets
//!     index_root: p4-index
//! ```
//!
//! Relative paths are resolved against the configuration file's directory.

pub mod error;
pub mod io;

// Re-exports
pub use error::{ConfigError, ConfigResult};
pub use io::{
    AvfConfig, BackendConfig, LoggingConfig, CONFIG_ENV, DEFAULT_CONFIG_FILE, SUPPORTED_VERSIONS,
};
