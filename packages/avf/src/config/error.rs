//! Configuration error types

use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing version field in YAML
    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    /// No backend configured
    #[error("No storage backends configured. Add at least one entry under 'backends'.")]
    NoBackends,

    /// Backend entry rejected before opening
    #[error("Invalid backend '{name}': {reason}")]
    InvalidBackend { name: String, reason: String },

    /// Perforce backend configured without a depot client
    #[error("Backend '{backend}' is a perforce backend but no depot client was supplied")]
    MissingDepotClient { backend: String },

    /// Repository connection string given but SQLite support is compiled out
    #[error("Repository '{0}' configured but the 'sqlite' feature is disabled")]
    RepositoryUnavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub fn invalid_backend(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBackend {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting() {
        let err = ConfigError::UnsupportedVersion {
            found: 3,
            supported: vec![1],
        };
        assert_eq!(
            err.to_string(),
            "Unsupported configuration version 3. Supported versions: 1"
        );

        let err = ConfigError::invalid_backend("", "name must not be empty");
        assert!(err.to_string().contains("name must not be empty"));
    }
}
