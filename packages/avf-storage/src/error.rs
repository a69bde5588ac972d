//! Error types for avf-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// I/O or backend-native write failure (never retried automatically)
    StorageWrite,
    /// Reference type not valid for the target backend kind
    UnsupportedReference,
    /// Malformed `storage_id` or content that does not match it
    InvalidReference,
    /// Unknown version id, reference or asset
    NotFound,
    /// Repository insert collision on `(storage_type, version_id)`
    DuplicateVersion,
    /// Invalid metadata, asset path or query argument
    InvalidInput,
    /// Metadata repository errors (SQLite)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Version control read errors
    Vcs,
    /// I/O errors outside of a write path
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StorageWrite => "storage_write",
            ErrorKind::UnsupportedReference => "unsupported_reference",
            ErrorKind::InvalidReference => "invalid_reference",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DuplicateVersion => "duplicate_version",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Vcs => "vcs",
            ErrorKind::IO => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
///
/// Carries the backend name and asset path when known so callers can log
/// and retry without re-deriving context.
#[derive(Debug, Error)]
#[error("[{kind}] {message}{}", context_suffix(.backend, .asset_path))]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
    pub backend: Option<String>,
    pub asset_path: Option<String>,
}

fn context_suffix(backend: &Option<String>, asset_path: &Option<String>) -> String {
    match (backend, asset_path) {
        (Some(backend), Some(asset)) => format!(" (backend={}, asset={})", backend, asset),
        (Some(backend), None) => format!(" (backend={})", backend),
        (None, Some(asset)) => format!(" (asset={})", asset),
        (None, None) => String::new(),
    }
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backend: None,
            asset_path: None,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_asset(mut self, asset_path: impl Into<String>) -> Self {
        self.asset_path = Some(asset_path.into());
        self
    }

    /// Fill in the backend name unless a more specific one is already set
    pub fn or_backend(mut self, backend: impl Into<String>) -> Self {
        if self.backend.is_none() {
            self.backend = Some(backend.into());
        }
        self
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    // Convenience constructors
    pub fn write(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageWrite, message)
    }

    pub fn unsupported_reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedReference, message)
    }

    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidReference, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn version_not_found(version_id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("Version not found: {}", version_id.into()),
        )
    }

    pub fn duplicate_version(storage_type: impl fmt::Display, version_id: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateVersion,
            format!("Version already recorded: {}/{}", storage_type, version_id),
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn vcs(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Vcs, message)
    }
}

// SQLite error conversions
#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<git2::Error> for StorageError {
    fn from(err: git2::Error) -> Self {
        StorageError::vcs(format!("Git error: {}", err.message())).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, format!("IO error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    // ═══════════════════════════════════════════════════════════════════════
    // Error Construction Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_error_display() {
        let err = StorageError::version_not_found("abc123-20240101T000000.000000Z");
        let msg = format!("{}", err);
        assert!(msg.contains("not_found"));
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn test_error_display_with_context() {
        let err = StorageError::write("disk full")
            .with_backend("local")
            .with_asset("chars/hero.fbx");

        assert_eq!(
            err.to_string(),
            "[storage_write] disk full (backend=local, asset=chars/hero.fbx)"
        );
    }

    #[test]
    fn test_or_backend_keeps_existing() {
        let err = StorageError::write("x").with_backend("inner").or_backend("outer");
        assert_eq!(err.backend.as_deref(), Some("inner"));

        let err = StorageError::write("x").or_backend("outer");
        assert_eq!(err.backend.as_deref(), Some("outer"));
    }

    #[test]
    fn test_duplicate_version() {
        let err = StorageError::duplicate_version("disk", "v1");
        assert_eq!(err.kind, ErrorKind::DuplicateVersion);
        assert!(err.message.contains("disk/v1"));
        assert!(err.is(ErrorKind::DuplicateVersion));
    }

    #[test]
    fn test_with_source() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = StorageError::write("blob missing").with_source(io_err);

        assert_eq!(err.kind, ErrorKind::StorageWrite);
        let source = err.source().unwrap();
        assert!(source.to_string().contains("file not found"));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ErrorKind Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::StorageWrite.as_str(), "storage_write");
        assert_eq!(
            ErrorKind::UnsupportedReference.as_str(),
            "unsupported_reference"
        );
        assert_eq!(ErrorKind::InvalidReference.as_str(), "invalid_reference");
        assert_eq!(ErrorKind::NotFound.as_str(), "not_found");
        assert_eq!(ErrorKind::DuplicateVersion.as_str(), "duplicate_version");
        assert_eq!(ErrorKind::InvalidInput.as_str(), "invalid_input");
        assert_eq!(ErrorKind::Database.as_str(), "database");
        assert_eq!(ErrorKind::Serialization.as_str(), "serialization");
        assert_eq!(ErrorKind::Vcs.as_str(), "vcs");
        assert_eq!(ErrorKind::IO.as_str(), "io");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Conversion Tests
    // ═══════════════════════════════════════════════════════════════════════

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_from_rusqlite_error() {
        let err: StorageError = rusqlite::Error::QueryReturnedNoRows.into();

        assert_eq!(err.kind, ErrorKind::Database);
        assert!(err.message.contains("SQLite error"));
        assert!(err.source.is_some());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json")
            .err()
            .unwrap();
        let err: StorageError = json_err.into();

        assert_eq!(err.kind, ErrorKind::Serialization);
        assert!(err.message.contains("JSON error"));
    }

    #[test]
    fn test_from_git_error() {
        let err: StorageError = git2::Error::from_str("object not found").into();
        assert_eq!(err.kind, ErrorKind::Vcs);
        assert!(err.message.contains("object not found"));
    }

    #[test]
    fn test_result_propagation() {
        fn inner() -> Result<()> {
            Err(StorageError::not_found("missing"))
        }

        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }

        let err = outer().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
