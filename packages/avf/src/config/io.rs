//! Configuration I/O (YAML/Env loading)

use super::error::{ConfigError, ConfigResult};
use avf_storage::{GitConfig, PerforceConfig, StorageType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "AVF_CONFIG";

/// Configuration file used when `AVF_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "avf.yaml";

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// YAML Schema v1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AvfConfig {
    /// Schema version (always 1 for v1)
    pub version: u32,

    /// Metadata repository connection string (`sqlite://…`, `sqlite::memory:` or a path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Files under this directory are versioned by their relative path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_root: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Named backends; iteration order is the name order
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

/// One configured storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Disk {
        root: PathBuf,
    },
    Git {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch_prefix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        committer_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        committer_email: Option<String>,
    },
    Perforce {
        depot_root: String,
        index_root: PathBuf,
    },
}

impl BackendConfig {
    pub fn storage_type(&self) -> StorageType {
        match self {
            BackendConfig::Disk { .. } => StorageType::Disk,
            BackendConfig::Git { .. } => StorageType::Git,
            BackendConfig::Perforce { .. } => StorageType::Perforce,
        }
    }

    pub fn git(path: impl Into<PathBuf>) -> Self {
        BackendConfig::Git {
            path: path.into(),
            branch_prefix: None,
            committer_name: None,
            committer_email: None,
        }
    }

    /// `GitConfig` with defaults for every unset field
    pub fn git_config(&self) -> Option<GitConfig> {
        match self {
            BackendConfig::Git {
                branch_prefix,
                committer_name,
                committer_email,
                ..
            } => {
                let mut config = GitConfig::default();
                if let Some(prefix) = branch_prefix {
                    config.branch_prefix = prefix.clone();
                }
                if let Some(name) = committer_name {
                    config.committer_name = name.clone();
                }
                if let Some(email) = committer_email {
                    config.committer_email = email.clone();
                }
                Some(config)
            }
            _ => None,
        }
    }

    pub fn perforce_config(&self) -> Option<PerforceConfig> {
        match self {
            BackendConfig::Perforce {
                depot_root,
                index_root,
            } => Some(PerforceConfig::new(depot_root.clone(), index_root.clone())),
            _ => None,
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        let path = match self {
            BackendConfig::Disk { root } => root,
            BackendConfig::Git { path, .. } => path,
            BackendConfig::Perforce { index_root, .. } => index_root,
        };
        if path.is_relative() {
            *path = base.join(&*path);
        }
    }
}

/// Logging settings; `AVF_LOG` overrides `level`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `avf=debug,avf_storage=info`
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl Default for AvfConfig {
    fn default() -> Self {
        Self {
            version: 1,
            repository: None,
            asset_root: None,
            logging: LoggingConfig::default(),
            backends: BTreeMap::new(),
        }
    }
}

impl AvfConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, name: impl Into<String>, backend: BackendConfig) -> Self {
        self.backends.insert(name.into(), backend);
        self
    }

    pub fn with_repository(mut self, connection_string: impl Into<String>) -> Self {
        self.repository = Some(connection_string.into());
        self
    }

    pub fn with_asset_root(mut self, asset_root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(asset_root.into());
        self
    }

    /// Load from a YAML file
    ///
    /// Relative backend paths and `asset_root` are resolved against the
    /// file's directory.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content)?;

        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
        if raw.get("version").is_none() {
            return Err(ConfigError::MissingVersion);
        }

        let config: AvfConfig = serde_yaml::from_value(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        serde_yaml::to_string(self).map_err(ConfigError::Yaml)
    }

    /// Configuration file path: `$AVF_CONFIG`, else `avf.yaml`
    pub fn locate() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version) {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        for (name, backend) in &self.backends {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid_backend(name, "name must not be empty"));
            }
            if let BackendConfig::Perforce { depot_root, .. } = backend {
                if !depot_root.starts_with("//") {
                    return Err(ConfigError::invalid_backend(
                        name,
                        format!("depot_root '{}' must start with '//'", depot_root),
                    ));
                }
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for backend in self.backends.values_mut() {
            backend.resolve_paths(base);
        }
        if let Some(root) = &mut self.asset_root {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        if let Some(repository) = &mut self.repository {
            *repository = resolve_connection(repository, base);
        }
    }
}

/// Anchor a relative SQLite database path at `base`
fn resolve_connection(connection: &str, base: &Path) -> String {
    if connection == "sqlite::memory:" || connection == ":memory:" {
        return connection.to_string();
    }
    let (scheme, path) = match connection.strip_prefix("sqlite://") {
        Some(path) => ("sqlite://", path),
        None => ("", connection),
    };
    if Path::new(path).is_relative() {
        format!("{}{}", scheme, base.join(path).display())
    } else {
        connection.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_yaml_roundtrip() {
        let config = AvfConfig::new()
            .with_repository("sqlite://meta/versions.db")
            .with_backend("local", BackendConfig::Disk { root: "store".into() })
            .with_backend("git", BackendConfig::git("repo"));

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("type: disk"));

        assert_eq!(AvfConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_yaml_loading_resolves_relative_paths() {
        let yaml_content = r#"
version: 1
repository: "sqlite::memory:"
asset_root: assets
logging:
  level: debug
backends:
  local:
    type: disk
    root: store
  vcs:
    type: git
    path: /abs/repo
    branch_prefix: versions
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();
        let base = temp_file.path().parent().unwrap().to_path_buf();

        let config = AvfConfig::from_yaml_file(temp_file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.ansi);
        assert_eq!(config.asset_root, Some(base.join("assets")));
        assert_eq!(
            config.backends["local"],
            BackendConfig::Disk { root: base.join("store") }
        );
        assert_eq!(
            config.backends["vcs"].git_config().unwrap().branch_prefix,
            "versions"
        );
    }

    #[test]
    fn test_yaml_missing_version() {
        let result = AvfConfig::from_yaml_str("backends: {}\n");
        assert!(matches!(result, Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let result = AvfConfig::from_yaml_str("version: 2\n");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_unknown_backend_type_rejected() {
        let yaml = "version: 1\nbackends:\n  x:\n    type: svn\n    root: a\n";
        assert!(matches!(
            AvfConfig::from_yaml_str(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_depot_root_validated() {
        let yaml = "version: 1\nbackends:\n  p4:\n    type: perforce\n    depot_root: depot/assets\n    index_root: idx\n";
        assert!(matches!(
            AvfConfig::from_yaml_str(yaml),
            Err(ConfigError::InvalidBackend { .. })
        ));
    }

    #[test]
    fn test_repository_paths_resolved() {
        let base = Path::new("/srv/avf");
        assert_eq!(resolve_connection("sqlite::memory:", base), "sqlite::memory:");
        assert_eq!(
            resolve_connection("sqlite://meta/v.db", base),
            "sqlite:///srv/avf/meta/v.db"
        );
        assert_eq!(resolve_connection("meta/v.db", base), "/srv/avf/meta/v.db");
        assert_eq!(resolve_connection("/var/v.db", base), "/var/v.db");
    }

    #[test]
    fn test_storage_types() {
        assert_eq!(BackendConfig::git("r").storage_type(), StorageType::Git);
        let p4 = BackendConfig::Perforce {
            depot_root: "//depot".into(),
            index_root: "idx".into(),
        };
        assert_eq!(p4.storage_type(), StorageType::Perforce);
        assert_eq!(p4.perforce_config().unwrap().depot_root, "//depot");
        assert!(p4.git_config().is_none());
    }
}
