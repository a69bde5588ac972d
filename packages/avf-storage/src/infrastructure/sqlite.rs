//! SQLite Version Repository
//!
//! File-backed or in-memory metadata store for version records.
//! Tag and creator lookups are served from indexes, never a full scan.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    collect_history, AssetMetadata, AssetPath, CustomData, Lineage, RepositoryStats,
    StorageType, VersionEvent, VersionQuery, VersionRecord, VersionRepository,
};
use crate::error::{Result, StorageError};

/// Separator for aggregated tag lists (ASCII unit separator)
const TAG_SEPARATOR: char = '\u{1f}';

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_VERSION: &str = "SELECT v.storage_type, v.version_id, v.storage_pointer, v.revision,
        v.asset_path, v.creator, v.tool_version, v.description, v.custom_data,
        v.created_at, v.previous_version, v.previous_path, v.event,
        (SELECT group_concat(t.tag, char(31)) FROM version_tags t
          WHERE t.storage_type = v.storage_type AND t.version_id = v.version_id) AS tags
     FROM versions v";

/// SQLite-based VersionRepository implementation
#[derive(Clone)]
pub struct SqliteVersionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteVersionRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVersionRepository").finish_non_exhaustive()
    }
}

impl SqliteVersionRepository {
    /// Connect from a connection string
    ///
    /// Accepts `sqlite::memory:`, `sqlite://<path>` or a plain file path.
    pub fn connect(connection_string: &str) -> Result<Self> {
        let trimmed = connection_string.trim();
        match trimmed {
            "sqlite::memory:" | ":memory:" => Self::in_memory(),
            _ => {
                let path = trimmed.strip_prefix("sqlite://").unwrap_or(trimmed);
                if path.is_empty() {
                    return Err(StorageError::invalid_input(format!(
                        "Invalid repository connection string: {:?}",
                        connection_string
                    )));
                }
                Self::open(path)
            }
        }
    }

    /// Open (creating if needed) a database file
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %db_path.display(), journal_mode = %mode, "opened version repository");

        Self::with_connection(conn)
    }

    /// Create an in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.create_tables()?;
        Ok(repo)
    }

    fn fetch(&self, storage_type: StorageType, version_id: &str) -> Result<Option<VersionRecord>> {
        let row = {
            let conn = self.conn.lock();
            let row = conn
                .query_row(
                    &format!("{} WHERE v.storage_type = ?1 AND v.version_id = ?2", SELECT_VERSION),
                    params![storage_type.as_str(), version_id],
                    VersionRow::from_row,
                )
                .optional()?;
            row
        };
        row.map(VersionRow::into_record).transpose()
    }

    fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<VersionRecord>> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), VersionRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(VersionRow::into_record).collect()
    }
}

impl VersionRepository for SqliteVersionRepository {
    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        // Versions table (append-only)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS versions (
                storage_type TEXT NOT NULL,
                version_id TEXT NOT NULL,
                storage_pointer TEXT NOT NULL,
                revision TEXT,
                asset_path TEXT NOT NULL,
                creator TEXT NOT NULL,
                tool_version TEXT NOT NULL,
                description TEXT,
                custom_data TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                previous_version TEXT,
                previous_path TEXT,
                event TEXT NOT NULL,
                PRIMARY KEY (storage_type, version_id)
            )",
            [],
        )?;

        // Tags table (many-to-many)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS version_tags (
                storage_type TEXT NOT NULL,
                version_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (storage_type, version_id, tag),
                FOREIGN KEY (storage_type, version_id)
                    REFERENCES versions(storage_type, version_id) ON DELETE CASCADE
            )",
            [],
        )?;

        // Indexes for tag/creator/time-range lookups
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_version_tags_tag ON version_tags(tag)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_versions_creator ON versions(creator)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_versions_asset
             ON versions(asset_path, created_at)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_versions_created ON versions(created_at)",
            [],
        )?;

        Ok(())
    }

    fn insert(&self, record: &VersionRecord) -> Result<()> {
        self.insert_batch(std::slice::from_ref(record))
    }

    fn insert_batch(&self, records: &[VersionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for record in records {
            insert_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_version(&self, storage_type: StorageType, version_id: &str) -> Result<VersionRecord> {
        self.fetch(storage_type, version_id)?.ok_or_else(|| {
            StorageError::version_not_found(version_id).with_backend(storage_type.as_str())
        })
    }

    fn get_version_history(&self, asset_path: &AssetPath) -> Result<Vec<VersionRecord>> {
        let seed = self.query(
            &format!("{} WHERE v.asset_path = ?1", SELECT_VERSION),
            &[Value::Text(asset_path.to_string())],
        )?;
        collect_history(seed, |storage_type, id| self.fetch(storage_type, id))
    }

    fn find_versions(&self, query: &VersionQuery) -> Result<Vec<VersionRecord>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        let tags: BTreeSet<&str> = query
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if !tags.is_empty() {
            let placeholders = vec!["?"; tags.len()].join(", ");
            clauses.push(format!(
                "(v.storage_type, v.version_id) IN (
                    SELECT storage_type, version_id FROM version_tags
                    WHERE tag IN ({})
                    GROUP BY storage_type, version_id
                    HAVING COUNT(DISTINCT tag) = {})",
                placeholders,
                tags.len()
            ));
            args.extend(tags.iter().map(|t| Value::Text(t.to_string())));
        }
        if let Some(creator) = &query.creator {
            clauses.push("v.creator = ?".to_string());
            args.push(Value::Text(creator.clone()));
        }
        if let Some(after) = query.after {
            clauses.push("v.created_at >= ?".to_string());
            args.push(Value::Integer(after.timestamp_micros()));
        }
        if let Some(before) = query.before {
            clauses.push("v.created_at <= ?".to_string());
            args.push(Value::Integer(before.timestamp_micros()));
        }
        if let Some(storage_type) = query.storage_type {
            clauses.push("v.storage_type = ?".to_string());
            args.push(Value::Text(storage_type.as_str().to_string()));
        }
        if let Some(asset_path) = &query.asset_path {
            clauses.push("v.asset_path = ?".to_string());
            args.push(Value::Text(asset_path.to_string()));
        }

        let mut sql = SELECT_VERSION.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY v.created_at ASC, v.storage_type, v.version_id");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        self.query(&sql, &args)
    }

    fn list_tags(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT tag FROM version_tags ORDER BY tag")?;
        let tags = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(tags)
    }

    fn stats(&self) -> Result<RepositoryStats> {
        let conn = self.conn.lock();

        let total_versions: i64 =
            conn.query_row("SELECT COUNT(*) FROM versions", [], |row| row.get(0))?;

        let total_assets: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT asset_path) FROM versions",
            [],
            |row| row.get(0),
        )?;

        let total_tags: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT tag) FROM version_tags",
            [],
            |row| row.get(0),
        )?;

        let mut stmt =
            conn.prepare("SELECT storage_type, COUNT(*) FROM versions GROUP BY storage_type")?;
        let per_storage = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut versions_by_storage = BTreeMap::new();
        for (storage_type, count) in per_storage {
            versions_by_storage.insert(storage_type.parse::<StorageType>()?, count as usize);
        }

        Ok(RepositoryStats {
            total_versions: total_versions as usize,
            total_assets: total_assets as usize,
            total_tags: total_tags as usize,
            versions_by_storage,
        })
    }

    fn prune_history(&self, asset_path: &AssetPath) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM version_tags WHERE (storage_type, version_id) IN (
                SELECT storage_type, version_id FROM versions WHERE asset_path = ?1)",
            params![asset_path.as_str()],
        )?;
        let removed = tx.execute(
            "DELETE FROM versions WHERE asset_path = ?1",
            params![asset_path.as_str()],
        )?;
        tx.commit()?;

        tracing::info!(asset = %asset_path, removed, "pruned version history");
        Ok(removed)
    }
}

fn insert_record(conn: &Connection, record: &VersionRecord) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO versions
         (storage_type, version_id, storage_pointer, revision, asset_path, creator,
          tool_version, description, custom_data, created_at, previous_version,
          previous_path, event)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.storage_type.as_str(),
            &record.version_id,
            &record.storage_pointer,
            &record.revision,
            record.asset_path.as_str(),
            &record.metadata.creator,
            &record.metadata.tool_version,
            &record.metadata.description,
            serde_json::to_string(&record.metadata.custom_data)?,
            record.created_at.timestamp_micros(),
            &record.lineage.previous_version,
            &record.lineage.previous_path,
            record.event.as_str(),
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            return Err(
                StorageError::duplicate_version(record.storage_type, &record.version_id)
                    .with_backend(record.storage_type.as_str())
                    .with_asset(record.asset_path.as_str()),
            );
        }
        Err(e) => return Err(e.into()),
    }

    for tag in &record.metadata.tags {
        conn.execute(
            "INSERT INTO version_tags (storage_type, version_id, tag) VALUES (?1, ?2, ?3)",
            params![record.storage_type.as_str(), &record.version_id, tag],
        )?;
    }
    Ok(())
}

/// Raw column values of one `versions` row
struct VersionRow {
    storage_type: String,
    version_id: String,
    storage_pointer: String,
    revision: Option<String>,
    asset_path: String,
    creator: String,
    tool_version: String,
    description: Option<String>,
    custom_data: String,
    created_at: i64,
    previous_version: Option<String>,
    previous_path: Option<String>,
    event: String,
    tags: Option<String>,
}

impl VersionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            storage_type: row.get(0)?,
            version_id: row.get(1)?,
            storage_pointer: row.get(2)?,
            revision: row.get(3)?,
            asset_path: row.get(4)?,
            creator: row.get(5)?,
            tool_version: row.get(6)?,
            description: row.get(7)?,
            custom_data: row.get(8)?,
            created_at: row.get(9)?,
            previous_version: row.get(10)?,
            previous_path: row.get(11)?,
            event: row.get(12)?,
            tags: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<VersionRecord> {
        let custom_data: CustomData = serde_json::from_str(&self.custom_data)?;
        let tags = self
            .tags
            .map(|joined| {
                joined
                    .split(TAG_SEPARATOR)
                    .map(str::to_string)
                    .collect::<BTreeSet<_>>()
            })
            .unwrap_or_default();

        Ok(VersionRecord {
            storage_type: self.storage_type.parse()?,
            created_at: from_micros(self.created_at)?,
            event: self.event.parse::<VersionEvent>()?,
            asset_path: AssetPath::new(&self.asset_path)?,
            version_id: self.version_id,
            storage_pointer: self.storage_pointer,
            revision: self.revision,
            metadata: AssetMetadata {
                creator: self.creator,
                tool_version: self.tool_version,
                description: self.description,
                tags,
                custom_data,
            },
            lineage: Lineage {
                previous_version: self.previous_version,
                previous_path: self.previous_path,
            },
        })
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single().ok_or_else(|| {
        StorageError::serialization(format!("Timestamp out of range: {}", micros))
    })
}
