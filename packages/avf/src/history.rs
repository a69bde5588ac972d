//! Asset history summaries
//!
//! Builds a chronological view of one asset: first and latest version,
//! per-backend totals and a timeline of created/referenced/moved events.

use std::collections::{BTreeMap, BTreeSet};

use avf_storage::{
    AssetPath, StorageReference, StorageType, VersionEvent, VersionRecord, VersionStore,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::Result;
use crate::orchestrator::AssetVersion;

/// Options for [`AssetVersion::dump_asset_history`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryOptions {
    /// Also list the storage references each backend holds for the asset
    pub include_storage_data: bool,
    /// Cap on references listed per backend
    pub reference_limit: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            include_storage_data: false,
            reference_limit: 100,
        }
    }
}

impl HistoryOptions {
    pub fn with_storage_data(mut self) -> Self {
        self.include_storage_data = true;
        self
    }
}

/// One entry of the timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub event: VersionEvent,
    pub created_at: DateTime<Utc>,
    pub version_id: String,
    pub storage_type: StorageType,
    pub asset_path: AssetPath,
    /// Source path of a move
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
    pub creator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl From<&VersionRecord> for TimelineEvent {
    fn from(record: &VersionRecord) -> Self {
        Self {
            event: record.event,
            created_at: record.created_at,
            version_id: record.version_id.clone(),
            storage_type: record.storage_type,
            asset_path: record.asset_path.clone(),
            previous_path: record.lineage.previous_path.clone(),
            creator: record.metadata.creator.clone(),
            description: record.metadata.description.clone(),
            tags: record.metadata.tags.clone(),
        }
    }
}

/// References one backend holds for the asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageSummary {
    pub storage_type: StorageType,
    pub references: Vec<StorageReference>,
    /// Listing failure, reported instead of failing the whole dump
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured history of one asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetHistory {
    pub asset_path: AssetPath,
    pub total_versions: usize,
    pub versions_by_storage: BTreeMap<StorageType, usize>,
    pub first_version: Option<VersionRecord>,
    pub latest_version: Option<VersionRecord>,
    pub timeline: Vec<TimelineEvent>,
    pub versions: Vec<VersionRecord>,
    /// Per backend name; present only when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_data: Option<BTreeMap<String, StorageSummary>>,
}

impl AssetHistory {
    /// Summarize records already in `created_at` order
    pub fn from_records(asset_path: AssetPath, versions: Vec<VersionRecord>) -> Self {
        let mut versions_by_storage = BTreeMap::new();
        for record in &versions {
            *versions_by_storage.entry(record.storage_type).or_insert(0) += 1;
        }

        Self {
            asset_path,
            total_versions: versions.len(),
            versions_by_storage,
            first_version: versions.first().cloned(),
            latest_version: versions.last().cloned(),
            timeline: versions.iter().map(TimelineEvent::from).collect(),
            versions,
            storage_data: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Timeline entries of one kind
    pub fn events(&self, event: VersionEvent) -> impl Iterator<Item = &TimelineEvent> {
        self.timeline.iter().filter(move |e| e.event == event)
    }
}

impl AssetVersion {
    /// Chronological history summary of an asset
    ///
    /// An asset with no versions yields an empty history, not an error.
    pub fn dump_asset_history(
        &self,
        asset_path: &AssetPath,
        options: &HistoryOptions,
    ) -> Result<AssetHistory> {
        let versions = self.get_version_history(asset_path)?;
        let mut history = AssetHistory::from_records(asset_path.clone(), versions);

        if options.include_storage_data {
            let storage_data = self
                .backends()
                .map(|(name, backend)| {
                    (
                        name.to_string(),
                        summarize_storage(backend, asset_path, options.reference_limit),
                    )
                })
                .collect();
            history.storage_data = Some(storage_data);
        }

        tracing::debug!(
            asset = %asset_path,
            versions = history.total_versions,
            "asset history assembled"
        );
        Ok(history)
    }
}

fn summarize_storage(
    backend: &dyn VersionStore,
    asset_path: &AssetPath,
    limit: usize,
) -> StorageSummary {
    let mut summary = StorageSummary {
        storage_type: backend.storage_type(),
        references: Vec::new(),
        error: None,
    };

    let listed = backend
        .list_references(None, Some(asset_path.as_str()))
        .and_then(|refs| {
            // Listing filters by substring; keep exact path matches and errors
            refs.filter(|item| !matches!(item, Ok(r) if r.path != asset_path.as_str()))
                .take(limit)
                .collect::<avf_storage::Result<Vec<_>>>()
        });
    match listed {
        Ok(references) => summary.references = references,
        Err(err) => summary.error = Some(err.to_string()),
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use avf_storage::{AssetMetadata, Lineage};
    use chrono::TimeZone;

    fn record(id: &str, storage_type: StorageType, minute: u32, event: VersionEvent) -> VersionRecord {
        VersionRecord {
            version_id: id.to_string(),
            storage_type,
            storage_pointer: format!("ptr-{}", id),
            revision: None,
            asset_path: AssetPath::new("hero.fbx").unwrap(),
            metadata: AssetMetadata::new("jane", "maya").with_tags(["wip"]),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            lineage: Lineage::default(),
            event,
        }
    }

    #[test]
    fn test_summary_of_records() {
        let history = AssetHistory::from_records(
            AssetPath::new("hero.fbx").unwrap(),
            vec![
                record("v1", StorageType::Disk, 0, VersionEvent::Created),
                record("g1", StorageType::Git, 1, VersionEvent::Referenced),
                record("v2", StorageType::Disk, 2, VersionEvent::Moved),
            ],
        );

        assert_eq!(history.total_versions, 3);
        assert_eq!(history.first_version.as_ref().unwrap().version_id, "v1");
        assert_eq!(history.latest_version.as_ref().unwrap().version_id, "v2");
        assert_eq!(history.versions_by_storage[&StorageType::Disk], 2);
        assert_eq!(history.events(VersionEvent::Referenced).count(), 1);
        assert!(history.timeline[0].tags.contains("wip"));
    }

    #[test]
    fn test_empty_history() {
        let history = AssetHistory::from_records(AssetPath::new("none.fbx").unwrap(), vec![]);
        assert!(history.is_empty());
        assert!(history.first_version.is_none());

        let json = serde_json::to_value(&history).unwrap();
        assert!(json.get("storage_data").is_none());
    }
}
