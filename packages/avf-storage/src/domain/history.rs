//! History reconstruction
//!
//! Lineage chains are followed within each backend (including across
//! renames), then merged across backends by `created_at`. Backend clocks are
//! not synchronized, so the cross-backend order is best-effort.

use std::collections::HashSet;

use super::models::{StorageType, VersionRecord};
use crate::error::Result;

/// Expand `seed` along `lineage.previous_version` and order the result
///
/// `lookup` resolves a predecessor inside the same backend. Missing
/// predecessors end the chain silently (a pruned or foreign record).
pub fn collect_history<F>(seed: Vec<VersionRecord>, mut lookup: F) -> Result<Vec<VersionRecord>>
where
    F: FnMut(StorageType, &str) -> Result<Option<VersionRecord>>,
{
    let mut seen: HashSet<(StorageType, String)> = HashSet::new();
    let mut stack = seed;
    let mut history = Vec::new();

    while let Some(record) = stack.pop() {
        if !seen.insert((record.storage_type, record.version_id.clone())) {
            continue;
        }
        if let Some(previous) = &record.lineage.previous_version {
            if !seen.contains(&(record.storage_type, previous.clone())) {
                if let Some(found) = lookup(record.storage_type, previous)? {
                    stack.push(found);
                }
            }
        }
        history.push(record);
    }

    sort_chronologically(&mut history);
    Ok(history)
}

/// `created_at` ascending; ties broken by backend then version id
pub fn sort_chronologically(records: &mut [VersionRecord]) {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.storage_type.cmp(&b.storage_type))
            .then_with(|| a.version_id.cmp(&b.version_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AssetMetadata, AssetPath, Lineage, VersionEvent};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;

    fn record(
        storage_type: StorageType,
        id: &str,
        path: &str,
        minute: i64,
        previous: Option<&str>,
        previous_path: Option<&str>,
    ) -> VersionRecord {
        VersionRecord {
            version_id: id.to_string(),
            storage_type,
            storage_pointer: format!("ptr-{}", id),
            revision: None,
            asset_path: AssetPath::new(path).unwrap(),
            metadata: AssetMetadata::new("jane", "maya"),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minute),
            lineage: Lineage {
                previous_version: previous.map(String::from),
                previous_path: previous_path.map(String::from),
            },
            event: if previous_path.is_some() {
                VersionEvent::Moved
            } else {
                VersionEvent::Created
            },
        }
    }

    #[test]
    fn test_follows_rename_into_old_path() {
        let all = vec![
            record(StorageType::Disk, "a1", "old.fbx", 1, None, None),
            record(StorageType::Disk, "a2", "old.fbx", 2, Some("a1"), None),
            record(StorageType::Disk, "b1", "new.fbx", 3, Some("a2"), Some("old.fbx")),
            record(StorageType::Disk, "b2", "new.fbx", 4, Some("b1"), None),
        ];
        let by_id: HashMap<String, VersionRecord> = all
            .iter()
            .map(|r| (r.version_id.clone(), r.clone()))
            .collect();

        let seed = all
            .iter()
            .filter(|r| r.asset_path.as_str() == "new.fbx")
            .cloned()
            .collect();
        let history = collect_history(seed, |_, id| Ok(by_id.get(id).cloned())).unwrap();

        let ids: Vec<_> = history.iter().map(|r| r.version_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "b1", "b2"]);
    }

    #[test]
    fn test_merges_backends_by_timestamp() {
        let seed = vec![
            record(StorageType::Git, "g1", "hero.fbx", 2, None, None),
            record(StorageType::Disk, "d1", "hero.fbx", 1, None, None),
            record(StorageType::Disk, "d2", "hero.fbx", 3, Some("d1"), None),
        ];
        let history = collect_history(seed, |_, _| Ok(None)).unwrap();
        let ids: Vec<_> = history.iter().map(|r| r.version_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "g1", "d2"]);
    }

    #[test]
    fn test_lineage_lookup_is_backend_scoped() {
        // Same version id in two backends must not be conflated
        let seed = vec![
            record(StorageType::Disk, "x", "hero.fbx", 1, None, None),
            record(StorageType::Git, "x", "hero.fbx", 1, None, None),
        ];
        let history = collect_history(seed, |_, _| Ok(None)).unwrap();
        assert_eq!(history.len(), 2);
    }
}
