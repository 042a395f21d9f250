//! Change detection
//!
//! Compares the live bucket listing against the state table and marks new
//! or modified files `pending`. The comparison is a pure diff against the
//! last stored etag only: unchanged files are not touched (no timestamp
//! heartbeat), and a file whose etag reverts to an older value still counts
//! as changed.

use std::collections::HashMap;

use chrono::Utc;
use ifr_common::Result;
use tracing::{info, warn};

use crate::db::state::{FileChange, StateStore};
use crate::storage::{ObjectInfo, StorageObserver};

/// Pure diff: listed objects whose etag is new or differs from the stored
/// one become upsert payloads with a fresh retry budget.
pub fn diff_listing(
    listing: &[ObjectInfo],
    stored_etags: &HashMap<String, String>,
) -> Vec<FileChange> {
    let now = Utc::now();

    listing
        .iter()
        .filter(|object| stored_etags.get(&object.path) != Some(&object.etag))
        .map(|object| FileChange {
            file_path: object.path.clone(),
            etag: object.etag.clone(),
            last_modified: object.last_modified,
            last_checked: now,
        })
        .collect()
}

/// Run one watcher cycle: list the bucket, upsert changed files, surface
/// abandoned ones, and report whether eligible work exists (the trigger
/// predicate for a pipeline run).
pub async fn run_watcher_cycle(
    observer: &dyn StorageObserver,
    store: &StateStore,
    prefix: &str,
) -> Result<bool> {
    let paths = observer.list(prefix).await?;

    let mut listing = Vec::with_capacity(paths.len());
    let mut stored_etags = HashMap::new();

    for path in paths {
        let info = observer.metadata(&path).await?;
        if let Some(state) = store.get(&path).await? {
            stored_etags.insert(path.clone(), state.etag);
        }
        listing.push(info);
    }

    let changes = diff_listing(&listing, &stored_etags);
    info!(
        listed = listing.len(),
        changed = changes.len(),
        "watcher cycle: listing diffed"
    );

    for change in &changes {
        store.upsert(change).await?;
    }

    let abandoned = store.list_abandoned().await?;
    for file_path in &abandoned {
        warn!(%file_path, "file exhausted its retry budget and is abandoned");
    }

    store.has_eligible().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn object(path: &str, etag: &str) -> ObjectInfo {
        ObjectInfo {
            path: path.to_string(),
            etag: etag.to_string(),
            last_modified: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
            size: 1024,
        }
    }

    #[test]
    fn test_new_file_is_changed() {
        let listing = vec![object("reports/ifr.xlsx", "e1")];
        let changes = diff_listing(&listing, &HashMap::new());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].file_path, "reports/ifr.xlsx");
        assert_eq!(changes[0].etag, "e1");
    }

    #[test]
    fn test_unchanged_file_is_not_touched() {
        let listing = vec![object("reports/ifr.xlsx", "e1")];
        let stored = HashMap::from([("reports/ifr.xlsx".to_string(), "e1".to_string())]);
        assert!(diff_listing(&listing, &stored).is_empty());
    }

    #[test]
    fn test_modified_file_is_changed() {
        let listing = vec![object("reports/ifr.xlsx", "e2")];
        let stored = HashMap::from([("reports/ifr.xlsx".to_string(), "e1".to_string())]);
        let changes = diff_listing(&listing, &stored);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].etag, "e2");
    }

    #[test]
    fn test_reverted_etag_still_counts_as_changed() {
        // Only the last stored etag matters, not full history: a revert to
        // a previously seen value is a change.
        let listing = vec![object("reports/ifr.xlsx", "e1")];
        let stored = HashMap::from([("reports/ifr.xlsx".to_string(), "e2".to_string())]);
        assert_eq!(diff_listing(&listing, &stored).len(), 1);
    }

    #[test]
    fn test_mixed_listing() {
        let listing = vec![
            object("a.xlsx", "e1"),
            object("b.xlsx", "e2"),
            object("c.xlsx", "e3"),
        ];
        let stored = HashMap::from([
            ("a.xlsx".to_string(), "e1".to_string()),
            ("b.xlsx".to_string(), "old".to_string()),
        ]);
        let changes = diff_listing(&listing, &stored);
        let paths: Vec<_> = changes.iter().map(|c| c.file_path.as_str()).collect();
        assert_eq!(paths, vec!["b.xlsx", "c.xlsx"]);
    }
}
