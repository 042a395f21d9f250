//! Pipeline driver
//!
//! Processes eligible files sequentially: extract (fetch bytes), transform
//! (decode the worksheet), load (bulk copy into the warehouse). Each stage
//! advances the file's status exactly one step on success; any failure
//! increments the retry counter, leaves the status where it was, and moves
//! on to the next file. One file's failure never aborts the batch.

use std::sync::Arc;

use anyhow::Context;
use ifr_common::Result;
use sqlx::PgPool;
use tracing::{error, info, instrument};

use crate::config::PipelineConfig;
use crate::db::loader::Warehouse;
use crate::db::reference::ReferenceData;
use crate::db::state::{FileStatus, StateBackend, StateStore};
use crate::decode::{decode, to_row_set, NormalizedRow};
use crate::storage::StorageObserver;

/// Transform-stage entry point; swapped for a stub in driver tests.
type DecodeFn = fn(&[u8], &str, &ReferenceData) -> Result<Vec<NormalizedRow>>;

/// Outcome of one pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Sequential extract/transform/load driver over eligible files.
pub struct Pipeline {
    store: Arc<dyn StateBackend>,
    warehouse: Arc<dyn Warehouse>,
    observer: Arc<dyn StorageObserver>,
    config: PipelineConfig,
    decode: DecodeFn,
}

impl Pipeline {
    pub fn new(
        pool: PgPool,
        store: StateStore,
        observer: Arc<dyn StorageObserver>,
        config: PipelineConfig,
    ) -> Self {
        Self::assemble(Arc::new(store), Arc::new(pool), observer, config, decode)
    }

    fn assemble(
        store: Arc<dyn StateBackend>,
        warehouse: Arc<dyn Warehouse>,
        observer: Arc<dyn StorageObserver>,
        config: PipelineConfig,
        decode: DecodeFn,
    ) -> Self {
        Self {
            store,
            warehouse,
            observer,
            config,
            decode,
        }
    }

    /// Run the pipeline over every currently eligible file.
    pub async fn run(&self) -> Result<RunSummary> {
        let eligible = self.store.list_eligible().await?;
        if eligible.is_empty() {
            info!("no eligible files, nothing to do");
            return Ok(RunSummary::default());
        }

        info!(files = eligible.len(), "pipeline run started");

        // Reference maps are a read-only snapshot for the whole run;
        // staleness within one run is acceptable.
        let refs = self.warehouse.reference_data().await?;

        let mut summary = RunSummary::default();

        for file_path in eligible {
            // Claim the file against loosely-concurrent runs; a file held
            // by another run is skipped, not failed.
            let Some(claim) = self.store.try_claim(&file_path).await? else {
                info!(%file_path, "claimed by another run, skipping");
                summary.skipped += 1;
                continue;
            };

            let outcome = self.process_file(&file_path, &refs).await;

            let bookkeeping = match &outcome {
                Ok(rows) => {
                    info!(%file_path, rows, "file processed");
                    summary.processed += 1;
                    self.store.set_status(&file_path, FileStatus::Ready).await
                },
                Err(e) => {
                    // The status stays at its last committed stage, so the
                    // file remains eligible until the budget runs out.
                    error!(%file_path, error = %e, "file failed, incrementing retries");
                    summary.failed += 1;
                    self.store.increment_retries(&file_path).await
                },
            };

            // Release before propagating any bookkeeping failure; leaking a
            // session advisory lock into the pool would block later runs.
            claim.release().await?;
            bookkeeping?;
        }

        info!(
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            "pipeline run finished"
        );

        Ok(summary)
    }

    /// Run the three stages for one file. Returns the number of rows loaded.
    #[instrument(skip(self, refs))]
    async fn process_file(&self, file_path: &str, refs: &ReferenceData) -> anyhow::Result<u64> {
        // Extract
        let bytes = self
            .observer
            .fetch(file_path)
            .await
            .with_context(|| format!("extracting {file_path}"))?;
        self.store
            .set_status(file_path, FileStatus::Extracting)
            .await?;
        info!(%file_path, size = bytes.len(), "extracted");

        // Transform
        let rows = (self.decode)(&bytes, &self.config.sheet_name, refs)
            .with_context(|| format!("decoding {file_path}"))?;
        self.store
            .set_status(file_path, FileStatus::Transforming)
            .await?;

        if rows.is_empty() {
            anyhow::bail!("decoded 0 rows from {file_path}");
        }
        info!(%file_path, rows = rows.len(), "decoded");

        // Load
        let row_set = to_row_set(&rows);
        self.warehouse
            .ensure_table(&self.config.target_table, &row_set)
            .await?;
        let written = self
            .warehouse
            .copy_rows(&self.config.target_table, &row_set)
            .await?;
        self.store
            .set_status(file_path, FileStatus::Loading)
            .await?;

        let total = self.warehouse.count_rows(&self.config.target_table).await?;
        info!(%file_path, written, total, "loaded");

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use ifr_common::IfrError;

    use super::*;
    use crate::db::loader::RowSet;
    use crate::db::state::{ClaimHandle, MAX_RETRIES};
    use crate::storage::ObjectInfo;

    struct MemState {
        files: Mutex<HashMap<String, (FileStatus, i32)>>,
        held_elsewhere: Vec<String>,
        transitions: Mutex<Vec<(String, FileStatus)>>,
        releases: Arc<Mutex<Vec<String>>>,
    }

    impl MemState {
        fn with_files(paths: &[&str]) -> Self {
            let files = paths
                .iter()
                .map(|p| (p.to_string(), (FileStatus::Pending, 0)))
                .collect();
            Self {
                files: Mutex::new(files),
                held_elsewhere: Vec::new(),
                transitions: Mutex::new(Vec::new()),
                releases: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn status_of(&self, path: &str) -> FileStatus {
            self.files.lock().unwrap()[path].0
        }

        fn retries_of(&self, path: &str) -> i32 {
            self.files.lock().unwrap()[path].1
        }

        fn transitions_of(&self, path: &str) -> Vec<FileStatus> {
            self.transitions
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == path)
                .map(|(_, s)| *s)
                .collect()
        }
    }

    struct MemClaim {
        file_path: String,
        releases: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ClaimHandle for MemClaim {
        async fn release(self: Box<Self>) -> Result<()> {
            self.releases.lock().unwrap().push(self.file_path.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl StateBackend for MemState {
        async fn list_eligible(&self) -> Result<Vec<String>> {
            let mut paths: Vec<String> = self
                .files
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, (status, retries))| {
                    *status != FileStatus::Ready && *retries < MAX_RETRIES
                })
                .map(|(path, _)| path.clone())
                .collect();
            paths.sort();
            Ok(paths)
        }

        async fn try_claim(&self, file_path: &str) -> Result<Option<Box<dyn ClaimHandle>>> {
            if self.held_elsewhere.iter().any(|p| p == file_path) {
                return Ok(None);
            }
            Ok(Some(Box::new(MemClaim {
                file_path: file_path.to_string(),
                releases: self.releases.clone(),
            })))
        }

        async fn set_status(&self, file_path: &str, status: FileStatus) -> Result<()> {
            if let Some(entry) = self.files.lock().unwrap().get_mut(file_path) {
                entry.0 = status;
            }
            self.transitions
                .lock()
                .unwrap()
                .push((file_path.to_string(), status));
            Ok(())
        }

        async fn increment_retries(&self, file_path: &str) -> Result<()> {
            if let Some(entry) = self.files.lock().unwrap().get_mut(file_path) {
                entry.1 += 1;
            }
            Ok(())
        }
    }

    struct MemObjects {
        files: HashMap<String, Vec<u8>>,
    }

    impl MemObjects {
        fn with_files(paths: &[&str]) -> Self {
            let files = paths
                .iter()
                .map(|p| (p.to_string(), b"workbook bytes".to_vec()))
                .collect();
            Self { files }
        }
    }

    #[async_trait]
    impl StorageObserver for MemObjects {
        async fn list(&self, _prefix: &str) -> Result<Vec<String>> {
            let mut paths: Vec<String> = self.files.keys().cloned().collect();
            paths.sort();
            Ok(paths)
        }

        async fn metadata(&self, path: &str) -> Result<ObjectInfo> {
            Ok(ObjectInfo {
                path: path.to_string(),
                etag: "etag".to_string(),
                last_modified: Utc::now(),
                size: 0,
            })
        }

        async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| IfrError::StorageUnavailable(format!("no such object: {path}")))
        }
    }

    #[derive(Default)]
    struct MemWarehouse {
        copied: Mutex<u64>,
    }

    #[async_trait]
    impl Warehouse for MemWarehouse {
        async fn reference_data(&self) -> Result<ReferenceData> {
            Ok(ReferenceData::default())
        }

        async fn ensure_table(&self, _table: &str, _rows: &RowSet) -> Result<()> {
            Ok(())
        }

        async fn copy_rows(&self, _table: &str, rows: &RowSet) -> Result<u64> {
            let written = rows.len() as u64;
            *self.copied.lock().unwrap() += written;
            Ok(written)
        }

        async fn count_rows(&self, _table: &str) -> Result<i64> {
            Ok(*self.copied.lock().unwrap() as i64)
        }
    }

    fn decoded_row() -> NormalizedRow {
        NormalizedRow {
            destination_id: Some(1),
            country: "USA".to_string(),
            product_id: Some(2),
            packaging_id: Some(3),
            period: "01-2025".to_string(),
            period_index: 1,
            arrivals_sailed: Some(1.0),
            planned_wbooking: None,
            to_be_booked: None,
            sales: Some(10.0),
            adjustments: None,
            final_inv: None,
            mos: None,
        }
    }

    fn decode_one(_bytes: &[u8], _sheet: &str, _refs: &ReferenceData) -> Result<Vec<NormalizedRow>> {
        Ok(vec![decoded_row()])
    }

    fn decode_empty(
        _bytes: &[u8],
        _sheet: &str,
        _refs: &ReferenceData,
    ) -> Result<Vec<NormalizedRow>> {
        Ok(Vec::new())
    }

    fn decode_fail(
        _bytes: &[u8],
        _sheet: &str,
        _refs: &ReferenceData,
    ) -> Result<Vec<NormalizedRow>> {
        Err(IfrError::Decode("malformed worksheet".to_string()))
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            watch_prefix: String::new(),
            target_table: "ifr".to_string(),
            sheet_name: "IFR".to_string(),
            watch_interval_secs: 1,
            trigger_interval_secs: 1,
        }
    }

    fn pipeline(state: Arc<MemState>, observer: MemObjects, decode: DecodeFn) -> Pipeline {
        Pipeline::assemble(
            state,
            Arc::new(MemWarehouse::default()),
            Arc::new(observer),
            test_config(),
            decode,
        )
    }

    #[tokio::test]
    async fn test_successful_file_advances_to_ready() {
        let state = Arc::new(MemState::with_files(&["a.xlsx"]));
        let driver = pipeline(state.clone(), MemObjects::with_files(&["a.xlsx"]), decode_one);

        let summary = driver.run().await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            state.transitions_of("a.xlsx"),
            vec![
                FileStatus::Extracting,
                FileStatus::Transforming,
                FileStatus::Loading,
                FileStatus::Ready,
            ]
        );
        assert_eq!(state.retries_of("a.xlsx"), 0);
        assert_eq!(*state.releases.lock().unwrap(), vec!["a.xlsx".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_decode_increments_retries_and_keeps_status() {
        let state = Arc::new(MemState::with_files(&["a.xlsx"]));
        let driver = pipeline(state.clone(), MemObjects::with_files(&["a.xlsx"]), decode_fail);

        let summary = driver.run().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(state.retries_of("a.xlsx"), 1);
        // The status stays at the last committed stage; no forward step and
        // never Ready.
        assert_eq!(state.status_of("a.xlsx"), FileStatus::Extracting);
        assert_eq!(
            state.transitions_of("a.xlsx"),
            vec![FileStatus::Extracting]
        );
        // The claim is released on the failure path too.
        assert_eq!(*state.releases.lock().unwrap(), vec!["a.xlsx".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_decode_counts_as_failure() {
        let state = Arc::new(MemState::with_files(&["a.xlsx"]));
        let driver = pipeline(
            state.clone(),
            MemObjects::with_files(&["a.xlsx"]),
            decode_empty,
        );

        let summary = driver.run().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(state.retries_of("a.xlsx"), 1);
        assert_eq!(state.status_of("a.xlsx"), FileStatus::Transforming);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        // "a.xlsx" is missing from storage so extraction fails; "b.xlsx"
        // processes normally afterwards.
        let state = Arc::new(MemState::with_files(&["a.xlsx", "b.xlsx"]));
        let driver = pipeline(state.clone(), MemObjects::with_files(&["b.xlsx"]), decode_one);

        let summary = driver.run().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(state.retries_of("a.xlsx"), 1);
        assert_eq!(state.status_of("a.xlsx"), FileStatus::Pending);
        assert_eq!(state.status_of("b.xlsx"), FileStatus::Ready);
    }

    #[tokio::test]
    async fn test_claimed_file_is_skipped_untouched() {
        let mut state = MemState::with_files(&["a.xlsx"]);
        state.held_elsewhere.push("a.xlsx".to_string());
        let state = Arc::new(state);
        let driver = pipeline(state.clone(), MemObjects::with_files(&["a.xlsx"]), decode_one);

        let summary = driver.run().await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(state.status_of("a.xlsx"), FileStatus::Pending);
        assert_eq!(state.retries_of("a.xlsx"), 0);
        assert!(state.transitions_of("a.xlsx").is_empty());
        assert!(state.releases.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retry_budget_excludes_file() {
        let state = Arc::new(MemState::with_files(&["a.xlsx"]));
        state
            .files
            .lock()
            .unwrap()
            .get_mut("a.xlsx")
            .unwrap()
            .1 = MAX_RETRIES;
        let driver = pipeline(state.clone(), MemObjects::with_files(&["a.xlsx"]), decode_one);

        let summary = driver.run().await.unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(state.status_of("a.xlsx"), FileStatus::Pending);
    }
}
