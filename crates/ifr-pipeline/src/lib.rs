//! IFR Ingestion Pipeline
//!
//! Watches an S3-compatible bucket for refreshed IFR workbooks, decodes the
//! semi-structured worksheet into normalized per-period metric rows, and
//! bulk-loads them into Postgres. A per-file state table tracks each
//! observed file's lifecycle (`pending` → `extracting` → `transforming` →
//! `loading` → `ready`) with a bounded retry budget, so partial failures
//! are retried without reprocessing completed files.
//!
//! # Components
//!
//! - [`watcher`]: diffs the live bucket listing against the state table and
//!   marks new or modified files `pending`
//! - [`decode`]: the row classifier and worksheet decoder
//! - [`db`]: state store, reference-data cache, and bulk loader
//! - [`storage`]: the object-store observer trait and its S3 adapter
//! - [`pipeline`]: the sequential extract/transform/load driver
//! - [`orchestrator`]: interval scheduler for the watcher and trigger cycles

pub mod config;
pub mod db;
pub mod decode;
pub mod orchestrator;
pub mod pipeline;
pub mod storage;
pub mod watcher;
