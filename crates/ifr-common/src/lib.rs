//! IFR Common Library
//!
//! Shared error types and logging setup for the IFR ingestion pipeline
//! workspace members.

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{IfrError, Result};
