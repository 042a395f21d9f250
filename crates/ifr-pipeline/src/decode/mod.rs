//! Worksheet decoding
//!
//! Turns the semi-structured IFR worksheet (header rows establishing a
//! destination/product/packaging context, followed by metric rows spread
//! across 24 calendar-period columns) into normalized wide records.

pub mod classifier;
pub mod decoder;

pub use classifier::{classify, MetricKind, RawHeader, RowKind};
pub use decoder::{decode, decode_rows, to_row_set, NormalizedRow, PERIODS};
