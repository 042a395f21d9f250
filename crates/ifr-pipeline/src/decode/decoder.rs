//! Spreadsheet decoder
//!
//! Walks the worksheet rows left-to-right with the current header context
//! threaded through as a fold accumulator, expands metric rows across the
//! 24 period columns, and pivots the resulting fact stream into one wide
//! row per `(destination, country, product, packaging, period)` group.

use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use ifr_common::{IfrError, Result};
use tracing::warn;

use crate::db::loader::{Column, RowSet, SqlValue};
use crate::db::reference::{normalize_key, ReferenceData};

use super::classifier::{classify, MetricKind, RawHeader, RowKind};

/// Calendar-period column labels, in worksheet order (columns H..AE).
pub const PERIODS: [&str; 24] = [
    "01-2025", "02-2025", "03-2025", "04-2025", "05-2025", "06-2025", "07-2025", "08-2025",
    "09-2025", "10-2025", "11-2025", "12-2025", "01-2026", "02-2026", "03-2026", "04-2026",
    "05-2026", "06-2026", "07-2026", "08-2026", "09-2026", "10-2026", "11-2026", "12-2026",
];

// The worksheet's column band is C..AE; indices below are band-relative
// (column C = 0).
const BAND_FIRST_COL: u32 = 2; // C
const BAND_WIDTH: usize = 29; // C..=AE
const PRIMARY_COL: usize = 0; // C: header labels and metric labels
const SECONDARY_COL: usize = 3; // F: the "mos" marker
const FIRST_PERIOD_COL: usize = 5; // H

/// Maximum length of a non-numeric mos value carried through as text.
const MOS_TEXT_MAX: usize = 16;

/// Header labels excluded from processing before classification.
const SKIP_LABELS: [&str; 1] = ["3.4.1 Shanghai (MIC9000.00/CL-500)"];

/// Dimension context in force for the metric rows below a header,
/// post-resolution. Missing reference lookups leave the id fields null.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderContext {
    pub destination_id: Option<i64>,
    pub country: String,
    pub product_id: Option<i64>,
    pub packaging_id: Option<i64>,
}

/// One unresolved fact: a single metric value for a single period.
#[derive(Debug, Clone)]
struct MetricRecord {
    context: HeaderContext,
    period: &'static str,
    period_index: i32,
    metric: MetricKind,
    value: MetricValue,
}

#[derive(Debug, Clone, PartialEq)]
enum MetricValue {
    Number(f64),
    Text(String),
    Null,
}

/// Final pivoted output row, one per grouping key.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub destination_id: Option<i64>,
    pub country: String,
    pub product_id: Option<i64>,
    pub packaging_id: Option<i64>,
    pub period: String,
    pub period_index: i32,
    pub arrivals_sailed: Option<f64>,
    pub planned_wbooking: Option<f64>,
    pub to_be_booked: Option<f64>,
    pub sales: Option<f64>,
    pub adjustments: Option<f64>,
    pub final_inv: Option<f64>,
    pub mos: Option<String>,
}

impl NormalizedRow {
    fn new(context: &HeaderContext, period: &str, period_index: i32) -> Self {
        Self {
            destination_id: context.destination_id,
            country: context.country.clone(),
            product_id: context.product_id,
            packaging_id: context.packaging_id,
            period: period.to_string(),
            period_index,
            arrivals_sailed: None,
            planned_wbooking: None,
            to_be_booked: None,
            sales: None,
            adjustments: None,
            final_inv: None,
            mos: None,
        }
    }

    /// First-wins assignment: a later duplicate never overwrites.
    fn set_metric(&mut self, metric: MetricKind, value: &MetricValue) {
        match metric {
            MetricKind::Mos => {
                if self.mos.is_none() {
                    if let MetricValue::Text(s) = value {
                        self.mos = Some(s.clone());
                    }
                }
            },
            other => {
                let slot = match other {
                    MetricKind::ArrivalsSailed => &mut self.arrivals_sailed,
                    MetricKind::PlannedWbooking => &mut self.planned_wbooking,
                    MetricKind::ToBeBooked => &mut self.to_be_booked,
                    MetricKind::Sales => &mut self.sales,
                    MetricKind::Adjustments => &mut self.adjustments,
                    MetricKind::FinalInv => &mut self.final_inv,
                    MetricKind::Mos => unreachable!(),
                };
                if slot.is_none() {
                    if let MetricValue::Number(v) = value {
                        *slot = Some(*v);
                    }
                }
            },
        }
    }
}

/// Pivot grouping key; the derived ordering makes output deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    destination_id: Option<i64>,
    country: String,
    product_id: Option<i64>,
    packaging_id: Option<i64>,
    period_index: i32,
    period: String,
}

/// Decode one workbook into normalized rows.
///
/// Unreadable bytes or a missing worksheet are fatal for the file; per-row
/// classification and resolution misses are logged and skipped. An empty
/// worksheet decodes to an empty vector, not an error.
pub fn decode(bytes: &[u8], sheet_name: &str, refs: &ReferenceData) -> Result<Vec<NormalizedRow>> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| IfrError::Decode(format!("unreadable workbook: {e}")))?;

    let range = workbook
        .worksheet_range(sheet_name)
        .map_err(|_| IfrError::SheetNotFound(sheet_name.to_string()))?;

    // Re-anchor on absolute sheet coordinates and cut the C..AE band,
    // dropping rows that are empty across the whole band.
    let start_col = range.start().map(|(_, col)| col).unwrap_or(0);
    let rows: Vec<Vec<Data>> = range
        .rows()
        .map(|row| {
            let mut band = vec![Data::Empty; BAND_WIDTH];
            for (i, cell) in row.iter().enumerate() {
                let abs = start_col + i as u32;
                if abs >= BAND_FIRST_COL {
                    let rel = (abs - BAND_FIRST_COL) as usize;
                    if rel < BAND_WIDTH {
                        band[rel] = cell.clone();
                    }
                }
            }
            band
        })
        .filter(|band| band.iter().any(|cell| !matches!(cell, Data::Empty)))
        .collect();

    decode_rows(&rows, refs)
}

/// Decode pre-materialized band rows (column C at index 0).
///
/// Exposed separately so the row walk is testable without workbook bytes.
pub fn decode_rows(rows: &[Vec<Data>], refs: &ReferenceData) -> Result<Vec<NormalizedRow>> {
    let mut records: Vec<MetricRecord> = Vec::new();

    // Left-to-right fold: the header context is a pure function of the
    // previous context and the current row.
    let mut context: Option<HeaderContext> = None;
    for row in rows {
        let (next, mut emitted) = apply_row(context, row, refs);
        context = next;
        records.append(&mut emitted);
    }

    Ok(pivot(records))
}

/// Process one row: a header replaces the context, a metric row emits one
/// record per period column under the current context, anything else
/// passes the context through unchanged.
fn apply_row(
    context: Option<HeaderContext>,
    row: &[Data],
    refs: &ReferenceData,
) -> (Option<HeaderContext>, Vec<MetricRecord>) {
    let primary = cell_text(row.get(PRIMARY_COL));
    let secondary = cell_text(row.get(SECONDARY_COL));

    if let Some(text) = primary.as_deref() {
        if SKIP_LABELS.contains(&text.trim()) {
            warn!(label = text.trim(), "skipping excluded header");
            return (context, Vec::new());
        }
    }

    match classify(primary.as_deref(), secondary.as_deref()) {
        RowKind::Header(raw) => (Some(resolve_header(&raw, refs)), Vec::new()),
        RowKind::Metric(metric) => {
            // Metric rows before the first header have no context; drop them.
            let Some(ctx) = context else {
                return (None, Vec::new());
            };

            let records = PERIODS
                .iter()
                .copied()
                .enumerate()
                .map(|(i, period)| {
                    let cell = row.get(FIRST_PERIOD_COL + i).unwrap_or(&Data::Empty);
                    let value = if metric == MetricKind::Mos {
                        coerce_mos(cell)
                    } else {
                        MetricValue::Number(coerce_number(cell))
                    };
                    MetricRecord {
                        context: ctx.clone(),
                        period,
                        period_index: i as i32 + 1,
                        metric,
                        value,
                    }
                })
                .collect();

            (Some(ctx), records)
        },
        RowKind::None => (context, Vec::new()),
    }
}

/// Resolve a raw header against the reference maps.
///
/// A destination miss is non-fatal: the id stays null and the country falls
/// back to the filial text as written in the sheet. Product and packaging
/// misses likewise carry null ids. All misses are logged.
fn resolve_header(raw: &RawHeader, refs: &ReferenceData) -> HeaderContext {
    let txt_dest = normalize_key(&raw.filial);
    let mut txt_prod = normalize_key(&raw.producto);
    let txt_pack = normalize_key(&raw.envase);

    // Bare single-token product codes are stored with a ".00" suffix.
    if !txt_prod.ends_with(".00") && txt_prod.split_whitespace().count() == 1 {
        txt_prod.push_str(".00");
    }

    let (destination_id, country) = match refs.destination(&txt_dest) {
        Some(dest) => (Some(dest.id), dest.country.clone()),
        None => {
            warn!(destination = %txt_dest, "destination not found in reference data");
            (None, raw.filial.trim().to_string())
        },
    };

    let product_id = refs.product_id(&txt_prod);
    if product_id.is_none() {
        warn!(product = %txt_prod, destination = %txt_dest, "product not found in reference data");
    }

    let packaging_id = refs.packaging_id(&txt_pack);
    if packaging_id.is_none() {
        warn!(packaging = %txt_pack, destination = %txt_dest, "packaging not found in reference data");
    }

    HeaderContext {
        destination_id,
        country,
        product_id,
        packaging_id,
    }
}

/// Group the fact stream by key and spread metrics into columns.
fn pivot(records: Vec<MetricRecord>) -> Vec<NormalizedRow> {
    let mut groups: BTreeMap<GroupKey, NormalizedRow> = BTreeMap::new();

    for record in records {
        let key = GroupKey {
            destination_id: record.context.destination_id,
            country: record.context.country.clone(),
            product_id: record.context.product_id,
            packaging_id: record.context.packaging_id,
            period_index: record.period_index,
            period: record.period.to_string(),
        };

        let row = groups
            .entry(key)
            .or_insert_with(|| NormalizedRow::new(&record.context, record.period, record.period_index));
        row.set_metric(record.metric, &record.value);
    }

    groups.into_values().collect()
}

/// Convert normalized rows into the loader's column/value form, with the
/// warehouse column names and their declared types. Types are fixed here
/// rather than inferred, so an id column that resolved nothing in a given
/// file still creates as BIGINT.
pub fn to_row_set(rows: &[NormalizedRow]) -> RowSet {
    let columns = vec![
        Column::new("filial", "BIGINT"),
        Column::new("pais", "TEXT"),
        Column::new("producto", "BIGINT"),
        Column::new("envase", "BIGINT"),
        Column::new("periodo", "TEXT"),
        Column::new("periodoequivalente", "BIGINT"),
        Column::new("arrivals_sailed", "DOUBLE PRECISION"),
        Column::new("planned_wbooking", "DOUBLE PRECISION"),
        Column::new("to_be_booked", "DOUBLE PRECISION"),
        Column::new("sales", "DOUBLE PRECISION"),
        Column::new("adjustments", "DOUBLE PRECISION"),
        Column::new("final_inv", "DOUBLE PRECISION"),
        Column::new("mos", "TEXT"),
    ];

    let rows = rows
        .iter()
        .map(|row| {
            vec![
                opt_int(row.destination_id),
                SqlValue::Text(row.country.clone()),
                opt_int(row.product_id),
                opt_int(row.packaging_id),
                SqlValue::Text(row.period.clone()),
                SqlValue::Int(row.period_index as i64),
                opt_float(row.arrivals_sailed),
                opt_float(row.planned_wbooking),
                opt_float(row.to_be_booked),
                opt_float(row.sales),
                opt_float(row.adjustments),
                opt_float(row.final_inv),
                row.mos
                    .as_ref()
                    .map(|s| SqlValue::Text(s.clone()))
                    .unwrap_or(SqlValue::Null),
            ]
        })
        .collect();

    RowSet { columns, rows }
}

fn opt_int(value: Option<i64>) -> SqlValue {
    value.map(SqlValue::Int).unwrap_or(SqlValue::Null)
}

fn opt_float(value: Option<f64>) -> SqlValue {
    value.map(SqlValue::Float).unwrap_or(SqlValue::Null)
}

/// Render a cell as text for classification; `Empty` is absent.
fn cell_text(cell: Option<&Data>) -> Option<String> {
    match cell {
        None | Some(Data::Empty) => None,
        Some(Data::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// mos coercion: numeric values render rounded to two decimals; other text
/// is carried through truncated; blanks and error cells stay null.
fn coerce_mos(cell: &Data) -> MetricValue {
    match cell {
        Data::Empty | Data::Error(_) => MetricValue::Null,
        Data::Float(f) => MetricValue::Text(format_mos(*f)),
        Data::Int(i) => MetricValue::Text(format_mos(*i as f64)),
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                MetricValue::Null
            } else if let Ok(f) = trimmed.parse::<f64>() {
                MetricValue::Text(format_mos(f))
            } else {
                MetricValue::Text(truncate(s, MOS_TEXT_MAX))
            }
        },
        other => MetricValue::Text(truncate(&other.to_string(), MOS_TEXT_MAX)),
    }
}

/// Round to two decimals and render with trailing zeros dropped, keeping
/// one decimal place for whole numbers (`1.0`, not `1` or `1.00`).
fn format_mos(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.1}")
    } else {
        rounded.to_string()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Non-mos metrics coerce to float, 0.0 for anything non-numeric.
fn coerce_number(cell: &Data) -> f64 {
    match cell {
        Data::Float(f) => *f,
        Data::Int(i) => *i as f64,
        Data::String(s) => s.trim().parse().unwrap_or(0.0),
        Data::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        },
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::db::reference::DestinationRef;

    fn test_refs() -> ReferenceData {
        let mut products = HashMap::new();
        products.insert("cry.00".to_string(), 11);
        products.insert("cry9000.00".to_string(), 12);

        let mut packaging = HashMap::new();
        packaging.insert("cl".to_string(), 21);
        packaging.insert("cl 50l".to_string(), 22);

        let mut destinations = HashMap::new();
        destinations.insert(
            "wil".to_string(),
            DestinationRef {
                id: 31,
                country: "USA".to_string(),
            },
        );

        ReferenceData::from_maps(products, packaging, destinations)
    }

    fn band_row(cells: Vec<(usize, Data)>) -> Vec<Data> {
        let mut row = vec![Data::Empty; BAND_WIDTH];
        for (idx, cell) in cells {
            row[idx] = cell;
        }
        row
    }

    fn header_row(label: &str) -> Vec<Data> {
        band_row(vec![(PRIMARY_COL, Data::String(label.to_string()))])
    }

    fn metric_row(label: &str, values: Vec<f64>) -> Vec<Data> {
        let mut cells = vec![(PRIMARY_COL, Data::String(label.to_string()))];
        for (i, v) in values.into_iter().enumerate() {
            cells.push((FIRST_PERIOD_COL + i, Data::Float(v)));
        }
        band_row(cells)
    }

    #[test]
    fn test_end_to_end_two_periods() {
        let rows = vec![
            header_row("1.1.1.1 Wil (CRY/CL"),
            metric_row("Sales", vec![10.0, 20.0]),
        ];

        let decoded = decode_rows(&rows, &test_refs()).unwrap();

        // Sales has a value in two periods, but every period column emits a
        // record with the 0.0 default, so all 24 groups materialize.
        assert_eq!(decoded.len(), 24);

        let first = &decoded[0];
        assert_eq!(first.destination_id, Some(31));
        assert_eq!(first.country, "USA");
        assert_eq!(first.product_id, Some(11));
        assert_eq!(first.packaging_id, Some(21));
        assert_eq!(first.period, "01-2025");
        assert_eq!(first.period_index, 1);
        assert_eq!(first.sales, Some(10.0));
        assert_eq!(first.arrivals_sailed, None);
        assert_eq!(first.mos, None);

        let second = &decoded[1];
        assert_eq!(second.period, "02-2025");
        assert_eq!(second.period_index, 2);
        assert_eq!(second.sales, Some(20.0));

        // Untouched period columns default to 0.0 rather than null.
        assert_eq!(decoded[2].sales, Some(0.0));
    }

    #[test]
    fn test_metric_rows_before_first_header_are_dropped() {
        let rows = vec![
            metric_row("Sales", vec![10.0]),
            header_row("1.1.1.1 Wil (CRY/CL"),
        ];
        let decoded = decode_rows(&rows, &test_refs()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_header_context_carries_forward_and_replaces() {
        let rows = vec![
            header_row("1.1.1.1 Wil (CRY/CL"),
            metric_row("Sales", vec![1.0]),
            header_row("2.2.2.2 Ant (CRY9000.00/CL - 50L)"),
            metric_row("Sales", vec![2.0]),
        ];
        let decoded = decode_rows(&rows, &test_refs()).unwrap();

        let wil: Vec<_> = decoded
            .iter()
            .filter(|r| r.destination_id == Some(31))
            .collect();
        let ant: Vec<_> = decoded.iter().filter(|r| r.destination_id.is_none()).collect();

        assert_eq!(wil.len(), 24);
        assert_eq!(ant.len(), 24);
        // The unresolved destination falls back to the raw filial text.
        assert_eq!(ant[0].country, "Ant");
        assert_eq!(ant[0].product_id, Some(12));
        assert_eq!(ant[0].packaging_id, Some(22));
        assert_eq!(ant[0].sales, Some(2.0));
    }

    #[test]
    fn test_mos_coercion() {
        let rows = vec![
            header_row("1.1.1.1 Wil (CRY/CL"),
            band_row(vec![
                (SECONDARY_COL, Data::String("mos".to_string())),
                (FIRST_PERIOD_COL, Data::Float(1.256)),
                (FIRST_PERIOD_COL + 1, Data::String("n/a for this long period".to_string())),
                (FIRST_PERIOD_COL + 2, Data::Float(2.0)),
            ]),
        ];
        let decoded = decode_rows(&rows, &test_refs()).unwrap();

        assert_eq!(decoded[0].mos.as_deref(), Some("1.26"));
        // Non-numeric text is truncated to 16 chars.
        assert_eq!(decoded[1].mos.as_deref(), Some("n/a for this lon"));
        // Whole numbers keep exactly one decimal place.
        assert_eq!(decoded[2].mos.as_deref(), Some("2.0"));
        // Empty cells stay null.
        assert_eq!(decoded[3].mos, None);
        // mos rows contribute no numeric metrics.
        assert_eq!(decoded[0].sales, None);
    }

    #[test]
    fn test_mos_formatting_drops_trailing_zeros() {
        assert_eq!(format_mos(2.0), "2.0");
        assert_eq!(format_mos(1.5), "1.5");
        assert_eq!(format_mos(1.256), "1.26");
        assert_eq!(format_mos(0.0), "0.0");
    }

    #[test]
    fn test_product_suffix_normalization() {
        // "CRY" is a bare single-token code; lookup happens as "cry.00".
        let rows = vec![
            header_row("1.1.1.1 Wil (CRY/CL"),
            metric_row("Adjustments", vec![5.0]),
        ];
        let decoded = decode_rows(&rows, &test_refs()).unwrap();
        assert_eq!(decoded[0].product_id, Some(11));
        assert_eq!(decoded[0].adjustments, Some(5.0));
    }

    #[test]
    fn test_skip_list_excludes_header() {
        let rows = vec![
            header_row("3.4.1 Shanghai (MIC9000.00/CL-500)"),
            metric_row("Sales", vec![9.0]),
        ];
        // The excluded header never establishes a context, so the metric
        // row underneath has nothing to attach to.
        let decoded = decode_rows(&rows, &test_refs()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let rows = vec![
            header_row("1.1.1.1 Wil (CRY/CL"),
            metric_row("Sales", vec![10.0, 20.0]),
            metric_row("Final Inv.", vec![3.0]),
        ];
        let a = decode_rows(&rows, &test_refs()).unwrap();
        let b = decode_rows(&rows, &test_refs()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pivot_uniqueness_and_first_wins() {
        // The same metric twice under the same header: first value wins,
        // no duplicate groups appear.
        let rows = vec![
            header_row("1.1.1.1 Wil (CRY/CL"),
            metric_row("Sales", vec![10.0]),
            metric_row("Sales", vec![99.0]),
        ];
        let decoded = decode_rows(&rows, &test_refs()).unwrap();
        assert_eq!(decoded.len(), 24);
        assert_eq!(decoded[0].sales, Some(10.0));

        let mut keys: Vec<_> = decoded
            .iter()
            .map(|r| (r.destination_id, r.product_id, r.packaging_id, r.period.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 24);
    }

    #[test]
    fn test_empty_input_decodes_to_empty() {
        let decoded = decode_rows(&[], &test_refs()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_row_set_shape() {
        let rows = vec![
            header_row("1.1.1.1 Wil (CRY/CL"),
            metric_row("Sales", vec![10.0]),
        ];
        let decoded = decode_rows(&rows, &test_refs()).unwrap();
        let row_set = to_row_set(&decoded);

        assert_eq!(row_set.columns.len(), 13);
        assert_eq!(row_set.len(), 24);
        assert_eq!(row_set.rows[0][0], SqlValue::Int(31));
        assert_eq!(row_set.rows[0][1], SqlValue::Text("USA".to_string()));
        assert_eq!(row_set.rows[0][5], SqlValue::Int(1));
        assert_eq!(row_set.rows[0][9], SqlValue::Float(10.0));
        assert_eq!(row_set.rows[0][12], SqlValue::Null);
    }

    #[test]
    fn test_row_set_types_do_not_depend_on_values() {
        // A header that resolves nothing leaves every id cell null; the
        // declared column types must not degrade to TEXT because of it.
        let rows = vec![
            header_row("9.9 Zzz (XXX/YY"),
            metric_row("Sales", vec![1.0]),
        ];
        let decoded = decode_rows(&rows, &test_refs()).unwrap();
        let row_set = to_row_set(&decoded);

        assert_eq!(row_set.rows[0][0], SqlValue::Null);
        assert_eq!(row_set.rows[0][2], SqlValue::Null);
        assert_eq!(row_set.columns[0].ty, "BIGINT");
        assert_eq!(row_set.columns[2].ty, "BIGINT");
        assert_eq!(row_set.columns[6].ty, "DOUBLE PRECISION");
        assert_eq!(row_set.columns[12].ty, "TEXT");
    }
}
