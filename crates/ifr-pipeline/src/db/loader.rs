//! Bulk loader
//!
//! Appends decoded row sets into the warehouse with `COPY ... FROM STDIN`.
//! The target table is created on first use from the row set's declared
//! column types, since the source worksheet carries no schema of its own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ifr_common::{IfrError, Result};
use sqlx::postgres::PgPoolCopyExt;
use sqlx::PgPool;
use tracing::{debug, info};

use super::db_err;
use super::reference::ReferenceData;

/// A typed cell value destined for the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl SqlValue {
    /// Render as one CSV field for COPY. An empty unquoted field is NULL;
    /// text is quoted whenever it is empty or contains CSV metacharacters.
    fn to_csv_field(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            SqlValue::Text(s) => {
                if s.is_empty() || s.contains([',', '"', '\n', '\r']) {
                    format!("\"{}\"", s.replace('"', "\"\""))
                } else {
                    s.clone()
                }
            },
        }
    }
}

/// A named warehouse column with its declared Postgres type.
///
/// Types are declared by the producer rather than inferred from values, so
/// a column that happens to be entirely null in one row set still creates
/// with its proper type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: &'static str,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: &'static str) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A typed, named-column row set ready for bulk insertion.
#[derive(Debug, Clone)]
pub struct RowSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    fn to_csv(&self) -> String {
        let mut csv = String::new();
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(SqlValue::to_csv_field).collect();
            csv.push_str(&fields.join(","));
            csv.push('\n');
        }
        csv
    }
}

/// Warehouse operations the pipeline driver depends on, as a seam so the
/// driver can be exercised without a live database.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Snapshot the reference maps used during decoding.
    async fn reference_data(&self) -> Result<ReferenceData>;

    /// Create the target table from the declared columns if it is missing.
    async fn ensure_table(&self, table: &str, rows: &RowSet) -> Result<()>;

    /// Append the row set. Returns the number of rows written.
    async fn copy_rows(&self, table: &str, rows: &RowSet) -> Result<u64>;

    /// Row count of a table, for post-load verification logging.
    async fn count_rows(&self, table: &str) -> Result<i64>;
}

#[async_trait]
impl Warehouse for PgPool {
    async fn reference_data(&self) -> Result<ReferenceData> {
        ReferenceData::load(self).await
    }

    async fn ensure_table(&self, table: &str, rows: &RowSet) -> Result<()> {
        let ddl = create_table_ddl(table, rows)?;
        sqlx::query(&ddl).execute(self).await.map_err(db_err)?;
        debug!(table, "target table ensured");
        Ok(())
    }

    async fn copy_rows(&self, table: &str, rows: &RowSet) -> Result<u64> {
        let table = quote_ident(table)?;
        let columns: Vec<String> = rows
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Result<_>>()?;

        let statement = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT CSV)",
            table,
            columns.join(", ")
        );

        let mut copy = self.copy_in_raw(&statement).await.map_err(db_err)?;
        copy.send(rows.to_csv().as_bytes()).await.map_err(db_err)?;
        let written = copy.finish().await.map_err(db_err)?;

        info!(table = %table, rows = written, "bulk copy complete");
        Ok(written)
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let table = quote_ident(table)?;
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(self)
            .await
            .map_err(db_err)?;
        Ok(count)
    }
}

/// Build the CREATE TABLE statement from the declared column types.
fn create_table_ddl(table: &str, rows: &RowSet) -> Result<String> {
    let table = quote_ident(table)?;

    let column_defs: Vec<String> = rows
        .columns
        .iter()
        .map(|c| Ok(format!("{} {}", quote_ident(&c.name)?, c.ty)))
        .collect::<Result<_>>()?;

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table,
        column_defs.join(", ")
    ))
}

/// Quote an identifier after validating its character set. Table and column
/// names come from configuration and decoder constants, never from file
/// content, but the check keeps interpolated DDL well-formed.
fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(IfrError::Config(format!("invalid identifier: {name:?}")));
    }
    Ok(format!("\"{}\"", name))
}
