//! Reference-data cache
//!
//! Master lists (products, packaging, destinations) loaded from the
//! warehouse once per decode run and exposed as normalized lookup maps.
//! The maps are read-only snapshots; staleness within a single run is
//! acceptable.

use std::collections::HashMap;

use ifr_common::Result;
use sqlx::PgPool;
use tracing::debug;

use super::db_err;

/// Destination lookup result: warehouse id plus its country.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationRef {
    pub id: i64,
    pub country: String,
}

/// Normalize a textual key for lookup: trimmed, lower-cased.
pub fn normalize_key(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Lookup maps keyed by normalized natural keys.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    products: HashMap<String, i64>,
    packaging: HashMap<String, i64>,
    destinations: HashMap<String, DestinationRef>,
}

impl ReferenceData {
    /// Load all three master lists from the warehouse.
    pub async fn load(pool: &PgPool) -> Result<Self> {
        let products: Vec<(i64, Option<String>)> =
            sqlx::query_as("SELECT id_product, product_name FROM products")
                .fetch_all(pool)
                .await
                .map_err(db_err)?;

        let packaging: Vec<(i64, Option<String>)> =
            sqlx::query_as("SELECT id_packaging, packaging_code FROM packaging")
                .fetch_all(pool)
                .await
                .map_err(db_err)?;

        let destinations: Vec<(i64, Option<String>, String)> = sqlx::query_as(
            "SELECT id_destination, destination_name, country FROM destinations",
        )
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

        let data = Self::from_rows(products, packaging, destinations);

        debug!(
            products = data.products.len(),
            packaging = data.packaging.len(),
            destinations = data.destinations.len(),
            "reference data loaded"
        );

        Ok(data)
    }

    /// Build the maps from raw rows; rows with a null natural key are
    /// dropped, duplicate keys keep the last row.
    fn from_rows(
        products: Vec<(i64, Option<String>)>,
        packaging: Vec<(i64, Option<String>)>,
        destinations: Vec<(i64, Option<String>, String)>,
    ) -> Self {
        let products = products
            .into_iter()
            .filter_map(|(id, name)| name.map(|n| (normalize_key(&n), id)))
            .collect();

        let packaging = packaging
            .into_iter()
            .filter_map(|(id, code)| code.map(|c| (normalize_key(&c), id)))
            .collect();

        let destinations = destinations
            .into_iter()
            .filter_map(|(id, name, country)| {
                name.map(|n| (normalize_key(&n), DestinationRef { id, country }))
            })
            .collect();

        Self {
            products,
            packaging,
            destinations,
        }
    }

    /// Construct directly from prebuilt maps (tests, fixtures).
    pub fn from_maps(
        products: HashMap<String, i64>,
        packaging: HashMap<String, i64>,
        destinations: HashMap<String, DestinationRef>,
    ) -> Self {
        Self {
            products,
            packaging,
            destinations,
        }
    }

    pub fn product_id(&self, normalized_name: &str) -> Option<i64> {
        self.products.get(normalized_name).copied()
    }

    pub fn packaging_id(&self, normalized_code: &str) -> Option<i64> {
        self.packaging.get(normalized_code).copied()
    }

    pub fn destination(&self, normalized_name: &str) -> Option<&DestinationRef> {
        self.destinations.get(normalized_name)
    }
}
