//! Data normalization
//!
//! Maps an arbitrary uploaded table onto per-item daily series:
//! - column mapping by hint, alias table, then content sniffing
//! - duplicate (date, item) rows summed
//! - calendar gaps interpolated
//! - spikes against a trailing median repaired
//! - each item profiled for volatility and z-score anomalies

mod columns;
mod profile;
mod repair;

#[cfg(test)]
mod tests;

pub use columns::{parse_date, parse_quantity, ColumnIndices, ColumnResolver};
pub use profile::{detect_anomalies, volatility_profile, DEFAULT_Z_SCORE_THRESHOLD, VOLATILITY_WINDOW};
pub use repair::{interpolate, quantile_sorted, repair_outliers, Repair};

use crate::error::SchemaError;
use crate::models::{
    ColumnHints, ColumnMapping, NormalizationReport, OutlierFlag, RawTable, SalesRecord, SalesSeries,
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Share of non-empty cells that must parse for a column to be sniffed as date/quantity
pub const CONTENT_MATCH_RATIO: f64 = 0.8;

pub const DEFAULT_ITEM_ID: &str = "all";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Header aliases per canonical field, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasTable {
    pub date: Vec<String>,
    pub item: Vec<String>,
    pub quantity: Vec<String>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self {
            date: strings(&[
                "date", "day", "time", "날짜", "일자", "시간", "연월일", "조사일", "일시",
            ]),
            item: strings(&["item", "product", "name", "품목", "상품", "이름", "품목명"]),
            quantity: strings(&[
                "sales", "quantity", "qty", "demand", "sold", "volume", "수량", "판매", "판매량",
                "수요", "개수",
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub enabled: bool,
    /// Trailing window length in days
    pub window: usize,
    /// Allowed deviation from the median, in spreads
    pub multiplier: f64,
    /// Floor on the spread as a fraction of the median
    pub min_relative_spread: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 7,
            multiplier: 3.0,
            min_relative_spread: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub aliases: AliasTable,
    pub outliers: OutlierConfig,
    /// Item id used when the upload has no item column
    pub default_item: String,
    pub content_match_ratio: f64,
    /// |z| above which a raw day is logged as a spike or drop
    pub z_score_threshold: f64,
    pub volatility_window: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            aliases: AliasTable::default(),
            outliers: OutlierConfig::default(),
            default_item: DEFAULT_ITEM_ID.to_string(),
            content_match_ratio: CONTENT_MATCH_RATIO,
            z_score_threshold: DEFAULT_Z_SCORE_THRESHOLD,
            volatility_window: VOLATILITY_WINDOW,
        }
    }
}

/// Turns raw uploads into clean per-item series
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Resolve the column mapping without touching any rows
    pub fn resolve_columns(&self, table: &RawTable, hints: &ColumnHints) -> Result<ColumnIndices, SchemaError> {
        if table.is_empty() {
            return Err(SchemaError::EmptyTable);
        }
        ColumnResolver::new(&self.config.aliases, self.config.content_match_ratio).resolve(table, hints)
    }

    /// Normalize a table into one series per item, sorted by item id
    pub fn normalize(&self, table: &RawTable, hints: &ColumnHints) -> Result<Vec<SalesSeries>, SchemaError> {
        let indices = self.resolve_columns(table, hints)?;
        let mapping = indices.to_mapping(&table.headers);

        let mut grouped: BTreeMap<String, BTreeMap<NaiveDate, Option<f64>>> = BTreeMap::new();
        let mut dropped = 0usize;

        for row in 0..table.rows.len() {
            let Some(date) = parse_date(table.cell(row, indices.date)) else {
                dropped += 1;
                continue;
            };
            let item_id = indices
                .item
                .map(|col| table.cell(row, col).trim())
                .filter(|id| !id.is_empty())
                .unwrap_or(self.config.default_item.as_str())
                .to_string();
            let quantity = parse_quantity(table.cell(row, indices.quantity));

            grouped
                .entry(item_id)
                .or_default()
                .entry(date)
                .and_modify(|existing| *existing = merge_quantities(*existing, quantity))
                .or_insert(quantity);
        }

        if dropped > 0 {
            debug!(dropped_rows = dropped, "Dropped rows with unparseable dates");
        }

        let mut series = Vec::with_capacity(grouped.len());
        for (item_id, days) in grouped {
            match self.build_series(&item_id, &days, &mapping, dropped) {
                Some(s) => series.push(s),
                None => warn!(item_id = %item_id, "Item has no usable quantities, skipping"),
            }
        }

        if series.is_empty() {
            return Err(SchemaError::NoUsableRows { dropped });
        }
        Ok(series)
    }

    fn build_series(
        &self,
        item_id: &str,
        days: &BTreeMap<NaiveDate, Option<f64>>,
        mapping: &ColumnMapping,
        dropped_rows: usize,
    ) -> Option<SalesSeries> {
        let (&start, _) = days.first_key_value()?;
        let (&end, _) = days.last_key_value()?;
        let span = (end - start).num_days() as usize + 1;

        let dates: Vec<NaiveDate> = (0..span)
            .map(|offset| start + Duration::days(offset as i64))
            .collect();
        let raw: Vec<Option<f64>> = dates
            .iter()
            .map(|d| days.get(d).copied().flatten())
            .collect();

        let anomalies = detect_anomalies(&dates, &raw, self.config.z_score_threshold);
        let mut values = interpolate(&raw)?;
        let imputed_dates: Vec<NaiveDate> = dates
            .iter()
            .zip(&raw)
            .filter(|(_, v)| v.is_none())
            .map(|(d, _)| *d)
            .collect();

        let outliers: Vec<OutlierFlag> = repair_outliers(&mut values, &self.config.outliers)
            .into_iter()
            .map(|r| OutlierFlag {
                date: dates[r.index],
                original: r.original,
                replacement: r.replacement,
            })
            .collect();

        let volatility = volatility_profile(&values, self.config.volatility_window);

        debug!(
            item_id = %item_id,
            days = span,
            imputed = imputed_dates.len(),
            outliers = outliers.len(),
            anomalies = anomalies.len(),
            cv = volatility.coefficient_of_variation,
            "Normalized item series"
        );

        let records = dates
            .into_iter()
            .zip(values)
            .map(|(date, quantity)| SalesRecord {
                date,
                item_id: item_id.to_string(),
                quantity,
            })
            .collect();

        let report = NormalizationReport {
            mapping: mapping.clone(),
            imputed_dates,
            outliers,
            dropped_rows,
            volatility,
            anomalies,
        };
        Some(SalesSeries::new(item_id.to_string(), records, report))
    }
}

/// Duplicate rows for the same day add up; a missing value adds nothing
fn merge_quantities(existing: Option<f64>, incoming: Option<f64>) -> Option<f64> {
    match (existing, incoming) {
        (Some(a), Some(b)) => Some(a + b),
        (Some(a), None) => Some(a),
        (None, other) => other,
    }
}

/// Normalize with default configuration
pub fn normalize(table: &RawTable, hints: &ColumnHints) -> Result<Vec<SalesSeries>, SchemaError> {
    Normalizer::default().normalize(table, hints)
}
