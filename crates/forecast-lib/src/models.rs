//! Core data models for the forecast engine

use crate::normalizer::{detect_anomalies, volatility_profile, DEFAULT_Z_SCORE_THRESHOLD, VOLATILITY_WINDOW};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Header names used when a series is rendered back into a table
pub const CANONICAL_HEADERS: [&str; 3] = ["date", "item", "quantity"];

/// Uploaded table exactly as read, every cell kept as text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() || self.rows.is_empty()
    }

    /// Cell at `column` in `row`, or `""` for ragged rows
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Iterate the cells of one column, top to bottom
    pub fn column(&self, column: usize) -> impl Iterator<Item = &str> + '_ {
        (0..self.rows.len()).map(move |row| self.cell(row, column))
    }
}

/// Explicit column names that override inference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnHints {
    pub date: Option<String>,
    pub item: Option<String>,
    pub quantity: Option<String>,
}

/// Which raw headers were resolved to the canonical fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub date: String,
    pub item: Option<String>,
    pub quantity: String,
}

/// One cleaned daily observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub date: NaiveDate,
    pub item_id: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierFlag {
    pub date: NaiveDate,
    pub original: f64,
    pub replacement: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    VeryStable,
    Stable,
    Volatile,
    HighlyVolatile,
}

impl VolatilityLevel {
    /// Bands on the coefficient of variation at 0.2, 0.5 and 1.0
    pub fn from_cv(cv: f64) -> Self {
        if cv < 0.2 {
            Self::VeryStable
        } else if cv < 0.5 {
            Self::Stable
        } else if cv < 1.0 {
            Self::Volatile
        } else {
            Self::HighlyVolatile
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::VeryStable => "very stable",
            Self::Stable => "stable",
            Self::Volatile => "volatile",
            Self::HighlyVolatile => "highly volatile",
        }
    }
}

/// How much daily demand moves around, measured on the cleaned series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityProfile {
    /// Population standard deviation over the mean; zero when the mean is zero
    pub coefficient_of_variation: f64,
    pub level: VolatilityLevel,
    /// Mean and max of the trailing-window sample standard deviation
    pub mean_rolling_std: f64,
    pub max_rolling_std: f64,
}

impl Default for VolatilityProfile {
    fn default() -> Self {
        Self {
            coefficient_of_variation: 0.0,
            level: VolatilityLevel::VeryStable,
            mean_rolling_std: 0.0,
            max_rolling_std: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Spike,
    Drop,
    Missing,
}

impl AnomalyKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Spike => "spike",
            Self::Drop => "drop",
            Self::Missing => "missing",
        }
    }
}

/// Day that stood out in the raw upload, before any cleaning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub date: NaiveDate,
    /// Raw quantity; `None` for a missing day
    pub quantity: Option<f64>,
    pub kind: AnomalyKind,
    pub z_score: Option<f64>,
}

/// What the normalizer changed on the way to a clean series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub mapping: ColumnMapping,
    /// Days whose quantity was missing or unusable and got interpolated
    pub imputed_dates: Vec<NaiveDate>,
    pub outliers: Vec<OutlierFlag>,
    /// Rows dropped across the whole upload (unparseable date)
    pub dropped_rows: usize,
    pub volatility: VolatilityProfile,
    pub anomalies: Vec<AnomalyFlag>,
}

/// Daily series for one item on a contiguous calendar grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesSeries {
    item_id: String,
    records: Vec<SalesRecord>,
    report: NormalizationReport,
}

impl SalesSeries {
    pub(crate) fn new(item_id: String, records: Vec<SalesRecord>, report: NormalizationReport) -> Self {
        Self {
            item_id,
            records,
            report,
        }
    }

    /// Build a gap-free series directly from consecutive daily quantities,
    /// profiled with the default window and threshold
    pub fn from_quantities(item_id: &str, start: NaiveDate, quantities: &[f64]) -> Self {
        let dates: Vec<NaiveDate> = (0..quantities.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        let raw: Vec<Option<f64>> = quantities.iter().copied().map(Some).collect();
        let records = quantities
            .iter()
            .enumerate()
            .map(|(i, q)| SalesRecord {
                date: start + Duration::days(i as i64),
                item_id: item_id.to_string(),
                quantity: *q,
            })
            .collect();
        let report = NormalizationReport {
            mapping: ColumnMapping {
                date: CANONICAL_HEADERS[0].to_string(),
                item: Some(CANONICAL_HEADERS[1].to_string()),
                quantity: CANONICAL_HEADERS[2].to_string(),
            },
            imputed_dates: Vec::new(),
            outliers: Vec::new(),
            dropped_rows: 0,
            volatility: volatility_profile(quantities, VOLATILITY_WINDOW),
            anomalies: detect_anomalies(&dates, &raw, DEFAULT_Z_SCORE_THRESHOLD),
        };
        Self::new(item_id.to_string(), records, report)
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn records(&self) -> &[SalesRecord] {
        &self.records
    }

    pub fn report(&self) -> &NormalizationReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn quantities(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.quantity).collect()
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.date)
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    /// First `len` days of the series, used for backtests and held-out evaluation
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            item_id: self.item_id.clone(),
            records: self.records.iter().take(len).cloned().collect(),
            report: self.report.clone(),
        }
    }

    /// Render back into the canonical three-column table
    pub fn to_raw_table(&self) -> RawTable {
        let rows = self
            .records
            .iter()
            .map(|r| {
                vec![
                    r.date.format("%Y-%m-%d").to_string(),
                    r.item_id.clone(),
                    r.quantity.to_string(),
                ]
            })
            .collect();
        RawTable::new(
            CANONICAL_HEADERS.iter().map(|h| h.to_string()).collect(),
            rows,
        )
    }
}

/// One adapter's prediction for one horizon day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelForecast {
    pub model_name: String,
    pub horizon_day: u32,
    pub predicted_quantity: f64,
    pub backtest_error: f64,
}

/// Blended prediction for one horizon day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleForecast {
    pub horizon_day: u32,
    pub date: NaiveDate,
    pub blended_quantity: f64,
    pub confidence_low: f64,
    pub confidence_high: f64,
    pub contributing_weights: BTreeMap<String, f64>,
}

impl EnsembleForecast {
    pub fn band_width(&self) -> f64 {
        self.confidence_high - self.confidence_low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Included { backtest_error: f64, weight: f64 },
    Excluded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub model_name: String,
    #[serde(flatten)]
    pub status: ModelStatus,
}

impl ModelReport {
    pub fn is_included(&self) -> bool {
        matches!(self.status, ModelStatus::Included { .. })
    }
}

/// Everything one ensemble call produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleRun {
    pub item_id: String,
    pub forecasts: Vec<EnsembleForecast>,
    pub model_forecasts: Vec<ModelForecast>,
    pub models: Vec<ModelReport>,
}

impl EnsembleRun {
    pub fn total_quantity(&self) -> f64 {
        self.forecasts.iter().map(|f| f.blended_quantity).sum()
    }

    pub fn included_models(&self) -> impl Iterator<Item = &ModelReport> {
        self.models.iter().filter(|m| m.is_included())
    }
}

/// A metric that is either computed or explicitly unavailable
///
/// Serializes as a bare number or the string `"unavailable"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Available(f64),
    Unavailable,
}

pub const UNAVAILABLE_MARKER: &str = "unavailable";

impl MetricValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Available(v) => Some(*v),
            Self::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Available(v) => serializer.serialize_f64(*v),
            Self::Unavailable => serializer.serialize_str(UNAVAILABLE_MARKER),
        }
    }
}

impl<'de> Deserialize<'de> for MetricValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Marker(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(Self::Available(v)),
            Repr::Marker(m) if m == UNAVAILABLE_MARKER => Ok(Self::Unavailable),
            Repr::Marker(m) => Err(serde::de::Error::custom(format!(
                "expected a number or \"{UNAVAILABLE_MARKER}\", got \"{m}\""
            ))),
        }
    }
}

/// Per-day error against a known actual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMetrics {
    pub horizon_day: u32,
    pub actual: f64,
    pub predicted: f64,
    pub absolute_error: f64,
    pub ape: f64,
}

/// Immutable evaluation output handed to reporting collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    metrics: BTreeMap<String, MetricValue>,
    daily: Vec<DailyMetrics>,
    forecasts: Vec<EnsembleForecast>,
}

impl EvaluationResult {
    pub(crate) fn new(
        metrics: BTreeMap<String, MetricValue>,
        daily: Vec<DailyMetrics>,
        forecasts: Vec<EnsembleForecast>,
    ) -> Self {
        Self {
            metrics,
            daily,
            forecasts,
        }
    }

    pub fn metrics(&self) -> &BTreeMap<String, MetricValue> {
        &self.metrics
    }

    /// Look up a metric; names that were never computed read as unavailable
    pub fn metric(&self, name: &str) -> MetricValue {
        self.metrics
            .get(name)
            .copied()
            .unwrap_or(MetricValue::Unavailable)
    }

    pub fn daily(&self) -> &[DailyMetrics] {
        &self.daily
    }

    pub fn forecasts(&self) -> &[EnsembleForecast] {
        &self.forecasts
    }
}
