//! Natural-language explanation of a forecast
//!
//! The engine only builds the request and checks that a backend returned
//! something; the text itself is opaque. [`TemplateExplainer`] renders a
//! deterministic summary offline.

use crate::error::ExplanationError;
use crate::evaluator::{ACCURACY_PCT, MAE};
use crate::models::{AnomalyFlag, AnomalyKind, EnsembleForecast, MetricValue};
use crate::pipeline::ItemForecast;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::debug;

/// System message sent ahead of every explanation prompt
pub const SYSTEM_PROMPT: &str =
    "You are a data-driven operations consultant for small businesses. Explain demand forecasts in plain language and give concrete, actionable advice.";

pub const DEFAULT_DOMAIN: &str = "retail";

/// Strongest spikes and drops mentioned per request
const MAX_ANOMALY_NOTES: usize = 3;

/// Everything an explainer may use to describe one item's forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRequest {
    pub item_id: String,
    /// Business domain label, e.g. "bakery"
    pub domain: String,
    pub horizon: usize,
    pub total_quantity: f64,
    pub daily_average: f64,
    pub forecasts: Vec<EnsembleForecast>,
    pub weights: BTreeMap<String, f64>,
    pub metrics: BTreeMap<String, MetricValue>,
    /// Observations about the input, e.g. repaired outliers
    pub notes: Vec<String>,
}

impl ExplanationRequest {
    pub fn from_item(item: &ItemForecast, domain: &str) -> Self {
        let forecasts = item.run.forecasts.clone();
        let horizon = forecasts.len();
        let total_quantity = item.run.total_quantity();
        let daily_average = if horizon == 0 {
            0.0
        } else {
            total_quantity / horizon as f64
        };

        let mut notes = Vec::new();
        let report = &item.report;
        notes.push(format!(
            "demand is {} (coefficient of variation {:.2}, rolling std up to {:.1})",
            report.volatility.level.label(),
            report.volatility.coefficient_of_variation,
            report.volatility.max_rolling_std
        ));
        let mut unusual: Vec<&AnomalyFlag> = report
            .anomalies
            .iter()
            .filter(|a| a.kind != AnomalyKind::Missing)
            .collect();
        unusual.sort_by(|a, b| {
            let z = |f: &AnomalyFlag| f.z_score.map_or(0.0, f64::abs);
            z(b).total_cmp(&z(a))
        });
        for anomaly in unusual.iter().take(MAX_ANOMALY_NOTES) {
            notes.push(format!(
                "{}: sales {} (z-score {:.1})",
                anomaly.date,
                anomaly.kind.label(),
                anomaly.z_score.unwrap_or_default()
            ));
        }
        for outlier in &report.outliers {
            notes.push(format!(
                "{}: unusual value {:.1} replaced with {:.1}",
                outlier.date, outlier.original, outlier.replacement
            ));
        }
        if !report.imputed_dates.is_empty() {
            notes.push(format!(
                "{} missing day(s) filled by interpolation",
                report.imputed_dates.len()
            ));
        }
        for model in item.run.models.iter().filter(|m| !m.is_included()) {
            notes.push(format!("{} was left out of the ensemble", model.model_name));
        }

        Self {
            item_id: item.item_id.clone(),
            domain: domain.to_string(),
            horizon,
            total_quantity,
            daily_average,
            weights: forecasts
                .first()
                .map(|f| f.contributing_weights.clone())
                .unwrap_or_default(),
            forecasts,
            metrics: item.evaluation.metrics().clone(),
            notes,
        }
    }

    fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(MetricValue::value)
    }

    /// User prompt for a chat-style backend
    pub fn prompt(&self) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "Demand forecast for '{}' ({} business), next {} days.",
            self.item_id, self.domain, self.horizon
        );
        let _ = writeln!(prompt, "- Total forecast demand: {:.0} units", self.total_quantity);
        let _ = writeln!(prompt, "- Average daily demand: {:.0} units", self.daily_average);
        match (self.metric(ACCURACY_PCT), self.metric(MAE)) {
            (Some(accuracy), Some(mae)) => {
                let _ = writeln!(prompt, "- Forecast accuracy: {accuracy:.1}%");
                let _ = writeln!(prompt, "- Mean absolute error: about {mae:.1} units");
            }
            _ => {
                let _ = writeln!(prompt, "- Accuracy: not measured (no actuals available)");
            }
        }
        for f in &self.forecasts {
            let _ = writeln!(
                prompt,
                "  day {} ({}): {:.1} (range {:.1} to {:.1})",
                f.horizon_day, f.date, f.blended_quantity, f.confidence_low, f.confidence_high
            );
        }
        if !self.weights.is_empty() {
            let weights: Vec<String> = self
                .weights
                .iter()
                .map(|(model, w)| format!("{model} {:.0}%", w * 100.0))
                .collect();
            let _ = writeln!(prompt, "- Model weights: {}", weights.join(", "));
        }
        if !self.notes.is_empty() {
            let _ = writeln!(prompt, "Notable features of the history:");
            for note in &self.notes {
                let _ = writeln!(prompt, "* {note}");
            }
        }
        prompt.push_str(
            "\nAnswer in markdown with three sections: \
             ### 1. Reliability and risk, ### 2. Plan for the next days, ### 3. Longer-term advice. \
             Avoid jargon and give concrete numbers for stock levels.",
        );
        prompt
    }
}

#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, request: &ExplanationRequest) -> anyhow::Result<String>;
}

/// Call `explainer` and reject blank output
pub async fn explain_checked(
    explainer: &dyn Explainer,
    request: &ExplanationRequest,
) -> Result<String, ExplanationError> {
    let text = explainer
        .explain(request)
        .await
        .map_err(|e| ExplanationError::Backend(format!("{e:#}")))?;
    if text.trim().is_empty() {
        return Err(ExplanationError::Empty);
    }
    debug!(item_id = %request.item_id, chars = text.len(), "Explanation generated");
    Ok(text)
}

/// Offline explainer built from the request alone
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateExplainer;

impl TemplateExplainer {
    pub fn render(&self, request: &ExplanationRequest) -> String {
        let mut text = format!(
            "{}: expected demand over the next {} days is {:.0} units in total (about {:.0} per day).",
            request.item_id, request.horizon, request.total_quantity, request.daily_average
        );

        match (request.metric(ACCURACY_PCT), request.metric(MAE)) {
            (Some(accuracy), Some(mae)) => {
                let _ = write!(
                    text,
                    "\n\nForecast accuracy is {accuracy:.1}% with an average error of about {mae:.1} units. \
                     Plan stock and staffing around this figure."
                );
            }
            _ => text.push_str("\n\nAccuracy could not be measured because no actuals were provided."),
        }

        if let Some(peak) = request
            .forecasts
            .iter()
            .max_by(|a, b| a.blended_quantity.total_cmp(&b.blended_quantity))
        {
            let _ = write!(
                text,
                "\n\nStock: keep between {:.0} and {:.0} units on hand for the busiest day ({}). \
                 Promotions: focus them on days with the highest expected demand.",
                peak.blended_quantity, peak.confidence_high, peak.date
            );
        }

        if !request.notes.is_empty() {
            text.push_str("\n\nNotes:");
            for note in &request.notes {
                let _ = write!(text, "\n- {note}");
            }
        }
        text
    }
}

#[async_trait]
impl Explainer for TemplateExplainer {
    async fn explain(&self, request: &ExplanationRequest) -> anyhow::Result<String> {
        Ok(self.render(request))
    }
}
