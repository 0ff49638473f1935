//! `sample`: write a synthetic multi-item sales CSV
//!
//! Each product has its own weekday profile on top of a shared monthly
//! seasonality, a slow upward trend and multiplicative noise.

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, Local, NaiveDate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use crate::output::print_success;

/// Multipliers January through December
const MONTH_SEASONALITY: [f64; 12] = [0.9, 0.85, 1.0, 1.1, 1.15, 1.2, 1.25, 1.2, 1.1, 1.0, 0.95, 0.9];

/// Daily growth of the trend component
const TREND_PER_DAY: f64 = 0.0005;

const NOISE_STD: f64 = 0.1;

struct Product {
    name: &'static str,
    base: f64,
    /// Monday through Sunday
    weekday: [f64; 7],
}

const PRODUCTS: [Product; 3] = [
    Product {
        name: "americano",
        base: 120.0,
        weekday: [1.0, 0.95, 1.05, 1.1, 1.4, 1.3, 1.15],
    },
    Product {
        name: "cafe_latte",
        base: 90.0,
        weekday: [1.2, 1.1, 1.0, 0.9, 1.0, 1.1, 1.15],
    },
    Product {
        name: "bagel",
        base: 70.0,
        weekday: [1.0, 1.0, 1.0, 1.2, 1.3, 1.5, 1.45],
    },
];

#[derive(clap::Args, Debug, Clone)]
pub struct SampleArgs {
    /// Number of days to generate
    #[arg(long, default_value_t = 365)]
    pub days: usize,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Last day of the data (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Output file (stdout if omitted)
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRow {
    pub date: NaiveDate,
    pub product: String,
    pub units_sold: u64,
}

/// Rows sorted by date, then product
pub fn generate(days: usize, end: NaiveDate, seed: u64) -> Result<Vec<SampleRow>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(1.0, NOISE_STD).context("Invalid noise distribution")?;
    let start = end - Duration::days(days.saturating_sub(1) as i64);

    let mut rows = Vec::with_capacity(days * PRODUCTS.len());
    for t in 0..days {
        let date = start + Duration::days(t as i64);
        let month = MONTH_SEASONALITY[date.month0() as usize];
        let trend = 1.0 + TREND_PER_DAY * t as f64;
        for product in &PRODUCTS {
            let weekday = product.weekday[date.weekday().num_days_from_monday() as usize];
            let value = product.base * weekday * month * trend * noise.sample(&mut rng);
            rows.push(SampleRow {
                date,
                product: product.name.to_string(),
                units_sold: value.max(0.0) as u64,
            });
        }
    }
    Ok(rows)
}

fn write_rows<W: Write>(rows: &[SampleRow], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn run(args: SampleArgs) -> Result<()> {
    let end = args.end_date.unwrap_or_else(|| Local::now().date_naive());
    let rows = generate(args.days, end, args.seed)?;

    match &args.output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_rows(&rows, file)?;
            print_success(&format!("Wrote {} rows to {}", rows.len(), path.display()));
        }
        None => write_rows(&rows, std::io::stdout().lock())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    #[test]
    fn test_generate_is_seeded() {
        let a = generate(30, end(), 42).unwrap();
        let b = generate(30, end(), 42).unwrap();
        let c = generate(30, end(), 43).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 90);
        assert_eq!(a.first().unwrap().date, NaiveDate::from_ymd_opt(2024, 12, 2).unwrap());
        assert_eq!(a.last().unwrap().date, end());
    }

    #[test]
    fn test_written_csv_normalizes_into_three_items() {
        let rows = generate(20, end(), 1).unwrap();
        let mut buffer = Vec::new();
        write_rows(&rows, &mut buffer).unwrap();

        let table = crate::ingest::read_csv_from(buffer.as_slice()).unwrap();
        assert_eq!(table.headers, vec!["date", "product", "units_sold"]);

        let series = forecast_lib::normalize(&table, &Default::default()).unwrap();
        let items: Vec<&str> = series.iter().map(|s| s.item_id()).collect();
        assert_eq!(items, vec!["americano", "bagel", "cafe_latte"]);
        assert!(series.iter().all(|s| s.len() == 20));
    }
}
