//! End-to-end normalization scenarios

#[cfg(test)]
mod normalize_tests {
    use crate::error::SchemaError;
    use crate::models::{AnomalyKind, ColumnHints, RawTable, SalesSeries, VolatilityLevel};
    use crate::normalizer::{normalize, quantile_sorted, Normalizer, NormalizerConfig};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn table(headers: &[&str], rows: &[Vec<String>]) -> RawTable {
        RawTable::new(headers.iter().map(|h| h.to_string()).collect(), rows.to_vec())
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    /// Weekly pattern around 100 with seeded noise
    fn seasonal_values(days: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..days)
            .map(|i| {
                let weekly = [0.0, 5.0, 10.0, 15.0, 10.0, -10.0, -20.0][i % 7];
                let noise: f64 = rng.gen_range(-3.0..3.0);
                (100.0 + weekly + noise).round()
            })
            .collect()
    }

    #[test]
    fn test_gap_fill_produces_full_calendar() {
        let t = table(
            &["date", "item", "qty"],
            &[
                row(&["2024-01-01", "tea", "10"]),
                row(&["2024-01-04", "tea", "40"]),
                row(&["2024-01-10", "tea", "100"]),
            ],
        );

        let series = normalize(&t, &ColumnHints::default()).unwrap();
        assert_eq!(series.len(), 1);

        let tea = &series[0];
        let span = (tea.end_date().unwrap() - tea.start_date().unwrap()).num_days() + 1;
        assert_eq!(tea.len() as i64, span);
        assert_eq!(tea.len(), 10);
        assert_eq!(tea.quantities()[1..3], [20.0, 30.0]);
        assert_eq!(tea.report().imputed_dates.len(), 7);
        assert!(tea.report().imputed_dates.contains(&day(2024, 1, 2)));

        let missing: Vec<NaiveDate> = tea
            .report()
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::Missing)
            .map(|a| a.date)
            .collect();
        assert_eq!(missing, tea.report().imputed_dates);
    }

    #[test]
    fn test_gap_fill_per_item() {
        let t = table(
            &["date", "item", "qty"],
            &[
                row(&["2024-01-01", "a", "1"]),
                row(&["2024-01-05", "a", "5"]),
                row(&["2024-01-03", "b", "3"]),
                row(&["2024-01-04", "b", "4"]),
            ],
        );

        let series = normalize(&t, &ColumnHints::default()).unwrap();
        let lens: Vec<(&str, usize)> = series.iter().map(|s| (s.item_id(), s.len())).collect();
        assert_eq!(lens, vec![("a", 5), ("b", 2)]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut rows = Vec::new();
        for (i, q) in seasonal_values(60, 7).iter().enumerate() {
            // Skip a few days and add a spike so the first pass has work to do
            if i == 10 || i == 11 {
                continue;
            }
            let q = if i == 30 { q * 8.0 } else { *q };
            let date = day(2024, 3, 1) + chrono::Duration::days(i as i64);
            rows.push(vec![date.to_string(), "soap".to_string(), q.to_string()]);
        }
        let t = table(&["date", "product", "sales"], &rows);

        let first = normalize(&t, &ColumnHints::default()).unwrap();
        assert!(!first[0].report().outliers.is_empty());

        let second = normalize(&first[0].to_raw_table(), &ColumnHints::default()).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].records(), first[0].records());
        assert!(second[0].report().outliers.is_empty());
        assert!(second[0].report().imputed_dates.is_empty());
    }

    #[test]
    fn test_outlier_at_day_200_is_repaired() {
        let mut values = seasonal_values(400, 42);
        let mut window = values[193..200].to_vec();
        window.sort_by(f64::total_cmp);
        let local_median = quantile_sorted(&window, 0.5);
        values[200] = local_median * 10.0;

        let input = SalesSeries::from_quantities("widget", day(2023, 1, 1), &values);
        let series = normalize(&input.to_raw_table(), &ColumnHints::default()).unwrap();
        let widget = &series[0];

        assert_eq!(widget.len(), 400);

        let flagged = widget
            .report()
            .outliers
            .iter()
            .find(|f| f.date == day(2023, 1, 1) + chrono::Duration::days(200))
            .expect("day 200 should be flagged");
        assert_relative_eq!(flagged.original, local_median * 10.0);

        // Replacement is the median of the (already repaired) trailing week
        let repaired = widget.quantities();
        let mut trailing = repaired[193..200].to_vec();
        trailing.sort_by(f64::total_cmp);
        assert_relative_eq!(repaired[200], quantile_sorted(&trailing, 0.5));
        assert_relative_eq!(flagged.replacement, repaired[200]);

        // The raw spike is also logged, and the cleaned week pattern stays stable
        let spikes: Vec<_> = widget
            .report()
            .anomalies
            .iter()
            .filter(|a| a.kind == AnomalyKind::Spike)
            .collect();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].date, flagged.date);
        assert!(spikes[0].z_score.unwrap() > 2.5);
        assert_eq!(widget.report().volatility.level, VolatilityLevel::VeryStable);
    }

    #[test]
    fn test_duplicates_are_summed() {
        let t = table(
            &["date", "item", "qty"],
            &[
                row(&["2024-01-01", "tea", "2"]),
                row(&["2024-01-01", "tea", "3"]),
                row(&["2024-01-01", "tea", ""]),
                row(&["2024-01-02", "tea", "1"]),
            ],
        );
        let series = normalize(&t, &ColumnHints::default()).unwrap();
        assert_eq!(series[0].quantities(), vec![5.0, 1.0]);
    }

    #[test]
    fn test_negative_and_garbage_quantities_are_imputed() {
        let t = table(
            &["date", "qty"],
            &[
                row(&["2024-01-01", "10"]),
                row(&["2024-01-02", "-4"]),
                row(&["2024-01-03", "lots"]),
                row(&["2024-01-04", "40"]),
            ],
        );
        let series = normalize(&t, &ColumnHints::default()).unwrap();

        assert_eq!(series[0].item_id(), "all");
        assert_eq!(series[0].quantities(), vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(series[0].report().imputed_dates, vec![day(2024, 1, 2), day(2024, 1, 3)]);
        assert!(series[0].records().iter().all(|r| r.quantity >= 0.0));
    }

    #[test]
    fn test_unparseable_dates_are_dropped_and_counted() {
        let t = table(
            &["date", "qty"],
            &[
                row(&["2024-01-01", "1"]),
                row(&["not a date", "1"]),
                row(&["", "1"]),
                row(&["2024-01-02", "2"]),
            ],
        );
        let series = normalize(&t, &ColumnHints::default()).unwrap();
        assert_eq!(series[0].report().dropped_rows, 2);
        assert_eq!(series[0].len(), 2);
    }

    #[test]
    fn test_item_without_values_is_skipped() {
        let t = table(
            &["date", "item", "qty"],
            &[
                row(&["2024-01-01", "ghost", ""]),
                row(&["2024-01-01", "real", "3"]),
            ],
        );
        let series = normalize(&t, &ColumnHints::default()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].item_id(), "real");
    }

    #[test]
    fn test_no_usable_rows() {
        let t = table(&["date", "qty"], &[row(&["2024-01-01", "n/a"]), row(&["bad", "1"])]);
        assert_eq!(
            normalize(&t, &ColumnHints::default()),
            Err(SchemaError::NoUsableRows { dropped: 1 })
        );
    }

    #[test]
    fn test_empty_table() {
        let t = table(&["date", "qty"], &[]);
        assert_eq!(normalize(&t, &ColumnHints::default()), Err(SchemaError::EmptyTable));
    }

    #[test]
    fn test_custom_default_item_and_disabled_repair() {
        let config = NormalizerConfig {
            default_item: "store".to_string(),
            outliers: crate::normalizer::OutlierConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut values = vec![10.0; 10];
        values[9] = 500.0;
        let t = SalesSeries::from_quantities("x", day(2024, 1, 1), &values).to_raw_table();
        let stripped = RawTable::new(
            vec!["date".to_string(), "qty".to_string()],
            t.rows.iter().map(|r| vec![r[0].clone(), r[2].clone()]).collect(),
        );

        let series = Normalizer::new(config).normalize(&stripped, &ColumnHints::default()).unwrap();
        assert_eq!(series[0].item_id(), "store");
        assert_eq!(series[0].quantities()[9], 500.0);
    }
}
