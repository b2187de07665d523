// ===============================
// src/forecast.rs
// ===============================
//
// Demand forecasting per (store, product).
//
// Model: additive  y(t) = a + b·t + s[weekday(t)]
//   - trend     : least squares line over days since first sale
//   - weekly    : day-of-week effects, only when the history spans >= 2 weeks
//                 and every observed weekday appears at least twice, with
//                 two spare points beyond the parameter count
//   - fitting   : backfitting (trend <-> seasonal) with an iteration cap;
//                 hitting the cap drops back to the trend-only line
//
// Output: sum of the next `horizon_days` daily predictions, rounded
// (ties to even), never below zero.
//
use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use thiserror::Error;
use tracing::debug;

use crate::config::ForecastPolicy;
use crate::domain::{round_units, ForecastResult, SalesRecord, TimeSeries};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("need at least 2 distinct dates, got {points}")]
    InsufficientHistory { points: usize },
    #[error("time axis has zero variance")]
    Degenerate,
    #[error("non-finite value in fit")]
    NonFinite,
    #[error("seasonal fit did not converge in {iterations} iterations")]
    NotConverged { iterations: u32 },
}

/// Group sales by (store, product) and sum units per calendar date.
/// Output is sorted by store, then product; each series ascends by date.
pub fn build_series(sales: &[SalesRecord]) -> Vec<TimeSeries> {
    let mut grouped: BTreeMap<(&str, &str), BTreeMap<NaiveDate, u64>> = BTreeMap::new();
    for r in sales {
        let day = grouped
            .entry((r.store.as_str(), r.product.as_str()))
            .or_default()
            .entry(r.date)
            .or_insert(0);
        *day = day.saturating_add(r.units_sold);
    }
    grouped
        .into_iter()
        .map(|((store, product), days)| TimeSeries {
            store: store.to_string(),
            product: product.to_string(),
            points: days.into_iter().map(|(d, u)| (d, u as f64)).collect(),
        })
        .collect()
}

fn ols(t: &[f64], y: &[f64]) -> Result<(f64, f64), FitError> {
    let n = t.len() as f64;
    let mt = t.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (ti, yi) in t.iter().zip(y) {
        sxx += (ti - mt) * (ti - mt);
        sxy += (ti - mt) * (yi - my);
    }
    if sxx <= f64::EPSILON {
        return Err(FitError::Degenerate);
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mt;
    if !slope.is_finite() || !intercept.is_finite() {
        return Err(FitError::NonFinite);
    }
    Ok((intercept, slope))
}

fn weekday_idx(d: NaiveDate) -> usize {
    d.weekday().num_days_from_monday() as usize
}

/// Weekday effects are identifiable only when each observed weekday repeats and
/// the points outnumber trend + weekday parameters.
fn weekly_identifiable(wd: &[usize]) -> bool {
    let mut count = [0_usize; 7];
    for &w in wd {
        count[w] += 1;
    }
    let observed = count.iter().filter(|&&c| c > 0).count();
    let repeated = count.iter().all(|&c| c == 0 || c >= 2);
    repeated && wd.len() >= 2 + observed + 2
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdditiveModel {
    origin: NaiveDate,
    intercept: f64,
    slope: f64,
    weekly: Option<[f64; 7]>,
    pub iterations: u32,
}

impl AdditiveModel {
    pub fn fit(series: &TimeSeries, policy: &ForecastPolicy) -> Result<Self, FitError> {
        let n = series.points.len();
        if n < 2 {
            return Err(FitError::InsufficientHistory { points: n });
        }
        let origin = series.points[0].0;
        let t: Vec<f64> = series.points.iter().map(|(d, _)| (*d - origin).num_days() as f64).collect();
        let y: Vec<f64> = series.points.iter().map(|(_, v)| *v).collect();
        if y.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }

        let span_days = (series.points[n - 1].0 - origin).num_days();
        let wd: Vec<usize> = series.points.iter().map(|(d, _)| weekday_idx(*d)).collect();
        if span_days < policy.seasonal_min_span_days || !weekly_identifiable(&wd) {
            let (intercept, slope) = ols(&t, &y)?;
            return Ok(Self { origin, intercept, slope, weekly: None, iterations: 1 });
        }

        let mut season = [0.0_f64; 7];
        let mut iterations = 0_u32;
        loop {
            if iterations >= policy.fit_max_iterations {
                return Err(FitError::NotConverged { iterations });
            }
            iterations += 1;

            let deseasoned: Vec<f64> = y.iter().zip(&wd).map(|(v, &w)| v - season[w]).collect();
            let (intercept, slope) = ols(&t, &deseasoned)?;

            let mut sum = [0.0_f64; 7];
            let mut count = [0_u32; 7];
            for i in 0..n {
                sum[wd[i]] += y[i] - (intercept + slope * t[i]);
                count[wd[i]] += 1;
            }
            let present: Vec<usize> = (0..7).filter(|&d| count[d] > 0).collect();
            let mut next = [0.0_f64; 7];
            for &d in &present {
                next[d] = sum[d] / count[d] as f64;
            }
            // effects sum to zero over observed weekdays; the level lives in the intercept
            let centre = present.iter().map(|&d| next[d]).sum::<f64>() / present.len() as f64;
            for &d in &present {
                next[d] -= centre;
            }

            let delta = (0..7).map(|d| (next[d] - season[d]).abs()).fold(0.0, f64::max);
            if !delta.is_finite() {
                return Err(FitError::NonFinite);
            }
            season = next;

            if delta < policy.fit_tolerance {
                let deseasoned: Vec<f64> = y.iter().zip(&wd).map(|(v, &w)| v - season[w]).collect();
                let (intercept, slope) = ols(&t, &deseasoned)?;
                return Ok(Self { origin, intercept, slope, weekly: Some(season), iterations });
            }
        }
    }

    /// Plain least squares line, no weekday effects.
    pub fn trend_only(series: &TimeSeries) -> Result<Self, FitError> {
        let n = series.points.len();
        if n < 2 {
            return Err(FitError::InsufficientHistory { points: n });
        }
        let origin = series.points[0].0;
        let t: Vec<f64> = series.points.iter().map(|(d, _)| (*d - origin).num_days() as f64).collect();
        let y: Vec<f64> = series.points.iter().map(|(_, v)| *v).collect();
        if y.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }
        let (intercept, slope) = ols(&t, &y)?;
        Ok(Self { origin, intercept, slope, weekly: None, iterations: 1 })
    }

    pub fn predict(&self, date: NaiveDate) -> f64 {
        let t = (date - self.origin).num_days() as f64;
        let s = self.weekly.map(|w| w[weekday_idx(date)]).unwrap_or(0.0);
        self.intercept + self.slope * t + s
    }

    /// Sum of daily predictions for the `horizon` days after `last`.
    pub fn project(&self, last: NaiveDate, horizon: u32) -> f64 {
        (1..=horizon as i64).map(|k| self.predict(last + Duration::days(k))).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    InsufficientHistory { distinct_dates: usize },
    FitFailed(FitError),
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::InsufficientHistory { .. } => "insufficient_history",
            SkipReason::FitFailed(_) => "fit_failed",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::InsufficientHistory { distinct_dates } => {
                write!(f, "insufficient history ({distinct_dates} distinct dates)")
            }
            SkipReason::FitFailed(e) => write!(f, "fit failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesOutcome {
    Forecast(ForecastResult),
    Skipped { store: String, product: String, reason: SkipReason },
}

/// Stateless per-series forecaster; cheap to clone into worker jobs.
#[derive(Debug, Clone)]
pub struct ForecastEngine {
    policy: ForecastPolicy,
}

impl ForecastEngine {
    pub fn new(policy: ForecastPolicy) -> Self {
        Self { policy }
    }

    pub fn forecast(&self, series: &TimeSeries) -> SeriesOutcome {
        let skipped = |reason| SeriesOutcome::Skipped {
            store: series.store.clone(),
            product: series.product.clone(),
            reason,
        };

        let distinct_dates = series.points.len();
        if distinct_dates < self.policy.min_history_days {
            return skipped(SkipReason::InsufficientHistory { distinct_dates });
        }
        let last = match series.points.last() {
            Some((d, _)) => *d,
            None => return skipped(SkipReason::InsufficientHistory { distinct_dates }),
        };

        let fitted = match AdditiveModel::fit(series, &self.policy) {
            Err(FitError::NotConverged { iterations }) => {
                debug!(store = %series.store, product = %series.product, iterations, "weekly fit capped, trend only");
                AdditiveModel::trend_only(series)
            }
            other => other,
        };
        let model = match fitted {
            Ok(m) => m,
            Err(e) => return skipped(SkipReason::FitFailed(e)),
        };
        let total = model.project(last, self.policy.horizon_days);
        if !total.is_finite() {
            return skipped(SkipReason::FitFailed(FitError::NonFinite));
        }

        debug!(store = %series.store, product = %series.product, total, iterations = model.iterations, "series fitted");
        SeriesOutcome::Forecast(ForecastResult {
            store: series.store.clone(),
            product: series.product.clone(),
            forecasted_demand: round_units(total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: i64) -> NaiveDate {
        // 2025-06-02 is a Monday
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap() + Duration::days(n)
    }

    fn series(values: &[f64]) -> TimeSeries {
        TimeSeries {
            store: "S1".into(),
            product: "P1".into(),
            points: values.iter().enumerate().map(|(i, v)| (day(i as i64), *v)).collect(),
        }
    }

    fn demand(outcome: SeriesOutcome) -> u64 {
        match outcome {
            SeriesOutcome::Forecast(f) => f.forecasted_demand,
            other => panic!("expected forecast, got {other:?}"),
        }
    }

    #[test]
    fn flat_ten_units_for_ten_days_forecasts_seventy() {
        let engine = ForecastEngine::new(ForecastPolicy::default());
        assert_eq!(demand(engine.forecast(&series(&[10.0; 10]))), 70);
    }

    #[test]
    fn linear_trend_is_extrapolated() {
        // 1..=10 -> next week 11..=17
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let engine = ForecastEngine::new(ForecastPolicy::default());
        assert_eq!(demand(engine.forecast(&series(&values))), 98);
    }

    #[test]
    fn weekend_bump_is_learned_from_four_weeks() {
        let values: Vec<f64> = (0..28).map(|i| if i % 7 >= 5 { 15.0 } else { 10.0 }).collect();
        let engine = ForecastEngine::new(ForecastPolicy::default());
        assert_eq!(demand(engine.forecast(&series(&values))), 80);
    }

    #[test]
    fn declining_sales_clamp_at_zero() {
        let engine = ForecastEngine::new(ForecastPolicy::default());
        assert_eq!(demand(engine.forecast(&series(&[100.0, 80.0, 60.0, 40.0, 20.0]))), 0);
    }

    #[test]
    fn single_date_is_skipped_not_failed() {
        let sales = vec![
            SalesRecord { store: "S1".into(), product: "P1".into(), date: day(0), units_sold: 4 },
            SalesRecord { store: "S1".into(), product: "P1".into(), date: day(0), units_sold: 6 },
        ];
        let all = build_series(&sales);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].points, vec![(day(0), 10.0)]);

        let engine = ForecastEngine::new(ForecastPolicy::default());
        match engine.forecast(&all[0]) {
            SeriesOutcome::Skipped { reason, .. } => {
                assert_eq!(reason, SkipReason::InsufficientHistory { distinct_dates: 1 })
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn series_are_grouped_and_sorted() {
        let rec = |s: &str, p: &str, d: i64, u: u64| SalesRecord {
            store: s.into(),
            product: p.into(),
            date: day(d),
            units_sold: u,
        };
        let sales = vec![rec("S2", "A", 1, 1), rec("S1", "B", 3, 2), rec("S1", "B", 1, 5), rec("S1", "A", 0, 1)];
        let all = build_series(&sales);
        let keys: Vec<(&str, &str)> = all.iter().map(|s| (s.store.as_str(), s.product.as_str())).collect();
        assert_eq!(keys, vec![("S1", "A"), ("S1", "B"), ("S2", "A")]);
        assert_eq!(all[1].points, vec![(day(1), 5.0), (day(3), 2.0)]);
    }

    #[test]
    fn iteration_cap_drops_back_to_trend_line() {
        let values: Vec<f64> = (0..28).map(|i| if i % 7 >= 5 { 15.0 } else { 10.0 }).collect();
        let policy = ForecastPolicy { fit_max_iterations: 1, ..ForecastPolicy::default() };
        match AdditiveModel::fit(&series(&values), &policy) {
            Err(FitError::NotConverged { iterations }) => assert_eq!(iterations, 1),
            other => panic!("unexpected {other:?}"),
        }
        let line = AdditiveModel::trend_only(&series(&values)).unwrap();
        let expected = round_units(line.project(day(27), 7));
        assert_eq!(demand(ForecastEngine::new(policy).forecast(&series(&values))), expected);
    }

    fn dated(points: &[((i32, u32, u32), f64)]) -> TimeSeries {
        TimeSeries {
            store: "S1".into(),
            product: "P1".into(),
            points: points
                .iter()
                .map(|((y, m, d), v)| (NaiveDate::from_ymd_opt(*y, *m, *d).unwrap(), *v))
                .collect(),
        }
    }

    #[test]
    fn sparse_long_history_still_forecasts() {
        // 8 sales days over 7 weeks, almost one per weekday: too thin for weekly effects
        let s = dated(&[
            ((2025, 6, 5), 34.0),
            ((2025, 6, 9), 6.0),
            ((2025, 6, 13), 29.0),
            ((2025, 6, 25), 42.0),
            ((2025, 7, 2), 29.0),
            ((2025, 7, 5), 18.0),
            ((2025, 7, 20), 25.0),
            ((2025, 7, 22), 13.0),
        ]);
        let m = AdditiveModel::fit(&s, &ForecastPolicy::default()).unwrap();
        assert!(m.weekly.is_none());
        assert_eq!(m, AdditiveModel::trend_only(&s).unwrap());
        match ForecastEngine::new(ForecastPolicy::default()).forecast(&s) {
            SeriesOutcome::Forecast(f) => assert_eq!(f.store, "S1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn weekly_effects_need_repeated_weekdays() {
        // Mon..Sun once each, then Mon again: Tue..Sun seen once
        assert!(!weekly_identifiable(&[0, 1, 2, 3, 4, 5, 6, 0]));
        // two full weeks: 14 points, 7 weekdays, 9 parameters
        let two_weeks: Vec<usize> = (0..14).map(|i| i % 7).collect();
        assert!(weekly_identifiable(&two_weeks));
        // weekdays only twice, too few spare points
        assert!(!weekly_identifiable(&[0, 0, 3, 3]));
        assert!(weekly_identifiable(&[0, 0, 0, 3, 3, 3]));
    }

    #[test]
    fn sparse_dates_use_real_day_gaps() {
        // sales on day 0 and day 9 only: slope is per calendar day
        let s = TimeSeries {
            store: "S1".into(),
            product: "P1".into(),
            points: vec![(day(0), 0.0), (day(9), 9.0)],
        };
        let m = AdditiveModel::fit(&s, &ForecastPolicy::default()).unwrap();
        assert!((m.predict(day(10)) - 10.0).abs() < 1e-9);
    }
}
