// ===============================
// src/pipeline.rs
// ===============================
//
// Stage order (strictly forward):
//   sales -> forecast -> trend boost -> deficits -> sourcing -> cost/carbon
//
// Forecast fits and sourcing matches run on a bounded pool of blocking
// workers; results are re-sorted by (store, product) so completion order
// never leaks into the output. The cancel flag is checked between work units;
// a cancelled run returns `Cancelled` and its partial results are dropped.
//
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::{stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Policy;
use crate::deficit::{self, InventoryIndex};
use crate::domain::{BoostedDemand, Deficit, Event, ForecastResult, Source, SourcingRecommendation};
use crate::estimate;
use crate::forecast::{self, ForecastEngine, SeriesOutcome, SkipReason};
use crate::ingest::{IngestError, PipelineInputs};
use crate::metrics::{FORECASTS, RECOMMENDATIONS, SERIES, SERIES_SKIPPED, STAGE_MS};
use crate::sourcing::{self, LocationBook};
use crate::trend::{self, TrendSource};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("store location table is empty but {deficits} deficit(s) need geolocation")]
    EmptyLocations { deficits: usize },
    #[error("no location for store `{store}` (needed to source `{product}`)")]
    MissingStoreLocation { store: String, product: String },
    #[error("run cancelled")]
    Cancelled,
    #[error("worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Deficit size bands (urgent >= 100, moderate 50..=99, minor < 50).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeverityBands {
    pub urgent: usize,
    pub moderate: usize,
    pub minor: usize,
}

impl SeverityBands {
    fn add(&mut self, qty: u64) {
        match qty {
            q if q >= 100 => self.urgent += 1,
            q if q >= 50 => self.moderate += 1,
            _ => self.minor += 1,
        }
    }
}

/// How many stores only receive, only send, or do both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreRoles {
    pub needy_only: usize,
    pub source_only: usize,
    pub both: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub series: usize,
    pub skipped_insufficient_history: usize,
    pub skipped_fit_failed: usize,
    pub forecasts: usize,
    pub trend_source: String,
    pub neutral_trend_products: usize,
    pub deficits: usize,
    pub internal_matches: usize,
    pub fallback_matches: usize,
    pub severity: SeverityBands,
    pub roles: StoreRoles,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub forecasts: Vec<ForecastResult>,
    pub boosted: Vec<BoostedDemand>,
    pub deficits: Vec<Deficit>,
    pub recommendations: Vec<SourcingRecommendation>,
    pub summary: RunSummary,
}

/// Optional sink for recorder events.
struct Events(Option<mpsc::Sender<Event>>);

impl Events {
    async fn emit(&self, ev: Event) {
        if let Some(tx) = &self.0 {
            // recorder gone = recording off; never fail the run for it
            let _ = tx.send(ev).await;
        }
    }
}

fn cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Run `job` over `items` on at most `workers` blocking threads. Output order is
/// completion order; callers sort.
async fn run_pool<I, T, F>(
    items: Vec<I>,
    workers: usize,
    cancel: &watch::Receiver<bool>,
    job: F,
) -> Result<Vec<T>, PipelineError>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> T + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let mut out = Vec::with_capacity(items.len());
    let mut results = stream::iter(items.into_iter().map(|item| {
        let job = Arc::clone(&job);
        tokio::task::spawn_blocking(move || job(item))
    }))
    .buffer_unordered(workers.max(1));

    if cancelled(cancel) {
        return Err(PipelineError::Cancelled);
    }
    while let Some(joined) = results.next().await {
        out.push(joined?);
        if cancelled(cancel) {
            return Err(PipelineError::Cancelled);
        }
    }
    Ok(out)
}

fn observe(stage: &str, started: Instant) {
    STAGE_MS
        .with_label_values(&[stage])
        .observe(started.elapsed().as_secs_f64() * 1_000.0);
}

/// The core entry point: three validated tables in, forecast + recommendation tables out.
pub async fn run(
    inputs: &PipelineInputs,
    policy: &Policy,
    trend_source: &dyn TrendSource,
    cancel: watch::Receiver<bool>,
    events: Option<mpsc::Sender<Event>>,
) -> Result<PipelineOutput, PipelineError> {
    let events = Events(events);
    let mut summary = RunSummary { trend_source: trend_source.name().to_string(), ..RunSummary::default() };

    // ---- 1) Forecast ----
    let started = Instant::now();
    let series = forecast::build_series(&inputs.sales);
    summary.series = series.len();
    SERIES.inc_by(series.len() as u64);

    let engine = ForecastEngine::new(policy.forecast.clone());
    let outcomes = run_pool(series, policy.workers, &cancel, move |s| engine.forecast(&s)).await?;

    let mut forecasts = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            SeriesOutcome::Forecast(f) => forecasts.push(f),
            SeriesOutcome::Skipped { store, product, reason } => {
                SERIES_SKIPPED.with_label_values(&[reason.label()]).inc();
                match &reason {
                    SkipReason::InsufficientHistory { .. } => {
                        summary.skipped_insufficient_history += 1;
                        debug!(%store, %product, %reason, "series skipped");
                    }
                    SkipReason::FitFailed(_) => {
                        summary.skipped_fit_failed += 1;
                        warn!(%store, %product, %reason, "series skipped");
                    }
                }
                events.emit(Event::SeriesSkipped { store, product, reason: reason.to_string() }).await;
            }
        }
    }
    forecasts.sort_by(|a, b| (&a.store, &a.product).cmp(&(&b.store, &b.product)));
    FORECASTS.inc_by(forecasts.len() as u64);
    summary.forecasts = forecasts.len();
    for f in &forecasts {
        events.emit(Event::Forecast(f.clone())).await;
    }
    observe("forecast", started);
    info!(series = summary.series, forecasts = summary.forecasts, "forecast stage done");

    // ---- 2) Trend boost (one batched fetch) ----
    let started = Instant::now();
    let products: Vec<String> = forecasts
        .iter()
        .map(|f| f.product.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let scores = trend::fetch_scores(trend_source, &products, &policy.trend).await;
    if cancelled(&cancel) {
        return Err(PipelineError::Cancelled);
    }
    for p in products.iter().filter(|p| !scores.has_signal(p)) {
        summary.neutral_trend_products += 1;
        events.emit(Event::TrendNeutral { product: p.clone() }).await;
    }
    let boosted = trend::boost(&forecasts, &scores);
    observe("trend", started);

    // ---- 3) Deficits ----
    let started = Instant::now();
    let inventory = InventoryIndex::new(&inputs.inventory);
    let deficits = deficit::resolve(&boosted, &inventory);
    summary.deficits = deficits.len();
    for d in &deficits {
        summary.severity.add(d.quantity);
        events.emit(Event::Deficit(d.clone())).await;
    }
    observe("deficit", started);
    info!(deficits = deficits.len(), "deficit stage done");

    // ---- 4) Sourcing ----
    let started = Instant::now();
    let book = LocationBook::new(&inputs.locations);
    if !deficits.is_empty() && book.is_empty() {
        return Err(PipelineError::EmptyLocations { deficits: deficits.len() });
    }
    let mut jobs = Vec::with_capacity(deficits.len());
    for d in &deficits {
        let at = book.get(&d.store).ok_or_else(|| PipelineError::MissingStoreLocation {
            store: d.store.clone(),
            product: d.product.clone(),
        })?;
        jobs.push((d.clone(), at));
    }

    let inventory = Arc::new(inventory);
    let book = Arc::new(book);
    let fallback = policy.fallback.clone();
    let matches = run_pool(jobs, policy.workers, &cancel, move |(d, at)| {
        sourcing::match_deficit(&d, at, &inventory, &book, &fallback)
    })
    .await?;
    observe("sourcing", started);

    // ---- 5) Cost & carbon ----
    let mut recommendations: Vec<SourcingRecommendation> =
        matches.into_iter().map(|m| estimate::annotate(m, &policy.cost)).collect();
    recommendations.sort_by(|a, b| (&a.needy_store, &a.product).cmp(&(&b.needy_store, &b.product)));

    let mut needy = HashSet::new();
    let mut sources = HashSet::new();
    for r in &recommendations {
        RECOMMENDATIONS.with_label_values(&[r.source_type.label()]).inc();
        needy.insert(r.needy_store.as_str());
        match &r.source {
            Source::Store(s) => {
                summary.internal_matches += 1;
                sources.insert(s.as_str());
            }
            Source::FallbackVendor => summary.fallback_matches += 1,
        }
        events.emit(Event::Recommendation(r.clone())).await;
    }
    summary.roles = StoreRoles {
        needy_only: needy.difference(&sources).count(),
        source_only: sources.difference(&needy).count(),
        both: needy.intersection(&sources).count(),
    };

    info!(
        recommendations = recommendations.len(),
        internal = summary.internal_matches,
        fallback = summary.fallback_matches,
        "sourcing stage done"
    );
    events
        .emit(Event::Note(format!(
            "run complete: {} forecasts, {} deficits, {} fallback",
            summary.forecasts, summary.deficits, summary.fallback_matches
        )))
        .await;

    Ok(PipelineOutput { forecasts, boosted, deficits, recommendations, summary })
}
