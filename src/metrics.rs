// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::path::Path;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Forecast stage --------
pub static SERIES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("forecast_series_total", "store/product series seen").unwrap());

pub static SERIES_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("forecast_series_skipped_total", "series without a forecast (label: reason)"),
        &["reason"],
    )
    .unwrap()
});

pub static FORECASTS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("forecasts_total", "forecast rows produced").unwrap());

// -------- Trend stage --------
pub static TREND_FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trend_fetch_attempts_total", "trend fetch attempts (label: outcome)"),
        &["outcome"],
    )
    .unwrap()
});

pub static TREND_NEUTRAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("trend_neutral_scores_total", "forecast rows boosted with the neutral score").unwrap()
});

// -------- Deficit / sourcing --------
pub static DEFICITS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("deficits_total", "store/product deficits detected").unwrap());

pub static RECOMMENDATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("recommendations_total", "sourcing recommendations (label: source_type)"),
        &["source_type"],
    )
    .unwrap()
});

// Wall time per stage (milliseconds)
pub static STAGE_MS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("pipeline_stage_ms", "pipeline stage duration (ms)")
            .buckets(vec![1.0, 5.0, 25.0, 100.0, 500.0, 2_000.0, 10_000.0, 60_000.0]),
        &["stage"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_TREND_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_trend_mode", "trend mode (label: mode)"), &["mode"]).unwrap()
});

pub static CONFIG_WORKERS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_workers", "worker pool size").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(SERIES.clone())),
        REGISTRY.register(Box::new(SERIES_SKIPPED.clone())),
        REGISTRY.register(Box::new(FORECASTS.clone())),
        REGISTRY.register(Box::new(TREND_FETCHES.clone())),
        REGISTRY.register(Box::new(TREND_NEUTRAL.clone())),
        REGISTRY.register(Box::new(DEFICITS.clone())),
        REGISTRY.register(Box::new(RECOMMENDATIONS.clone())),
        REGISTRY.register(Box::new(STAGE_MS.clone())),
        REGISTRY.register(Box::new(CONFIG_TREND_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_WORKERS.clone())),
    ] {
        // AlreadyReg on a second init() is fine
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

/// Batch runs end before any scrape: leave a textfile for node_exporter's collector.
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, encode_metrics())
}
