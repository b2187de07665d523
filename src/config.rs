// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : demand_sourcing — demand forecasting & stock sourcing pipeline
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Forecasts per-store demand from sales history, boosts it with an
          external trend signal, detects stock deficits and matches each one
          to the nearest store with surplus (or a fallback vendor), scoring
          cost and carbon impact.
=============================================================================
*/
use std::{env, path::PathBuf, str::FromStr};

use clap::Parser;
use dotenvy::dotenv;

use crate::domain::GeoPoint;

/// Input/output locations. Every flag falls back to an env var (handy with `.env`).
#[derive(Parser, Clone, Debug)]
#[command(name = "demand-sourcing", version, about = "Forecast demand and plan stock sourcing")]
pub struct Args {
    /// Sales history CSV (Store, Product, Date, Units Sold)
    #[arg(long, env = "SALES_FILE")]
    pub sales: PathBuf,

    /// Inventory CSV (Store, Product, Current Stock)
    #[arg(long, env = "INVENTORY_FILE")]
    pub inventory: PathBuf,

    /// Store locations CSV (Store, Latitude, Longitude)
    #[arg(long, env = "LOCATIONS_FILE")]
    pub locations: PathBuf,

    #[arg(long, env = "OUTPUT_DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    /// JSONL event log (disabled when absent)
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<PathBuf>,
}

/// Sumber trend signal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrendMode {
    Neutral,
    Http,
    File,
}

impl TrendMode {
    pub fn from_env(key: &str, default_mode: TrendMode) -> TrendMode {
        match env::var(key).unwrap_or_default().trim().to_ascii_lowercase().as_str() {
            "neutral" | "none" => TrendMode::Neutral,
            "http"             => TrendMode::Http,
            "file"             => TrendMode::File,
            _ => default_mode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendMode::Neutral => "neutral",
            TrendMode::Http    => "http",
            TrendMode::File    => "file",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ForecastPolicy {
    pub horizon_days: u32,
    pub min_history_days: usize,
    pub fit_max_iterations: u32,
    pub fit_tolerance: f64,
    /// Seasonality is only fitted when the series spans at least this many days.
    pub seasonal_min_span_days: i64,
}

impl Default for ForecastPolicy {
    fn default() -> Self {
        Self {
            horizon_days: 7,
            min_history_days: 2,
            fit_max_iterations: 200,
            fit_tolerance: 1e-6,
            seasonal_min_span_days: 14,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrendPolicy {
    pub mode: TrendMode,
    pub base_url: String,
    pub file: Option<PathBuf>,
    pub geo: String,
    pub timeframe: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub neutral_score: f64,
}

impl Default for TrendPolicy {
    fn default() -> Self {
        Self {
            mode: TrendMode::Neutral,
            base_url: "http://127.0.0.1:8080".to_string(),
            file: None,
            geo: "IN".to_string(),
            timeframe: "today 1-m".to_string(),
            timeout_ms: 5_000,
            max_retries: 2,
            backoff_ms: 250,
            neutral_score: 50.0,
        }
    }
}

/// Off-network supplier; its output marker is always `Source::FallbackVendor`.
#[derive(Clone, Debug)]
pub struct FallbackVendor {
    pub point: GeoPoint,
}

#[derive(Clone, Debug)]
pub struct CostPolicy {
    pub emission_factor: f64,
    pub base_unit_cost: f64,
    pub internal_multiplier: f64,
    pub fallback_multiplier: f64,
}

impl Default for CostPolicy {
    fn default() -> Self {
        Self { emission_factor: 0.3, base_unit_cost: 50.0, internal_multiplier: 1.0, fallback_multiplier: 1.10 }
    }
}

/// Every tunable the pipeline reads. Nothing downstream hardcodes these.
#[derive(Clone, Debug)]
pub struct Policy {
    pub forecast: ForecastPolicy,
    pub trend: TrendPolicy,
    pub cost: CostPolicy,
    pub fallback: FallbackVendor,
    pub workers: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            forecast: ForecastPolicy::default(),
            trend: TrendPolicy::default(),
            cost: CostPolicy::default(),
            fallback: FallbackVendor {
                point: GeoPoint { lat: 22.0, lon: 77.0 },
            },
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

impl Policy {
    /// Policy dari ENV; key yang kosong/invalid pakai default.
    pub fn from_env() -> Policy {
        let d = Policy::default();

        // ===== Forecast =====
        let forecast = ForecastPolicy {
            horizon_days: env_or("FORECAST_HORIZON_DAYS", d.forecast.horizon_days),
            min_history_days: env_or("MIN_HISTORY_DAYS", d.forecast.min_history_days).max(2),
            fit_max_iterations: env_or("FIT_MAX_ITERATIONS", d.forecast.fit_max_iterations).max(1),
            fit_tolerance: env_or("FIT_TOLERANCE", d.forecast.fit_tolerance),
            seasonal_min_span_days: env_or("SEASONAL_MIN_SPAN_DAYS", d.forecast.seasonal_min_span_days),
        };

        // ===== Trend =====
        // Contoh:
        //   TREND_MODE=http  TREND_BASE_URL=http://trends.internal:8080
        //   TREND_MODE=file  TREND_FILE=./trend_scores.json
        let trend = TrendPolicy {
            mode: TrendMode::from_env("TREND_MODE", d.trend.mode.clone()),
            base_url: env::var("TREND_BASE_URL").unwrap_or(d.trend.base_url),
            file: env::var("TREND_FILE").ok().map(PathBuf::from),
            geo: env::var("TREND_GEO").unwrap_or(d.trend.geo),
            timeframe: env::var("TREND_TIMEFRAME").unwrap_or(d.trend.timeframe),
            timeout_ms: env_or("TREND_TIMEOUT_MS", d.trend.timeout_ms),
            max_retries: env_or("TREND_MAX_RETRIES", d.trend.max_retries),
            backoff_ms: env_or("TREND_BACKOFF_MS", d.trend.backoff_ms),
            neutral_score: env_or("NEUTRAL_TREND_SCORE", d.trend.neutral_score).clamp(0.0, 100.0),
        };

        // ===== Cost / carbon =====
        let cost = CostPolicy {
            emission_factor: env_or("EMISSION_FACTOR", d.cost.emission_factor),
            base_unit_cost: env_or("BASE_UNIT_COST", d.cost.base_unit_cost),
            internal_multiplier: d.cost.internal_multiplier,
            fallback_multiplier: env_or("FALLBACK_COST_MULTIPLIER", d.cost.fallback_multiplier),
        };

        let fallback = FallbackVendor {
            point: GeoPoint {
                lat: env_or("FALLBACK_VENDOR_LAT", d.fallback.point.lat),
                lon: env_or("FALLBACK_VENDOR_LON", d.fallback.point.lon),
            },
        };

        let workers = env_or("WORKERS", d.workers).max(1);

        Policy { forecast, trend, cost, fallback, workers }
    }
}

pub fn load() -> (Args, Policy) {
    // .env dulu, supaya SALES_FILE dkk ikut terbaca oleh clap
    let _ = dotenv();
    let args = Args::parse();
    let policy = Policy::from_env();
    (args, policy)
}
