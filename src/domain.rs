// ===============================
// src/domain.rs
// ===============================
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---- Inputs ----
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord { pub store: String, pub product: String, pub date: NaiveDate, pub units_sold: u64 }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord { pub store: String, pub product: String, pub current_stock: u64 }
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint { pub lat: f64, pub lon: f64 }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreLocation { pub store: String, pub point: GeoPoint }

/// Daily demand history of one (store, product), ascending by date, one point per date.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries { pub store: String, pub product: String, pub points: Vec<(NaiveDate, f64)> }

// ---- Stage outputs ----
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastResult { pub store: String, pub product: String, pub forecasted_demand: u64 }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedDemand { pub store: String, pub product: String, pub trend_score: f64, pub quantity: u64 }
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deficit { pub store: String, pub product: String, pub quantity: u64 }

/// Where a deficit gets covered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source { Store(String), FallbackVendor }

impl Source {
    pub fn is_fallback(&self) -> bool { matches!(self, Source::FallbackVendor) }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Store(id) => f.write_str(id),
            Source::FallbackVendor => f.write_str("Fallback Vendor"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceStock { Units(u64), Unlimited }

impl fmt::Display for SourceStock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStock::Units(n) => write!(f, "{n}"),
            SourceStock::Unlimited => f.write_str("inf"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType { InternalStore, ExternalVendor }

impl SourceType {
    pub fn label(&self) -> &'static str {
        match self {
            SourceType::InternalStore => "Internal Store",
            SourceType::ExternalVendor => "External Vendor",
        }
    }
}

/// Matcher output before cost/carbon annotation. `distance_km` is unrounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcingMatch {
    pub product: String,
    pub needy_store: String,
    pub source: Source,
    pub distance_km: f64,
    pub deficit: u64,
    pub source_stock: SourceStock,
    pub suggested_quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcingRecommendation {
    pub product: String,
    pub needy_store: String,
    pub source: Source,
    pub distance_km: f64,
    pub deficit: u64,
    pub source_stock: SourceStock,
    pub suggested_quantity: u64,
    pub carbon_impact: f64,
    pub cost_multiplier: f64,
    pub source_type: SourceType,
    pub adjusted_unit_cost: f64,
}

// ---- Recorder events ----
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    SeriesSkipped { store: String, product: String, reason: String },
    Forecast(ForecastResult),
    TrendNeutral { product: String },
    Deficit(Deficit),
    Recommendation(SourcingRecommendation),
    Note(String),
}

/// Round to 2 decimals (output columns: distance, carbon, cost).
pub fn round2(x: f64) -> f64 { (x * 100.0).round() / 100.0 }

/// Nearest integer, ties to even, clamped at zero.
pub fn round_units(x: f64) -> u64 {
    if !x.is_finite() || x <= 0.0 { return 0; }
    x.round_ties_even() as u64
}
