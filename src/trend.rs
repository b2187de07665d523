// ===============================
// src/trend.rs
// ===============================
//
// Trend signal adapters:
// - HttpTrendSource    : relative-interest service (one batched GET per run)
// - FileTrendSource    : replay of a captured {"product": score} JSON file
// - StaticTrendSource  : the same, already in memory
// - NeutralTrendSource : no signal, every product gets the neutral score
//
// `fetch_scores` wraps any source with a per-attempt timeout and a bounded
// number of retries (exponential backoff + jitter). When every attempt fails
// the run continues with neutral scores.
//
use std::collections::HashMap as StdHashMap;
use std::path::PathBuf;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};
use url::Url;

use crate::config::{TrendMode, TrendPolicy};
use crate::domain::{round_units, BoostedDemand, ForecastResult};
use crate::metrics::{TREND_FETCHES, TREND_NEUTRAL};

#[derive(Debug, Error)]
pub enum TrendError {
    #[error("bad trend url: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("trend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("trend service returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decode trend payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Latest interest observation per product. Products without data are absent.
    async fn latest_interest(&self, products: &[String]) -> Result<HashMap<String, f64>, TrendError>;
}

// ---- interest_over_time payload ----
// {"timeline":[{"date":"2025-06-01","values":{"Umbrella":42,"Raincoat":null}}, ...]}
#[derive(Debug, Deserialize)]
pub struct InterestOverTime {
    #[serde(default)]
    pub timeline: Vec<InterestPoint>,
}

#[derive(Debug, Deserialize)]
pub struct InterestPoint {
    pub date: NaiveDate,
    #[serde(default)]
    pub values: StdHashMap<String, Option<f64>>,
}

/// Most recent non-null value for each requested product.
pub fn latest_per_product(body: &InterestOverTime, products: &[String]) -> HashMap<String, f64> {
    let mut points: Vec<&InterestPoint> = body.timeline.iter().collect();
    points.sort_by_key(|p| p.date);

    let mut out = HashMap::new();
    for p in points {
        for product in products {
            if let Some(Some(v)) = p.values.get(product) {
                if v.is_finite() {
                    out.insert(product.clone(), *v);
                }
            }
        }
    }
    out
}

pub struct HttpTrendSource {
    http: reqwest::Client,
    base: Url,
    geo: String,
    timeframe: String,
}

impl HttpTrendSource {
    pub fn new(policy: &TrendPolicy) -> Result<Self, TrendError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(&policy.base_url)?,
            geo: policy.geo.clone(),
            timeframe: policy.timeframe.clone(),
        })
    }

    fn query(&self, products: &[String]) -> String {
        // each keyword encoded on its own so the comma stays a separator
        let keywords = products
            .iter()
            .map(|p| urlencoding::encode(p).into_owned())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "keywords={}&geo={}&timeframe={}",
            keywords,
            urlencoding::encode(&self.geo),
            urlencoding::encode(&self.timeframe)
        )
    }
}

#[async_trait]
impl TrendSource for HttpTrendSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn latest_interest(&self, products: &[String]) -> Result<HashMap<String, f64>, TrendError> {
        let url = format!(
            "{}/interest_over_time?{}",
            self.base.as_str().trim_end_matches('/'),
            self.query(products)
        );
        let rsp = self.http.get(url).send().await?;
        if !rsp.status().is_success() {
            let code = rsp.status().as_u16();
            let body = rsp.text().await.unwrap_or_default();
            return Err(TrendError::Status { code, body });
        }
        let body = rsp.json::<InterestOverTime>().await?;
        Ok(latest_per_product(&body, products))
    }
}

pub struct FileTrendSource {
    path: PathBuf,
}

impl FileTrendSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TrendSource for FileTrendSource {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn latest_interest(&self, products: &[String]) -> Result<HashMap<String, f64>, TrendError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|source| TrendError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let all: StdHashMap<String, f64> = serde_json::from_str(&raw)?;
        Ok(products
            .iter()
            .filter_map(|p| all.get(p).map(|v| (p.clone(), *v)))
            .collect())
    }
}

/// Fixed in-memory scores: a captured or agreed trend response for reproducible runs.
pub struct StaticTrendSource {
    scores: HashMap<String, f64>,
}

impl StaticTrendSource {
    pub fn new<I, K>(scores: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self { scores: scores.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }
}

#[async_trait]
impl TrendSource for StaticTrendSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn latest_interest(&self, products: &[String]) -> Result<HashMap<String, f64>, TrendError> {
        Ok(products
            .iter()
            .filter_map(|p| self.scores.get(p).map(|v| (p.clone(), *v)))
            .collect())
    }
}

pub struct NeutralTrendSource;

#[async_trait]
impl TrendSource for NeutralTrendSource {
    fn name(&self) -> &'static str {
        "neutral"
    }

    async fn latest_interest(&self, _products: &[String]) -> Result<HashMap<String, f64>, TrendError> {
        Ok(HashMap::new())
    }
}

/// Build the configured source. A misconfigured source degrades to neutral.
pub fn from_policy(policy: &TrendPolicy) -> Box<dyn TrendSource> {
    match policy.mode {
        TrendMode::Neutral => Box::new(NeutralTrendSource),
        TrendMode::Http => match HttpTrendSource::new(policy) {
            Ok(src) => Box::new(src),
            Err(e) => {
                warn!(%e, base_url = %policy.base_url, "trend source disabled");
                Box::new(NeutralTrendSource)
            }
        },
        TrendMode::File => match &policy.file {
            Some(path) => Box::new(FileTrendSource::new(path.clone())),
            None => {
                warn!("TREND_MODE=file without TREND_FILE, trend source disabled");
                Box::new(NeutralTrendSource)
            }
        },
    }
}

/// Per-product scores in [0,100]; unknown products read as the neutral score.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendScores {
    scores: HashMap<String, f64>,
    neutral: f64,
}

impl TrendScores {
    pub fn neutral(neutral: f64) -> Self {
        Self { scores: HashMap::new(), neutral }
    }

    pub fn from_raw(raw: HashMap<String, f64>, neutral: f64) -> Self {
        let scores = raw
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| (k, v.clamp(0.0, 100.0)))
            .collect();
        Self { scores, neutral }
    }

    pub fn score_for(&self, product: &str) -> f64 {
        self.scores.get(product).copied().unwrap_or(self.neutral)
    }

    pub fn has_signal(&self, product: &str) -> bool {
        self.scores.contains_key(product)
    }
}

/// One batched fetch for all products, bounded by timeout and retries.
pub async fn fetch_scores(source: &dyn TrendSource, products: &[String], policy: &TrendPolicy) -> TrendScores {
    if products.is_empty() {
        return TrendScores::neutral(policy.neutral_score);
    }
    let per_attempt = Duration::from_millis(policy.timeout_ms);

    let mut attempt: u32 = 0;
    loop {
        match timeout(per_attempt, source.latest_interest(products)).await {
            Ok(Ok(raw)) => {
                TREND_FETCHES.with_label_values(&["ok"]).inc();
                let scores = TrendScores::from_raw(raw, policy.neutral_score);
                info!(source = source.name(), products = products.len(), attempt, "trend scores fetched");
                return scores;
            }
            Ok(Err(e)) => {
                TREND_FETCHES.with_label_values(&["error"]).inc();
                warn!(%e, source = source.name(), attempt, "trend fetch failed");
            }
            Err(_) => {
                TREND_FETCHES.with_label_values(&["timeout"]).inc();
                warn!(source = source.name(), attempt, timeout_ms = policy.timeout_ms, "trend fetch timed out");
            }
        }

        if attempt >= policy.max_retries {
            warn!(source = source.name(), "trend source unavailable, using neutral scores");
            return TrendScores::neutral(policy.neutral_score);
        }

        // Exponential backoff + jitter
        attempt = attempt.saturating_add(1);
        let shift = attempt.min(6);
        let base_ms = policy.backoff_ms.saturating_mul(1u64 << shift);
        let jitter = rand::thread_rng().gen_range(0..=policy.backoff_ms / 2);
        sleep(Duration::from_millis(base_ms + jitter)).await;
    }
}

/// forecast × (1 + score/100), rounded, never negative.
pub fn boost(forecasts: &[ForecastResult], scores: &TrendScores) -> Vec<BoostedDemand> {
    forecasts
        .iter()
        .map(|f| {
            if !scores.has_signal(&f.product) {
                TREND_NEUTRAL.inc();
            }
            let trend_score = scores.score_for(&f.product);
            BoostedDemand {
                store: f.store.clone(),
                product: f.product.clone(),
                trend_score,
                quantity: round_units(f.forecasted_demand as f64 * (1.0 + trend_score / 100.0)),
            }
        })
        .collect()
}
