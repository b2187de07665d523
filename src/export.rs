// ===============================
// src/export.rs
// ===============================
//
// Output tables. Each file is written to `<name>.tmp` then renamed, so a
// reader never sees a half-written table. Numbers are rendered with two
// decimals; unlimited fallback stock renders as `inf`.
//
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::domain::{ForecastResult, SourcingRecommendation};
use crate::pipeline::{PipelineOutput, RunSummary};

pub const FORECAST_FILE: &str = "forecast_df.csv";
pub const RECOMMENDATION_FILE: &str = "enhanced_sourcing_recommendations.csv";
pub const SUMMARY_FILE: &str = "run_summary.json";
pub const METRICS_FILE: &str = "metrics.prom";

pub const FORECAST_HEADERS: [&str; 3] = ["Store", "Product", "Forecasted Demand"];
pub const RECOMMENDATION_HEADERS: [&str; 11] = [
    "Product",
    "Needy Store",
    "Source Store",
    "Distance (km)",
    "Deficit",
    "Source Stock",
    "Suggested Quantity",
    "Carbon Impact",
    "Cost Multiplier",
    "Source Type",
    "Adjusted Cost per Unit",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot write {file}: {source}")]
    Io { file: PathBuf, source: std::io::Error },
    #[error("cannot encode {file}: {source}")]
    Csv { file: PathBuf, source: csv::Error },
    #[error("cannot encode {file}: {source}")]
    Json { file: PathBuf, source: serde_json::Error },
}

fn io_err(file: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io { file: file.to_path_buf(), source }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write bytes next to `path` then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))
}

fn csv_bytes<F>(file: &Path, headers: &[&str], fill: F) -> Result<Vec<u8>, ExportError>
where
    F: FnOnce(&mut csv::Writer<Vec<u8>>) -> Result<(), csv::Error>,
{
    let csv_err = |source| ExportError::Csv { file: file.to_path_buf(), source };
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(headers).map_err(csv_err)?;
    fill(&mut w).map_err(csv_err)?;
    w.into_inner().map_err(|e| ExportError::Io { file: file.to_path_buf(), source: e.into_error() })
}

pub fn write_forecasts(path: &Path, rows: &[ForecastResult]) -> Result<(), ExportError> {
    let bytes = csv_bytes(path, &FORECAST_HEADERS, |w| {
        for f in rows {
            let demand = f.forecasted_demand.to_string();
            w.write_record([&f.store, &f.product, &demand])?;
        }
        Ok(())
    })?;
    write_atomic(path, &bytes)
}

pub fn write_recommendations(path: &Path, rows: &[SourcingRecommendation]) -> Result<(), ExportError> {
    let bytes = csv_bytes(path, &RECOMMENDATION_HEADERS, |w| {
        for r in rows {
            w.write_record([
                r.product.clone(),
                r.needy_store.clone(),
                r.source.to_string(),
                format!("{:.2}", r.distance_km),
                r.deficit.to_string(),
                r.source_stock.to_string(),
                r.suggested_quantity.to_string(),
                format!("{:.2}", r.carbon_impact),
                format!("{:.2}", r.cost_multiplier),
                r.source_type.label().to_string(),
                format!("{:.2}", r.adjusted_unit_cost),
            ])?;
        }
        Ok(())
    })?;
    write_atomic(path, &bytes)
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<(), ExportError> {
    let mut bytes = serde_json::to_vec_pretty(summary)
        .map_err(|source| ExportError::Json { file: path.to_path_buf(), source })?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// All run tables into `dir` (created if missing). Returns the written paths.
pub fn write_all(dir: &Path, out: &PipelineOutput) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;

    let forecasts = dir.join(FORECAST_FILE);
    let recommendations = dir.join(RECOMMENDATION_FILE);
    let summary = dir.join(SUMMARY_FILE);

    write_forecasts(&forecasts, &out.forecasts)?;
    write_recommendations(&recommendations, &out.recommendations)?;
    write_summary(&summary, &out.summary)?;

    info!(
        dir = %dir.display(),
        forecasts = out.forecasts.len(),
        recommendations = out.recommendations.len(),
        "outputs written"
    );
    Ok(vec![forecasts, recommendations, summary])
}
