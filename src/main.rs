// ===============================
// src/main.rs
// ===============================
/*
 # contoh run (neutral trend, 4 worker)
 WORKERS=4 cargo run --release -- \
     --sales data/sales_data.csv \
     --inventory data/inventory_data.csv \
     --locations data/store_locations.csv

 # hasil
 head outputs/enhanced_sourcing_recommendations.csv
 grep '^recommendations_total' outputs/metrics.prom
*/
/*
=============================================================================
Project : demand_sourcing — demand forecasting & stock sourcing pipeline
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Forecasts per-store demand from sales history, boosts it with an
          external trend signal, detects stock deficits and matches each one
          to the nearest store with surplus (or a fallback vendor), scoring
          cost and carbon impact.
=============================================================================
*/
use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use demand_sourcing::{config, domain::Event, export, ingest, metrics, pipeline, recorder, trend};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "run failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // ---- Load config & policy ----
    let (args, policy) = config::load();

    // ---- Metrics ----
    metrics::init();
    metrics::CONFIG_TREND_MODE.with_label_values(&[policy.trend.mode.as_str()]).set(1);
    metrics::CONFIG_WORKERS.set(policy.workers as i64);

    info!(
        sales = %args.sales.display(),
        inventory = %args.inventory.display(),
        locations = %args.locations.display(),
        output_dir = %args.output_dir.display(),
        trend_mode = policy.trend.mode.as_str(),
        workers = policy.workers,
        horizon_days = policy.forecast.horizon_days,
        "startup config"
    );

    // ---- Cancel on Ctrl-C ----
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            let _ = cancel_tx.send(true);
        }
    });

    // ---- Recorder (optional) ----
    let (events, recorder_task) = match args.record_file.clone() {
        Some(path) => {
            let (tx, rx) = mpsc::channel::<Event>(8192);
            (Some(tx), Some(tokio::spawn(recorder::run(rx, path))))
        }
        None => (None, None),
    };

    // ---- Inputs ----
    let inputs = ingest::load_inputs(&args.sales, &args.inventory, &args.locations)?;

    // ---- Pipeline ----
    let source = trend::from_policy(&policy.trend);
    let result = pipeline::run(&inputs, &policy, source.as_ref(), cancel_rx, events).await;

    // sender dropped inside run(); wait for the recorder's final flush
    if let Some(task) = recorder_task {
        let _ = task.await;
    }
    let output = result?;

    // ---- Outputs ----
    export::write_all(&args.output_dir, &output)?;
    let metrics_path = args.output_dir.join(export::METRICS_FILE);
    metrics::write_textfile(&metrics_path)
        .with_context(|| format!("cannot write {}", metrics_path.display()))?;

    let s = &output.summary;
    info!(
        forecasts = s.forecasts,
        deficits = s.deficits,
        internal = s.internal_matches,
        fallback = s.fallback_matches,
        urgent = s.severity.urgent,
        "done"
    );
    Ok(())
}
