// End-to-end: CSV files in, output tables out.
use std::fs;
use std::path::Path;

use demand_sourcing::config::Policy;
use demand_sourcing::export::{self, FORECAST_FILE, RECOMMENDATION_FILE, RECOMMENDATION_HEADERS, SUMMARY_FILE};
use demand_sourcing::ingest::{self, IngestError};
use demand_sourcing::pipeline;
use demand_sourcing::trend::{FileTrendSource, NeutralTrendSource};
use tokio::sync::watch;

fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let p = dir.join(name);
    fs::write(&p, body).unwrap();
    p
}

/// Store A sells 10 Umbrellas a day for ten days; B holds 71, C (far away) 500.
fn seed(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf, std::path::PathBuf) {
    let mut sales = String::from("Store,Product,Date,Units Sold\n");
    for day in 1..=10 {
        sales.push_str(&format!("A,Umbrella,{day:02}-06-2025,10\n"));
    }
    sales.push_str("B,Umbrella,01-06-2025,4\n");

    let sales = write(dir, "sales.csv", &sales);
    let inventory = write(
        dir,
        "inventory.csv",
        "Store,Product,Current Stock\nA,Umbrella,0\nB,Umbrella,71\nC,Umbrella,500\n",
    );
    let locations = write(
        dir,
        "locations.csv",
        "Store,Latitude,Longitude\nA,19.0760,72.8777\nB,19.2183,72.9781\nC,28.7041,77.1025\n",
    );
    (sales, inventory, locations)
}

#[tokio::test]
async fn csv_to_recommendations_with_flat_trend() {
    let dir = tempfile::tempdir().unwrap();
    let (s, i, l) = seed(dir.path());
    let inputs = ingest::load_inputs(&s, &i, &l).unwrap();

    let trend_file = write(dir.path(), "trend.json", r#"{"Umbrella": 0}"#);
    let source = FileTrendSource::new(trend_file);
    let (_tx, cancel) = watch::channel(false);
    let out = pipeline::run(&inputs, &Policy::default(), &source, cancel, None).await.unwrap();

    let out_dir = dir.path().join("outputs");
    export::write_all(&out_dir, &out).unwrap();

    let forecast = fs::read_to_string(out_dir.join(FORECAST_FILE)).unwrap();
    assert_eq!(forecast, "Store,Product,Forecasted Demand\nA,Umbrella,70\n");

    let mut reader = csv::Reader::from_path(out_dir.join(RECOMMENDATION_FILE)).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(headers, RECOMMENDATION_HEADERS);
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "Umbrella");
    assert_eq!(&rows[0][1], "A");
    assert_eq!(&rows[0][2], "B");
    assert_eq!(&rows[0][4], "70");
    assert_eq!(&rows[0][6], "70");
    assert_eq!(&rows[0][9], "Internal Store");
    assert_eq!(&rows[0][10], "50.00");

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary["series"], 2);
    assert_eq!(summary["skipped_insufficient_history"], 1);
    assert_eq!(summary["trend_source"], "file");
    assert_eq!(summary["internal_matches"], 1);
}

#[tokio::test]
async fn neutral_trend_sends_boosted_deficit_to_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let (s, i, _) = seed(dir.path());
    // C drops out: without coordinates it cannot be a candidate
    let l = write(
        dir.path(),
        "locations.csv",
        "Store,Latitude,Longitude\nA,19.0760,72.8777\nB,19.2183,72.9781\n",
    );
    let inputs = ingest::load_inputs(&s, &i, &l).unwrap();
    let (_tx, cancel) = watch::channel(false);
    let out = pipeline::run(&inputs, &Policy::default(), &NeutralTrendSource, cancel, None).await.unwrap();

    let r = &out.recommendations[0];
    assert_eq!(r.deficit, 105);
    assert_eq!(r.source.to_string(), "Fallback Vendor");
    assert_eq!(r.source_stock.to_string(), "inf");
    assert_eq!(r.adjusted_unit_cost, 55.0);
    assert_eq!(out.summary.severity.urgent, 1);
}

#[test]
fn bad_input_names_file_row_and_column() {
    let dir = tempfile::tempdir().unwrap();
    let sales = write(dir.path(), "sales.csv", "Store,Product,Date,Units Sold\nA,X,2025-06-01,3\n");
    match ingest::read_sales(&sales).unwrap_err() {
        IngestError::InvalidValue { row, column, .. } => {
            assert_eq!(row, 2);
            assert_eq!(column, "Date");
        }
        other => panic!("unexpected {other:?}"),
    }
}
