// ===============================
// src/ingest.rs
// ===============================
//
// CSV readers for the three input tables.
// - Header row is mandatory; cells are trimmed, a leading UTF-8 BOM is ignored.
// - Missing or unexpected columns abort the run (schema error).
// - Any unparsable cell aborts the run and names file, row and column.
//
use std::path::Path;

use ahash::AHashMap as HashMap;
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use thiserror::Error;
use tracing::info;

use crate::domain::{GeoPoint, InventoryRecord, SalesRecord, StoreLocation};

pub const SALES_COLUMNS: [&str; 4] = ["Store", "Product", "Date", "Units Sold"];
pub const INVENTORY_COLUMNS: [&str; 3] = ["Store", "Product", "Current Stock"];
pub const LOCATION_COLUMNS: [&str; 3] = ["Store", "Latitude", "Longitude"];
pub const SALES_DATE_FORMAT: &str = "%d-%m-%Y";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{file}: cannot read: {source}")]
    Unreadable {
        file: String,
        #[source]
        source: csv::Error,
    },
    #[error("{file}: missing required column `{column}`")]
    MissingColumn { file: String, column: &'static str },
    #[error("{file}: unexpected column `{column}`")]
    UnexpectedColumn { file: String, column: String },
    #[error("{file}: column `{column}` appears more than once")]
    DuplicateColumn { file: String, column: String },
    #[error("{file}: row {row}: invalid `{column}` value {value:?}: {reason}")]
    InvalidValue {
        file: String,
        row: u64,
        column: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the pipeline consumes, already validated.
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub sales: Vec<SalesRecord>,
    pub inventory: Vec<InventoryRecord>,
    pub locations: Vec<StoreLocation>,
}

/// One validated CSV table: column positions resolved once, rows kept as raw records.
struct Table {
    file: String,
    index: HashMap<&'static str, usize>,
    rows: Vec<(u64, StringRecord)>,
}

impl Table {
    fn read(path: &Path, columns: &[&'static str]) -> Result<Table, IngestError> {
        let file = path.display().to_string();
        let unreadable = |source| IngestError::Unreadable { file: file.clone(), source };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(unreadable)?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(unreadable)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        for (i, h) in headers.iter().enumerate() {
            if headers[..i].contains(h) {
                return Err(IngestError::DuplicateColumn { file: file.clone(), column: h.clone() });
            }
        }

        let mut index = HashMap::new();
        for column in columns {
            match headers.iter().position(|h| h.as_str() == *column) {
                Some(pos) => {
                    index.insert(*column, pos);
                }
                None => return Err(IngestError::MissingColumn { file: file.clone(), column: *column }),
            }
        }
        if let Some(extra) = headers.iter().find(|h| !columns.contains(&h.as_str())) {
            return Err(IngestError::UnexpectedColumn { file: file.clone(), column: extra.clone() });
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(unreadable)?;
            // Blank lines (all cells empty) carry no data
            if record.iter().all(|c| c.is_empty()) {
                continue;
            }
            // row number as a spreadsheet user sees it (header = 1)
            let row = record.position().map(|p| p.line()).unwrap_or(0);
            rows.push((row, record));
        }

        Ok(Table { file, index, rows })
    }

    fn cell<'r>(&self, row: &'r StringRecord, column: &'static str) -> &'r str {
        self.index.get(column).and_then(|&i| row.get(i)).unwrap_or("")
    }

    fn invalid(&self, row: u64, column: &'static str, value: &str, reason: impl Into<String>) -> IngestError {
        IngestError::InvalidValue {
            file: self.file.clone(),
            row,
            column,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn id(&self, line: u64, row: &StringRecord, column: &'static str) -> Result<String, IngestError> {
        let v = self.cell(row, column);
        if v.is_empty() {
            return Err(self.invalid(line, column, v, "empty identifier"));
        }
        Ok(v.to_string())
    }

    fn units(&self, line: u64, row: &StringRecord, column: &'static str) -> Result<u64, IngestError> {
        let v = self.cell(row, column);
        v.parse::<u64>()
            .map_err(|_| self.invalid(line, column, v, "expected a non-negative integer"))
    }

    fn degrees(&self, line: u64, row: &StringRecord, column: &'static str, limit: f64) -> Result<f64, IngestError> {
        let v = self.cell(row, column);
        match v.parse::<f64>() {
            Ok(x) if x.is_finite() && x.abs() <= limit => Ok(x),
            Ok(_) => Err(self.invalid(line, column, v, format!("out of range ±{limit}"))),
            Err(_) => Err(self.invalid(line, column, v, "expected decimal degrees")),
        }
    }
}

pub fn read_sales(path: &Path) -> Result<Vec<SalesRecord>, IngestError> {
    let t = Table::read(path, &SALES_COLUMNS)?;
    t.rows
        .iter()
        .map(|(line, row)| -> Result<SalesRecord, IngestError> {
            let raw_date = t.cell(row, "Date");
            let date = NaiveDate::parse_from_str(raw_date, SALES_DATE_FORMAT)
                .map_err(|e| t.invalid(*line, "Date", raw_date, format!("expected DD-MM-YYYY ({e})")))?;
            Ok(SalesRecord {
                store: t.id(*line, row, "Store")?,
                product: t.id(*line, row, "Product")?,
                date,
                units_sold: t.units(*line, row, "Units Sold")?,
            })
        })
        .collect()
}

pub fn read_inventory(path: &Path) -> Result<Vec<InventoryRecord>, IngestError> {
    let t = Table::read(path, &INVENTORY_COLUMNS)?;
    t.rows
        .iter()
        .map(|(line, row)| -> Result<InventoryRecord, IngestError> {
            Ok(InventoryRecord {
                store: t.id(*line, row, "Store")?,
                product: t.id(*line, row, "Product")?,
                current_stock: t.units(*line, row, "Current Stock")?,
            })
        })
        .collect()
}

pub fn read_locations(path: &Path) -> Result<Vec<StoreLocation>, IngestError> {
    let t = Table::read(path, &LOCATION_COLUMNS)?;
    t.rows
        .iter()
        .map(|(line, row)| -> Result<StoreLocation, IngestError> {
            Ok(StoreLocation {
                store: t.id(*line, row, "Store")?,
                point: GeoPoint {
                    lat: t.degrees(*line, row, "Latitude", 90.0)?,
                    lon: t.degrees(*line, row, "Longitude", 180.0)?,
                },
            })
        })
        .collect()
}

pub fn load_inputs(sales: &Path, inventory: &Path, locations: &Path) -> Result<PipelineInputs, IngestError> {
    let inputs = PipelineInputs {
        sales: read_sales(sales)?,
        inventory: read_inventory(inventory)?,
        locations: read_locations(locations)?,
    };
    info!(
        sales = inputs.sales.len(),
        inventory = inputs.inventory.len(),
        locations = inputs.locations.len(),
        "inputs loaded"
    );
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(lines: &[&str]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
        f
    }

    #[test]
    fn reads_sales_with_day_first_dates() {
        let f = csv_file(&[
            "\u{feff}Store, Product ,Date,Units Sold",
            "S1,Umbrella,05-06-2025,12",
            ",,,",
            "S1,Umbrella,06-06-2025,0",
        ]);
        let sales = read_sales(f.path()).unwrap();
        assert_eq!(sales.len(), 2);
        assert_eq!(sales[0].date, NaiveDate::from_ymd_opt(2025, 6, 5).unwrap());
        assert_eq!(sales[0].product, "Umbrella");
        assert_eq!(sales[1].units_sold, 0);
    }

    #[test]
    fn missing_column_names_file_and_column() {
        let f = csv_file(&["Store,Product,Units Sold", "S1,P,1"]);
        let err = read_sales(f.path()).unwrap_err();
        match &err {
            IngestError::MissingColumn { column, .. } => assert_eq!(*column, "Date"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("`Date`"));
    }

    #[test]
    fn extra_column_is_schema_error() {
        let f = csv_file(&["Store,Product,Current Stock,Aisle", "S1,P,3,7"]);
        assert!(matches!(
            read_inventory(f.path()),
            Err(IngestError::UnexpectedColumn { column, .. }) if column == "Aisle"
        ));
    }

    #[derive(Clone, Default)]
    struct LogBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuf {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(bytes.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn load_inputs_logs_table_sizes_once() {
        let s = csv_file(&["Store,Product,Date,Units Sold", "S1,P,01-01-2025,4"]);
        let i = csv_file(&["Store,Product,Current Stock", "S1,P,3"]);
        let l = csv_file(&["Store,Latitude,Longitude", "S1,19.07,72.87"]);

        let buf = LogBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let inputs = tracing::subscriber::with_default(subscriber, || {
            load_inputs(s.path(), i.path(), l.path()).unwrap()
        });
        assert_eq!(inputs.sales.len(), 1);

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("inputs loaded").count(), 1);
        assert!(text.contains("locations=1"));
    }

    #[test]
    fn repeated_column_is_schema_error() {
        let f = csv_file(&["Store,Product,Current Stock,Current Stock", "S1,P,3,900"]);
        match read_inventory(f.path()).unwrap_err() {
            IngestError::DuplicateColumn { column, .. } => assert_eq!(column, "Current Stock"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negative_units_rejected_with_row() {
        let f = csv_file(&["Store,Product,Date,Units Sold", "S1,P,01-01-2025,4", "S1,P,02-01-2025,-4"]);
        match read_sales(f.path()).unwrap_err() {
            IngestError::InvalidValue { row, column, value, .. } => {
                assert_eq!(row, 3);
                assert_eq!(column, "Units Sold");
                assert_eq!(value, "-4");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn iso_date_rejected() {
        let f = csv_file(&["Store,Product,Date,Units Sold", "S1,P,2025-01-02,4"]);
        assert!(matches!(read_sales(f.path()), Err(IngestError::InvalidValue { column: "Date", .. })));
    }

    #[test]
    fn latitude_out_of_range_rejected() {
        let f = csv_file(&["Store,Latitude,Longitude", "S1,91.5,77.1"]);
        assert!(matches!(read_locations(f.path()), Err(IngestError::InvalidValue { column: "Latitude", .. })));
    }

    #[test]
    fn unreadable_file_is_fatal() {
        let err = read_locations(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, IngestError::Unreadable { .. }));
        assert!(err.to_string().contains("here.csv"));
    }
}
