//! CSV loading for observations and reference tables, feature export and
//! data-file signatures.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::pipeline::{FeatureRow, FeatureSchema};
use crate::records::{
    HolidayEvent, HolidayKind, ItemRecord, Locale, Observation, OilRecord, PromoFlag,
    StoreRecord, TransactionRecord,
};

pub const ITEMS_FILE: &str = "items.csv";
pub const STORES_FILE: &str = "stores.csv";
pub const TRANSACTIONS_FILE: &str = "transactions.csv";
pub const OIL_FILE: &str = "oil.csv";
pub const HOLIDAYS_FILE: &str = "holidays_events.csv";

const UNKNOWN_LABEL: &str = "UNKNOWN";
const HASH_CHUNK_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("required file not found: {path}")]
    MissingFile { path: PathBuf },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{table} is missing column {column}")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
    #[error("{table}: failed to parse {field} value '{value}' on line {line}")]
    ParseField {
        table: &'static str,
        field: &'static str,
        value: String,
        line: u64,
    },
}

/// The five reference tables the pipeline learns from besides the history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTables {
    pub items: Vec<ItemRecord>,
    pub stores: Vec<StoreRecord>,
    pub transactions: Vec<TransactionRecord>,
    pub oil: Vec<OilRecord>,
    pub holidays: Vec<HolidayEvent>,
}

impl ReferenceTables {
    /// Every file must be present and parseable.
    pub fn load(data_dir: &Path) -> Result<Self, TableError> {
        let tables = Self {
            items: load_items(&data_dir.join(ITEMS_FILE))?,
            stores: load_stores(&data_dir.join(STORES_FILE))?,
            transactions: load_transactions(&data_dir.join(TRANSACTIONS_FILE))?,
            oil: load_oil(&data_dir.join(OIL_FILE))?,
            holidays: load_holidays(&data_dir.join(HOLIDAYS_FILE))?,
        };

        info!(
            component = "tables",
            event = "tables.reference.loaded",
            data_dir = %data_dir.display(),
            items = tables.items.len(),
            stores = tables.stores.len(),
            transactions = tables.transactions.len(),
            oil = tables.oil.len(),
            holidays = tables.holidays.len()
        );

        Ok(tables)
    }
}

struct Columns {
    table: &'static str,
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(table: &'static str, headers: &StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_string(), idx))
            .collect();
        Self { table, index }
    }

    fn require(&self, column: &'static str) -> Result<usize, TableError> {
        self.index
            .get(column)
            .copied()
            .ok_or(TableError::MissingColumn {
                table: self.table,
                column,
            })
    }

    fn optional(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }
}

struct Cell<'r> {
    table: &'static str,
    record: &'r StringRecord,
}

impl<'r> Cell<'r> {
    fn raw(&self, idx: usize) -> &'r str {
        self.record.get(idx).unwrap_or_default().trim()
    }

    fn opt_raw(&self, idx: Option<usize>) -> Option<&'r str> {
        idx.map(|i| self.raw(i)).filter(|raw| !raw.is_empty())
    }

    fn error(&self, field: &'static str, value: &str) -> TableError {
        TableError::ParseField {
            table: self.table,
            field,
            value: value.to_string(),
            line: self.record.position().map(|p| p.line()).unwrap_or(0),
        }
    }

    fn date(&self, idx: usize, field: &'static str) -> Result<NaiveDate, TableError> {
        let raw = self.raw(idx);
        parse_date(raw).ok_or_else(|| self.error(field, raw))
    }

    fn int<T: TryFrom<i64>>(&self, idx: usize, field: &'static str) -> Result<T, TableError> {
        let raw = self.raw(idx);
        parse_int(raw)
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| self.error(field, raw))
    }

    /// Blank or unparseable numbers become `None`.
    fn lenient_f64(&self, idx: Option<usize>) -> Option<f64> {
        self.opt_raw(idx)
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|v| !v.is_nan())
    }

    fn label(&self, idx: usize, missing: &str) -> String {
        let raw = self.raw(idx);
        if raw.is_empty() {
            missing.to_string()
        } else {
            raw.to_string()
        }
    }
}

fn open_reader(path: &Path) -> Result<csv::Reader<fs::File>, TableError> {
    if !path.exists() {
        return Err(TableError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    debug!(component = "tables", event = "tables.open", path = %path.display());
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?)
}

fn read_rows<T>(
    path: &Path,
    table: &'static str,
    mut parse: impl FnMut(&Columns, &Cell<'_>) -> Result<T, TableError>,
) -> Result<Vec<T>, TableError> {
    let mut reader = open_reader(path)?;
    let columns = Columns::new(table, reader.headers()?);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = Cell {
            table,
            record: &record,
        };
        rows.push(parse(&columns, &cell)?);
    }
    Ok(rows)
}

/// Observations with `date, store_nbr, item_nbr` and optional
/// `unit_sales`, `unit_sales_clean`, `unit_sales_log`, `onpromotion`.
pub fn load_observations(path: &Path) -> Result<Vec<Observation>, TableError> {
    let mut reader = open_reader(path)?;
    let columns = Columns::new("observations", reader.headers()?);
    let date = columns.require("date")?;
    let store = columns.require("store_nbr")?;
    let item = columns.require("item_nbr")?;
    let unit_sales = columns.optional("unit_sales");
    let clean = columns.optional("unit_sales_clean");
    let log = columns.optional("unit_sales_log");
    let promo = columns.optional("onpromotion");

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cell = Cell {
            table: "observations",
            record: &record,
        };
        rows.push(Observation {
            date: cell.date(date, "date")?,
            store_nbr: cell.int(store, "store_nbr")?,
            item_nbr: cell.int(item, "item_nbr")?,
            unit_sales: cell.lenient_f64(unit_sales),
            unit_sales_clean: cell.lenient_f64(clean),
            unit_sales_log: cell.lenient_f64(log),
            onpromotion: cell
                .opt_raw(promo)
                .map(|raw| PromoFlag::Text(raw.to_string()))
                .unwrap_or_default(),
        });
    }

    info!(
        component = "tables",
        event = "tables.observations.loaded",
        path = %path.display(),
        rows = rows.len()
    );

    Ok(rows)
}

pub fn load_items(path: &Path) -> Result<Vec<ItemRecord>, TableError> {
    read_rows(path, "items", |columns, cell| {
        let class = columns.require("class")?;
        let perishable = columns.require("perishable")?;
        Ok(ItemRecord {
            item_nbr: cell.int(columns.require("item_nbr")?, "item_nbr")?,
            family: cell.label(columns.require("family")?, UNKNOWN_LABEL),
            class: match cell.opt_raw(Some(class)) {
                Some(_) => cell.int(class, "class")?,
                None => -1,
            },
            perishable: match cell.opt_raw(Some(perishable)) {
                Some(_) => cell.int(perishable, "perishable")?,
                None => 0,
            },
        })
    })
}

pub fn load_stores(path: &Path) -> Result<Vec<StoreRecord>, TableError> {
    read_rows(path, "stores", |columns, cell| {
        let cluster = columns.require("cluster")?;
        Ok(StoreRecord {
            store_nbr: cell.int(columns.require("store_nbr")?, "store_nbr")?,
            city: cell.label(columns.require("city")?, UNKNOWN_LABEL),
            state: cell.label(columns.require("state")?, UNKNOWN_LABEL),
            store_type: cell.label(columns.require("type")?, UNKNOWN_LABEL),
            cluster: match cell.opt_raw(Some(cluster)) {
                Some(_) => cell.int(cluster, "cluster")?,
                None => -1,
            },
        })
    })
}

pub fn load_transactions(path: &Path) -> Result<Vec<TransactionRecord>, TableError> {
    read_rows(path, "transactions", |columns, cell| {
        Ok(TransactionRecord {
            date: cell.date(columns.require("date")?, "date")?,
            store_nbr: cell.int(columns.require("store_nbr")?, "store_nbr")?,
            transactions: cell
                .lenient_f64(Some(columns.require("transactions")?))
                .unwrap_or(0.0),
        })
    })
}

pub fn load_oil(path: &Path) -> Result<Vec<OilRecord>, TableError> {
    read_rows(path, "oil", |columns, cell| {
        Ok(OilRecord {
            date: cell.date(columns.require("date")?, "date")?,
            dcoilwtico: cell.lenient_f64(Some(columns.require("dcoilwtico")?)),
        })
    })
}

pub fn load_holidays(path: &Path) -> Result<Vec<HolidayEvent>, TableError> {
    read_rows(path, "holidays_events", |columns, cell| {
        Ok(HolidayEvent {
            date: cell.date(columns.require("date")?, "date")?,
            kind: HolidayKind::parse(cell.raw(columns.require("type")?)),
            locale: Locale::parse(cell.raw(columns.require("locale")?)),
            locale_name: cell.label(columns.require("locale_name")?, ""),
            description: cell.label(columns.require("description")?, ""),
            transferred: parse_bool(cell.raw(columns.require("transferred")?)).unwrap_or(false),
        })
    })
}

/// Label columns written between the date and the features.
pub const TARGET_COLUMNS: [&str; 3] = ["unit_sales", "unit_sales_clean", "unit_sales_log"];

/// Writes one CSV line per row: date, targets (blank when missing), then the
/// schema columns with missing features set to `missing_fill`.
pub fn write_feature_csv(
    path: &Path,
    schema: &FeatureSchema,
    rows: &[FeatureRow],
    missing_fill: f64,
) -> Result<(), TableError> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["date".to_string()];
    header.extend(TARGET_COLUMNS.iter().map(|name| (*name).to_string()));
    header.extend(schema.columns.iter().map(|column| column.name.clone()));
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.date.format("%Y-%m-%d").to_string()];
        record.extend(
            [row.unit_sales, row.unit_sales_clean, row.unit_sales_log]
                .iter()
                .map(|value| value.map(|v| v.to_string()).unwrap_or_default()),
        );
        record.extend(row.to_dense(missing_fill).iter().map(f64::to_string));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!(
        component = "tables",
        event = "tables.features.written",
        path = %path.display(),
        rows = rows.len(),
        columns = schema.columns.len()
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    pub name: String,
    pub missing: bool,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

/// Size and content hash of each data file, used to detect changed inputs.
///
/// `extra_files` are hashed at the given paths and listed first under their
/// full path; the reference tables are resolved inside `data_dir`.
pub fn data_signature(
    data_dir: &Path,
    extra_files: &[&Path],
) -> Result<Vec<FileSignature>, TableError> {
    let mut out = Vec::with_capacity(extra_files.len() + 5);
    for path in extra_files {
        out.push(file_signature(path.display().to_string(), path)?);
    }
    for name in [ITEMS_FILE, STORES_FILE, OIL_FILE, TRANSACTIONS_FILE, HOLIDAYS_FILE] {
        out.push(file_signature(name.to_string(), &data_dir.join(name))?);
    }
    Ok(out)
}

fn file_signature(name: String, path: &Path) -> Result<FileSignature, TableError> {
    if !path.exists() {
        return Ok(FileSignature {
            name,
            missing: true,
            size: None,
            sha256: None,
        });
    }
    Ok(FileSignature {
        name,
        missing: false,
        size: Some(fs::metadata(path)?.len()),
        sha256: Some(sha256_file(path)?),
    })
}

fn sha256_file(path: &Path) -> Result<String, TableError> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; HASH_CHUNK_BYTES];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

// Accepts "42" as well as "42.0", which float-typed exports produce.
fn parse_int(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" => Some(true),
        "0" | "false" | "f" | "no" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn items_fill_missing_family_and_class() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            ITEMS_FILE,
            "item_nbr,family,class,perishable\n96995, GROCERY I ,1093,0\n99197,,,\n",
        );
        let items = load_items(&path).unwrap();
        assert_eq!(items[0].family, "GROCERY I");
        assert_eq!(items[0].class, 1093);
        assert_eq!(items[1].family, "UNKNOWN");
        assert_eq!(items[1].class, -1);
        assert_eq!(items[1].perishable, 0);
    }

    #[test]
    fn holidays_parse_kinds_and_transferred() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            HOLIDAYS_FILE,
            "date,type,locale,locale_name,description,transferred\n\
             2012-10-09,Holiday,National,Ecuador,Independencia de Guayaquil,True\n\
             2012-10-12,Transfer,National,Ecuador,Independencia de Guayaquil,False\n\
             2012-12-24,Bridge,National,Ecuador,Puente Navidad,False\n",
        );
        let events = load_holidays(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, HolidayKind::Holiday);
        assert!(events[0].transferred);
        assert_eq!(events[1].kind, HolidayKind::Transfer);
        assert_eq!(events[2].kind, HolidayKind::Other("Bridge".to_string()));
        assert_eq!(events[2].locale, Locale::National);
    }

    #[test]
    fn oil_and_transactions_are_lenient_on_values() {
        let dir = TempDir::new().unwrap();
        let oil = write(dir.path(), OIL_FILE, "date,dcoilwtico\n2013-01-01,\n2013-01-02,93.14\n");
        let oil = load_oil(&oil).unwrap();
        assert_eq!(oil[0].dcoilwtico, None);
        assert_eq!(oil[1].dcoilwtico, Some(93.14));

        let tx = write(
            dir.path(),
            TRANSACTIONS_FILE,
            "date,store_nbr,transactions\n2013-01-01,25,770\n2013-01-02,1,oops\n",
        );
        let tx = load_transactions(&tx).unwrap();
        assert_eq!(tx[0].transactions, 770.0);
        assert_eq!(tx[1].transactions, 0.0);
    }

    #[test]
    fn observation_keys_must_parse() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "train.csv",
            "date,store_nbr,item_nbr,unit_sales,onpromotion\n\
             2017-01-01,1,103665,7.0,\n\
             2017-01-02,x,1,1,True\n",
        );
        let err = load_observations(&path).expect_err("bad store id must fail");
        match err {
            TableError::ParseField { field, value, .. } => {
                assert_eq!(field, "store_nbr");
                assert_eq!(value, "x");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn observations_read_optional_columns() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "train.csv",
            "date,store_nbr,item_nbr,unit_sales,onpromotion\n\
             2017-01-01 00:00:00,1,103665,7.0,\n\
             2017-01-02,1,103665,-2,True\n",
        );
        let rows = load_observations(&path).unwrap();
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2017, 1, 1).unwrap());
        assert_eq!(rows[0].onpromotion, PromoFlag::Missing);
        assert_eq!(rows[1].unit_sales, Some(-2.0));
        assert_eq!(rows[1].onpromotion, PromoFlag::Text("True".to_string()));
        assert_eq!(rows[1].unit_sales_log, None);
    }

    #[test]
    fn missing_reference_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = ReferenceTables::load(dir.path()).expect_err("empty dir must fail");
        assert!(matches!(err, TableError::MissingFile { .. }));
    }

    #[test]
    fn missing_required_column_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            STORES_FILE,
            "store_nbr,city,state,type\n1,Quito,Pichincha,D\n",
        );
        let err = load_stores(&path).expect_err("cluster column is required");
        assert!(matches!(
            err,
            TableError::MissingColumn {
                table: "stores",
                column: "cluster"
            }
        ));
    }

    #[test]
    fn signature_marks_missing_files_and_hashes_present_ones() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ITEMS_FILE, "item_nbr,family,class,perishable\n");
        let sig = data_signature(dir.path(), &[]).unwrap();

        let items = sig.iter().find(|s| s.name == ITEMS_FILE).unwrap();
        assert!(!items.missing);
        assert_eq!(items.sha256.as_ref().map(String::len), Some(64));
        assert!(sig.iter().filter(|s| s.name != ITEMS_FILE).all(|s| s.missing));
    }

    #[test]
    fn signature_hashes_extra_files_at_their_own_path() {
        let data = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let history = write(elsewhere.path(), "history_2017.csv", "date\n2017-01-01\n");

        let sig = data_signature(data.path(), &[history.as_path()]).unwrap();
        assert_eq!(sig.len(), 6);
        assert_eq!(sig[0].name, history.display().to_string());
        assert!(!sig[0].missing);
        assert_eq!(sig[0].size, Some(16));
        assert_eq!(sig[0].sha256, Some(sha256_file(&history).unwrap()));

        let absent = data.path().join("train.csv");
        let sig = data_signature(data.path(), &[absent.as_path()]).unwrap();
        assert!(sig[0].missing);
    }
}
