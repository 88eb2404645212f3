//! Fit/transform feature pipeline.
//!
//! `FeaturePipeline::fit` learns every lookup structure from the history
//! slice it is given and returns a `FittedPipeline`. `FittedPipeline` is
//! immutable: `transform` only reads what fit produced, so training rows and
//! inference rows get identical features and nothing passed to `transform`
//! can leak into what was learned.
//!
//! A fitted pipeline is saved as JSON with `FittedPipeline::save` and
//! reloaded for inference with `FittedPipeline::load`, which refuses files
//! whose schema does not match this build or the caller's expectation.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::frequency::CategoricalEncoders;
use crate::holidays::HolidayCalendar;
use crate::records::{normalize_promotion, ItemId, Observation, StoreId, TargetColumn};
use crate::sales_lookup::SalesLookup;
use crate::signals::{OilSignal, TransactionSignal};
use crate::tables::{ReferenceTables, TableError};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    Int,
    Float,
    Flag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

pub const FEATURE_COUNT: usize = 27;

// Sorted by name; `FeatureRow::feature_values` follows the same order.
const FEATURE_COLUMNS: [(&str, FeatureDType, bool); FEATURE_COUNT] = [
    ("city_freq", FeatureDType::Float, false),
    ("city_freq_in_state", FeatureDType::Float, false),
    ("class_freq_in_family", FeatureDType::Float, false),
    ("class_freq_items", FeatureDType::Float, false),
    ("cluster", FeatureDType::Int, false),
    ("day", FeatureDType::Int, false),
    ("dow", FeatureDType::Int, false),
    ("family_freq_items", FeatureDType::Float, false),
    ("is_holiday_effective", FeatureDType::Flag, false),
    ("is_weekend", FeatureDType::Flag, false),
    ("item_freq", FeatureDType::Float, false),
    ("item_nbr", FeatureDType::Int, false),
    ("month", FeatureDType::Int, false),
    ("oil_roll14", FeatureDType::Float, false),
    ("onpromo", FeatureDType::Flag, false),
    ("perishable", FeatureDType::Flag, false),
    ("sales_lag28", FeatureDType::Float, true),
    ("sales_lag28_avail", FeatureDType::Flag, false),
    ("sales_roll14", FeatureDType::Float, true),
    ("sales_roll14_cnt", FeatureDType::Int, false),
    ("sales_roll14_frac", FeatureDType::Float, false),
    ("state_freq", FeatureDType::Float, false),
    ("store_freq", FeatureDType::Float, false),
    ("store_nbr", FeatureDType::Int, false),
    ("transactions_roll14", FeatureDType::Float, false),
    ("type_freq", FeatureDType::Float, false),
    ("year", FeatureDType::Int, false),
];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
    #[error("history has no target column: expected unit_sales_log or unit_sales_clean")]
    MissingTargetColumn,
    #[error("history is empty")]
    EmptyHistory,
    #[error("reference data error: {0}")]
    Table(#[from] TableError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("fitted pipeline encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

/// One transformed row: the input identifiers and targets plus every feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub store_nbr: StoreId,
    pub item_nbr: ItemId,
    pub unit_sales: Option<f64>,
    pub unit_sales_clean: Option<f64>,
    pub unit_sales_log: Option<f64>,

    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub dow: u32,
    pub is_weekend: u8,
    pub onpromo: u8,

    pub store_freq: f64,
    pub item_freq: f64,
    pub perishable: i8,
    pub family_freq_items: f64,
    pub class_freq_items: f64,
    pub class_freq_in_family: f64,

    pub cluster: i16,
    pub type_freq: f64,
    pub state_freq: f64,
    pub city_freq: f64,
    pub city_freq_in_state: f64,

    pub transactions_roll14: f64,
    pub oil_roll14: f64,
    pub is_holiday_effective: u8,

    /// Missing when no sale was recorded on the lookback day.
    pub sales_lag28: Option<f64>,
    pub sales_lag28_avail: u8,
    /// Missing when no day of the window resolved.
    pub sales_roll14: Option<f64>,
    pub sales_roll14_cnt: u8,
    pub sales_roll14_frac: f64,
}

impl FeatureRow {
    /// Features in schema order; only the nullable sales columns can be `None`.
    pub fn feature_values(&self) -> [Option<f64>; FEATURE_COUNT] {
        [
            Some(self.city_freq),
            Some(self.city_freq_in_state),
            Some(self.class_freq_in_family),
            Some(self.class_freq_items),
            Some(f64::from(self.cluster)),
            Some(f64::from(self.day)),
            Some(f64::from(self.dow)),
            Some(self.family_freq_items),
            Some(f64::from(self.is_holiday_effective)),
            Some(f64::from(self.is_weekend)),
            Some(self.item_freq),
            Some(f64::from(self.item_nbr)),
            Some(f64::from(self.month)),
            Some(self.oil_roll14),
            Some(f64::from(self.onpromo)),
            Some(f64::from(self.perishable)),
            self.sales_lag28,
            Some(f64::from(self.sales_lag28_avail)),
            self.sales_roll14,
            Some(f64::from(self.sales_roll14_cnt)),
            Some(self.sales_roll14_frac),
            Some(self.state_freq),
            Some(self.store_freq),
            Some(f64::from(self.store_nbr)),
            Some(self.transactions_roll14),
            Some(self.type_freq),
            Some(f64::from(self.year)),
        ]
    }

    /// Dense model input; missing sales features take `missing_fill`.
    pub fn to_dense(&self, missing_fill: f64) -> Vec<f64> {
        self.feature_values()
            .iter()
            .map(|value| value.unwrap_or(missing_fill))
            .collect()
    }
}

pub fn build_feature_schema(cfg: &PipelineConfig) -> FeatureSchema {
    let columns: Vec<FeatureColumn> = FEATURE_COLUMNS
        .iter()
        .map(|(name, dtype, nullable)| FeatureColumn {
            name: (*name).to_string(),
            dtype: *dtype,
            nullable: *nullable,
        })
        .collect();
    let fingerprint = schema_fingerprint(cfg, &columns);

    debug!(
        component = "pipeline",
        event = "pipeline.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), PipelineError> {
    if expected_version != actual.version {
        return Err(PipelineError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(PipelineError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

/// `sales_history_days == 0` is valid and keeps only the latest fit day.
pub fn validate_config(cfg: &PipelineConfig) -> Result<(), PipelineError> {
    if cfg.data_dir.as_os_str().is_empty() {
        return Err(PipelineError::InvalidConfig(
            "data_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Unfit pipeline: configuration only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturePipeline {
    config: PipelineConfig,
}

impl FeaturePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Loads the reference tables from `config.data_dir` and fits on `history`.
    pub fn fit(&self, history: &[Observation]) -> Result<FittedPipeline, PipelineError> {
        validate_config(&self.config)?;
        let target = self.check_history(history)?;
        let reference = ReferenceTables::load(&self.config.data_dir)?;
        Ok(self.fit_checked(history, target, &reference))
    }

    pub fn fit_with_reference(
        &self,
        history: &[Observation],
        reference: &ReferenceTables,
    ) -> Result<FittedPipeline, PipelineError> {
        let target = self.check_history(history)?;
        Ok(self.fit_checked(history, target, reference))
    }

    fn check_history(&self, history: &[Observation]) -> Result<TargetColumn, PipelineError> {
        if history.is_empty() {
            return Err(PipelineError::EmptyHistory);
        }
        TargetColumn::detect(history).ok_or(PipelineError::MissingTargetColumn)
    }

    fn fit_checked(
        &self,
        history: &[Observation],
        target: TargetColumn,
        reference: &ReferenceTables,
    ) -> FittedPipeline {
        let cfg = &self.config;
        progress!(
            cfg.verbose,
            component = "pipeline",
            event = "pipeline.fit.start",
            history_rows = history.len(),
            target_column = target.as_str(),
            sales_history_days = cfg.sales_history_days,
            feature_gap_days = cfg.feature_gap_days
        );

        let sales = SalesLookup::build(history, target, cfg.sales_history_days);
        let encoders = CategoricalEncoders::fit(history, &reference.items, &reference.stores);
        let transactions = TransactionSignal::fit(&reference.transactions, cfg.feature_gap_days);
        let oil = OilSignal::fit(&reference.oil);
        let holidays = HolidayCalendar::resolve(&reference.holidays, &reference.stores);

        let summary = FitSummary {
            target,
            history_rows: history.len(),
            sales_lookup_rows: sales.len(),
            sales_history_min_date: sales.min_kept_date(),
            sales_history_max_date: sales.max_date(),
            store_count: encoders.store_freq_map().len(),
            item_count: encoders.item_freq_map().len(),
            transaction_points: transactions.len(),
            oil_fallback: oil.fallback(),
            national_holiday_days: holidays.national_days(),
            store_holiday_days: holidays.override_days(),
        };

        progress!(
            cfg.verbose,
            component = "pipeline",
            event = "pipeline.fit.finish",
            sales_lookup_rows = summary.sales_lookup_rows,
            stores = summary.store_count,
            items = summary.item_count,
            transaction_points = summary.transaction_points,
            oil_fallback = summary.oil_fallback,
            national_holiday_days = summary.national_holiday_days,
            store_holiday_days = summary.store_holiday_days
        );

        FittedPipeline {
            config: cfg.clone(),
            schema: build_feature_schema(cfg),
            summary,
            sales,
            encoders,
            transactions,
            oil,
            holidays,
        }
    }
}

/// What a fit learned, for logs and run metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub target: TargetColumn,
    pub history_rows: usize,
    pub sales_lookup_rows: usize,
    pub sales_history_min_date: Option<NaiveDate>,
    pub sales_history_max_date: Option<NaiveDate>,
    pub store_count: usize,
    pub item_count: usize,
    pub transaction_points: usize,
    pub oil_fallback: f64,
    pub national_holiday_days: usize,
    pub store_holiday_days: usize,
}

/// Fitted pipeline. Read-only, so it can be shared across threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPipeline {
    config: PipelineConfig,
    schema: FeatureSchema,
    summary: FitSummary,
    sales: SalesLookup,
    encoders: CategoricalEncoders,
    transactions: TransactionSignal,
    oil: OilSignal,
    holidays: HolidayCalendar,
}

impl FittedPipeline {
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn summary(&self) -> &FitSummary {
        &self.summary
    }

    pub fn target_column(&self) -> TargetColumn {
        self.summary.target
    }

    /// Writes the fitted state as JSON, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec(self)?;
        write_atomic(path, &bytes)?;

        info!(
            component = "pipeline",
            event = "pipeline.saved",
            path = %path.display(),
            bytes = bytes.len(),
            fingerprint = self.schema.fingerprint
        );
        Ok(())
    }

    /// Reads a pipeline written by `save`. The stored schema must match both
    /// the schema this build produces for the stored config and the caller's
    /// expected version and fingerprint.
    pub fn load(
        path: &Path,
        expected_version: u32,
        expected_fingerprint: &str,
    ) -> Result<Self, PipelineError> {
        let bytes = fs::read(path)?;
        let pipeline: Self = serde_json::from_slice(&bytes)?;

        let current = build_feature_schema(&pipeline.config);
        assert_schema_compatible(current.version, &current.fingerprint, &pipeline.schema)?;
        assert_schema_compatible(expected_version, expected_fingerprint, &pipeline.schema)?;

        info!(
            component = "pipeline",
            event = "pipeline.loaded",
            path = %path.display(),
            target_column = pipeline.summary.target.as_str(),
            fingerprint = pipeline.schema.fingerprint
        );
        Ok(pipeline)
    }

    pub fn transform(&self, rows: &[Observation]) -> Vec<FeatureRow> {
        let out: Vec<FeatureRow> = rows.iter().map(|row| self.transform_row(row)).collect();

        progress!(
            self.config.verbose,
            component = "pipeline",
            event = "pipeline.transform.finish",
            rows = out.len(),
            lag_available = out.iter().filter(|r| r.sales_lag28_avail == 1).count(),
            roll_available = out.iter().filter(|r| r.sales_roll14.is_some()).count()
        );

        out
    }

    pub fn transform_row(&self, row: &Observation) -> FeatureRow {
        let gap = self.config.feature_gap_days;
        let date = row.date;
        let dow = date.weekday().num_days_from_monday();

        let item = self.encoders.item(row.item_nbr);
        let store = self.encoders.store(row.store_nbr);
        let lag = self.sales.lag28(row.store_nbr, row.item_nbr, date, gap);
        let roll = self.sales.roll14(row.store_nbr, row.item_nbr, date, gap);

        FeatureRow {
            date,
            store_nbr: row.store_nbr,
            item_nbr: row.item_nbr,
            unit_sales: row.unit_sales,
            unit_sales_clean: row.unit_sales_clean,
            unit_sales_log: row.unit_sales_log,

            year: date.year(),
            month: date.month(),
            day: date.day(),
            dow,
            is_weekend: u8::from(dow >= 5),
            onpromo: u8::from(normalize_promotion(&row.onpromotion)),

            store_freq: self.encoders.store_freq(row.store_nbr),
            item_freq: self.encoders.item_freq(row.item_nbr),
            perishable: item.perishable,
            family_freq_items: item.family_freq_items,
            class_freq_items: item.class_freq_items,
            class_freq_in_family: item.class_freq_in_family,

            cluster: store.cluster,
            type_freq: store.type_freq,
            state_freq: store.state_freq,
            city_freq: store.city_freq,
            city_freq_in_state: store.city_freq_in_state,

            transactions_roll14: self.transactions.value(row.store_nbr, date),
            oil_roll14: self.oil.value(date),
            is_holiday_effective: self.holidays.is_holiday_effective(row.store_nbr, date),

            sales_lag28: lag.value,
            sales_lag28_avail: u8::from(lag.available),
            sales_roll14: roll.mean,
            sales_roll14_cnt: roll.count,
            sales_roll14_frac: roll.fraction,
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            PipelineError::InvalidConfig(format!("invalid output path: {}", path.display()))
        })?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

fn schema_fingerprint(cfg: &PipelineConfig, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{FEATURE_SCHEMA_VERSION};"));
    hasher.update(format!("feature_gap_days:{};", cfg.feature_gap_days));
    hasher.update(format!("sales_history_days:{};", cfg.sales_history_days));
    hasher.update(";columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{:?}:{};", column.dtype, column.nullable));
    }
    hex::encode(hasher.finalize())
}
