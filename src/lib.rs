//! Leakage-safe feature pipeline for per-store, per-item daily retail sales.
//!
//! Current implemented scope:
//! - fit/transform pipeline (sales lookups, frequency encodings, external
//!   signals, effective holidays)
//! - reference CSV loading and feature export
//! - train / gap / test split of the most recent history

mod config;
mod frequency;
mod holidays;
mod observability;
mod pipeline;
mod records;
mod sales_lookup;
mod serde_entries;
mod signals;
mod split;
mod tables;

pub use config::{
    pipeline_config_from_env, PipelineConfig, DEFAULT_FEATURE_GAP_DAYS,
    DEFAULT_SALES_HISTORY_DAYS,
};
pub use frequency::{
    CategoricalEncoders, ConditionalFrequency, FrequencyMap, ItemEncoding, StoreEncoding,
    UNKNOWN_CLUSTER,
};
pub use holidays::HolidayCalendar;
pub use observability::{
    init_logging, log_artifact_written, log_run_start, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use pipeline::{
    assert_schema_compatible, build_feature_schema, validate_config, FeatureColumn, FeatureDType,
    FeaturePipeline, FeatureRow, FeatureSchema, FitSummary, FittedPipeline, PipelineError,
    FEATURE_COUNT, FEATURE_SCHEMA_VERSION,
};
pub use records::{
    add_target, inverse_log_target, normalize_promotion, HolidayEvent, HolidayKind, ItemId,
    ItemRecord, Locale, Observation, OilRecord, PromoFlag, StoreId, StoreRecord, TargetColumn,
    TransactionRecord,
};
pub use sales_lookup::{LagValue, RollingValue, SalesLookup, LAG_DAYS, ROLL_WINDOW};
pub use signals::{shifted_rolling_mean, OilSignal, TransactionSignal, SIGNAL_WINDOW};
pub use split::{split_train_gap_test, SplitConfig, SplitError, SplitInfo, TemporalSplit};
pub use tables::{
    data_signature, load_holidays, load_items, load_observations, load_oil, load_stores,
    load_transactions, write_feature_csv, FileSignature, ReferenceTables, TableError,
    HOLIDAYS_FILE, ITEMS_FILE, OIL_FILE, STORES_FILE, TARGET_COLUMNS, TRANSACTIONS_FILE,
};
