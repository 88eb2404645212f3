//! Pipeline configuration and environment overrides.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SALES_HISTORY_DAYS: u32 = 120;
pub const DEFAULT_FEATURE_GAP_DAYS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding the reference CSV files.
    pub data_dir: PathBuf,
    /// Days of sales history kept in the lookup table.
    pub sales_history_days: u32,
    /// Reporting latency applied to sales and transactions features.
    pub feature_gap_days: u32,
    /// Promotes progress events from DEBUG to INFO.
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/favorita"),
            sales_history_days: DEFAULT_SALES_HISTORY_DAYS,
            feature_gap_days: DEFAULT_FEATURE_GAP_DAYS,
            verbose: false,
        }
    }
}

pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Ok(dir) = env::var("FAV_DATA_DIR") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            config.data_dir = PathBuf::from(trimmed);
        }
    }

    if let Some(days) = env_u32("FAV_SALES_HISTORY_DAYS") {
        config.sales_history_days = days;
    }

    if let Some(gap) = env_u32("FAV_FEATURE_GAP_DAYS") {
        config.feature_gap_days = gap;
    }

    if let Ok(raw) = env::var("FAV_VERBOSE") {
        if let Some(verbose) = crate::observability::parse_bool(&raw) {
            config.verbose = verbose;
        }
    }

    config
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok()?.trim().parse().ok()
}
