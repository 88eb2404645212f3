//! Train / gap / test split over the most recent days of history.
//!
//! The gap days between train and test are dropped so that evaluation sees
//! the same reporting latency the features assume in production.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::records::Observation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub total_days: u32,
    pub test_days: u32,
    pub gap_days: u32,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            total_days: 84,
            test_days: 14,
            gap_days: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitInfo {
    pub total_days: u32,
    pub test_days: u32,
    pub gap_days: u32,
    pub max_date: NaiveDate,
    pub start_total: NaiveDate,
    pub train_min_date: Option<NaiveDate>,
    pub train_max_date: Option<NaiveDate>,
    pub gap_min_date: Option<NaiveDate>,
    pub gap_max_date: Option<NaiveDate>,
    pub test_min_date: Option<NaiveDate>,
    pub test_max_date: Option<NaiveDate>,
    pub n_train_fit: usize,
    pub n_gap: usize,
    pub n_test: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalSplit {
    pub train_fit: Vec<Observation>,
    pub gap: Vec<Observation>,
    pub test: Vec<Observation>,
    pub info: SplitInfo,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("invalid split config: {0}")]
    InvalidConfig(String),
    #[error("split produced an empty {0} partition")]
    EmptyPartition(&'static str),
}

pub fn split_train_gap_test(
    rows: &[Observation],
    cfg: &SplitConfig,
) -> Result<TemporalSplit, SplitError> {
    if cfg.test_days == 0 || cfg.total_days == 0 {
        return Err(SplitError::InvalidConfig(
            "total_days and test_days must be > 0".to_string(),
        ));
    }
    if cfg.test_days + cfg.gap_days >= cfg.total_days {
        return Err(SplitError::InvalidConfig(
            "test_days + gap_days must be smaller than total_days".to_string(),
        ));
    }

    let max_date = rows
        .iter()
        .map(|row| row.date)
        .max()
        .ok_or(SplitError::EmptyPartition("input"))?;
    let start_total = max_date - days(cfg.total_days - 1);
    let start_test = max_date - days(cfg.test_days - 1);
    let start_gap = start_test - days(cfg.gap_days);

    let mut train_fit = Vec::new();
    let mut gap = Vec::new();
    let mut test = Vec::new();
    for row in rows.iter().filter(|row| row.date >= start_total) {
        if row.date >= start_test {
            test.push(row.clone());
        } else if row.date >= start_gap {
            gap.push(row.clone());
        } else {
            train_fit.push(row.clone());
        }
    }
    for part in [&mut train_fit, &mut gap, &mut test] {
        part.sort_by_key(|row| row.date);
    }

    if train_fit.is_empty() {
        return Err(SplitError::EmptyPartition("train_fit"));
    }
    if test.is_empty() {
        return Err(SplitError::EmptyPartition("test"));
    }

    let info = SplitInfo {
        total_days: cfg.total_days,
        test_days: cfg.test_days,
        gap_days: cfg.gap_days,
        max_date,
        start_total,
        train_min_date: train_fit.first().map(|r| r.date),
        train_max_date: train_fit.last().map(|r| r.date),
        gap_min_date: gap.first().map(|r| r.date),
        gap_max_date: gap.last().map(|r| r.date),
        test_min_date: test.first().map(|r| r.date),
        test_max_date: test.last().map(|r| r.date),
        n_train_fit: train_fit.len(),
        n_gap: gap.len(),
        n_test: test.len(),
    };

    info!(
        component = "split",
        event = "split.built",
        max_date = %info.max_date,
        n_train_fit = info.n_train_fit,
        n_gap = info.n_gap,
        n_test = info.n_test
    );

    Ok(TemporalSplit {
        train_fit,
        gap,
        test,
        info,
    })
}

fn days(n: u32) -> Duration {
    Duration::days(i64::from(n))
}
