//! Shifted rolling averages of store transactions and oil price.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::{OilRecord, StoreId, TransactionRecord};

pub const SIGNAL_WINDOW: usize = 14;
pub const OIL_FALLBACK_TAIL: usize = 30;

/// Trailing mean of `window` values ending `shift` positions before each
/// index, with a minimum of one resolved value.
pub fn shifted_rolling_mean(
    values: &[Option<f64>],
    shift: usize,
    window: usize,
) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|idx| {
            let end = idx.checked_sub(shift)?;
            let start = (end + 1).saturating_sub(window);
            let (sum, count) = values[start..=end]
                .iter()
                .flatten()
                .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

/// Per-store transactions smoothed over the previous observations, skipping
/// the current day and the reporting gap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionSignal {
    #[serde(with = "crate::serde_entries")]
    rolled: HashMap<(StoreId, NaiveDate), Option<f64>>,
    last_by_store: HashMap<StoreId, f64>,
}

impl TransactionSignal {
    pub fn fit(records: &[TransactionRecord], gap_days: u32) -> Self {
        let mut per_store: BTreeMap<StoreId, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
        for record in records {
            let value = if record.transactions.is_finite() {
                record.transactions
            } else {
                0.0
            };
            *per_store
                .entry(record.store_nbr)
                .or_default()
                .entry(record.date)
                .or_insert(0.0) += value;
        }

        let shift = 1 + gap_days as usize;
        let mut rolled = HashMap::new();
        let mut last_by_store = HashMap::new();
        for (store_nbr, series) in per_store {
            let values: Vec<Option<f64>> = series.values().copied().map(Some).collect();
            let smoothed = shifted_rolling_mean(&values, shift, SIGNAL_WINDOW);
            if let Some(last) = smoothed.iter().rev().flatten().next() {
                last_by_store.insert(store_nbr, *last);
            }
            for (date, value) in series.keys().zip(smoothed) {
                rolled.insert((store_nbr, *date), value);
            }
        }

        Self {
            rolled,
            last_by_store,
        }
    }

    /// Falls back to the store's last smoothed value, then to zero.
    pub fn value(&self, store_nbr: StoreId, date: NaiveDate) -> f64 {
        self.rolled
            .get(&(store_nbr, date))
            .copied()
            .flatten()
            .or_else(|| self.last_by_store.get(&store_nbr).copied())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.rolled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rolled.is_empty()
    }
}

/// Global oil price smoothed over the previous 14 trading days.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OilSignal {
    rolled: BTreeMap<NaiveDate, Option<f64>>,
    fallback: f64,
}

impl OilSignal {
    pub fn fit(records: &[OilRecord]) -> Self {
        let mut sorted: Vec<&OilRecord> = records.iter().collect();
        sorted.sort_by_key(|record| record.date);

        let mut last_price = None;
        let filled: Vec<Option<f64>> = sorted
            .iter()
            .map(|record| {
                if let Some(price) = record.dcoilwtico.filter(|p| p.is_finite()) {
                    last_price = Some(price);
                }
                last_price
            })
            .collect();

        let smoothed = shifted_rolling_mean(&filled, 1, SIGNAL_WINDOW);
        let tail_start = smoothed.len().saturating_sub(OIL_FALLBACK_TAIL);
        let (sum, count) = smoothed[tail_start..]
            .iter()
            .flatten()
            .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
        let fallback = if count > 0 { sum / count as f64 } else { 0.0 };

        let rolled = sorted
            .iter()
            .map(|record| record.date)
            .zip(smoothed)
            .collect();

        Self { rolled, fallback }
    }

    pub fn value(&self, date: NaiveDate) -> f64 {
        self.rolled
            .get(&date)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
            .unwrap_or(self.fallback)
    }

    pub fn fallback(&self) -> f64 {
        self.fallback
    }
}
