//! Point-lookup table of past sales used for the lag and rolling features.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::records::{ItemId, Observation, StoreId, TargetColumn};

pub const LAG_DAYS: i64 = 28;
pub const ROLL_WINDOW: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
struct SalesKey {
    store_nbr: StoreId,
    item_nbr: ItemId,
    date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagValue {
    pub value: Option<f64>,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingValue {
    pub mean: Option<f64>,
    pub count: u8,
    pub fraction: f64,
}

/// Immutable (store, item, date) -> target index over a trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesLookup {
    #[serde(with = "crate::serde_entries")]
    values: HashMap<SalesKey, Option<f32>>,
    max_date: Option<NaiveDate>,
    min_kept_date: Option<NaiveDate>,
}

impl SalesLookup {
    /// Keeps rows dated within `history_days` of the latest row. Later rows
    /// overwrite earlier ones with the same key.
    pub fn build(rows: &[Observation], target: TargetColumn, history_days: u32) -> Self {
        let max_date = rows.iter().map(|row| row.date).max();
        let min_kept_date = max_date.map(|d| d - Duration::days(i64::from(history_days)));

        let mut values = HashMap::new();
        if let Some(min_keep) = min_kept_date {
            for row in rows.iter().filter(|row| row.date >= min_keep) {
                let key = SalesKey {
                    store_nbr: row.store_nbr,
                    item_nbr: row.item_nbr,
                    date: row.date,
                };
                let value = row
                    .target(target)
                    .map(|v| v as f32)
                    .filter(|v| v.is_finite());
                values.insert(key, value);
            }
        }

        Self {
            values,
            max_date,
            min_kept_date,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.max_date
    }

    pub fn min_kept_date(&self) -> Option<NaiveDate> {
        self.min_kept_date
    }

    pub fn get(&self, store_nbr: StoreId, item_nbr: ItemId, date: NaiveDate) -> Option<f64> {
        self.values
            .get(&SalesKey {
                store_nbr,
                item_nbr,
                date,
            })
            .copied()
            .flatten()
            .map(f64::from)
    }

    /// Value observed `LAG_DAYS + gap` days before `date`.
    pub fn lag28(
        &self,
        store_nbr: StoreId,
        item_nbr: ItemId,
        date: NaiveDate,
        gap: u32,
    ) -> LagValue {
        let lookback = date - Duration::days(LAG_DAYS + i64::from(gap));
        let value = self.get(store_nbr, item_nbr, lookback);
        LagValue {
            value,
            available: value.is_some(),
        }
    }

    /// Mean over `date - gap - 1` back to `date - gap - ROLL_WINDOW`, skipping misses.
    pub fn roll14(
        &self,
        store_nbr: StoreId,
        item_nbr: ItemId,
        date: NaiveDate,
        gap: u32,
    ) -> RollingValue {
        let mut sum = 0.0;
        let mut count: u8 = 0;
        for offset in 1..=ROLL_WINDOW as i64 {
            let day = date - Duration::days(i64::from(gap) + offset);
            if let Some(value) = self.get(store_nbr, item_nbr, day) {
                sum += value;
                count += 1;
            }
        }

        RollingValue {
            mean: (count > 0).then(|| sum / f64::from(count)),
            count,
            fraction: f64::from(count) / ROLL_WINDOW as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 5, 1).unwrap()
    }

    fn obs(offset: i64, value: f64) -> Observation {
        let mut row = Observation::new(base() + Duration::days(offset), 1, 100);
        row.unit_sales_clean = Some(value);
        row
    }

    #[test]
    fn window_drops_rows_older_than_history_days() {
        let rows: Vec<Observation> = (0..200).map(|d| obs(d, d as f64)).collect();
        let lookup = SalesLookup::build(&rows, TargetColumn::Clean, 120);

        assert_eq!(lookup.max_date(), Some(base() + Duration::days(199)));
        assert_eq!(lookup.min_kept_date(), Some(base() + Duration::days(79)));
        assert_eq!(lookup.len(), 121);
        assert_eq!(lookup.get(1, 100, base() + Duration::days(78)), None);
        assert_eq!(lookup.get(1, 100, base() + Duration::days(79)), Some(79.0));
    }

    #[test]
    fn duplicate_keys_keep_last_row() {
        let rows = vec![obs(0, 1.0), obs(0, 7.0)];
        let lookup = SalesLookup::build(&rows, TargetColumn::Clean, 120);
        assert_eq!(lookup.len(), 1);
        assert_eq!(lookup.get(1, 100, base()), Some(7.0));
    }

    #[test]
    fn lag_reads_exactly_28_plus_gap_days_back() {
        let rows = vec![obs(0, 4.0)];
        let lookup = SalesLookup::build(&rows, TargetColumn::Clean, 120);

        let hit = lookup.lag28(1, 100, base() + Duration::days(31), 3);
        assert_eq!(hit, LagValue { value: Some(4.0), available: true });

        let miss = lookup.lag28(1, 100, base() + Duration::days(30), 3);
        assert_eq!(miss.value, None);
        assert!(!miss.available);
    }

    #[test]
    fn rolling_counts_only_resolved_days() {
        let rows = vec![obs(0, 2.0), obs(2, 4.0), obs(5, 100.0)];
        let lookup = SalesLookup::build(&rows, TargetColumn::Clean, 120);

        // gap 1 from day 6 covers days 4 down to -9.
        let roll = lookup.roll14(1, 100, base() + Duration::days(6), 1);
        assert_eq!(roll.count, 2);
        assert_eq!(roll.mean, Some(3.0));
        assert!((roll.fraction - 2.0 / 14.0).abs() < 1e-12);
    }

    #[test]
    fn rolling_never_sees_the_day_before_when_gapped() {
        let target = base() + Duration::days(40);
        let rows = vec![obs(39, 1_000.0)];
        let lookup = SalesLookup::build(&rows, TargetColumn::Clean, 120);

        for gap in 1..5 {
            let roll = lookup.roll14(1, 100, target, gap);
            assert_eq!(roll.mean, None);
            assert_eq!(roll.count, 0);
        }
        assert_eq!(lookup.roll14(1, 100, target, 0).count, 1);
    }

    #[test]
    fn missing_target_values_are_not_counted() {
        let mut empty = Observation::new(base(), 1, 100);
        empty.unit_sales_clean = None;
        let rows = vec![empty, obs(1, 3.0)];
        let lookup = SalesLookup::build(&rows, TargetColumn::Clean, 120);

        let roll = lookup.roll14(1, 100, base() + Duration::days(2), 0);
        assert_eq!(roll.count, 1);
        assert_eq!(roll.mean, Some(3.0));
    }
}
