//! Effective holiday calendar with transfer resolution and store overrides.
//!
//! A holiday moved by the government ("transferred") takes effect on the date
//! of its matching `Transfer` record, matched on description, locale and
//! locale name. Only records of type `Holiday` mark a day; transfers, bridges,
//! additional days and events only move or describe dates.
//!
//! Regional holidays apply to stores whose state equals the locale name and
//! local holidays to stores whose city equals it. A store is on holiday when
//! either the national calendar or its own override says so.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::records::{HolidayEvent, HolidayKind, Locale, StoreId, StoreRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EventKey<'a> {
    description: &'a str,
    locale: &'a str,
    locale_name: &'a str,
}

impl<'a> EventKey<'a> {
    fn of(event: &'a HolidayEvent) -> Self {
        Self {
            description: &event.description,
            locale: event.locale.as_str(),
            locale_name: &event.locale_name,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HolidayCalendar {
    national: HashMap<NaiveDate, u8>,
    #[serde(with = "crate::serde_entries")]
    overrides: HashMap<(StoreId, NaiveDate), u8>,
}

impl HolidayCalendar {
    pub fn resolve(events: &[HolidayEvent], stores: &[StoreRecord]) -> Self {
        let observed = observed_dates(events);

        let mut national: HashMap<NaiveDate, u8> = HashMap::new();
        let mut overrides: HashMap<(StoreId, NaiveDate), u8> = HashMap::new();

        let mut seen_stores = HashSet::new();
        let stores: Vec<&StoreRecord> = stores
            .iter()
            .filter(|store| seen_stores.insert(store.store_nbr))
            .collect();

        for (event, date) in events.iter().zip(observed) {
            let flag = u8::from(event.kind == HolidayKind::Holiday);
            match &event.locale {
                Locale::National => merge_flag(national.entry(date).or_insert(0), flag),
                Locale::Regional => {
                    for store in stores.iter().filter(|s| s.state == event.locale_name) {
                        merge_flag(overrides.entry((store.store_nbr, date)).or_insert(0), flag);
                    }
                }
                Locale::Local => {
                    for store in stores.iter().filter(|s| s.city == event.locale_name) {
                        merge_flag(overrides.entry((store.store_nbr, date)).or_insert(0), flag);
                    }
                }
                Locale::Other(_) => {}
            }
        }

        Self {
            national,
            overrides,
        }
    }

    pub fn national_flag(&self, date: NaiveDate) -> u8 {
        self.national.get(&date).copied().unwrap_or(0)
    }

    pub fn override_flag(&self, store_nbr: StoreId, date: NaiveDate) -> u8 {
        self.overrides.get(&(store_nbr, date)).copied().unwrap_or(0)
    }

    pub fn is_holiday_effective(&self, store_nbr: StoreId, date: NaiveDate) -> u8 {
        self.national_flag(date)
            .max(self.override_flag(store_nbr, date))
    }

    pub fn national_days(&self) -> usize {
        self.national.values().filter(|flag| **flag > 0).count()
    }

    pub fn override_days(&self) -> usize {
        self.overrides.values().filter(|flag| **flag > 0).count()
    }
}

/// Date on which each event's effect is observed, aligned with `events`.
fn observed_dates(events: &[HolidayEvent]) -> Vec<NaiveDate> {
    let mut transfer_dates: HashMap<EventKey<'_>, NaiveDate> = HashMap::new();
    for event in events.iter().filter(|e| e.kind == HolidayKind::Transfer) {
        transfer_dates.entry(EventKey::of(event)).or_insert(event.date);
    }

    events
        .iter()
        .map(|event| {
            if event.kind == HolidayKind::Holiday && event.transferred {
                transfer_dates
                    .get(&EventKey::of(event))
                    .copied()
                    .unwrap_or(event.date)
            } else {
                event.date
            }
        })
        .collect()
}

fn merge_flag(slot: &mut u8, flag: u8) {
    *slot = (*slot).max(flag);
}
