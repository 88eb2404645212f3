//! Frequency encodings learned from the fit window.

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::records::{ItemId, ItemRecord, Observation, StoreId, StoreRecord};

pub const UNKNOWN_CLUSTER: i16 = -1;

/// Relative occurrence of each key among the values it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyMap<K: Eq + Hash> {
    freqs: HashMap<K, f64>,
}

impl<K: Eq + Hash> FrequencyMap<K> {
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = K>,
    {
        let counts = count_values(values);
        let total: usize = counts.values().sum();
        let freqs = counts
            .into_iter()
            .map(|(key, count)| (key, ratio(count, total)))
            .collect();
        Self { freqs }
    }

    /// Unseen keys encode as zero.
    pub fn get(&self, key: &K) -> f64 {
        self.freqs.get(key).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.freqs.values().sum()
    }
}

/// P(inner | outer) from (outer, inner) pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalFrequency<O: Eq + Hash, I: Eq + Hash> {
    pairs: HashMap<(O, I), usize>,
    outer: HashMap<O, usize>,
}

impl<O, I> ConditionalFrequency<O, I>
where
    O: Eq + Hash + Clone,
    I: Eq + Hash,
{
    pub fn from_pairs<T>(pairs: T) -> Self
    where
        T: IntoIterator<Item = (O, I)>,
    {
        let mut outer = HashMap::new();
        let mut pair_counts = HashMap::new();
        for (o, i) in pairs {
            *outer.entry(o.clone()).or_insert(0) += 1;
            *pair_counts.entry((o, i)).or_insert(0) += 1;
        }
        Self {
            pairs: pair_counts,
            outer,
        }
    }

    /// Zero when the outer category was never seen.
    pub fn get(&self, outer: O, inner: I) -> f64 {
        let denominator = self.outer.get(&outer).copied().unwrap_or(0);
        let numerator = self.pairs.get(&(outer, inner)).copied().unwrap_or(0);
        ratio(numerator, denominator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemEncoding {
    pub perishable: i8,
    pub family_freq_items: f64,
    pub class_freq_items: f64,
    pub class_freq_in_family: f64,
}

impl ItemEncoding {
    pub const UNSEEN: Self = Self {
        perishable: 0,
        family_freq_items: 0.0,
        class_freq_items: 0.0,
        class_freq_in_family: 0.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreEncoding {
    pub cluster: i16,
    pub type_freq: f64,
    pub state_freq: f64,
    pub city_freq: f64,
    pub city_freq_in_state: f64,
}

impl StoreEncoding {
    pub const UNSEEN: Self = Self {
        cluster: UNKNOWN_CLUSTER,
        type_freq: 0.0,
        state_freq: 0.0,
        city_freq: 0.0,
        city_freq_in_state: 0.0,
    };
}

/// All categorical encodings learned at fit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalEncoders {
    store_freq: FrequencyMap<StoreId>,
    item_freq: FrequencyMap<ItemId>,
    items: HashMap<ItemId, ItemEncoding>,
    stores: HashMap<StoreId, StoreEncoding>,
}

impl CategoricalEncoders {
    pub fn fit(history: &[Observation], items: &[ItemRecord], stores: &[StoreRecord]) -> Self {
        Self {
            store_freq: FrequencyMap::from_values(history.iter().map(|row| row.store_nbr)),
            item_freq: FrequencyMap::from_values(history.iter().map(|row| row.item_nbr)),
            items: encode_items(items),
            stores: encode_stores(history, stores),
        }
    }

    pub fn store_freq(&self, store_nbr: StoreId) -> f64 {
        self.store_freq.get(&store_nbr)
    }

    pub fn item_freq(&self, item_nbr: ItemId) -> f64 {
        self.item_freq.get(&item_nbr)
    }

    pub fn item(&self, item_nbr: ItemId) -> ItemEncoding {
        self.items
            .get(&item_nbr)
            .copied()
            .unwrap_or(ItemEncoding::UNSEEN)
    }

    pub fn store(&self, store_nbr: StoreId) -> StoreEncoding {
        self.stores
            .get(&store_nbr)
            .copied()
            .unwrap_or(StoreEncoding::UNSEEN)
    }

    pub fn store_freq_map(&self) -> &FrequencyMap<StoreId> {
        &self.store_freq
    }

    pub fn item_freq_map(&self) -> &FrequencyMap<ItemId> {
        &self.item_freq
    }
}

// Item attribute frequencies are taken over the items reference table itself.
fn encode_items(items: &[ItemRecord]) -> HashMap<ItemId, ItemEncoding> {
    let family_freq = FrequencyMap::from_values(items.iter().map(|item| item.family.as_str()));
    let class_freq = FrequencyMap::from_values(items.iter().map(|item| item.class));
    let class_in_family = ConditionalFrequency::from_pairs(
        items.iter().map(|item| (item.family.as_str(), item.class)),
    );

    let mut out = HashMap::with_capacity(items.len());
    for item in items {
        out.entry(item.item_nbr).or_insert_with(|| ItemEncoding {
            perishable: item.perishable,
            family_freq_items: family_freq.get(&item.family.as_str()),
            class_freq_items: class_freq.get(&item.class),
            class_freq_in_family: class_in_family.get(item.family.as_str(), item.class),
        });
    }
    out
}

// Store locale frequencies are weighted by how often each store appears in
// the history rows; rows for stores missing from the reference are ignored.
fn encode_stores(
    history: &[Observation],
    stores: &[StoreRecord],
) -> HashMap<StoreId, StoreEncoding> {
    let by_id: HashMap<StoreId, &StoreRecord> =
        stores.iter().map(|store| (store.store_nbr, store)).collect();
    let joined: Vec<&StoreRecord> = history
        .iter()
        .filter_map(|row| by_id.get(&row.store_nbr).copied())
        .collect();

    let type_freq = FrequencyMap::from_values(joined.iter().map(|s| s.store_type.as_str()));
    let state_freq = FrequencyMap::from_values(joined.iter().map(|s| s.state.as_str()));
    let city_freq = FrequencyMap::from_values(joined.iter().map(|s| s.city.as_str()));
    let city_in_state = ConditionalFrequency::from_pairs(
        joined.iter().map(|s| (s.state.as_str(), s.city.as_str())),
    );

    by_id
        .into_iter()
        .map(|(store_nbr, store)| {
            let encoding = StoreEncoding {
                cluster: store.cluster,
                type_freq: type_freq.get(&store.store_type.as_str()),
                state_freq: state_freq.get(&store.state.as_str()),
                city_freq: city_freq.get(&store.city.as_str()),
                city_freq_in_state: city_in_state.get(store.state.as_str(), store.city.as_str()),
            };
            (store_nbr, encoding)
        })
        .collect()
}

fn count_values<K: Eq + Hash, I: IntoIterator<Item = K>>(values: I) -> HashMap<K, usize> {
    let mut counts = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
