//! Row types for observations and reference tables, plus target preparation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Log-domain values are clipped to this bound before `expm1`.
const LOG_TARGET_CLIP: f64 = 50.0;

pub type StoreId = i16;
pub type ItemId = i32;

/// Raw promotion marker as it shows up in the different source encodings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PromoFlag {
    #[default]
    Missing,
    Bool(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub store_nbr: StoreId,
    pub item_nbr: ItemId,
    pub unit_sales: Option<f64>,
    pub unit_sales_clean: Option<f64>,
    pub unit_sales_log: Option<f64>,
    pub onpromotion: PromoFlag,
}

impl Observation {
    pub fn new(date: NaiveDate, store_nbr: StoreId, item_nbr: ItemId) -> Self {
        Self {
            date,
            store_nbr,
            item_nbr,
            unit_sales: None,
            unit_sales_clean: None,
            unit_sales_log: None,
            onpromotion: PromoFlag::Missing,
        }
    }

    pub fn target(&self, column: TargetColumn) -> Option<f64> {
        match column {
            TargetColumn::Log => self.unit_sales_log,
            TargetColumn::Clean => self.unit_sales_clean,
        }
    }
}

/// Which prepared target the sales lookup table indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetColumn {
    Log,
    Clean,
}

impl TargetColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "unit_sales_log",
            Self::Clean => "unit_sales_clean",
        }
    }

    /// Log target wins over the clipped one when both are present.
    pub fn detect(rows: &[Observation]) -> Option<Self> {
        if rows.iter().any(|row| row.unit_sales_log.is_some()) {
            Some(Self::Log)
        } else if rows.iter().any(|row| row.unit_sales_clean.is_some()) {
            Some(Self::Clean)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_nbr: ItemId,
    pub family: String,
    pub class: i16,
    pub perishable: i8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub store_nbr: StoreId,
    pub city: String,
    pub state: String,
    pub store_type: String,
    pub cluster: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub date: NaiveDate,
    pub store_nbr: StoreId,
    pub transactions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OilRecord {
    pub date: NaiveDate,
    pub dcoilwtico: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolidayKind {
    Holiday,
    Transfer,
    Other(String),
}

impl HolidayKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Holiday" => Self::Holiday,
            "Transfer" => Self::Transfer,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locale {
    National,
    Regional,
    Local,
    Other(String),
}

impl Locale {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "National" => Self::National,
            "Regional" => Self::Regional,
            "Local" => Self::Local,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::National => "National",
            Self::Regional => "Regional",
            Self::Local => "Local",
            Self::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolidayEvent {
    pub date: NaiveDate,
    pub kind: HolidayKind,
    pub locale: Locale,
    pub locale_name: String,
    pub description: String,
    pub transferred: bool,
}

/// Maps every promotion encoding seen in the raw data onto a single boolean.
///
/// Text is accepted as `true`, `1`, `t` or `yes` (case-insensitive); anything
/// else, including a missing value or NaN, is `false`.
pub fn normalize_promotion(raw: &PromoFlag) -> bool {
    match raw {
        PromoFlag::Missing => false,
        PromoFlag::Bool(value) => *value,
        PromoFlag::Number(value) => !value.is_nan() && *value != 0.0,
        PromoFlag::Text(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "t" | "yes"
        ),
    }
}

/// Fills `unit_sales_clean` and `unit_sales_log` where they are absent.
///
/// Negative sales (returns) are clipped to zero and a missing `unit_sales`
/// counts as zero.
pub fn add_target(rows: &mut [Observation]) {
    for row in rows {
        let clean = match row.unit_sales_clean {
            Some(clean) => clean,
            None => {
                let raw = row.unit_sales.filter(|v| v.is_finite()).unwrap_or(0.0);
                let clean = raw.max(0.0);
                row.unit_sales_clean = Some(clean);
                clean
            }
        };
        if row.unit_sales_log.is_none() {
            row.unit_sales_log = Some(clean.ln_1p());
        }
    }
}

/// Maps a log1p-domain prediction back to unit sales without overflowing.
pub fn inverse_log_target(value: f64) -> f64 {
    value.clamp(-LOG_TARGET_CLIP, LOG_TARGET_CLIP).exp_m1()
}
