//! Catalog document types and operation results.
//!
//! These mirror the documents of the catalog hierarchy (provider → category →
//! dataset → series). Nested maps and arrays are stored as JSON columns;
//! ordered maps use [`BTreeMap`] so that structural comparison is independent
//! of key insertion order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A data source. Immutable after creation except for `enable`.
#[derive(Debug, Clone)]
pub struct Provider {
    pub name: String,
    pub long_name: String,
    pub region: String,
    pub slug: String,
    pub enable: bool,
}

/// Reference from a category to one of its datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRef {
    pub dataset_code: String,
}

/// A node in a provider's topic tree. `all_parents` holds the ancestor
/// closure (every ancestor's code, order not guaranteed).
#[derive(Debug, Clone)]
pub struct Category {
    pub id: String,
    pub provider_name: String,
    pub category_code: String,
    pub name: String,
    pub parent: Option<String>,
    pub all_parents: Option<Vec<String>>,
    pub datasets: Option<Vec<DatasetRef>>,
    pub tags: Option<Vec<String>>,
    pub enable: bool,
    pub slug: String,
}

/// A dataset declaration. `codelists[key]` enumerates the valid
/// `code → label` pairs for a dimension/attribute key, `concepts[key]`
/// labels the key itself, and `dimension_keys`/`attribute_keys` partition
/// the keys in declaration order.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    pub provider_name: String,
    pub dataset_code: String,
    pub name: String,
    pub notes: Option<String>,
    pub concepts: Option<BTreeMap<String, String>>,
    pub codelists: Option<BTreeMap<String, BTreeMap<String, String>>>,
    pub dimension_keys: Option<Vec<String>>,
    pub attribute_keys: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub enable: bool,
    pub slug: String,
    pub last_update: Option<i64>,
}

/// One observation of a series. `attributes` may override or add attribute
/// codes for this observation only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesValue {
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, String>>,
}

/// A single time series. `dimensions`/`attributes` select one code per key
/// from the owning dataset's codelists.
#[derive(Debug, Clone)]
pub struct Series {
    pub id: String,
    pub provider_name: String,
    pub dataset_code: String,
    pub key: String,
    pub name: String,
    pub notes: Option<String>,
    pub frequency: String,
    pub dimensions: BTreeMap<String, String>,
    pub attributes: Option<BTreeMap<String, String>>,
    pub values: Vec<SeriesValue>,
    pub tags: Option<Vec<String>>,
    pub slug: String,
}

/// Per-provider occurrence count inside a [`TagEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCount {
    pub name: String,
    pub count: i64,
}

/// One row of the global tag index: total occurrences of a tag across all
/// entities of a kind, with the contributing providers.
#[derive(Debug, Clone)]
pub struct TagEntry {
    pub name: String,
    pub count: i64,
    pub providers: Vec<ProviderCount>,
}

/// Aggregate outcome of a batched write operation. Per-batch failures are
/// collected in `errors`; counts cover the batches that succeeded.
#[derive(Debug, Clone, Default)]
pub struct BulkResult {
    pub matched: u64,
    pub modified: u64,
    pub errors: Vec<String>,
}

impl BulkResult {
    pub fn merge(&mut self, other: BulkResult) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.errors.extend(other.errors);
    }
}

/// Recognized frequency codes and their human labels.
pub const FREQUENCIES: &[(&str, &str)] = &[
    ("A", "Annually"),
    ("M", "Monthly"),
    ("Q", "Quarterly"),
    ("W", "Weekly"),
    ("W-WED", "Weekly Wednesday"),
    ("D", "Daily"),
    ("H", "Hourly"),
];

pub fn frequency_label(code: &str) -> Option<&'static str> {
    FREQUENCIES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, label)| *label)
}
