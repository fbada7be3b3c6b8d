//! Dataset codelist/concept consolidation.
//!
//! Recomputes a dataset's declared codelists, concepts and
//! dimension/attribute key lists from the codes its series actually use.
//! Consolidation is a pure prune: it never introduces a key or code that is
//! not already declared, and the key lists keep their original relative
//! order. A dataset whose declaration already matches the observed usage is
//! left untouched, so re-running is free.

use anyhow::Result;
use futures_util::TryStreamExt;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::models::BulkResult;
use crate::store::{self, SeriesUsage};

/// The four derived fields of a dataset declaration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Declaration {
    pub codelists: BTreeMap<String, BTreeMap<String, String>>,
    pub concepts: BTreeMap<String, String>,
    pub dimension_keys: Vec<String>,
    pub attribute_keys: Vec<String>,
}

/// Codes actually referenced per key, accumulated across all series of a
/// dataset. `declared` gates per-observation attributes: an observation key
/// absent from the dataset's current codelists is ignored.
fn collect_used_codes(
    series: &SeriesUsage,
    declared: &BTreeMap<String, BTreeMap<String, String>>,
    used: &mut BTreeMap<String, BTreeSet<String>>,
) {
    for (key, code) in &series.dimensions {
        used.entry(key.clone()).or_default().insert(code.clone());
    }
    if let Some(attributes) = &series.attributes {
        for (key, code) in attributes {
            used.entry(key.clone()).or_default().insert(code.clone());
        }
    }
    for value in &series.values {
        if let Some(attributes) = &value.attributes {
            for (key, code) in attributes {
                if !declared.contains_key(key) {
                    continue;
                }
                used.entry(key.clone()).or_default().insert(code.clone());
            }
        }
    }
}

/// Prune `current` down to the keys and codes present in `used`. Labels
/// come from the existing maps only; a used code the declaration does not
/// know cannot gain a label and is dropped. Key lists are filtered in their
/// original order, never resorted.
fn prune_declaration(
    current: &Declaration,
    used: &BTreeMap<String, BTreeSet<String>>,
) -> Declaration {
    let mut pruned = Declaration::default();

    for (key, labels) in &current.codelists {
        let Some(used_codes) = used.get(key) else {
            continue;
        };
        let kept: BTreeMap<String, String> = labels
            .iter()
            .filter(|(code, _)| used_codes.contains(*code))
            .map(|(code, label)| (code.clone(), label.clone()))
            .collect();
        pruned.codelists.insert(key.clone(), kept);
        if let Some(concept) = current.concepts.get(key) {
            pruned.concepts.insert(key.clone(), concept.clone());
        }
    }

    pruned.dimension_keys = current
        .dimension_keys
        .iter()
        .filter(|key| pruned.codelists.contains_key(*key))
        .cloned()
        .collect();
    pruned.attribute_keys = current
        .attribute_keys
        .iter()
        .filter(|key| {
            pruned.codelists.contains_key(*key) && !pruned.dimension_keys.contains(key)
        })
        .cloned()
        .collect();

    pruned
}

/// Pending four-field update for one dataset.
struct PendingUpdate {
    dataset_id: String,
    declaration: Declaration,
}

/// Load the dataset and its series and compute the pruned declaration.
/// `None` when the dataset is missing, has no series, or already matches.
async fn prepare_consolidation(
    pool: &SqlitePool,
    provider_name: &str,
    dataset_code: &str,
) -> Result<Option<PendingUpdate>> {
    let Some(dataset) = store::find_dataset(pool, provider_name, dataset_code, false).await?
    else {
        warn!(provider = %provider_name, dataset = %dataset_code, "dataset not found");
        return Ok(None);
    };

    let current = Declaration {
        codelists: dataset.codelists.unwrap_or_default(),
        concepts: dataset.concepts.unwrap_or_default(),
        dimension_keys: dataset.dimension_keys.unwrap_or_default(),
        attribute_keys: dataset.attribute_keys.unwrap_or_default(),
    };

    let mut used: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut series_seen = 0usize;
    let mut rows = store::scan_series_usage(pool, provider_name, dataset_code);
    while let Some(series) = rows.try_next().await? {
        collect_used_codes(&series, &current.codelists, &mut used);
        series_seen += 1;
    }
    drop(rows);

    // A dataset with no series at all is left as declared rather than
    // pruned to nothing.
    if series_seen == 0 {
        debug!(provider = %provider_name, dataset = %dataset_code, "no series, skipping");
        return Ok(None);
    }

    let pruned = prune_declaration(&current, &used);
    if pruned == current {
        debug!(provider = %provider_name, dataset = %dataset_code, "no change");
        return Ok(None);
    }

    debug!(
        provider = %provider_name,
        dataset = %dataset_code,
        before = current.codelists.len(),
        after = pruned.codelists.len(),
        "codelists pruned"
    );

    Ok(Some(PendingUpdate {
        dataset_id: dataset.id,
        declaration: pruned,
    }))
}

fn encode_json<T: serde::Serialize>(value: &T, is_empty: bool) -> Result<Option<String>> {
    if is_empty {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(value)?))
}

async fn write_declarations(pool: &SqlitePool, batch: &[PendingUpdate]) -> Result<(u64, u64)> {
    let mut tx = pool.begin().await?;
    let mut matched = 0u64;
    let mut modified = 0u64;
    for update in batch {
        let declaration = &update.declaration;
        let outcome = sqlx::query(
            "UPDATE datasets SET codelists = ?, concepts = ?, \
             dimension_keys = ?, attribute_keys = ? WHERE id = ?",
        )
        .bind(encode_json(&declaration.codelists, declaration.codelists.is_empty())?)
        .bind(encode_json(&declaration.concepts, declaration.concepts.is_empty())?)
        .bind(encode_json(&declaration.dimension_keys, declaration.dimension_keys.is_empty())?)
        .bind(encode_json(&declaration.attribute_keys, declaration.attribute_keys.is_empty())?)
        .bind(&update.dataset_id)
        .execute(&mut *tx)
        .await?;
        matched += 1;
        modified += outcome.rows_affected();
    }
    tx.commit().await?;
    Ok((matched, modified))
}

/// Consolidate one dataset. Returns `None` when nothing was written (missing
/// dataset, no series, or declaration already consistent), otherwise the
/// modified-document count.
pub async fn consolidate_dataset(
    pool: &SqlitePool,
    provider_name: &str,
    dataset_code: &str,
) -> Result<Option<u64>> {
    info!(provider = %provider_name, dataset = %dataset_code, "consolidate dataset");

    let Some(update) = prepare_consolidation(pool, provider_name, dataset_code).await? else {
        return Ok(None);
    };
    let (_, modified) = write_declarations(pool, std::slice::from_ref(&update)).await?;
    Ok(Some(modified))
}

/// Consolidate every dataset of a provider, batching the resulting updates.
/// Datasets with nothing to change contribute zero to both counters; a
/// failed batch is reported in `errors` and processing continues.
pub async fn consolidate_all_datasets(
    pool: &SqlitePool,
    provider_name: &str,
    batch_size: usize,
) -> Result<BulkResult> {
    let codes = store::dataset_codes(pool, provider_name).await?;

    let mut result = BulkResult::default();
    let mut batch: Vec<PendingUpdate> = Vec::new();

    for dataset_code in &codes {
        match prepare_consolidation(pool, provider_name, dataset_code).await? {
            Some(update) => batch.push(update),
            None => {
                debug!(provider = %provider_name, dataset = %dataset_code, "bypass dataset");
                continue;
            }
        }
        if batch.len() >= batch_size {
            flush_declarations(pool, &mut batch, &mut result).await;
        }
    }
    flush_declarations(pool, &mut batch, &mut result).await;

    info!(
        provider = %provider_name,
        matched = result.matched,
        modified = result.modified,
        "consolidation finished"
    );
    Ok(result)
}

async fn flush_declarations(
    pool: &SqlitePool,
    batch: &mut Vec<PendingUpdate>,
    result: &mut BulkResult,
) {
    if batch.is_empty() {
        return;
    }
    match write_declarations(pool, batch).await {
        Ok((matched, modified)) => {
            result.matched += matched;
            result.modified += modified;
        }
        Err(err) => {
            tracing::error!(size = batch.len(), "consolidation batch write failed: {err:#}");
            result
                .errors
                .push(format!("datasets batch of {}: {err:#}", batch.len()));
        }
    }
    batch.clear();
}
