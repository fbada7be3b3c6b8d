//! Tag composition and batched tag persistence.
//!
//! Composition builds the ordered list of text fragments relevant to an
//! entity (its own fields, its provider, its dataset's concept/codelist
//! labels, inherited category tags), tokenizes every fragment and returns
//! the union as a sorted, deduplicated tag list. Persistence streams the
//! matching documents, computes tags per document and issues conditional
//! `SET tags` writes in bounded batches.

use anyhow::Result;
use futures_util::TryStreamExt;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::models::{frequency_label, BulkResult, Category, Dataset, Provider, Series};
use crate::store::{self, EntityKind};
use crate::tokenize::Tokenizer;

/// Tuning knobs shared by the tag persisters.
#[derive(Debug, Clone)]
pub struct TagUpdateOptions {
    pub provider_name: String,
    /// Restrict dataset/series tagging to a single dataset.
    pub dataset_code: Option<String>,
    /// Only process documents that have no tags yet.
    pub update_only: bool,
    /// Compute and report would-be writes without touching the store.
    pub dry_run: bool,
    pub batch_size: usize,
    pub include_category_tags: bool,
}

impl TagUpdateOptions {
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            dataset_code: None,
            update_only: false,
            dry_run: false,
            batch_size: 100,
            include_category_tags: true,
        }
    }
}

// Composition

fn sorted_tags(
    tokenizer: &Tokenizer,
    fragments: &[String],
    pre_tokenized: &[String],
) -> Vec<String> {
    let mut tags: BTreeSet<String> = pre_tokenized.iter().cloned().collect();
    for fragment in fragments {
        tags.extend(tokenizer.tokenize(fragment));
    }
    tags.into_iter().collect()
}

/// Tags for a category: provider identity, the category's own code and
/// name, and the contributions of every enabled ancestor reachable through
/// the `all_parents` closure. A visited set bounds the walk, so a cyclic
/// closure terminates instead of recursing forever.
pub async fn tags_for_category(
    pool: &SqlitePool,
    tokenizer: &Tokenizer,
    category: &Category,
    provider: &Provider,
) -> Result<Vec<String>> {
    let mut fragments = vec![
        provider.name.clone(),
        provider.long_name.clone(),
        provider.region.clone(),
        category.category_code.clone(),
        category.name.clone(),
    ];

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(category.category_code.clone());
    let mut pending: Vec<String> = category
        .all_parents
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|code| visited.insert(code.clone()))
        .collect();

    while !pending.is_empty() {
        let ancestors =
            store::categories_by_codes(pool, &category.provider_name, &pending).await?;
        pending.clear();
        for ancestor in ancestors {
            fragments.push(ancestor.category_code.clone());
            fragments.push(ancestor.name.clone());
            for code in ancestor.all_parents.unwrap_or_default() {
                if visited.insert(code.clone()) {
                    pending.push(code);
                }
            }
        }
    }

    Ok(sorted_tags(tokenizer, &fragments, &[]))
}

/// Tags for a dataset: provider identity, code, name, notes, every concept
/// label, and the codelist labels of every key listed in
/// `dimension_keys`/`attribute_keys`. With `include_category_tags`, the
/// pre-tokenized tags of referencing categories are unioned in.
pub async fn tags_for_dataset(
    pool: &SqlitePool,
    tokenizer: &Tokenizer,
    dataset: &Dataset,
    provider: &Provider,
    include_category_tags: bool,
) -> Result<Vec<String>> {
    let mut fragments = vec![
        provider.name.clone(),
        provider.long_name.clone(),
        provider.region.clone(),
        dataset.dataset_code.clone(),
        dataset.name.clone(),
    ];

    if let Some(notes) = &dataset.notes {
        if !notes.is_empty() {
            fragments.push(notes.clone());
        }
    }

    if let Some(concepts) = &dataset.concepts {
        fragments.extend(concepts.values().cloned());
    }

    if let Some(codelists) = &dataset.codelists {
        let keys = dataset
            .dimension_keys
            .iter()
            .flatten()
            .chain(dataset.attribute_keys.iter().flatten());
        for key in keys {
            // Keys without a codelist are a tolerated inconsistency
            if let Some(codes) = codelists.get(key) {
                fragments.extend(codes.values().cloned());
            }
        }
    }

    let category_tags = if include_category_tags {
        let tags =
            store::category_tags_for_dataset(pool, &dataset.provider_name, &dataset.dataset_code)
                .await?;
        if tags.is_empty() {
            warn!(
                provider = %provider.name,
                dataset = %dataset.dataset_code,
                "no category tags for dataset"
            );
        }
        tags
    } else {
        Vec::new()
    };

    Ok(sorted_tags(tokenizer, &fragments, &category_tags))
}

/// Tags for a series: provider identity, dataset code and name, the series
/// key, name and notes, the concept/codelist labels behind every
/// `(key, code)` pair of its dimensions and attributes, and the label of a
/// recognized frequency code. `category_tags` are unioned in as-is.
pub fn tags_for_series(
    tokenizer: &Tokenizer,
    series: &Series,
    provider: &Provider,
    dataset: &Dataset,
    category_tags: &[String],
) -> Vec<String> {
    let mut fragments = vec![
        provider.name.clone(),
        provider.long_name.clone(),
        provider.region.clone(),
        dataset.dataset_code.clone(),
        dataset.name.clone(),
        series.key.clone(),
        series.name.clone(),
    ];

    if let Some(notes) = &series.notes {
        if !notes.is_empty() {
            fragments.push(notes.clone());
        }
    }

    let selections = series
        .dimensions
        .iter()
        .chain(series.attributes.iter().flatten());
    for (key, code) in selections {
        // Unknown keys/codes contribute nothing (catalogs evolve
        // independently of series ingestion)
        if let Some(concept) = dataset.concepts.as_ref().and_then(|c| c.get(key)) {
            fragments.push(concept.clone());
        }
        let label = dataset
            .codelists
            .as_ref()
            .and_then(|codelists| codelists.get(key))
            .and_then(|codes| codes.get(code));
        if let Some(label) = label {
            fragments.push(label.clone());
        }
    }

    if let Some(label) = frequency_label(&series.frequency) {
        fragments.push(label.to_string());
    }

    sorted_tags(tokenizer, &fragments, category_tags)
}

// Persistence

/// Flush one pending batch of `(id, tags)` pairs, folding counts and errors
/// into `result`. In dry-run mode only the would-be matches are counted.
pub(crate) async fn flush_batch(
    pool: &SqlitePool,
    kind: EntityKind,
    batch: &mut Vec<(String, Vec<String>)>,
    dry_run: bool,
    result: &mut BulkResult,
) {
    if batch.is_empty() {
        return;
    }
    if dry_run {
        result.matched += batch.len() as u64;
    } else {
        result.merge(store::apply_tags(pool, kind, batch).await);
    }
    batch.clear();
}

/// Recompute and persist tags for every enabled category of a provider.
pub async fn update_tags_categories(
    pool: &SqlitePool,
    tokenizer: &Tokenizer,
    options: &TagUpdateOptions,
) -> Result<BulkResult> {
    let Some(provider) = store::find_provider(pool, &options.provider_name).await? else {
        warn!(provider = %options.provider_name, "provider not found or disabled");
        return Ok(BulkResult::default());
    };

    let mut result = BulkResult::default();
    let mut batch: Vec<(String, Vec<String>)> = Vec::new();

    let mut rows = store::scan_categories(pool, &options.provider_name, options.update_only);
    while let Some(category) = rows.try_next().await? {
        let tags = tags_for_category(pool, tokenizer, &category, &provider).await?;
        if tags.is_empty() {
            continue;
        }
        debug!(
            category = %category.category_code,
            provider = %provider.name,
            ?tags,
            "computed category tags"
        );
        batch.push((category.id, tags));
        if batch.len() >= options.batch_size {
            flush_batch(pool, EntityKind::Categories, &mut batch, options.dry_run, &mut result)
                .await;
        }
    }
    drop(rows);

    flush_batch(pool, EntityKind::Categories, &mut batch, options.dry_run, &mut result).await;
    Ok(result)
}

/// Recompute and persist tags for the enabled datasets of a provider,
/// optionally restricted to `options.dataset_code`.
pub async fn update_tags_datasets(
    pool: &SqlitePool,
    tokenizer: &Tokenizer,
    options: &TagUpdateOptions,
) -> Result<BulkResult> {
    let Some(provider) = store::find_provider(pool, &options.provider_name).await? else {
        warn!(provider = %options.provider_name, "provider not found or disabled");
        return Ok(BulkResult::default());
    };

    let mut result = BulkResult::default();
    let mut batch: Vec<(String, Vec<String>)> = Vec::new();

    let mut rows = store::scan_datasets(
        pool,
        &options.provider_name,
        options.dataset_code.as_deref(),
        options.update_only,
    );
    while let Some(dataset) = rows.try_next().await? {
        let tags = tags_for_dataset(
            pool,
            tokenizer,
            &dataset,
            &provider,
            options.include_category_tags,
        )
        .await?;
        if tags.is_empty() {
            continue;
        }
        debug!(
            dataset = %dataset.dataset_code,
            provider = %provider.name,
            ?tags,
            "computed dataset tags"
        );
        batch.push((dataset.id, tags));
        if batch.len() >= options.batch_size {
            flush_batch(pool, EntityKind::Datasets, &mut batch, options.dry_run, &mut result)
                .await;
        }
    }
    drop(rows);

    flush_batch(pool, EntityKind::Datasets, &mut batch, options.dry_run, &mut result).await;
    Ok(result)
}

/// Recompute and persist tags for the series of a provider's enabled
/// datasets, dataset by dataset.
pub async fn update_tags_series(
    pool: &SqlitePool,
    tokenizer: &Tokenizer,
    options: &TagUpdateOptions,
) -> Result<BulkResult> {
    let Some(provider) = store::find_provider(pool, &options.provider_name).await? else {
        warn!(provider = %options.provider_name, "provider not found or disabled");
        return Ok(BulkResult::default());
    };

    let datasets: Vec<Dataset> = store::scan_datasets(
        pool,
        &options.provider_name,
        options.dataset_code.as_deref(),
        false,
    )
    .try_collect()
    .await?;

    let mut result = BulkResult::default();
    let mut batch: Vec<(String, Vec<String>)> = Vec::new();

    for dataset in &datasets {
        let category_tags = if options.include_category_tags {
            let tags = store::category_tags_for_dataset(
                pool,
                &options.provider_name,
                &dataset.dataset_code,
            )
            .await?;
            if tags.is_empty() {
                warn!(
                    provider = %provider.name,
                    dataset = %dataset.dataset_code,
                    "no category tags for dataset"
                );
            }
            tags
        } else {
            Vec::new()
        };

        let mut rows = store::scan_series(
            pool,
            &options.provider_name,
            &dataset.dataset_code,
            options.update_only,
        );
        while let Some(series) = rows.try_next().await? {
            let tags = tags_for_series(tokenizer, &series, &provider, dataset, &category_tags);
            if tags.is_empty() {
                continue;
            }
            batch.push((series.id, tags));
            if batch.len() >= options.batch_size {
                flush_batch(pool, EntityKind::Series, &mut batch, options.dry_run, &mut result)
                    .await;
            }
        }
    }

    flush_batch(pool, EntityKind::Series, &mut batch, options.dry_run, &mut result).await;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn provider() -> Provider {
        Provider {
            name: "p1".to_string(),
            long_name: "Provider Test".to_string(),
            region: "Mars".to_string(),
            slug: "p1".to_string(),
            enable: true,
        }
    }

    fn dataset() -> Dataset {
        let mut concepts = BTreeMap::new();
        concepts.insert("COUNTRY".to_string(), "Country".to_string());
        concepts.insert("FREQ".to_string(), "Frequency".to_string());
        concepts.insert("OBS_STATUS".to_string(), "Observation Status".to_string());

        let mut codelists: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        codelists.insert(
            "FREQ".to_string(),
            BTreeMap::from([
                ("D".to_string(), "Daily".to_string()),
                ("M".to_string(), "Monthly".to_string()),
            ]),
        );
        codelists.insert(
            "OBS_STATUS".to_string(),
            BTreeMap::from([("E".to_string(), "Estimate".to_string())]),
        );
        codelists.insert(
            "COUNTRY".to_string(),
            BTreeMap::from([("FRA".to_string(), "France".to_string())]),
        );

        Dataset {
            id: "ds-1".to_string(),
            provider_name: "p1".to_string(),
            dataset_code: "d1".to_string(),
            name: "dataset 1".to_string(),
            notes: None,
            concepts: Some(concepts),
            codelists: Some(codelists),
            dimension_keys: Some(vec!["FREQ".to_string(), "COUNTRY".to_string()]),
            attribute_keys: Some(vec!["OBS_STATUS".to_string()]),
            tags: None,
            enable: true,
            slug: "p1-d1".to_string(),
            last_update: None,
        }
    }

    fn series() -> Series {
        Series {
            id: "s-1".to_string(),
            provider_name: "p1".to_string(),
            dataset_code: "d1".to_string(),
            key: "x1".to_string(),
            name: "series 1".to_string(),
            notes: None,
            frequency: "M".to_string(),
            dimensions: BTreeMap::from([("COUNTRY".to_string(), "FRA".to_string())]),
            attributes: Some(BTreeMap::from([("OBS_STATUS".to_string(), "E".to_string())])),
            values: Vec::new(),
            tags: None,
            slug: "p1-d1-x1".to_string(),
        }
    }

    #[test]
    fn test_tags_for_series() {
        let tags = tags_for_series(&Tokenizer::default(), &series(), &provider(), &dataset(), &[]);
        assert_eq!(
            tags,
            vec![
                "country",
                "d1",
                "estimate",
                "france",
                "mars",
                "monthly",
                "observation",
                "p1",
                "provider",
                "series",
                "status",
                "test",
                "x1"
            ]
        );
    }

    #[test]
    fn test_tags_for_series_with_category_tags() {
        let category_tags: Vec<String> = ["c1", "category", "mars", "p1", "provider", "test"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        let tags = tags_for_series(
            &Tokenizer::default(),
            &series(),
            &provider(),
            &dataset(),
            &category_tags,
        );
        assert_eq!(
            tags,
            vec![
                "c1",
                "category",
                "country",
                "d1",
                "estimate",
                "france",
                "mars",
                "monthly",
                "observation",
                "p1",
                "provider",
                "series",
                "status",
                "test",
                "x1"
            ]
        );
    }

    #[test]
    fn test_tags_for_series_skips_unknown_keys() {
        let mut s = series();
        s.dimensions
            .insert("UNKNOWN".to_string(), "??".to_string());
        let tags = tags_for_series(&Tokenizer::default(), &s, &provider(), &dataset(), &[]);
        assert!(!tags.contains(&"unknown".to_string()));
        assert!(tags.contains(&"france".to_string()));
    }

    #[test]
    fn test_tags_for_series_idempotent() {
        let a = tags_for_series(&Tokenizer::default(), &series(), &provider(), &dataset(), &[]);
        let b = tags_for_series(&Tokenizer::default(), &series(), &provider(), &dataset(), &[]);
        assert_eq!(a, b);
    }
}
