//! Typed access to the catalog store.
//!
//! Thin layer over `sqlx`: point lookups filtered to enabled documents,
//! streaming scans with the projections the tag and consolidation engines
//! need, batched conditional tag updates, and merging upserts into the tag
//! index. All write helpers report `matched`/`modified` counts:
//! `matched` is the number of documents a write was issued for, `modified`
//! the number of rows whose content actually changed, so re-running an
//! operation over unchanged data reports zero modifications.

use anyhow::Result;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::error;

use crate::models::{
    BulkResult, Category, Dataset, DatasetRef, Provider, ProviderCount, Series, SeriesValue,
    TagEntry,
};
use crate::tokenize::Tokenizer;

/// Catalog entity kinds that carry a `tags` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Categories,
    Datasets,
    Series,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Categories => "categories",
            EntityKind::Datasets => "datasets",
            EntityKind::Series => "series",
        }
    }
}

/// Target tables of the derived tag index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagIndex {
    Datasets,
    Series,
}

impl TagIndex {
    pub fn table(&self) -> &'static str {
        match self {
            TagIndex::Datasets => "dataset_tags",
            TagIndex::Series => "series_tags",
        }
    }
}

// Row decoding

fn json_opt<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        Some(text) if !text.is_empty() => Ok(Some(serde_json::from_str(&text)?)),
        _ => Ok(None),
    }
}

fn provider_from_row(row: &SqliteRow) -> Result<Provider> {
    Ok(Provider {
        name: row.try_get("name")?,
        long_name: row.try_get("long_name")?,
        region: row.try_get("region")?,
        slug: row.try_get("slug")?,
        enable: row.try_get("enable")?,
    })
}

fn category_from_row(row: &SqliteRow) -> Result<Category> {
    Ok(Category {
        id: row.try_get("id")?,
        provider_name: row.try_get("provider_name")?,
        category_code: row.try_get("category_code")?,
        name: row.try_get("name")?,
        parent: row.try_get("parent")?,
        all_parents: json_opt(row, "all_parents")?,
        datasets: json_opt::<Vec<DatasetRef>>(row, "datasets")?,
        tags: json_opt(row, "tags")?,
        enable: row.try_get("enable")?,
        slug: row.try_get("slug")?,
    })
}

fn dataset_from_row(row: &SqliteRow) -> Result<Dataset> {
    Ok(Dataset {
        id: row.try_get("id")?,
        provider_name: row.try_get("provider_name")?,
        dataset_code: row.try_get("dataset_code")?,
        name: row.try_get("name")?,
        notes: row.try_get("notes")?,
        concepts: json_opt(row, "concepts")?,
        codelists: json_opt(row, "codelists")?,
        dimension_keys: json_opt(row, "dimension_keys")?,
        attribute_keys: json_opt(row, "attribute_keys")?,
        tags: json_opt(row, "tags")?,
        enable: row.try_get("enable")?,
        slug: row.try_get("slug")?,
        last_update: row.try_get("last_update")?,
    })
}

/// Decode a series row scanned without its observations (`obs_values` is
/// deliberately excluded from tagging projections).
fn series_from_row(row: &SqliteRow) -> Result<Series> {
    Ok(Series {
        id: row.try_get("id")?,
        provider_name: row.try_get("provider_name")?,
        dataset_code: row.try_get("dataset_code")?,
        key: row.try_get("key")?,
        name: row.try_get("name")?,
        notes: row.try_get("notes")?,
        frequency: row.try_get("frequency")?,
        dimensions: json_opt(row, "dimensions")?.unwrap_or_default(),
        attributes: json_opt(row, "attributes")?,
        values: Vec::new(),
        tags: json_opt(row, "tags")?,
        slug: row.try_get("slug")?,
    })
}

/// Projection of a series used by consolidation: only the fields that can
/// reference codelist codes.
#[derive(Debug, Clone)]
pub struct SeriesUsage {
    pub dimensions: BTreeMap<String, String>,
    pub attributes: Option<BTreeMap<String, String>>,
    pub values: Vec<SeriesValue>,
}

fn series_usage_from_row(row: &SqliteRow) -> Result<SeriesUsage> {
    Ok(SeriesUsage {
        dimensions: json_opt(row, "dimensions")?.unwrap_or_default(),
        attributes: json_opt(row, "attributes")?,
        values: json_opt(row, "obs_values")?.unwrap_or_default(),
    })
}

// Point lookups

/// Look up an enabled provider by name.
pub async fn find_provider(pool: &SqlitePool, name: &str) -> Result<Option<Provider>> {
    let row = sqlx::query("SELECT * FROM providers WHERE name = ? AND enable = 1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(provider_from_row).transpose()
}

/// Look up a dataset by provider and code. `enabled_only` is lifted for
/// consolidation, which also repairs disabled datasets.
pub async fn find_dataset(
    pool: &SqlitePool,
    provider_name: &str,
    dataset_code: &str,
    enabled_only: bool,
) -> Result<Option<Dataset>> {
    let sql = if enabled_only {
        "SELECT * FROM datasets WHERE provider_name = ? AND dataset_code = ? AND enable = 1"
    } else {
        "SELECT * FROM datasets WHERE provider_name = ? AND dataset_code = ?"
    };
    let row = sqlx::query(sql)
        .bind(provider_name)
        .bind(dataset_code)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(dataset_from_row).transpose()
}

/// Enabled categories of a provider matching any of `codes`. Missing codes
/// are simply absent from the result.
pub async fn categories_by_codes(
    pool: &SqlitePool,
    provider_name: &str,
    codes: &[String],
) -> Result<Vec<Category>> {
    if codes.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; codes.len()].join(", ");
    let sql = format!(
        "SELECT * FROM categories WHERE provider_name = ? AND enable = 1 \
         AND category_code IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql).bind(provider_name);
    for code in codes {
        query = query.bind(code);
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(category_from_row).collect()
}

/// Union of the tag arrays of every enabled category referencing
/// `dataset_code`. Returned as-is (already tokenized when the categories
/// were tagged).
pub async fn category_tags_for_dataset(
    pool: &SqlitePool,
    provider_name: &str,
    dataset_code: &str,
) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT tags FROM categories
        WHERE provider_name = ?1 AND enable = 1
          AND tags IS NOT NULL
          AND EXISTS (
              SELECT 1 FROM json_each(COALESCE(categories.datasets, '[]'))
              WHERE json_extract(json_each.value, '$.dataset_code') = ?2
          )
        "#,
    )
    .bind(provider_name)
    .bind(dataset_code)
    .fetch_all(pool)
    .await?;

    let mut tags = Vec::new();
    for row in &rows {
        let raw: String = row.try_get("tags")?;
        let decoded: Vec<String> = serde_json::from_str(&raw)?;
        tags.extend(decoded);
    }
    Ok(tags)
}

/// Dataset codes of a provider, enabled or not.
pub async fn dataset_codes(pool: &SqlitePool, provider_name: &str) -> Result<Vec<String>> {
    let codes = sqlx::query_scalar("SELECT dataset_code FROM datasets WHERE provider_name = ?")
        .bind(provider_name)
        .fetch_all(pool)
        .await?;
    Ok(codes)
}

// Streaming scans

/// Scan of the enabled categories of a provider. With `untagged_only`,
/// restricted to documents that have no tags yet.
pub fn scan_categories<'a>(
    pool: &'a SqlitePool,
    provider_name: &'a str,
    untagged_only: bool,
) -> BoxStream<'a, Result<Category>> {
    let stream = sqlx::query(
        "SELECT * FROM categories WHERE provider_name = ?1 AND enable = 1 \
         AND (?2 = 0 OR tags IS NULL)",
    )
    .bind(provider_name)
    .bind(untagged_only as i64)
    .fetch(pool)
    .map(|row| {
        row.map_err(anyhow::Error::from)
            .and_then(|r| category_from_row(&r))
    });
    Box::pin(stream)
}

/// Scan of the enabled datasets of a provider, optionally restricted to one
/// dataset code and/or to untagged documents.
pub fn scan_datasets<'a>(
    pool: &'a SqlitePool,
    provider_name: &'a str,
    dataset_code: Option<&'a str>,
    untagged_only: bool,
) -> BoxStream<'a, Result<Dataset>> {
    let stream = sqlx::query(
        "SELECT * FROM datasets WHERE provider_name = ?1 AND enable = 1 \
         AND (?2 IS NULL OR dataset_code = ?2) \
         AND (?3 = 0 OR tags IS NULL)",
    )
    .bind(provider_name)
    .bind(dataset_code)
    .bind(untagged_only as i64)
    .fetch(pool)
    .map(|row| {
        row.map_err(anyhow::Error::from)
            .and_then(|r| dataset_from_row(&r))
    });
    Box::pin(stream)
}

/// Scan of one dataset's series without their observations.
pub fn scan_series<'a>(
    pool: &'a SqlitePool,
    provider_name: &'a str,
    dataset_code: &'a str,
    untagged_only: bool,
) -> BoxStream<'a, Result<Series>> {
    let stream = sqlx::query(
        "SELECT id, provider_name, dataset_code, key, name, notes, frequency, \
                dimensions, attributes, tags, slug \
         FROM series WHERE provider_name = ?1 AND dataset_code = ?2 \
         AND (?3 = 0 OR tags IS NULL)",
    )
    .bind(provider_name)
    .bind(dataset_code)
    .bind(untagged_only as i64)
    .fetch(pool)
    .map(|row| {
        row.map_err(anyhow::Error::from)
            .and_then(|r| series_from_row(&r))
    });
    Box::pin(stream)
}

/// Scan of one dataset's series projected down to code usage (dimensions,
/// attributes, per-observation attributes).
pub fn scan_series_usage<'a>(
    pool: &'a SqlitePool,
    provider_name: &'a str,
    dataset_code: &'a str,
) -> BoxStream<'a, Result<SeriesUsage>> {
    let stream = sqlx::query(
        "SELECT dimensions, attributes, obs_values FROM series \
         WHERE provider_name = ?1 AND dataset_code = ?2",
    )
    .bind(provider_name)
    .bind(dataset_code)
    .fetch(pool)
    .map(|row| {
        row.map_err(anyhow::Error::from)
            .and_then(|r| series_usage_from_row(&r))
    });
    Box::pin(stream)
}

// Batched writes

/// Apply one batch of `(document id, tags)` pairs as conditional updates in
/// a single transaction. A failed batch is reported in `errors` and costs
/// its counts; the caller moves on to the next batch.
pub async fn apply_tags(
    pool: &SqlitePool,
    kind: EntityKind,
    batch: &[(String, Vec<String>)],
) -> BulkResult {
    let mut result = BulkResult::default();
    if batch.is_empty() {
        return result;
    }
    match apply_tags_tx(pool, kind, batch).await {
        Ok((matched, modified)) => {
            result.matched = matched;
            result.modified = modified;
        }
        Err(err) => {
            error!(
                table = kind.table(),
                size = batch.len(),
                "tag batch write failed: {err:#}"
            );
            result
                .errors
                .push(format!("{} batch of {}: {err:#}", kind.table(), batch.len()));
        }
    }
    result
}

async fn apply_tags_tx(
    pool: &SqlitePool,
    kind: EntityKind,
    batch: &[(String, Vec<String>)],
) -> Result<(u64, u64)> {
    // The `tags <> ?1` guard makes re-runs over unchanged data report zero
    // modified rows.
    let sql = format!(
        "UPDATE {} SET tags = ?1 WHERE id = ?2 AND (tags IS NULL OR tags <> ?1)",
        kind.table()
    );

    let mut tx = pool.begin().await?;
    let mut matched = 0u64;
    let mut modified = 0u64;
    for (id, tags) in batch {
        let encoded = serde_json::to_string(tags)?;
        let outcome = sqlx::query(&sql).bind(&encoded).bind(id).execute(&mut *tx).await?;
        matched += 1;
        modified += outcome.rows_affected();
    }
    tx.commit().await?;
    Ok((matched, modified))
}

/// Upsert one batch of tag index entries. The count is overwritten; the
/// provider set is merged by provider name, never replaced wholesale, so
/// providers recorded by earlier runs survive.
pub async fn upsert_tag_entries(
    pool: &SqlitePool,
    index: TagIndex,
    entries: &[TagEntry],
) -> BulkResult {
    let mut result = BulkResult::default();
    if entries.is_empty() {
        return result;
    }
    match upsert_tag_entries_tx(pool, index, entries).await {
        Ok((matched, modified)) => {
            result.matched = matched;
            result.modified = modified;
        }
        Err(err) => {
            error!(
                table = index.table(),
                size = entries.len(),
                "tag index batch write failed: {err:#}"
            );
            result.errors.push(format!(
                "{} batch of {}: {err:#}",
                index.table(),
                entries.len()
            ));
        }
    }
    result
}

async fn upsert_tag_entries_tx(
    pool: &SqlitePool,
    index: TagIndex,
    entries: &[TagEntry],
) -> Result<(u64, u64)> {
    let select = format!("SELECT providers FROM {} WHERE name = ?", index.table());
    let upsert = format!(
        "INSERT INTO {} (name, count, providers) VALUES (?1, ?2, ?3) \
         ON CONFLICT(name) DO UPDATE SET count = excluded.count, providers = excluded.providers",
        index.table()
    );

    let mut tx = pool.begin().await?;
    let mut matched = 0u64;
    let mut modified = 0u64;
    for entry in entries {
        let existing: Option<String> = sqlx::query_scalar(&select)
            .bind(&entry.name)
            .fetch_optional(&mut *tx)
            .await?;
        let mut providers: Vec<ProviderCount> = match existing {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        for incoming in &entry.providers {
            match providers.iter_mut().find(|p| p.name == incoming.name) {
                Some(known) => known.count = incoming.count,
                None => providers.push(incoming.clone()),
            }
        }

        let outcome = sqlx::query(&upsert)
            .bind(&entry.name)
            .bind(entry.count)
            .bind(serde_json::to_string(&providers)?)
            .execute(&mut *tx)
            .await?;
        matched += 1;
        modified += outcome.rows_affected();
    }
    tx.commit().await?;
    Ok((matched, modified))
}

// Tag search

/// Filters for tag search. All search tokens must match (AND semantics);
/// each token matches as a substring of a stored tag.
#[derive(Debug, Clone)]
pub struct TagSearchOptions {
    pub search: String,
    pub provider_name: Option<String>,
    pub dataset_code: Option<String>,
    pub frequency: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl TagSearchOptions {
    pub fn new(search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            provider_name: None,
            dataset_code: None,
            frequency: None,
            limit: 20,
            offset: 0,
        }
    }
}

/// Search enabled datasets whose tags match every token of the query.
pub async fn search_datasets_by_tags(
    pool: &SqlitePool,
    tokenizer: &Tokenizer,
    options: &TagSearchOptions,
) -> Result<Vec<Dataset>> {
    let tokens = tokenizer.tokenize(&options.search);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut sql =
        String::from("SELECT * FROM datasets WHERE enable = 1 AND tags IS NOT NULL");
    if options.provider_name.is_some() {
        sql.push_str(" AND provider_name = ?");
    }
    if options.dataset_code.is_some() {
        sql.push_str(" AND dataset_code = ?");
    }
    for _ in &tokens {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM json_each(COALESCE(datasets.tags, '[]')) WHERE json_each.value LIKE ?)",
        );
    }
    sql.push_str(" ORDER BY name LIMIT ? OFFSET ?");

    let mut query = sqlx::query(&sql);
    if let Some(provider) = &options.provider_name {
        query = query.bind(provider);
    }
    if let Some(code) = &options.dataset_code {
        query = query.bind(code);
    }
    for token in &tokens {
        query = query.bind(format!("%{token}%"));
    }
    query = query.bind(options.limit).bind(options.offset);

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(dataset_from_row).collect()
}

/// Search series whose tags match every token of the query.
pub async fn search_series_by_tags(
    pool: &SqlitePool,
    tokenizer: &Tokenizer,
    options: &TagSearchOptions,
) -> Result<Vec<Series>> {
    let tokens = tokenizer.tokenize(&options.search);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let mut sql = String::from(
        "SELECT id, provider_name, dataset_code, key, name, notes, frequency, \
                dimensions, attributes, tags, slug \
         FROM series WHERE tags IS NOT NULL",
    );
    if options.provider_name.is_some() {
        sql.push_str(" AND provider_name = ?");
    }
    if options.dataset_code.is_some() {
        sql.push_str(" AND dataset_code = ?");
    }
    if options.frequency.is_some() {
        sql.push_str(" AND frequency = ?");
    }
    for _ in &tokens {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM json_each(COALESCE(series.tags, '[]')) WHERE json_each.value LIKE ?)",
        );
    }
    sql.push_str(" ORDER BY key LIMIT ? OFFSET ?");

    let mut query = sqlx::query(&sql);
    if let Some(provider) = &options.provider_name {
        query = query.bind(provider);
    }
    if let Some(code) = &options.dataset_code {
        query = query.bind(code);
    }
    if let Some(frequency) = &options.frequency {
        query = query.bind(frequency);
    }
    for token in &tokens {
        query = query.bind(format!("%{token}%"));
    }
    query = query.bind(options.limit).bind(options.offset);

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(series_from_row).collect()
}
