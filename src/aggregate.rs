//! Global tag-frequency index build.
//!
//! Explodes the tag array of every tagged entity of a kind with a
//! store-side grouping query, folds the per-provider rows into one entry
//! per tag (total count plus the set of contributing providers with their
//! own counts), and upserts the entries into the tag index in bounded
//! batches. The index is fully derived and can be dropped and rebuilt at
//! any time.

use anyhow::Result;
use futures_util::TryStreamExt;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::models::{BulkResult, ProviderCount, TagEntry};
use crate::store::{self, EntityKind, TagIndex};

/// Rebuild the dataset tag index from all tagged, enabled datasets.
pub async fn aggregate_tags_datasets(pool: &SqlitePool, batch_size: usize) -> Result<BulkResult> {
    aggregate_tags(pool, EntityKind::Datasets, TagIndex::Datasets, batch_size).await
}

/// Rebuild the series tag index from all tagged series.
pub async fn aggregate_tags_series(pool: &SqlitePool, batch_size: usize) -> Result<BulkResult> {
    aggregate_tags(pool, EntityKind::Series, TagIndex::Series, batch_size).await
}

async fn aggregate_tags(
    pool: &SqlitePool,
    source: EntityKind,
    target: TagIndex,
    batch_size: usize,
) -> Result<BulkResult> {
    // Grouped per (tag, provider) store-side; ordering by tag makes the
    // per-tag fold a single pass over consecutive rows.
    let sql = match source {
        EntityKind::Datasets => {
            "SELECT json_each.value AS tag, d.provider_name, COUNT(*) AS occurrences \
             FROM (SELECT provider_name, tags FROM datasets \
                   WHERE tags IS NOT NULL AND enable = 1) d, json_each(d.tags) \
             GROUP BY tag, d.provider_name ORDER BY tag"
        }
        EntityKind::Series => {
            "SELECT json_each.value AS tag, s.provider_name, COUNT(*) AS occurrences \
             FROM (SELECT provider_name, tags FROM series \
                   WHERE tags IS NOT NULL) s, json_each(s.tags) \
             GROUP BY tag, s.provider_name ORDER BY tag"
        }
        EntityKind::Categories => anyhow::bail!("no tag index for categories"),
    };

    let mut result = BulkResult::default();
    let mut pending: Vec<TagEntry> = Vec::new();
    let mut current: Option<TagEntry> = None;

    let mut rows = sqlx::query(sql).fetch(pool);
    while let Some(row) = rows.try_next().await? {
        let tag: String = row.try_get("tag")?;
        let provider: String = row.try_get("provider_name")?;
        let occurrences: i64 = row.try_get("occurrences")?;

        match current.as_mut() {
            Some(entry) if entry.name == tag => {
                entry.count += occurrences;
                entry.providers.push(ProviderCount {
                    name: provider,
                    count: occurrences,
                });
            }
            _ => {
                if let Some(entry) = current.take() {
                    pending.push(entry);
                }
                current = Some(TagEntry {
                    name: tag,
                    count: occurrences,
                    providers: vec![ProviderCount {
                        name: provider,
                        count: occurrences,
                    }],
                });
            }
        }

        if pending.len() >= batch_size {
            result.merge(store::upsert_tag_entries(pool, target, &pending).await);
            pending.clear();
        }
    }
    drop(rows);

    if let Some(entry) = current.take() {
        pending.push(entry);
    }
    if !pending.is_empty() {
        result.merge(store::upsert_tag_entries(pool, target, &pending).await);
    }

    debug!(
        index = target.table(),
        matched = result.matched,
        modified = result.modified,
        "tag aggregation finished"
    );
    Ok(result)
}
