//! Worker-pool series tagging.
//!
//! A bounded pool of compute tasks tokenizes series concurrently and pushes
//! `(id, tags)` results into a bounded queue; a single writer drains the
//! queue and issues the same batched conditional updates as the sequential
//! persister. Backpressure comes from the queue bound alone.
//!
//! Cancellation (the `shutdown` watch flag flipping to `true`) stops
//! admitting new series, lets in-flight workers finish, and flushes any
//! partially filled write batch before returning, so queued results are
//! never lost.

use anyhow::Result;
use futures_util::TryStreamExt;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::models::{BulkResult, Dataset};
use crate::store::{self, EntityKind};
use crate::tags::{flush_batch, tags_for_series, TagUpdateOptions};
use crate::tokenize::Tokenizer;

/// Concurrent variant of [`crate::tags::update_tags_series`]. Produces the
/// same counts and the same stored tags; only the scheduling differs.
pub async fn update_tags_series_concurrent(
    pool: &SqlitePool,
    tokenizer: &Tokenizer,
    options: &TagUpdateOptions,
    workers: usize,
    shutdown: watch::Receiver<bool>,
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

    let queue_depth = options.batch_size.max(1) * 2;
    let (tx, rx) = mpsc::channel::<(String, Vec<String>)>(queue_depth);
    let writer = tokio::spawn(write_results(
        pool.clone(),
        rx,
        options.batch_size,
        options.dry_run,
    ));

    let provider = Arc::new(provider);
    let tokenizer = Arc::new(tokenizer.clone());
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut compute_tasks: JoinSet<()> = JoinSet::new();
    let mut cancelled = false;

    'datasets: for dataset in datasets {
        let category_tags = if options.include_category_tags {
            store::category_tags_for_dataset(pool, &options.provider_name, &dataset.dataset_code)
                .await?
        } else {
            Vec::new()
        };
        let dataset = Arc::new(dataset);
        let category_tags = Arc::new(category_tags);

        let mut rows = store::scan_series(
            pool,
            &options.provider_name,
            &dataset.dataset_code,
            options.update_only,
        );
        while let Some(series) = rows.try_next().await? {
            if *shutdown.borrow() {
                cancelled = true;
                break 'datasets;
            }

            let permit = semaphore.clone().acquire_owned().await?;
            let tx = tx.clone();
            let provider = provider.clone();
            let dataset = dataset.clone();
            let tokenizer = tokenizer.clone();
            let category_tags = category_tags.clone();
            compute_tasks.spawn(async move {
                let _permit = permit;
                let tags =
                    tags_for_series(&tokenizer, &series, &provider, &dataset, &category_tags);
                if !tags.is_empty() {
                    // Writer gone means we are draining after a failure;
                    // nothing useful to do with the result.
                    let _ = tx.send((series.id, tags)).await;
                }
            });
        }
    }

    // Close our own sender so the writer stops once every in-flight worker
    // has handed over its result.
    drop(tx);
    while compute_tasks.join_next().await.is_some() {}

    let result = writer.await?;
    if cancelled {
        info!(
            provider = %options.provider_name,
            matched = result.matched,
            "series tagging interrupted; queued writes flushed"
        );
    }
    Ok(result)
}

/// Single consumer: drain computed tags and issue batched writes.
async fn write_results(
    pool: SqlitePool,
    mut rx: mpsc::Receiver<(String, Vec<String>)>,
    batch_size: usize,
    dry_run: bool,
) -> BulkResult {
    let mut result = BulkResult::default();
    let mut batch: Vec<(String, Vec<String>)> = Vec::new();

    while let Some(item) = rx.recv().await {
        batch.push(item);
        if batch.len() >= batch_size {
            flush_batch(&pool, EntityKind::Series, &mut batch, dry_run, &mut result).await;
        }
    }

    flush_batch(&pool, EntityKind::Series, &mut batch, dry_run, &mut result).await;
    result
}
