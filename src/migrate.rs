//! Schema and index creation for the catalog store.
//!
//! `run_migrations` is idempotent and cheap to call at startup; callers own
//! the decision of when to run it instead of relying on process-global state.
//! Nested document structures (codelists, dimensions, tag arrays, ...) live
//! in JSON TEXT columns and are queried with SQLite's `json_each`.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS providers (
            name TEXT PRIMARY KEY,
            long_name TEXT NOT NULL,
            region TEXT NOT NULL,
            slug TEXT NOT NULL,
            enable INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            provider_name TEXT NOT NULL,
            category_code TEXT NOT NULL,
            name TEXT NOT NULL,
            parent TEXT,
            all_parents TEXT,
            datasets TEXT,
            tags TEXT,
            enable INTEGER NOT NULL DEFAULT 1,
            slug TEXT NOT NULL,
            UNIQUE(provider_name, category_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            provider_name TEXT NOT NULL,
            dataset_code TEXT NOT NULL,
            name TEXT NOT NULL,
            notes TEXT,
            concepts TEXT,
            codelists TEXT,
            dimension_keys TEXT,
            attribute_keys TEXT,
            tags TEXT,
            enable INTEGER NOT NULL DEFAULT 1,
            slug TEXT NOT NULL,
            last_update INTEGER,
            UNIQUE(provider_name, dataset_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS series (
            id TEXT PRIMARY KEY,
            provider_name TEXT NOT NULL,
            dataset_code TEXT NOT NULL,
            key TEXT NOT NULL,
            name TEXT NOT NULL,
            notes TEXT,
            frequency TEXT NOT NULL,
            dimensions TEXT,
            attributes TEXT,
            obs_values TEXT,
            tags TEXT,
            slug TEXT NOT NULL,
            UNIQUE(provider_name, dataset_code, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One table per entity kind carrying the derived tag index. Fully
    // regenerable, so no foreign keys back into the catalog.
    for table in ["dataset_tags", "series_tags"] {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                name TEXT PRIMARY KEY,
                count INTEGER NOT NULL,
                providers TEXT NOT NULL
            )
            "#
        ))
        .execute(pool)
        .await?;
    }

    let indexes = [
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_providers_slug ON providers(slug)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_categories_slug ON categories(slug)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_datasets_slug ON datasets(slug)",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_series_slug ON series(slug)",
        "CREATE INDEX IF NOT EXISTS idx_categories_provider ON categories(provider_name)",
        "CREATE INDEX IF NOT EXISTS idx_datasets_provider ON datasets(provider_name)",
        "CREATE INDEX IF NOT EXISTS idx_datasets_name ON datasets(name)",
        "CREATE INDEX IF NOT EXISTS idx_datasets_last_update ON datasets(last_update DESC)",
        "CREATE INDEX IF NOT EXISTS idx_series_provider_dataset ON series(provider_name, dataset_code)",
        "CREATE INDEX IF NOT EXISTS idx_series_dataset_code ON series(dataset_code)",
        "CREATE INDEX IF NOT EXISTS idx_series_key ON series(key)",
        "CREATE INDEX IF NOT EXISTS idx_series_frequency ON series(frequency DESC)",
    ];
    for index in indexes {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}
