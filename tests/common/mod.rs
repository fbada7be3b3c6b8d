//! Shared fixtures for integration tests: a temp-file SQLite catalog plus
//! the provider/dataset/series documents an external ingester would have
//! created.

#![allow(dead_code)]

use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tempfile::TempDir;
use uuid::Uuid;

use stat_catalog::config::load_config;
use stat_catalog::models::{Category, Dataset, DatasetRef, Provider, Series, SeriesValue};
use stat_catalog::{db, migrate};

pub async fn setup() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();

    let config_path = tmp.path().join("catalog.toml");
    std::fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}\"\n",
            tmp.path().join("catalog.sqlite").display()
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, pool)
}

fn encode<T: serde::Serialize>(value: &Option<T>) -> Option<String> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).unwrap())
}

pub async fn insert_provider(pool: &SqlitePool, provider: &Provider) {
    sqlx::query(
        "INSERT INTO providers (name, long_name, region, slug, enable) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&provider.name)
    .bind(&provider.long_name)
    .bind(&provider.region)
    .bind(&provider.slug)
    .bind(provider.enable)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_category(pool: &SqlitePool, category: &Category) {
    sqlx::query(
        "INSERT INTO categories (id, provider_name, category_code, name, parent, all_parents, \
         datasets, tags, enable, slug) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&category.id)
    .bind(&category.provider_name)
    .bind(&category.category_code)
    .bind(&category.name)
    .bind(&category.parent)
    .bind(encode(&category.all_parents))
    .bind(encode(&category.datasets))
    .bind(encode(&category.tags))
    .bind(category.enable)
    .bind(&category.slug)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_dataset(pool: &SqlitePool, dataset: &Dataset) {
    sqlx::query(
        "INSERT INTO datasets (id, provider_name, dataset_code, name, notes, concepts, \
         codelists, dimension_keys, attribute_keys, tags, enable, slug, last_update) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&dataset.id)
    .bind(&dataset.provider_name)
    .bind(&dataset.dataset_code)
    .bind(&dataset.name)
    .bind(&dataset.notes)
    .bind(encode(&dataset.concepts))
    .bind(encode(&dataset.codelists))
    .bind(encode(&dataset.dimension_keys))
    .bind(encode(&dataset.attribute_keys))
    .bind(encode(&dataset.tags))
    .bind(dataset.enable)
    .bind(&dataset.slug)
    .bind(dataset.last_update)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn insert_series(pool: &SqlitePool, series: &Series) {
    let values = if series.values.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&series.values).unwrap())
    };
    sqlx::query(
        "INSERT INTO series (id, provider_name, dataset_code, key, name, notes, frequency, \
         dimensions, attributes, obs_values, tags, slug) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&series.id)
    .bind(&series.provider_name)
    .bind(&series.dataset_code)
    .bind(&series.key)
    .bind(&series.name)
    .bind(&series.notes)
    .bind(&series.frequency)
    .bind(serde_json::to_string(&series.dimensions).unwrap())
    .bind(encode(&series.attributes))
    .bind(values)
    .bind(encode(&series.tags))
    .bind(&series.slug)
    .execute(pool)
    .await
    .unwrap();
}

// Fixtures

pub fn provider_p1() -> Provider {
    Provider {
        name: "p1".to_string(),
        long_name: "Provider Test".to_string(),
        region: "Mars".to_string(),
        slug: "p1".to_string(),
        enable: true,
    }
}

pub fn category_c1() -> Category {
    Category {
        id: Uuid::new_v4().to_string(),
        provider_name: "p1".to_string(),
        category_code: "c1".to_string(),
        name: "Category 1".to_string(),
        parent: None,
        all_parents: None,
        datasets: None,
        tags: None,
        enable: true,
        slug: "p1-c1".to_string(),
    }
}

/// Category c1 that lists d1 among its datasets, so dataset tagging can
/// inherit its tags.
pub fn category_c1_with_d1() -> Category {
    let mut category = category_c1();
    category.datasets = Some(vec![DatasetRef {
        dataset_code: "d1".to_string(),
    }]);
    category
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Dataset d1 with a frequency dimension and an observation-status
/// attribute only.
pub fn dataset_d1() -> Dataset {
    Dataset {
        id: Uuid::new_v4().to_string(),
        provider_name: "p1".to_string(),
        dataset_code: "d1".to_string(),
        name: "dataset 1".to_string(),
        notes: None,
        concepts: Some(string_map(&[
            ("FREQ", "Frequency"),
            ("OBS_STATUS", "Observation Status"),
        ])),
        codelists: Some(BTreeMap::from([
            ("FREQ".to_string(), string_map(&[("D", "Daily")])),
            ("OBS_STATUS".to_string(), string_map(&[("E", "Estimate")])),
        ])),
        dimension_keys: Some(vec!["FREQ".to_string()]),
        attribute_keys: Some(vec!["OBS_STATUS".to_string()]),
        tags: None,
        enable: true,
        slug: "p1-d1".to_string(),
        last_update: Some(chrono::Utc::now().timestamp()),
    }
}

/// Dataset d1 extended with a country dimension, as used by the series
/// tagging and search tests.
pub fn dataset_d1_full() -> Dataset {
    let mut dataset = dataset_d1();
    dataset
        .concepts
        .as_mut()
        .unwrap()
        .insert("COUNTRY".to_string(), "Country".to_string());
    let codelists = dataset.codelists.as_mut().unwrap();
    codelists.insert(
        "FREQ".to_string(),
        string_map(&[("D", "Daily"), ("M", "Monthly")]),
    );
    codelists.insert("COUNTRY".to_string(), string_map(&[("FRA", "France")]));
    dataset.dimension_keys = Some(vec!["FREQ".to_string(), "COUNTRY".to_string()]);
    dataset
}

pub fn series_x1() -> Series {
    Series {
        id: Uuid::new_v4().to_string(),
        provider_name: "p1".to_string(),
        dataset_code: "d1".to_string(),
        key: "x1".to_string(),
        name: "series 1".to_string(),
        notes: None,
        frequency: "M".to_string(),
        dimensions: string_map(&[("COUNTRY", "FRA")]),
        attributes: Some(string_map(&[("OBS_STATUS", "E")])),
        values: Vec::new(),
        tags: None,
        slug: "p1-d1-x1".to_string(),
    }
}

/// Consolidation fixture: four declared keys, two of which are partially
/// or entirely unused by the single series.
pub fn consolidation_dataset() -> Dataset {
    Dataset {
        id: Uuid::new_v4().to_string(),
        provider_name: "p1".to_string(),
        dataset_code: "d1".to_string(),
        name: "dataset 1".to_string(),
        notes: None,
        concepts: Some(string_map(&[
            ("FREQ", "Frequency"),
            ("OBS_STATUS", "Observation Status"),
            ("CURRENCY", "Currency"),
            ("COUNTRY", "Country"),
        ])),
        codelists: Some(BTreeMap::from([
            (
                "FREQ".to_string(),
                string_map(&[("D", "Daily"), ("M", "Monthly")]),
            ),
            (
                "OBS_STATUS".to_string(),
                string_map(&[("E", "Estimate"), ("T", "Terminate")]),
            ),
            (
                "CURRENCY".to_string(),
                string_map(&[("E", "Euros"), ("D", "Dollars")]),
            ),
            (
                "COUNTRY".to_string(),
                string_map(&[("FRA", "France"), ("AUS", "Australia")]),
            ),
        ])),
        dimension_keys: Some(vec!["FREQ".to_string(), "COUNTRY".to_string()]),
        attribute_keys: Some(vec!["CURRENCY".to_string(), "OBS_STATUS".to_string()]),
        tags: None,
        enable: true,
        slug: "p1-d1".to_string(),
        last_update: Some(chrono::Utc::now().timestamp()),
    }
}

pub fn consolidation_series() -> Series {
    let mut series = series_x1();
    series.attributes = Some(string_map(&[("CURRENCY", "D")]));
    series.values = vec![
        SeriesValue {
            period: Some("2015-01".to_string()),
            value: Some("1.0".to_string()),
            attributes: Some(string_map(&[("OBS_STATUS", "E")])),
        },
        SeriesValue {
            period: Some("2015-02".to_string()),
            value: Some("1.1".to_string()),
            attributes: None,
        },
    ];
    series
}
