use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaggingConfig {
    #[serde(default = "default_tag_batch_size")]
    pub batch_size: usize,
    /// Merge category tags into dataset and series tags.
    #[serde(default = "default_true")]
    pub include_category_tags: bool,
    /// Stop words added on top of the built-in list.
    #[serde(default)]
    pub extra_stop_words: Vec<String>,
    /// Size of the compute pool used by worker-pool series tagging.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_tag_batch_size(),
            include_category_tags: true,
            extra_stop_words: Vec::new(),
            workers: default_workers(),
        }
    }
}

fn default_tag_batch_size() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_workers() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    #[serde(default = "default_bulk_batch_size")]
    pub batch_size: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_bulk_batch_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsolidationConfig {
    #[serde(default = "default_bulk_batch_size")]
    pub batch_size: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_bulk_batch_size(),
        }
    }
}

fn default_bulk_batch_size() -> usize {
    20
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.tagging.batch_size == 0 {
        anyhow::bail!("tagging.batch_size must be > 0");
    }
    if config.tagging.workers == 0 {
        anyhow::bail!("tagging.workers must be > 0");
    }
    if config.aggregation.batch_size == 0 {
        anyhow::bail!("aggregation.batch_size must be > 0");
    }
    if config.consolidation.batch_size == 0 {
        anyhow::bail!("consolidation.batch_size must be > 0");
    }

    Ok(config)
}
