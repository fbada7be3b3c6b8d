//! # stat-catalog
//!
//! Derived-metadata engine for hierarchical statistical data catalogs
//! (providers → categories → datasets → series).
//!
//! The catalog itself is written by an external ingestion process; this crate
//! maintains two kinds of metadata derived from it:
//!
//! - **search tags**: normalized lowercase tokens computed from entity
//!   attributes and inherited down the category hierarchy, persisted through
//!   batched idempotent writes and rolled up into a global per-tag index, and
//! - **consolidated dataset declarations**: codelists, concept dictionaries
//!   and dimension/attribute key lists pruned to the values actually observed
//!   in the dataset's series.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema and index creation |
//! | [`models`] | Catalog document types and operation results |
//! | [`store`] | Typed catalog store access and batched writes |
//! | [`tokenize`] | Text-to-tag tokenizer |
//! | [`tags`] | Tag composition and batched tag persistence |
//! | [`worker`] | Worker-pool series tagging |
//! | [`aggregate`] | Global tag-frequency index build |
//! | [`consolidate`] | Dataset codelist/concept consolidation |

pub mod aggregate;
pub mod config;
pub mod consolidate;
pub mod db;
pub mod migrate;
pub mod models;
pub mod store;
pub mod tags;
pub mod tokenize;
pub mod worker;
