//! Local catalog store: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions (pool setup, upserts, lookups).
//!
//! External modules import from `catalog_sync::db`; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{CatalogProduct, Mapping};
