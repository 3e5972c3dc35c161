//! Row models returned by catalog repositories.

use sqlx::FromRow;

/// A product as stored in the local catalog, keyed by `code`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CatalogProduct {
    pub code: String,
    pub label: String,
    pub status: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub stock: i64,
    pub price: String,
    pub currency: String,
    pub date_start: String,
}

/// Link between a marketplace product and its local catalog code.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Mapping {
    pub external_id: String,
    pub code: String,
}
