use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::instrument;

use crate::db::model::{CatalogProduct, Mapping};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open catalog database")?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure its parent
/// directory exists. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Insert or update a catalog product by `code`.
pub async fn upsert_product_tx(
    tx: &mut Transaction<'_, Sqlite>,
    product: &CatalogProduct,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO products (code, label, status, type, stock, price, currency, date_start)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(code) DO UPDATE SET
            label = excluded.label,
            status = excluded.status,
            type = excluded.type,
            stock = excluded.stock,
            price = excluded.price,
            currency = excluded.currency,
            date_start = excluded.date_start,
            updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&product.code)
    .bind(&product.label)
    .bind(product.status)
    .bind(&product.kind)
    .bind(product.stock)
    .bind(&product.price)
    .bind(&product.currency)
    .bind(&product.date_start)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Point `external_id` at `code`, replacing any previous mapping.
pub async fn upsert_mapping_tx(
    tx: &mut Transaction<'_, Sqlite>,
    external_id: &str,
    code: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO mappings (external_id, code) VALUES (?, ?)
         ON CONFLICT(external_id) DO UPDATE SET code = excluded.code, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(external_id)
    .bind(code)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_product(pool: &Pool, code: &str) -> Result<Option<CatalogProduct>> {
    let row = sqlx::query_as::<_, CatalogProduct>(
        "SELECT code, label, status, type, stock, price, currency, date_start FROM products WHERE code = ?",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[instrument(skip_all)]
pub async fn get_mapping(pool: &Pool, external_id: &str) -> Result<Option<Mapping>> {
    let row = sqlx::query_as::<_, Mapping>(
        "SELECT external_id, code FROM mappings WHERE external_id = ?",
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn count_products(pool: &Pool) -> Result<i64> {
    let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(pool)
        .await?;
    Ok(cnt)
}
