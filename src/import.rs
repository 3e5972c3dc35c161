//! Boundary adapters to the local catalog importer.
//!
//! The sync pipeline only knows [`CatalogImporter`]. Two implementations ship
//! with the crate: [`CommandImporter`] hands the artifact path to an external
//! program, [`SqliteCatalogImporter`] upserts rows into a SQLite catalog.
use async_trait::async_trait;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::artifact::ImportArtifact;
use crate::db::{self, CatalogProduct, Pool};
use crate::error::ImportError;

/// What the importer reported back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    pub rows_applied: usize,
}

#[async_trait]
pub trait CatalogImporter: Send + Sync {
    async fn apply(&self, artifact: &ImportArtifact) -> Result<ImportResult, ImportError>;
}

/// Runs `program args... <artifact path>`; exit status 0 means success.
#[derive(Debug, Clone)]
pub struct CommandImporter {
    program: String,
    args: Vec<String>,
}

impl CommandImporter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl CatalogImporter for CommandImporter {
    #[instrument(skip_all, fields(run_id = %artifact.run_id(), program = %self.program))]
    async fn apply(&self, artifact: &ImportArtifact) -> Result<ImportResult, ImportError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(artifact.path().as_os_str())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ImportError::Unavailable(format!("failed to spawn {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ImportError::Rejected(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        debug!(stdout = %String::from_utf8_lossy(&output.stdout).trim(), "importer finished");
        Ok(ImportResult {
            rows_applied: artifact.rows(),
        })
    }
}

/// One artifact row as the importer reads it back.
#[derive(Debug, Deserialize)]
struct ArtifactRow {
    code: String,
    label: String,
    status: i64,
    #[serde(rename = "type")]
    kind: String,
    stock: i64,
    price: String,
    currency: String,
    date_start: String,
    #[serde(default)]
    external_id: Option<String>,
}

/// Upserts artifact rows into the SQLite catalog by `code` and records the
/// external id mapping, all in one transaction.
#[derive(Debug, Clone)]
pub struct SqliteCatalogImporter {
    pool: Pool,
}

impl SqliteCatalogImporter {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Parse the artifact on the blocking thread pool.
    async fn load_rows(artifact: &ImportArtifact) -> Result<Vec<ArtifactRow>, ImportError> {
        let path = artifact.path().to_path_buf();
        let reader_path = path.clone();
        tokio::task::spawn_blocking(move || Self::read_rows(&reader_path))
            .await
            .map_err(|err| ImportError::Artifact {
                path,
                reason: format!("reader task failed: {err}"),
            })?
    }

    fn read_rows(path: &Path) -> Result<Vec<ArtifactRow>, ImportError> {
        let bad = |reason: String| ImportError::Artifact {
            path: PathBuf::from(path),
            reason,
        };
        let file = File::open(path).map_err(|e| bad(e.to_string()))?;
        let mut rdr = csv::Reader::from_reader(file);
        rdr.deserialize()
            .collect::<Result<Vec<ArtifactRow>, csv::Error>>()
            .map_err(|e| bad(e.to_string()))
    }
}

#[async_trait]
impl CatalogImporter for SqliteCatalogImporter {
    #[instrument(skip_all, fields(run_id = %artifact.run_id()))]
    async fn apply(&self, artifact: &ImportArtifact) -> Result<ImportResult, ImportError> {
        let rows = Self::load_rows(artifact).await?;

        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;
        for row in &rows {
            let product = CatalogProduct {
                code: row.code.clone(),
                label: row.label.clone(),
                status: row.status,
                kind: row.kind.clone(),
                stock: row.stock,
                price: row.price.clone(),
                currency: row.currency.clone(),
                date_start: row.date_start.clone(),
            };
            db::upsert_product_tx(&mut tx, &product).await?;
            if let Some(external_id) = row.external_id.as_deref().filter(|s| !s.is_empty()) {
                db::upsert_mapping_tx(&mut tx, external_id, &row.code).await?;
            }
        }
        tx.commit().await.map_err(anyhow::Error::from)?;

        info!(rows = rows.len(), "catalog upsert committed");
        Ok(ImportResult {
            rows_applied: rows.len(),
        })
    }
}
