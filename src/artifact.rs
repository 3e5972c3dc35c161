//! CSV bulk-import artifacts.
//!
//! An [`ImportArtifact`] owns its file on disk: dropping the artifact deletes
//! the file, so every exit path of a run releases it.
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::error::ArtifactError;
use crate::model::ValidatedRecord;

/// Writes validated records into a uniquely named CSV file under `dir`.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

#[derive(Debug)]
pub struct ImportArtifact {
    run_id: String,
    columns: Vec<String>,
    rows: usize,
    file: NamedTempFile,
}

impl ImportArtifact {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Delete the artifact now instead of waiting for drop.
    pub fn dispose(self) -> std::io::Result<()> {
        self.file.close()
    }
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// [`ArtifactWriter::write`] on the blocking thread pool, for async callers.
    pub async fn write_async(
        &self,
        run_id: String,
        records: Vec<ValidatedRecord>,
    ) -> Result<ImportArtifact, ArtifactError> {
        let writer = self.clone();
        tokio::task::spawn_blocking(move || writer.write(&run_id, &records))
            .await
            .map_err(|err| ArtifactError::Task(err.to_string()))?
    }

    #[instrument(skip_all, fields(run_id = %run_id, records = records.len()))]
    pub fn write(
        &self,
        run_id: &str,
        records: &[ValidatedRecord],
    ) -> Result<ImportArtifact, ArtifactError> {
        let first = records.first().ok_or(ArtifactError::Empty)?;
        let columns: Vec<String> = first
            .fields()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect();

        let file = tempfile::Builder::new()
            .prefix(&format!("catalog_import_{run_id}_"))
            .suffix(".csv")
            .tempfile_in(&self.dir)
            .map_err(|source| self.io_error(source))?;

        let handle = file.reopen().map_err(|source| self.io_error(source))?;
        let mut wtr = csv::Writer::from_writer(BufWriter::new(handle));
        wtr.write_record(&columns)?;
        for record in records {
            let fields = record.fields();
            let row = columns.iter().map(|col| {
                fields
                    .iter()
                    .find(|(name, _)| name == col)
                    .map(|(_, value)| value.as_str())
                    .unwrap_or_default()
            });
            wtr.write_record(row)?;
        }
        wtr.flush().map_err(|source| self.io_error(source))?;

        debug!(path = %file.path().display(), "artifact written");
        Ok(ImportArtifact {
            run_id: run_id.to_string(),
            columns,
            rows: records.len(),
            file,
        })
    }

    fn io_error(&self, source: std::io::Error) -> ArtifactError {
        ArtifactError::Io {
            dir: self.dir.clone(),
            source,
        }
    }
}

/// Parsed artifact contents: header plus data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactContents {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Read an artifact back from disk.
pub fn read_artifact(path: &Path) -> Result<ArtifactContents, csv::Error> {
    let mut rdr = csv::Reader::from_reader(File::open(path)?);
    let header = rdr.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for rec in rdr.records() {
        rows.push(rec?.iter().map(str::to_string).collect());
    }
    Ok(ArtifactContents { header, rows })
}
