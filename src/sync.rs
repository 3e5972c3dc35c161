//! Sync orchestration: paginate the remote feed, validate, write one artifact
//! and hand it to the catalog importer.
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::artifact::ArtifactWriter;
use crate::error::SyncError;
use crate::import::{CatalogImporter, ImportResult};
use crate::model::{ProductPage, ValidatedRecord};
use crate::remote::CatalogApi;
use crate::validate::validate;

/// Bounded exponential backoff for transient page-fetch failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// How a completed run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The feed had no valid records; nothing was written or imported.
    NoOp { run_id: String, pages: u32 },
    Imported {
        run_id: String,
        pages: u32,
        rows: usize,
        result: ImportResult,
    },
}

/// State of one in-flight run. Never outlives `run_sync`.
#[derive(Debug)]
struct SyncRun {
    run_id: String,
    run_date: NaiveDate,
    cursor: u32,
    records: Vec<ValidatedRecord>,
    by_code: HashMap<String, usize>,
    rejected: usize,
    done: bool,
}

impl SyncRun {
    fn new(started_at: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            run_id: format!("{}-{}", started_at.format("%Y%m%dT%H%M%S"), &suffix[..8]),
            run_date: started_at.date_naive(),
            cursor: 1,
            records: Vec::new(),
            by_code: HashMap::new(),
            rejected: 0,
            done: false,
        }
    }

    /// Validate one fetched page into the accumulation and advance the cursor.
    fn absorb(&mut self, page: ProductPage) {
        if page.items.is_empty() {
            self.done = true;
            return;
        }
        for item in &page.items {
            match validate(item, self.run_date) {
                Ok(record) => self.push(record),
                Err(reason) => {
                    self.rejected += 1;
                    warn!(
                        run_id = %self.run_id,
                        page = self.cursor,
                        %reason,
                        item = %item,
                        "skipping invalid product"
                    );
                }
            }
        }
        if page.has_more == Some(false) {
            self.done = true;
        }
        self.cursor += 1;
    }

    fn push(&mut self, record: ValidatedRecord) {
        match self.by_code.get(record.code()) {
            // Later duplicates overwrite in place so row order stays stable.
            Some(&idx) => self.records[idx] = record,
            None => {
                self.by_code
                    .insert(record.code().to_string(), self.records.len());
                self.records.push(record);
            }
        }
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SyncOrchestrator {
    api: Arc<dyn CatalogApi>,
    writer: ArtifactWriter,
    importer: Arc<dyn CatalogImporter>,
    retry: RetryPolicy,
    in_flight: Mutex<()>,
    clock: Clock,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn CatalogApi>,
        writer: ArtifactWriter,
        importer: Arc<dyn CatalogImporter>,
    ) -> Self {
        Self {
            api,
            writer,
            importer,
            retry: RetryPolicy::default(),
            in_flight: Mutex::new(()),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Whether a run is currently executing.
    pub fn is_running(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Execute one full run. Returns [`SyncError::AlreadyRunning`] instead of
    /// starting a second run while one is in flight.
    pub async fn run_sync(&self) -> Result<SyncOutcome, SyncError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;

        let mut run = SyncRun::new((self.clock)());
        self.execute(&mut run).await
    }

    #[instrument(skip_all, fields(run_id = %run.run_id))]
    async fn execute(&self, run: &mut SyncRun) -> Result<SyncOutcome, SyncError> {
        info!("starting catalog sync");
        let mut pages = 0u32;

        while !run.done {
            let page = match self.fetch_with_retry(run.cursor).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(?err, page = run.cursor, "aborting sync run");
                    return Err(err);
                }
            };
            pages += 1;
            run.absorb(page);
        }

        if run.records.is_empty() {
            info!(pages, rejected = run.rejected, "no valid products in feed; nothing to import");
            return Ok(SyncOutcome::NoOp {
                run_id: run.run_id.clone(),
                pages,
            });
        }

        let records = std::mem::take(&mut run.records);
        let artifact = self
            .writer
            .write_async(run.run_id.clone(), records)
            .await
            .map_err(|err| {
                warn!(?err, "failed to write import artifact");
                SyncError::from(err)
            })?;
        info!(
            rows = artifact.rows(),
            path = %artifact.path().display(),
            "artifact written; invoking importer"
        );

        let result = self.importer.apply(&artifact).await;
        let rows = artifact.rows();
        if let Err(err) = artifact.dispose() {
            warn!(?err, "failed to delete import artifact");
        }
        let result = result.map_err(|err| {
            warn!(?err, "catalog import failed");
            SyncError::from(err)
        })?;

        info!(pages, rows, rejected = run.rejected, "catalog sync completed");
        Ok(SyncOutcome::Imported {
            run_id: run.run_id.clone(),
            pages,
            rows,
            result,
        })
    }

    async fn fetch_with_retry(&self, page: u32) -> Result<ProductPage, SyncError> {
        let mut attempt = 1u32;
        loop {
            match self.api.fetch_page(page).await {
                Ok(p) => return Ok(p),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(?err, page, attempt, ?delay, "page fetch failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
