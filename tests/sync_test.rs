use anyhow::Result;
use async_trait::async_trait;
use catalog_sync::artifact::{read_artifact, ArtifactContents, ArtifactWriter, ImportArtifact};
use catalog_sync::import::{CatalogImporter, ImportResult};
use catalog_sync::model::{Ack, ProductPage, PurchaseEvent};
use catalog_sync::remote::CatalogApi;
use catalog_sync::{ImportError, RetryPolicy, SyncError, SyncOrchestrator, SyncOutcome};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::{Mutex, Notify};

#[derive(Clone, Default)]
struct ScriptedCatalog {
    pages: Arc<Mutex<VecDeque<Result<ProductPage, SyncError>>>>,
    fetch_calls: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedCatalog {
    fn with_pages(pages: Vec<Result<ProductPage, SyncError>>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(VecDeque::from(pages))),
            ..Default::default()
        }
    }

    async fn fetch_calls(&self) -> Vec<u32> {
        self.fetch_calls.lock().await.clone()
    }

    async fn remaining(&self) -> usize {
        self.pages.lock().await.len()
    }
}

#[async_trait]
impl CatalogApi for ScriptedCatalog {
    async fn fetch_page(&self, page: u32) -> Result<ProductPage, SyncError> {
        self.fetch_calls.lock().await.push(page);
        self.pages
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(page_of(vec![])))
    }

    async fn send_purchase(&self, _event: &PurchaseEvent) -> Result<Ack, SyncError> {
        Ok(Ack {
            accepted: true,
            status_code: 200,
        })
    }
}

#[derive(Clone, Default)]
struct RecordingImporter {
    applied: Arc<Mutex<Vec<(PathBuf, ArtifactContents)>>>,
    fail: bool,
}

impl RecordingImporter {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    async fn applied(&self) -> Vec<(PathBuf, ArtifactContents)> {
        self.applied.lock().await.clone()
    }
}

#[async_trait]
impl CatalogImporter for RecordingImporter {
    async fn apply(&self, artifact: &ImportArtifact) -> Result<ImportResult, ImportError> {
        let contents = read_artifact(artifact.path()).expect("artifact readable during import");
        let rows = contents.rows.len();
        self.applied
            .lock()
            .await
            .push((artifact.path().to_path_buf(), contents));
        if self.fail {
            return Err(ImportError::Rejected("duplicate code".into()));
        }
        Ok(ImportResult { rows_applied: rows })
    }
}

fn item(id: &str, sku: &str, name: &str) -> Value {
    json!({"id": id, "sku": sku, "name": name, "price": "19.99", "currency": "USD", "stock": 5})
}

fn page_of(items: Vec<Value>) -> ProductPage {
    ProductPage {
        items,
        has_more: None,
    }
}

fn orchestrator(
    catalog: &ScriptedCatalog,
    importer: &RecordingImporter,
    dir: &Path,
) -> SyncOrchestrator {
    SyncOrchestrator::new(
        Arc::new(catalog.clone()),
        ArtifactWriter::new(dir),
        Arc::new(importer.clone()),
    )
    .with_retry(RetryPolicy::none())
    .with_clock(|| Utc.with_ymd_and_hms(2025, 11, 11, 10, 0, 0).unwrap())
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn invalid_item_is_skipped_and_two_fetches_are_made() -> Result<()> {
    let td = tempdir()?;
    let mut missing_sku = item("3", "x", "no sku");
    missing_sku.as_object_mut().unwrap().remove("sku");
    let catalog = ScriptedCatalog::with_pages(vec![
        Ok(page_of(vec![item("1", "SKU-1", "One"), missing_sku, item("2", "SKU-2", "Two")])),
        Ok(page_of(vec![])),
    ]);
    let importer = RecordingImporter::default();

    let outcome = orchestrator(&catalog, &importer, td.path()).run_sync().await?;

    match outcome {
        SyncOutcome::Imported { pages, rows, result, .. } => {
            assert_eq!(pages, 2);
            assert_eq!(rows, 2);
            assert_eq!(result.rows_applied, 2);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(catalog.fetch_calls().await, vec![1, 2]);

    let applied = importer.applied().await;
    assert_eq!(applied.len(), 1);
    let (path, contents) = &applied[0];
    assert_eq!(contents.rows.len(), 2);
    assert_eq!(contents.rows[0][0], "SKU-1");
    assert_eq!(contents.rows[1][0], "SKU-2");
    assert!(contents.rows.iter().all(|r| r[8] != "3"));

    // Artifact is gone once the importer returned.
    assert!(!path.exists());
    assert!(dir_is_empty(td.path()));
    Ok(())
}

#[tokio::test]
async fn pagination_stops_at_first_empty_page() -> Result<()> {
    let td = tempdir()?;
    let catalog = ScriptedCatalog::with_pages(vec![
        Ok(page_of(vec![item("1", "A", "a")])),
        Ok(page_of(vec![item("2", "B", "b")])),
        Ok(page_of(vec![item("3", "C", "c")])),
        Ok(page_of(vec![])),
        Ok(page_of(vec![item("4", "D", "never fetched")])),
    ]);
    let importer = RecordingImporter::default();

    orchestrator(&catalog, &importer, td.path()).run_sync().await?;

    assert_eq!(catalog.fetch_calls().await, vec![1, 2, 3, 4]);
    assert_eq!(catalog.remaining().await, 1);
    let applied = importer.applied().await;
    assert_eq!(applied[0].1.rows.len(), 3);
    Ok(())
}

#[tokio::test]
async fn has_more_false_ends_pagination_without_extra_request() -> Result<()> {
    let td = tempdir()?;
    let catalog = ScriptedCatalog::with_pages(vec![Ok(ProductPage {
        items: vec![item("1", "A", "a")],
        has_more: Some(false),
    })]);
    let importer = RecordingImporter::default();

    orchestrator(&catalog, &importer, td.path()).run_sync().await?;

    assert_eq!(catalog.fetch_calls().await, vec![1]);
    assert_eq!(importer.applied().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn zero_valid_records_is_a_noop() -> Result<()> {
    let td = tempdir()?;
    let catalog = ScriptedCatalog::with_pages(vec![
        Ok(page_of(vec![json!({"id": "1"}), json!("garbage")])),
        Ok(page_of(vec![])),
    ]);
    let importer = RecordingImporter::default();

    let outcome = orchestrator(&catalog, &importer, td.path()).run_sync().await?;

    assert!(matches!(outcome, SyncOutcome::NoOp { pages: 2, .. }));
    assert!(importer.applied().await.is_empty());
    assert!(dir_is_empty(td.path()));
    Ok(())
}

#[tokio::test]
async fn rerun_on_unchanged_feed_is_deterministic() -> Result<()> {
    let td = tempdir()?;
    let feed = || {
        vec![
            Ok(page_of(vec![item("1", "A", "Alpha, Inc."), item("2", "B", "say \"b\"")])),
            Ok(page_of(vec![item("3", "C", "Gamma")])),
            Ok(page_of(vec![])),
        ]
    };
    let importer = RecordingImporter::default();

    let first = ScriptedCatalog::with_pages(feed());
    orchestrator(&first, &importer, td.path()).run_sync().await?;
    let second = ScriptedCatalog::with_pages(feed());
    orchestrator(&second, &importer, td.path()).run_sync().await?;

    let applied = importer.applied().await;
    assert_eq!(applied.len(), 2);
    assert_ne!(applied[0].0, applied[1].0);
    assert_eq!(applied[0].1, applied[1].1);
    assert_eq!(applied[0].1.rows[0][7], "2025-11-11");
    Ok(())
}

#[tokio::test]
async fn auth_error_after_first_page_aborts_without_import() -> Result<()> {
    let td = tempdir()?;
    let catalog = ScriptedCatalog::with_pages(vec![
        Ok(page_of(vec![item("1", "A", "a")])),
        Err(SyncError::Auth { status: 401 }),
    ]);
    let importer = RecordingImporter::default();

    let err = orchestrator(&catalog, &importer, td.path())
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        })
        .run_sync()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Auth { status: 401 }));
    // Auth failures are never retried.
    assert_eq!(catalog.fetch_calls().await, vec![1, 2]);
    assert!(importer.applied().await.is_empty());
    assert!(dir_is_empty(td.path()));
    Ok(())
}

#[tokio::test]
async fn network_error_after_first_page_aborts_without_import() -> Result<()> {
    let td = tempdir()?;
    let catalog = ScriptedCatalog::with_pages(vec![
        Ok(page_of(vec![item("1", "A", "a")])),
        Ok(page_of(vec![item("2", "B", "b")])),
        Err(SyncError::Network("connection reset".into())),
    ]);
    let importer = RecordingImporter::default();

    let err = orchestrator(&catalog, &importer, td.path())
        .run_sync()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(catalog.fetch_calls().await, vec![1, 2, 3]);
    assert!(importer.applied().await.is_empty());
    assert!(dir_is_empty(td.path()));
    Ok(())
}

#[tokio::test]
async fn protocol_error_aborts_run() -> Result<()> {
    let td = tempdir()?;
    let catalog = ScriptedCatalog::with_pages(vec![Err(SyncError::Protocol(
        "response lacks `items`".into(),
    ))]);
    let importer = RecordingImporter::default();

    let err = orchestrator(&catalog, &importer, td.path())
        .run_sync()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Protocol(_)));
    assert!(importer.applied().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn transient_network_errors_are_retried() -> Result<()> {
    let td = tempdir()?;
    let catalog = ScriptedCatalog::with_pages(vec![
        Err(SyncError::Network("timeout".into())),
        Err(SyncError::Network("timeout".into())),
        Ok(page_of(vec![item("1", "A", "a")])),
        Ok(page_of(vec![])),
    ]);
    let importer = RecordingImporter::default();

    let outcome = orchestrator(&catalog, &importer, td.path())
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        })
        .run_sync()
        .await?;

    assert!(matches!(outcome, SyncOutcome::Imported { rows: 1, .. }));
    assert_eq!(catalog.fetch_calls().await, vec![1, 1, 1, 2]);
    Ok(())
}

#[tokio::test]
async fn retries_are_bounded() -> Result<()> {
    let td = tempdir()?;
    let catalog = ScriptedCatalog::with_pages(vec![
        Err(SyncError::Network("down".into())),
        Err(SyncError::Network("down".into())),
        Ok(page_of(vec![item("1", "A", "a")])),
    ]);
    let importer = RecordingImporter::default();

    let err = orchestrator(&catalog, &importer, td.path())
        .with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        })
        .run_sync()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(catalog.fetch_calls().await, vec![1, 1]);
    Ok(())
}

#[tokio::test]
async fn import_failure_is_surfaced_and_artifact_removed() -> Result<()> {
    let td = tempdir()?;
    let catalog = ScriptedCatalog::with_pages(vec![
        Ok(page_of(vec![item("1", "A", "a")])),
        Ok(page_of(vec![])),
    ]);
    let importer = RecordingImporter::failing();

    let err = orchestrator(&catalog, &importer, td.path())
        .run_sync()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Import(ImportError::Rejected(_))));
    assert_eq!(importer.applied().await.len(), 1);
    assert!(dir_is_empty(td.path()));
    Ok(())
}

#[tokio::test]
async fn unwritable_artifact_dir_aborts_before_import() -> Result<()> {
    let td = tempdir()?;
    let missing = td.path().join("does-not-exist");
    let catalog = ScriptedCatalog::with_pages(vec![
        Ok(page_of(vec![item("1", "A", "a")])),
        Ok(page_of(vec![])),
    ]);
    let importer = RecordingImporter::default();

    let err = orchestrator(&catalog, &importer, &missing)
        .run_sync()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Artifact(_)));
    assert!(importer.applied().await.is_empty());
    Ok(())
}

/// Blocks the first page fetch until released.
struct GatedCatalog {
    gate: Arc<Notify>,
    entered: Arc<Notify>,
}

#[async_trait]
impl CatalogApi for GatedCatalog {
    async fn fetch_page(&self, _page: u32) -> Result<ProductPage, SyncError> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(page_of(vec![]))
    }

    async fn send_purchase(&self, _event: &PurchaseEvent) -> Result<Ack, SyncError> {
        unreachable!("not used")
    }
}

#[tokio::test]
async fn overlapping_run_is_rejected() -> Result<()> {
    let td = tempdir()?;
    let gate = Arc::new(Notify::new());
    let entered = Arc::new(Notify::new());
    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::new(GatedCatalog {
            gate: gate.clone(),
            entered: entered.clone(),
        }),
        ArtifactWriter::new(td.path()),
        Arc::new(RecordingImporter::default()),
    ));

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_sync().await }
    });
    entered.notified().await;

    assert!(orchestrator.is_running());
    let second = orchestrator.run_sync().await;
    assert!(matches!(second, Err(SyncError::AlreadyRunning)));

    gate.notify_one();
    let first = first.await??;
    assert!(matches!(first, SyncOutcome::NoOp { pages: 1, .. }));
    assert!(!orchestrator.is_running());
    Ok(())
}
