pub mod artifact;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod model;
pub mod relay;
pub mod remote;
pub mod sync;
pub mod validate;
pub mod worker;

pub use error::{ArtifactError, ImportError, RelayError, SyncError};
pub use relay::{PurchaseRelay, RelayOutcome};
pub use sync::{RetryPolicy, SyncOrchestrator, SyncOutcome};
