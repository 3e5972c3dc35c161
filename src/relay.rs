//! Purchase relay: forward completed orders to the marketplace and request a
//! catalog resync when the marketplace accepts them.
//!
//! The relay never returns an error to the order flow. Every path ends in a
//! [`RelayOutcome`], which callers may log or ignore.
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::error::RelayError;
use crate::model::PurchaseEvent;
use crate::remote::CatalogApi;
use crate::worker::{ResyncTrigger, TriggerStatus};

#[derive(Debug)]
pub enum RelayOutcome {
    /// Marketplace accepted the purchase and a resync was requested.
    Delivered {
        order_id: String,
        status_code: u16,
        resync: TriggerStatus,
    },
    Failed {
        order_id: String,
        error: RelayError,
    },
}

impl RelayOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RelayOutcome::Delivered { .. })
    }
}

pub struct PurchaseRelay {
    api: Arc<dyn CatalogApi>,
    resync: Arc<dyn ResyncTrigger>,
}

impl PurchaseRelay {
    pub fn new(api: Arc<dyn CatalogApi>, resync: Arc<dyn ResyncTrigger>) -> Self {
        Self { api, resync }
    }

    /// Relay on a separate task so a slow marketplace cannot stall checkout.
    pub fn dispatch(self: Arc<Self>, event: PurchaseEvent) -> JoinHandle<RelayOutcome> {
        tokio::spawn(async move { self.relay(&event).await })
    }

    #[instrument(skip_all, fields(order_id = %event.order_id))]
    pub async fn relay(&self, event: &PurchaseEvent) -> RelayOutcome {
        match self.deliver(event).await {
            Ok((status_code, resync)) => {
                info!(status_code, ?resync, "purchase relayed to marketplace");
                RelayOutcome::Delivered {
                    order_id: event.order_id.clone(),
                    status_code,
                    resync,
                }
            }
            Err(err) => {
                error!(?err, "purchase relay failed");
                RelayOutcome::Failed {
                    order_id: event.order_id.clone(),
                    error: err,
                }
            }
        }
    }

    async fn deliver(&self, event: &PurchaseEvent) -> Result<(u16, TriggerStatus), RelayError> {
        check_event(event)?;

        let ack = self.api.send_purchase(event).await.map_err(RelayError::Push)?;
        if !ack.accepted {
            return Err(RelayError::Rejected(ack.status_code));
        }

        let resync = self.resync.request().map_err(|err| {
            warn!(?err, "purchase delivered but resync could not be requested");
            RelayError::Resync(err.to_string())
        })?;
        Ok((ack.status_code, resync))
    }
}

fn check_event(event: &PurchaseEvent) -> Result<(), RelayError> {
    if event.order_id.trim().is_empty() {
        return Err(RelayError::InvalidEvent("order id is empty"));
    }
    if event.lines.is_empty() {
        return Err(RelayError::InvalidEvent("order has no lines"));
    }
    if event
        .lines
        .iter()
        .any(|line| line.external_id.trim().is_empty())
    {
        return Err(RelayError::InvalidEvent("line without external id"));
    }
    if event.lines.iter().any(|line| line.quantity == 0) {
        return Err(RelayError::InvalidEvent("line with zero quantity"));
    }
    Ok(())
}
