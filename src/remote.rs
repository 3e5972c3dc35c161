use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::SyncError;
use crate::model::{Ack, ProductPage, PurchaseEvent};

const USER_AGENT: &str = "catalog-sync/0.1";

/// Connection settings for the marketplace API, injected at construction.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Operations the sync pipeline and purchase relay need from the marketplace.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<ProductPage, SyncError>;

    /// Push a purchase. Non-2xx statuses are reported through [`Ack`], not as errors.
    async fn send_purchase(&self, event: &PurchaseEvent) -> Result<Ack, SyncError>;
}

#[derive(Clone)]
pub struct RemoteCatalogClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for RemoteCatalogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCatalogClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RemoteCatalogClient {
    pub fn new(cfg: &RemoteConfig) -> Result<Self, SyncError> {
        let mut base = cfg.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| SyncError::Protocol(format!("invalid base url {base}: {e}")))?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("cannot build http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::Protocol(format!("invalid endpoint {path}: {e}")))
    }

    pub fn build_page_request(&self, page: u32) -> Result<reqwest::Request, SyncError> {
        let endpoint = self.endpoint("products")?;
        self.http
            .get(endpoint)
            .query(&[("page", page)])
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .build()
            .map_err(|e| SyncError::Protocol(format!("failed to build request: {e}")))
    }

    pub fn build_purchase_request(&self, body: &Value) -> Result<reqwest::Request, SyncError> {
        let endpoint = self.endpoint("purchases")?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .json(body)
            .build()
            .map_err(|e| SyncError::Protocol(format!("failed to build request: {e}")))
    }
}

#[async_trait]
impl CatalogApi for RemoteCatalogClient {
    async fn fetch_page(&self, page: u32) -> Result<ProductPage, SyncError> {
        let request = self.build_page_request(page)?;
        debug!(url = %request.url(), page, "fetching product page");
        let res = self.http.execute(request).await.map_err(transport_error)?;

        let status = res.status();
        let body = res.text().await.map_err(transport_error)?;
        check_status(status, &body)?;
        parse_page(&body)
    }

    async fn send_purchase(&self, event: &PurchaseEvent) -> Result<Ack, SyncError> {
        let body = purchase_payload(event);
        let request = self.build_purchase_request(&body)?;
        debug!(url = %request.url(), order_id = %event.order_id, "sending purchase");
        let res = self.http.execute(request).await.map_err(transport_error)?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            debug!(%status, body = %text, "purchase push not accepted");
        }
        Ok(Ack {
            accepted: status.is_success(),
            status_code: status.as_u16(),
        })
    }
}

fn transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Network(format!("request timed out: {err}"))
    } else {
        SyncError::Network(err.to_string())
    }
}

/// Map a non-success status onto the error taxonomy.
pub fn check_status(status: StatusCode, body: &str) -> Result<(), SyncError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Auth {
            status: status.as_u16(),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(SyncError::Network(format!(
            "rate limited by marketplace: {body}"
        ))),
        s if s.is_server_error() => Err(SyncError::Network(format!(
            "marketplace error {s}: {body}"
        ))),
        s => Err(SyncError::Protocol(format!(
            "unexpected status {s}: {body}"
        ))),
    }
}

/// Decode a product page body. `items` must be present and an array;
/// `has_more`/`hasMore` is optional and ignored unless it is a bool.
pub fn parse_page(body: &str) -> Result<ProductPage, SyncError> {
    let mut value: Value = serde_json::from_str(body)
        .map_err(|e| SyncError::Protocol(format!("response is not JSON: {e}")))?;
    let has_more = ["has_more", "hasMore"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_bool));
    let items = match value.get_mut("items").map(Value::take) {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(SyncError::Protocol("`items` is not an array".into())),
        None => return Err(SyncError::Protocol("response lacks `items`".into())),
    };
    Ok(ProductPage { items, has_more })
}

/// Outbound purchase body in the marketplace's wire format.
pub fn purchase_payload(event: &PurchaseEvent) -> Value {
    let items: Vec<Value> = event
        .lines
        .iter()
        .map(|line| {
            json!({
                "external_id": line.external_id,
                "qty": line.quantity,
                "price": line.unit_price,
            })
        })
        .collect();
    json!({
        "order_id": event.order_id,
        "total": event.total,
        "currency": event.currency,
        "items": items,
    })
}
