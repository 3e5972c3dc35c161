use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status written for every imported product (enabled).
pub const PRODUCT_STATUS_ENABLED: i64 = 1;
/// Product type written for every imported product.
pub const PRODUCT_TYPE: &str = "default";

/// One page of the remote product feed. Items are still untyped here.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductPage {
    pub items: Vec<Value>,
    pub has_more: Option<bool>,
}

/// A remote product that passed validation, ready to be written as one artifact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRecord {
    external_id: String,
    code: String,
    name: String,
    price: BigDecimal,
    currency: String,
    stock: u64,
    effective_start: NaiveDate,
}

impl ValidatedRecord {
    pub(crate) fn new(
        external_id: String,
        sku: String,
        name: String,
        price: BigDecimal,
        currency: String,
        stock: u64,
        effective_start: NaiveDate,
    ) -> Self {
        let code = local_code(&sku);
        Self {
            external_id,
            code,
            name,
            price,
            currency,
            stock,
            effective_start,
        }
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    /// Local catalog code the importer upserts by.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> &BigDecimal {
        &self.price
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn stock(&self) -> u64 {
        self.stock
    }

    pub fn effective_start(&self) -> NaiveDate {
        self.effective_start
    }

    /// Named artifact fields in column order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("code", self.code.clone()),
            ("label", self.name.clone()),
            ("status", PRODUCT_STATUS_ENABLED.to_string()),
            ("type", PRODUCT_TYPE.to_string()),
            ("stock", self.stock.to_string()),
            ("price", self.price.to_string()),
            ("currency", self.currency.clone()),
            ("date_start", self.effective_start.format("%Y-%m-%d").to_string()),
            ("external_id", self.external_id.clone()),
        ]
    }
}

/// Local catalog code derived from a remote SKU. The mapping is the identity
/// so distinct SKUs can never share a code.
pub fn local_code(sku: &str) -> String {
    sku.to_string()
}

/// A locally completed order to forward to the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub order_id: String,
    pub total: BigDecimal,
    pub currency: String,
    pub lines: Vec<PurchaseLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub external_id: String,
    pub quantity: u32,
    pub unit_price: BigDecimal,
}

/// Marketplace answer to a purchase push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub accepted: bool,
    pub status_code: u16,
}
