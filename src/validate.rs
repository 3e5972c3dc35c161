//! Per-item schema validation of raw remote product records.
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::model::ValidatedRecord;

pub const MAX_NAME_CHARS: usize = 255;
/// Most fractional digits a price may carry after trailing zeros are dropped.
pub const MAX_PRICE_SCALE: i64 = 4;
/// Most digits a price may have before the decimal point.
pub const MAX_PRICE_INTEGER_DIGITS: i64 = 15;
/// Largest stock the local catalog can store (signed 64-bit column).
pub const MAX_STOCK: u64 = i64::MAX as u64;

static CURRENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]{3}$").expect("valid currency regex"));

/// Why a raw record was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotAnObject,
    Missing(&'static str),
    WrongType(&'static str),
    EmptySku,
    NameTooLong(usize),
    NegativePrice,
    PriceOutOfRange,
    BadCurrency(String),
    BadStock,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotAnObject => write!(f, "item is not an object"),
            Rejection::Missing(field) => write!(f, "missing field `{field}`"),
            Rejection::WrongType(field) => write!(f, "field `{field}` has the wrong type"),
            Rejection::EmptySku => write!(f, "sku is empty"),
            Rejection::NameTooLong(n) => {
                write!(f, "name has {n} characters (max {MAX_NAME_CHARS})")
            }
            Rejection::NegativePrice => write!(f, "price is negative"),
            Rejection::PriceOutOfRange => write!(
                f,
                "price needs more than {MAX_PRICE_INTEGER_DIGITS} integer or {MAX_PRICE_SCALE} fractional digits"
            ),
            Rejection::BadCurrency(c) => write!(f, "currency `{c}` is not a 3-letter code"),
            Rejection::BadStock => write!(f, "stock is not an integer in 0..={MAX_STOCK}"),
        }
    }
}

impl std::error::Error for Rejection {}

/// Validate and normalize one raw feed item.
pub fn validate(raw: &Value, run_date: NaiveDate) -> Result<ValidatedRecord, Rejection> {
    let obj = raw.as_object().ok_or(Rejection::NotAnObject)?;

    let external_id = match present(obj.get("id")).ok_or(Rejection::Missing("id"))? {
        Value::String(s) if !s.trim().is_empty() => s.clone(),
        Value::String(_) => return Err(Rejection::Missing("id")),
        Value::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
        _ => return Err(Rejection::WrongType("id")),
    };

    let sku = match present(obj.get("sku")).ok_or(Rejection::Missing("sku"))? {
        Value::String(s) if s.trim().is_empty() => return Err(Rejection::EmptySku),
        Value::String(s) => s.clone(),
        _ => return Err(Rejection::WrongType("sku")),
    };

    let name = match present(obj.get("name")).ok_or(Rejection::Missing("name"))? {
        Value::String(s) => s.clone(),
        _ => return Err(Rejection::WrongType("name")),
    };
    let name_len = name.chars().count();
    if name_len > MAX_NAME_CHARS {
        return Err(Rejection::NameTooLong(name_len));
    }

    let price = parse_price(present(obj.get("price")).ok_or(Rejection::Missing("price"))?)?;

    let currency = match present(obj.get("currency")).ok_or(Rejection::Missing("currency"))? {
        Value::String(s) if CURRENCY_RE.is_match(s) => s.to_ascii_uppercase(),
        Value::String(s) => return Err(Rejection::BadCurrency(s.clone())),
        _ => return Err(Rejection::WrongType("currency")),
    };

    let stock = match present(obj.get("stock")) {
        None => 0,
        Some(v) => v
            .as_u64()
            .filter(|stock| *stock <= MAX_STOCK)
            .ok_or(Rejection::BadStock)?,
    };

    Ok(ValidatedRecord::new(
        external_id,
        sku,
        name,
        price,
        currency,
        stock,
        run_date,
    ))
}

/// Treat JSON `null` the same as an absent key.
fn present(v: Option<&Value>) -> Option<&Value> {
    v.filter(|v| !v.is_null())
}

fn parse_price(v: &Value) -> Result<BigDecimal, Rejection> {
    let text = match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Err(Rejection::WrongType("price")),
    };
    let price = BigDecimal::from_str(&text).map_err(|_| Rejection::WrongType("price"))?;
    if price < BigDecimal::zero() {
        return Err(Rejection::NegativePrice);
    }
    plain_price(price)
}

/// Bring a price into a form that renders as a plain decimal (no exponent),
/// rejecting magnitudes or precisions the catalog cannot hold.
fn plain_price(price: BigDecimal) -> Result<BigDecimal, Rejection> {
    let mut price = price;
    if price.as_bigint_and_exponent().1 > MAX_PRICE_SCALE {
        price = price.normalized();
    }
    let scale = price.as_bigint_and_exponent().1;
    if scale < -MAX_PRICE_INTEGER_DIGITS {
        return Err(Rejection::PriceOutOfRange);
    }
    if scale < 0 {
        price = price.with_scale(0);
    }

    let (digits, scale) = price.as_bigint_and_exponent();
    let total_digits = digits.magnitude().to_string().len() as i64;
    if scale > MAX_PRICE_SCALE || total_digits - scale > MAX_PRICE_INTEGER_DIGITS {
        return Err(Rejection::PriceOutOfRange);
    }
    Ok(price)
}
