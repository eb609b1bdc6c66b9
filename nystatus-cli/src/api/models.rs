//! Typed payloads returned by monitored instances
//!
//! Raw JSON is validated here, at the fetch boundary, so the sync engines only
//! ever see well-formed values.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why a remote call produced nothing usable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected payload: {0}")]
    InvalidPayload(String),

    #[error("no source configured for {0}")]
    MissingSource(String),
}

/// One installed product as reported by an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedProduct {
    pub name: String,
    pub version: String,
}

impl ReportedProduct {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

/// One entry of a portal's error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(rename = "value", alias = "name")]
    pub error_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, alias = "tb_text")]
    pub traceback: String,
    /// When the error happened, if the instance said so
    #[serde(default, alias = "date", deserialize_with = "deserialize_timestamp")]
    pub time: Option<DateTime<Utc>>,
}

/// Parse a product list payload
pub fn parse_products(payload: &str) -> Result<Vec<ReportedProduct>, FetchFailure> {
    let products: Vec<ReportedProduct> = serde_json::from_str(payload)
        .map_err(|e| FetchFailure::InvalidPayload(format!("product list: {}", e)))?;

    if let Some(bad) = products.iter().find(|p| p.name.trim().is_empty()) {
        return Err(FetchFailure::InvalidPayload(format!(
            "product with empty name (version '{}')",
            bad.version
        )));
    }

    Ok(products)
}

/// Parse a portal list payload
pub fn parse_portals(payload: &str) -> Result<Vec<String>, FetchFailure> {
    let portals: Vec<String> = serde_json::from_str(payload)
        .map_err(|e| FetchFailure::InvalidPayload(format!("portal list: {}", e)))?;

    if portals.iter().any(|p| p.trim().is_empty()) {
        return Err(FetchFailure::InvalidPayload("empty portal name".to_string()));
    }

    Ok(portals)
}

/// Parse an error log payload
pub fn parse_errors(payload: &str) -> Result<Vec<ReportedError>, FetchFailure> {
    let errors: Vec<ReportedError> = serde_json::from_str(payload)
        .map_err(|e| FetchFailure::InvalidPayload(format!("error list: {}", e)))?;

    if errors.iter().any(|e| e.error_type.trim().is_empty()) {
        return Err(FetchFailure::InvalidPayload("error entry without a type".to_string()));
    }

    Ok(errors)
}

// Accepts RFC 3339, "YYYY-MM-DD HH:MM:SS", "YYYY/MM/DD HH:MM:SS" or epoch seconds.
// Anything else is treated as "no timestamp" rather than a broken payload.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            Utc.timestamp_opt(secs.trunc() as i64, 0).single()
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}
