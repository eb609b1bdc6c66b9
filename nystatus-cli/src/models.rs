//! Records kept about monitored instances and upstream product releases

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status text of an instance or portal whose last check went fine
pub const STATUS_OK: &str = "OK";

/// Origin recorded for products first seen through an instance report
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Status text recorded when a remote could not be reached or answered garbage.
///
/// Always starts with "Can not connect" so listings can filter on it.
pub fn connection_failure_status(reason: &str) -> String {
    format!("Can not connect: {}", reason)
}

/// A monitored remote application deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Credential sent along with every remote call
    pub private_key: String,
    /// Whether "check all" should poll this instance
    pub revisit: bool,
    pub status: String,
    pub up_to_date: bool,
    pub no_products: i64,
    pub date_added: DateTime<Utc>,
    pub date_checked: Option<DateTime<Utc>>,
}

/// A product that has been reported by at least one instance or registered by hand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub origin: String,
    /// Highest version reported by any instance so far
    pub latest_found_version: Option<String>,
    /// Number of instances currently reporting this product
    pub use_count: i64,
    pub changelog_url: Option<String>,
    pub notes: String,
}

/// Link between an instance and a product it reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineProduct {
    pub id: i64,
    pub instance_id: i64,
    pub product_id: i64,
    /// Version as reported by the instance
    pub version: String,
    /// Product's latest known version at the time of the last sync
    pub latest_version: Option<String>,
}

/// A logical sub-site hosted within an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portal {
    pub id: i64,
    pub instance_id: i64,
    pub portal_name: String,
    pub url: String,
    pub no_errors: i64,
    pub status: String,
    pub date_checked: Option<DateTime<Utc>>,
}

/// A runtime error seen on a portal, deduplicated by (type, name, url)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: i64,
    pub portal_id: i64,
    pub error_type: String,
    pub error_name: String,
    pub url: String,
    pub traceback: String,
    pub count: i64,
    /// Set by hand, never cleared by a sync
    pub solved: bool,
    /// Last time the error was seen
    pub date: DateTime<Utc>,
    /// Newest timestamp the instance itself reported for this error
    pub reported_at: Option<DateTime<Utc>>,
}

/// Portal status text derived from its unsolved error count
pub fn portal_status(unsolved: i64) -> String {
    match unsolved {
        0 => STATUS_OK.to_string(),
        1 => "1 unsolved error".to_string(),
        n => format!("{} unsolved errors", n),
    }
}

static RELEASE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^r[1-9][0-9]*$").expect("release number pattern is valid"));

/// Rejected value at a store write boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("not a valid commit (revision) number: '{0}', expected r[1-9][0-9]* format")]
    ReleaseNumber(String),
}

/// Commit/revision identifier of a release, e.g. `r4521`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseNumber(String);

impl ReleaseNumber {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if RELEASE_NUMBER.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(ValidationError::ReleaseNumber(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ReleaseNumber {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReleaseNumber> for String {
    fn from(number: ReleaseNumber) -> Self {
        number.0
    }
}

impl std::fmt::Display for ReleaseNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One upstream release of a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: i64,
    pub product_id: i64,
    pub version: String,
    /// Release date; `None` while the version is still unreleased
    pub datev: Option<NaiveDate>,
    pub number: Option<ReleaseNumber>,
    pub author: Option<String>,
    pub message: Option<String>,
    pub changelog: String,
    /// Free-form notes, kept across changelog re-imports
    pub obs: String,
    pub update_info: String,
    pub requires_update: bool,
    pub doc_update: bool,
    pub datec: DateTime<Utc>,
}

impl Release {
    pub fn is_pending(&self) -> bool {
        self.datev.is_none()
    }

    /// The part of the release that a changelog import owns
    pub fn parsed_fields(&self) -> ReleaseFields {
        ReleaseFields {
            datev: self.datev,
            number: self.number.clone(),
            author: self.author.clone(),
            message: self.message.clone(),
            changelog: self.changelog.clone(),
        }
    }
}

/// Release fields derived from changelog text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseFields {
    pub datev: Option<NaiveDate>,
    pub number: Option<ReleaseNumber>,
    pub author: Option<String>,
    pub message: Option<String>,
    pub changelog: String,
}
