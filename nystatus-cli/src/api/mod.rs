//! Remote instance and changelog access
//!
//! Fetches product, portal and error lists from monitored instances and raw
//! changelog text from upstream, converting every payload into typed values.

pub mod client;
pub mod models;

pub use client::{ChangelogSource, HttpFetcher, InstanceFetcher};
pub use models::{FetchFailure, ReportedError, ReportedProduct};
