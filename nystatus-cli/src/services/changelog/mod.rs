//! Changelog parsing and release import

pub mod client;
pub mod parser;

pub use client::{ChangelogImportReport, update_changelog};
pub use parser::{ChangelogError, ChangelogParser, ChangelogSegment};
