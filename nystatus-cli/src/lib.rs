//! Fleet monitoring for deployed product versions, portal errors and upstream
//! release notes.

pub mod api;
pub mod cli;
pub mod config;
pub mod models;
pub mod services;
