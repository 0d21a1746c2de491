//! PriceDrop Library
//!
//! Grocery price tracking with idempotent price-drop detection and alert dispatch

pub mod alerts;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod query;
pub mod scraper;
pub mod store;
pub mod stream;
pub mod types;

#[cfg(feature = "api")]
pub mod api;
