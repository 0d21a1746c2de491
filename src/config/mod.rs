//! Configuration management for PriceDrop
//!
//! Loads from config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub alerts: AlertsConfig,
    pub stream: StreamConfig,
    pub scraper: ScraperConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Engine defaults
            .set_default("engine.currency", "INR")?
            .set_default("engine.min_drop", "0")?
            .set_default("engine.processing_timeout_ms", 3000)?
            .set_default("engine.history_limit", 8)?
            .set_default("engine.epoch_floor", "2020-01-01T00:00:00Z")?
            .set_default("engine.prior_hint_fallback", false)?
            // Store defaults
            .set_default("store.backend", "csv")?
            .set_default("store.data_dir", "./data")?
            // Ledger defaults
            .set_default("ledger.backend", "csv")?
            .set_default("ledger.ttl_secs", 0)?
            .set_default("ledger.max_entries", 0)?
            // Alerts defaults
            .set_default("alerts.topic", "price-drop")?
            .set_default("alerts.subject", "Price Drop Alert")?
            .set_default("alerts.currency_symbol", "₹")?
            // Stream defaults
            .set_default("stream.buffer", 1024)?
            .set_default("stream.concurrency", 16)?
            .set_default("stream.max_redeliveries", 5)?
            .set_default("stream.redelivery_delay_ms", 500)?
            // Scraper defaults
            .set_default("scraper.enabled", true)?
            .set_default("scraper.base_url", "https://www.bigbasket.com")?
            .set_default("scraper.user_agent", "Mozilla/5.0")?
            .set_default("scraper.store_name", "BigBasket")?
            .set_default("scraper.interval_secs", 3600)?
            .set_default("scraper.request_timeout_ms", 10000)?
            // API defaults
            .set_default("api.bind", "0.0.0.0:8080")?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEDROP_*)
            .add_source(Environment::with_prefix("PRICEDROP").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.min_drop < Decimal::ZERO {
            bail!("engine.min_drop must not be negative");
        }
        if self.engine.history_limit == 0 {
            bail!("engine.history_limit must be at least 1");
        }
        if self.engine.processing_timeout_ms == 0 {
            bail!("engine.processing_timeout_ms must be positive");
        }
        if self.stream.concurrency == 0 || self.stream.buffer == 0 {
            bail!("stream.concurrency and stream.buffer must be positive");
        }
        if self.engine.currency.trim().len() != 3 {
            bail!("engine.currency must be a 3-letter ISO code");
        }
        self.ledger.validate()?;
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "currency={} min_drop={} timeout_ms={} store={:?} ledger={:?} ttl_secs={} products={} topic={}",
            self.engine.currency,
            self.engine.min_drop,
            self.engine.processing_timeout_ms,
            self.store.backend,
            self.ledger.backend,
            self.ledger.ttl_secs,
            self.scraper.products.len(),
            self.alerts.topic
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn engine_defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.min_drop, Decimal::ZERO);
        assert_eq!(cfg.processing_timeout(), Duration::from_secs(3));
        assert_eq!(cfg.epoch_floor.to_rfc3339(), "2020-01-01T00:00:00+00:00");
        assert_eq!(cfg.currency().code(), "INR");
    }

    #[test]
    fn default_catalog_has_ten_products() {
        let products = types::default_products();
        assert_eq!(products.len(), 10);
        assert!(products
            .iter()
            .any(|p| p.name == "Tata Salt 1kg" && p.product_id == 241600));
    }

    #[test]
    fn ledger_zero_means_unbounded() {
        let cfg = LedgerConfig {
            backend: LedgerBackend::Memory,
            ttl_secs: 0,
            max_entries: 0,
        };
        assert!(cfg.ttl().is_none());
        assert!(cfg.capacity().is_none());
    }

    #[test]
    fn oversized_ledger_ttl_is_rejected_without_panicking() {
        for ttl_secs in [u64::MAX, 10_u64.pow(16), MAX_LEDGER_TTL_SECS + 1] {
            let cfg = LedgerConfig {
                backend: LedgerBackend::Memory,
                ttl_secs,
                max_entries: 0,
            };
            assert!(cfg.validate().is_err());
        }

        let huge = LedgerConfig {
            backend: LedgerBackend::Memory,
            ttl_secs: u64::MAX,
            max_entries: 0,
        };
        assert!(huge.ttl().is_none());

        let century = LedgerConfig {
            backend: LedgerBackend::Memory,
            ttl_secs: MAX_LEDGER_TTL_SECS,
            max_entries: 0,
        };
        assert!(century.validate().is_ok());
        assert_eq!(
            century.ttl(),
            Some(chrono::Duration::seconds(MAX_LEDGER_TTL_SECS as i64))
        );
    }
}
