//! Configuration section types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::types::{Currency, StoreId};

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Currency every observation must be priced in
    pub currency: String,
    /// Minimum absolute drop that raises an alert (0 = any strict drop)
    pub min_drop: Decimal,
    /// Upper bound for resolve + claim + publish of one observation
    pub processing_timeout_ms: u64,
    /// How many earlier observations the resolver fetches per lookup
    pub history_limit: usize,
    /// Observations stamped earlier than this are rejected
    pub epoch_floor: DateTime<Utc>,
    /// Use a change record's prior-state snapshot when the store has no earlier history
    pub prior_hint_fallback: bool,
}

impl EngineConfig {
    pub fn currency(&self) -> Currency {
        Currency::new(self.currency.as_str())
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            min_drop: Decimal::ZERO,
            processing_timeout_ms: 3000,
            history_limit: 8,
            epoch_floor: DateTime::<Utc>::from_timestamp(1_577_836_800, 0).unwrap_or_default(),
            prior_hint_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Csv,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Data directory for CSV logs
    pub data_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    Csv,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Claim retention in seconds (0 = keep forever)
    pub ttl_secs: u64,
    /// Maximum retained claims, oldest evicted first (0 = unbounded)
    pub max_entries: usize,
}

/// Longest claim retention accepted, roughly a century
pub const MAX_LEDGER_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

impl LedgerConfig {
    /// `None` when retention is unbounded or too large to represent
    pub fn ttl(&self) -> Option<chrono::Duration> {
        if self.ttl_secs == 0 {
            return None;
        }
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ttl_secs > MAX_LEDGER_TTL_SECS {
            anyhow::bail!(
                "ledger.ttl_secs must not exceed {} (got {})",
                MAX_LEDGER_TTL_SECS,
                self.ttl_secs
            );
        }
        Ok(())
    }

    pub fn capacity(&self) -> Option<usize> {
        (self.max_entries > 0).then_some(self.max_entries)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Pub/sub topic alerts are published to
    pub topic: String,
    pub subject: String,
    /// Symbol rendered in front of prices in alert bodies
    pub currency_symbol: String,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            topic: "price-drop".to_string(),
            subject: "Price Drop Alert".to_string(),
            currency_symbol: "₹".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Change channel capacity
    pub buffer: usize,
    /// Deliveries processed in parallel
    pub concurrency: usize,
    /// Redeliveries of a record after a retryable failure
    pub max_redeliveries: u32,
    /// Pause before each redelivery
    pub redelivery_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer: 1024,
            concurrency: 16,
            max_redeliveries: 5,
            redelivery_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductConfig {
    pub name: String,
    pub product_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    pub enabled: bool,
    /// Retail site root, product pages live under `{base_url}/pd/{id}/`
    pub base_url: String,
    pub user_agent: String,
    /// Store name recorded on every observation
    pub store_name: String,
    /// Seconds between scrape rounds
    pub interval_secs: u64,
    pub request_timeout_ms: u64,
    #[serde(default = "default_products")]
    pub products: Vec<ProductConfig>,
}

impl ScraperConfig {
    pub fn store_id(&self) -> StoreId {
        StoreId::new(self.store_name.as_str())
    }
}

pub(crate) fn default_products() -> Vec<ProductConfig> {
    [
        ("Daawat Basmati Rice 5kg", 40075197),
        ("Aashirvaad Atta 10kg", 126906),
        ("Fortune Sunlite Sunflower Oil 1L", 274145),
        ("Tata Salt 1kg", 241600),
        ("BB Popular Sugar 5kg", 30005417),
        ("Britannia Milk Bikis 500g", 40197802),
        ("Nandini Goodlife Milk 1L", 100285703),
        ("Surf Excel Matic Front Load 2kg", 228623),
        ("Red Label Tea 1kg", 102871),
        ("Maggi Masala 560g", 266109),
    ]
    .into_iter()
    .map(|(name, product_id)| ProductConfig {
        name: name.to_string(),
        product_id,
    })
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Listen address for the read-side HTTP API
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}
