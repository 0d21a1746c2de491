//! Retail Scraper - fetches product pages and records observed prices
//!
//! Product pages embed the selling price in inline JSON, either as
//! `"offer_sp": 42.50` or as `"prim_price":{"sp":"42.50"`.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{header::ACCEPT_LANGUAGE, Client};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ProductConfig, ScraperConfig};
use crate::store::PriceStore;
use crate::types::{Currency, ItemId, Money, Observation, StoreId};

const OFFER_PATTERN: &str = r#""offer_sp"\s*:\s*([0-9]+\.[0-9]+)"#;
const PRIMARY_PATTERN: &str = r#""prim_price":\{"sp":"([0-9]+\.[0-9]+)""#;

/// Per-product result of one scrape round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ScrapeResult {
    Recorded(#[serde(with = "rust_decimal::serde::str")] Decimal),
    PriceNotFound,
    FetchFailed(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeReport {
    pub results: BTreeMap<String, ScrapeResult>,
}

impl ScrapeReport {
    pub fn recorded(&self) -> usize {
        self.results
            .values()
            .filter(|r| matches!(r, ScrapeResult::Recorded(_)))
            .count()
    }
}

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn capture_price(re: Option<&Regex>, html: &str) -> Option<Decimal> {
    let caps = re?.captures(html)?;
    Decimal::from_str(caps.get(1)?.as_str()).ok()
}

/// Pull the selling price out of a product page
pub fn extract_price(html: &str) -> Option<Decimal> {
    static OFFER: OnceLock<Option<Regex>> = OnceLock::new();
    static PRIMARY: OnceLock<Option<Regex>> = OnceLock::new();

    capture_price(compiled(&OFFER, OFFER_PATTERN), html)
        .or_else(|| capture_price(compiled(&PRIMARY, PRIMARY_PATTERN), html))
}

/// Scrapes the configured catalog into a price store
pub struct Scraper {
    client: Client,
    config: ScraperConfig,
    currency: Currency,
    store: Arc<dyn PriceStore>,
}

impl Scraper {
    pub fn new(config: ScraperConfig, currency: Currency, store: Arc<dyn PriceStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            config,
            currency,
            store,
        })
    }

    fn product_url(&self, product: &ProductConfig) -> String {
        format!(
            "{}/pd/{}/",
            self.config.base_url.trim_end_matches('/'),
            product.product_id
        )
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .context("Request failed")?
            .error_for_status()
            .context("Bad status")?;
        response.text().await.context("Failed to read body")
    }

    /// Scrape one product and append its observation
    pub async fn scrape_product(&self, product: &ProductConfig) -> ScrapeResult {
        let url = self.product_url(product);
        let html = match self.fetch_page(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(product = %product.name, url = %url, error = %e, "Product fetch failed");
                return ScrapeResult::FetchFailed(format!("{:#}", e));
            }
        };

        let Some(price) = extract_price(&html) else {
            warn!(product = %product.name, url = %url, "Price not found on page");
            return ScrapeResult::PriceNotFound;
        };

        let observation = Observation::new(
            ItemId::new(product.name.as_str()),
            Money::new(price, self.currency.clone()),
            Utc::now(),
            StoreId::new(self.config.store_name.as_str()),
        );
        match self.store.append(observation).await {
            Ok(appended) => {
                debug!(product = %product.name, price = %price, sequence = appended.stored().sequence, "Price recorded");
                ScrapeResult::Recorded(price)
            }
            Err(e) => {
                warn!(product = %product.name, error = %e, "Recording price failed");
                ScrapeResult::FetchFailed(e.to_string())
            }
        }
    }

    /// One round over the whole catalog
    pub async fn scrape_all(&self) -> ScrapeReport {
        let mut report = ScrapeReport::default();
        for product in &self.config.products {
            let result = self.scrape_product(product).await;
            report.results.insert(product.name.clone(), result);
        }
        info!(
            recorded = report.recorded(),
            products = self.config.products.len(),
            "Scrape round complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPriceStore;
    use rust_decimal_macros::dec;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    #[test]
    fn offer_price_takes_precedence() {
        let html = r#"{"prim_price":{"sp":"50.00"},"offer_sp" : 42.50}"#;
        assert_eq!(extract_price(html), Some(dec!(42.50)));
    }

    #[test]
    fn falls_back_to_primary_price() {
        let html = r#"<script>{"prim_price":{"sp":"118.00","mrp":"125"}}</script>"#;
        assert_eq!(extract_price(html), Some(dec!(118.00)));
    }

    #[test]
    fn integer_or_malformed_prices_are_not_matched() {
        assert_eq!(extract_price(r#""offer_sp": 42"#), None);
        assert_eq!(extract_price(r#""offer_sp": ".50""#), None);
        assert_eq!(extract_price(r#""prim_price":{"sp":"42.5x"}"#), None);
        assert_eq!(extract_price("<html>sold out</html>"), None);
    }

    #[test]
    fn patterns_compile() {
        static OFFER: OnceLock<Option<Regex>> = OnceLock::new();
        static PRIMARY: OnceLock<Option<Regex>> = OnceLock::new();
        assert!(compiled(&OFFER, OFFER_PATTERN).is_some());
        assert!(compiled(&PRIMARY, PRIMARY_PATTERN).is_some());
    }

    #[test]
    fn later_offer_occurrence_is_used_when_first_is_malformed() {
        let html = r#""offer_sp": null, "offer_sp": 99.00"#;
        assert_eq!(extract_price(html), Some(dec!(99.00)));
    }

    /// Serves `requests` connections: product 1 has a price, others do not
    fn serve(requests: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming().take(requests) {
                let mut stream = stream.unwrap();
                let mut buf = [0u8; 4096];
                let n = stream.read(&mut buf).unwrap();
                let request = String::from_utf8_lossy(&buf[..n]);
                let body = if request.starts_with("GET /pd/1/ ") {
                    r#"{"offer_sp": 42.50}"#
                } else {
                    "<html></html>"
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        format!("http://{}", addr)
    }

    fn scraper_config(base_url: String) -> ScraperConfig {
        ScraperConfig {
            enabled: true,
            base_url,
            user_agent: "Mozilla/5.0".to_string(),
            store_name: "BigBasket".to_string(),
            interval_secs: 3600,
            request_timeout_ms: 2000,
            products: vec![
                ProductConfig {
                    name: "Tata Salt 1kg".to_string(),
                    product_id: 1,
                },
                ProductConfig {
                    name: "Maggi Masala 560g".to_string(),
                    product_id: 2,
                },
            ],
        }
    }

    #[tokio::test]
    async fn scrape_round_records_found_prices() {
        let store = Arc::new(InMemoryPriceStore::new());
        let scraper = Scraper::new(scraper_config(serve(2)), Currency::default(), store.clone()).unwrap();

        let report = scraper.scrape_all().await;
        assert_eq!(report.results["Tata Salt 1kg"], ScrapeResult::Recorded(dec!(42.50)));
        assert_eq!(report.results["Maggi Masala 560g"], ScrapeResult::PriceNotFound);
        assert_eq!(report.recorded(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_site_reports_fetch_failures() {
        // bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let store = Arc::new(InMemoryPriceStore::new());
        let scraper = Scraper::new(
            scraper_config(format!("http://127.0.0.1:{}", port)),
            Currency::default(),
            store.clone(),
        )
        .unwrap();

        let report = scraper.scrape_all().await;
        assert!(report
            .results
            .values()
            .all(|r| matches!(r, ScrapeResult::FetchFailed(_))));
        assert!(store.is_empty());
    }
}
