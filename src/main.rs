//! PriceDrop - grocery price tracker with price-drop alerts
//!
//! Wiring: config -> logging -> store/ledger -> engine + change-stream
//! consumer -> scraper rounds (and the read API with `--features api`).

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pricedrop::alerts::LogDispatcher;
use pricedrop::config::{AppConfig, LedgerBackend, StoreBackend};
use pricedrop::engine::DropEngine;
use pricedrop::ledger::{CsvDedupLedger, DedupLedger, InMemoryDedupLedger};
use pricedrop::scraper::Scraper;
use pricedrop::store::{ChangeFeedStore, CsvPriceStore, InMemoryPriceStore, PriceStore};
use pricedrop::stream::{ChangeRecord, ChangeStreamConsumer};

const LEDGER_PURGE_INTERVAL: Duration = Duration::from_secs(300);

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn open_store(config: &AppConfig, tx: mpsc::Sender<ChangeRecord>) -> Result<Arc<dyn PriceStore>> {
    let store: Arc<dyn PriceStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(ChangeFeedStore::new(InMemoryPriceStore::new(), tx)),
        StoreBackend::Csv => {
            let csv = CsvPriceStore::open(&config.store.data_dir)
                .context("Failed to open price log")?;
            info!(path = %csv.path().display(), "Price log opened");
            Arc::new(ChangeFeedStore::new(csv, tx))
        }
    };
    Ok(store)
}

fn open_ledger(config: &AppConfig) -> Result<Arc<dyn DedupLedger>> {
    let ttl = config.ledger.ttl();
    let capacity = config.ledger.capacity();
    let ledger: Arc<dyn DedupLedger> = match config.ledger.backend {
        LedgerBackend::Memory => Arc::new(InMemoryDedupLedger::new(ttl, capacity)),
        LedgerBackend::Csv => {
            let journal = CsvDedupLedger::open(&config.store.data_dir, ttl, capacity)
                .context("Failed to open dedup journal")?;
            info!(claims = journal.len(), "Dedup journal replayed");
            Arc::new(journal)
        }
    };
    Ok(ledger)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config);
    info!("PriceDrop starting: {}", config);

    let (tx, rx) = mpsc::channel(config.stream.buffer);
    let store = open_store(&config, tx)?;
    let ledger = open_ledger(&config)?;

    let engine = Arc::new(DropEngine::new(
        config.engine.clone(),
        &config.alerts,
        store.clone(),
        ledger.clone(),
        Arc::new(LogDispatcher),
    ));
    let stats = engine.stats();

    let consumer = ChangeStreamConsumer::new(engine, config.stream.clone());
    let consumer_stats = consumer.stats();
    let consumer_task = tokio::spawn(consumer.run(rx));

    if config.scraper.enabled {
        let scraper = Scraper::new(
            config.scraper.clone(),
            config.engine.currency(),
            store.clone(),
        )?;
        let interval = Duration::from_secs(config.scraper.interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                scraper.scrape_all().await;
            }
        });
    } else {
        info!("Scraper disabled, waiting for external observations");
    }

    {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LEDGER_PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                match ledger.purge_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "Expired dedup claims purged"),
                    Err(e) => warn!(error = %e, "Dedup purge failed"),
                }
            }
        });
    }

    #[cfg(feature = "api")]
    {
        let state = pricedrop::api::ApiState {
            store: store.clone(),
            stats: stats.clone(),
        };
        let bind = config.api.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = pricedrop::api::start_server(state, &bind).await {
                tracing::error!(error = %e, "Price API stopped");
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    consumer_task.abort();

    info!(
        engine = ?stats.snapshot(),
        dead_lettered = consumer_stats
            .dead_lettered
            .load(std::sync::atomic::Ordering::Relaxed),
        "PriceDrop stopped"
    );
    Ok(())
}
