//! Alert dispatch - message formatting and the pub/sub publish seam
//!
//! Delivery guarantees belong to the transport behind `AlertDispatcher`; the
//! engine calls `publish` once per claimed drop and never retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::AlertsConfig;
use crate::error::DispatchError;
use crate::types::{DropEvent, Money};

/// A rendered alert, ready to publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub topic: String,
    pub subject: String,
    pub body: String,
}

/// Renders drop events into alert text
#[derive(Debug, Clone)]
pub struct AlertFormatter {
    topic: String,
    subject: String,
    currency_symbol: String,
}

impl Default for AlertFormatter {
    fn default() -> Self {
        Self::new(&AlertsConfig::default())
    }
}

impl AlertFormatter {
    pub fn new(config: &AlertsConfig) -> Self {
        Self {
            topic: config.topic.clone(),
            subject: config.subject.clone(),
            currency_symbol: config.currency_symbol.clone(),
        }
    }

    fn price(&self, money: &Money) -> String {
        format!("{}{}", self.currency_symbol, money.display_amount())
    }

    pub fn format(&self, event: &DropEvent) -> Alert {
        Alert {
            topic: self.topic.clone(),
            subject: self.subject.clone(),
            body: format!(
                "{} is now {} (was {}, down {})",
                event.item,
                self.price(&event.new_price),
                self.price(&event.previous_price),
                self.price(&event.drop_amount)
            ),
        }
    }
}

/// Trait for pub/sub alert transports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn publish(&self, topic: &str, subject: &str, body: &str) -> Result<(), DispatchError>;
}

/// Publishes alerts as structured log lines
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

#[async_trait]
impl AlertDispatcher for LogDispatcher {
    async fn publish(&self, topic: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        info!(target: "pricedrop::alerts", topic, subject, body, "Alert published");
        Ok(())
    }
}

/// Hands alerts to an in-process consumer (fan-out workers, tests)
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<Alert>,
}

impl ChannelDispatcher {
    pub fn new(tx: mpsc::Sender<Alert>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AlertDispatcher for ChannelDispatcher {
    async fn publish(&self, topic: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        let alert = Alert {
            topic: topic.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        self.tx
            .send(alert)
            .await
            .map_err(|_| DispatchError::PublishFailed {
                topic: topic.to_string(),
                reason: "alert channel closed".to_string(),
            })
    }
}
