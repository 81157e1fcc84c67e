//! Narrow port onto the market-data feed used at decision time.
//!
//! The gateway only needs a top-of-book quote to snapshot the market and run
//! the slippage guard. A quote that cannot be fetched within the outbound
//! timeout is a hard failure: the decide path rejects rather than guess.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::HitlError;

#[derive(Debug, Clone, Copy)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn quote(&self, instrument: &str) -> Result<Quote, HitlError>;
}

#[derive(Debug, Deserialize)]
struct QuoteDto {
    bid: Decimal,
    ask: Decimal,
}

/// REST adapter: `GET {base}/quote/{instrument}`.
pub struct HttpMarketData {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarketData {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MarketDataSource for HttpMarketData {
    async fn quote(&self, instrument: &str) -> Result<Quote, HitlError> {
        let url = format!("{}/quote/{}", self.base_url, instrument);
        let dto = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| HitlError::market_data(e.to_string()))?
            .error_for_status()
            .map_err(|e| HitlError::market_data(e.to_string()))?
            .json::<QuoteDto>()
            .await
            .map_err(|e| HitlError::market_data(e.to_string()))?;

        Ok(Quote {
            bid: dto.bid,
            ask: dto.ask,
            observed_at: Utc::now(),
        })
    }
}

/// Source used when no `MARKET_DATA_URL` is configured: every decide fails
/// closed with `SEC-050`.
pub struct UnavailableMarketData;

#[async_trait]
impl MarketDataSource for UnavailableMarketData {
    async fn quote(&self, _instrument: &str) -> Result<Quote, HitlError> {
        Err(HitlError::market_data("market data not configured"))
    }
}

/// In-memory quote table for tests and local runs.
#[derive(Default)]
pub struct StaticMarketData {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, instrument: &str, bid: Decimal, ask: Decimal) {
        self.quotes.write().insert(
            instrument.to_string(),
            Quote {
                bid,
                ask,
                observed_at: Utc::now(),
            },
        );
    }

    pub fn clear(&self, instrument: &str) {
        self.quotes.write().remove(instrument);
    }
}

#[async_trait]
impl MarketDataSource for StaticMarketData {
    async fn quote(&self, instrument: &str) -> Result<Quote, HitlError> {
        self.quotes
            .read()
            .get(instrument)
            .copied()
            .ok_or_else(|| HitlError::market_data(format!("no quote for {instrument}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn static_source_serves_and_clears_quotes() {
        let source = StaticMarketData::new();
        source.set_quote("BTCZAR", dec!(999), dec!(1001));

        let quote = source.quote("BTCZAR").await.unwrap();
        assert_eq!(quote.mid(), dec!(1000));

        source.clear("BTCZAR");
        assert!(source.quote("BTCZAR").await.is_err());
    }

    #[tokio::test]
    async fn unavailable_source_always_fails() {
        assert!(UnavailableMarketData.quote("BTCZAR").await.is_err());
    }
}
