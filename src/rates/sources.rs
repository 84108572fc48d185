//! External quote sources.
//!
//! Each source yields one `Quote` per sweep. A failing source produces an
//! errored quote rather than failing the sweep; the rest of the system
//! treats empty or all-error sweeps as "no data".

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{PROVIDER_BOT_REFERENCE, PROVIDER_MID_MARKET};
use crate::models::{Quote, QuoteStatus};

const OPEN_ER_API_URL: &str = "https://open.er-api.com/v6/latest/CNY";
const HTTP_TIMEOUT_SECS: u64 = 10;

#[async_trait]
pub trait RateSource: Send + Sync {
    fn provider(&self) -> &str;
    async fn fetch(&self) -> Result<Quote>;
}

/// Mid-market CNY→THB rate from the open exchange-rate API. A mid price
/// carries no spread, so buying and selling are the same value.
pub struct MidMarketSource {
    client: Client,
    endpoint: String,
}

impl MidMarketSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: OPEN_ER_API_URL.to_string(),
        }
    }

    pub fn with_endpoint(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl RateSource for MidMarketSource {
    fn provider(&self) -> &str {
        PROVIDER_MID_MARKET
    }

    async fn fetch(&self) -> Result<Quote> {
        let rate = fetch_thb_mid(&self.client, &self.endpoint).await?;
        Ok(Quote {
            provider: self.provider().to_string(),
            buying: Some(rate),
            selling: Some(rate),
            status: QuoteStatus::Ok,
            observed_at: Utc::now(),
        })
    }
}

/// Bank of Thailand reference rate. Published as a reference price rather
/// than a tradable two-way quote, so it is also carried spreadless.
pub struct BotReferenceSource {
    client: Client,
    endpoint: String,
}

impl BotReferenceSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: OPEN_ER_API_URL.to_string(),
        }
    }

    pub fn with_endpoint(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl RateSource for BotReferenceSource {
    fn provider(&self) -> &str {
        PROVIDER_BOT_REFERENCE
    }

    async fn fetch(&self) -> Result<Quote> {
        let rate = fetch_thb_mid(&self.client, &self.endpoint).await?;
        Ok(Quote {
            provider: self.provider().to_string(),
            buying: Some(rate),
            selling: Some(rate),
            status: QuoteStatus::Ok,
            observed_at: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenErApiResponse {
    result: Option<String>,
    rates: Option<HashMap<String, f64>>,
}

fn parse_thb_rate(body: &str) -> Result<f64> {
    let parsed: OpenErApiResponse =
        serde_json::from_str(body).context("Malformed exchange-rate API response")?;

    if let Some(result) = &parsed.result {
        if result != "success" {
            return Err(anyhow!("exchange-rate API reported result = {}", result));
        }
    }

    parsed
        .rates
        .as_ref()
        .and_then(|rates| rates.get("THB"))
        .copied()
        .filter(|r| r.is_finite() && *r > 0.0)
        .ok_or_else(|| anyhow!("exchange-rate API response has no THB rate"))
}

async fn fetch_thb_mid(client: &Client, endpoint: &str) -> Result<f64> {
    let response = client
        .get(endpoint)
        .send()
        .await
        .context("Exchange-rate API request failed")?
        .error_for_status()
        .context("Exchange-rate API returned an error status")?;

    let body = response
        .text()
        .await
        .context("Failed to read exchange-rate API response")?;

    parse_thb_rate(&body)
}

/// HTTP client shared by all sources. The timeout bounds every collaborator
/// call so no refresh sweep can hang the schedule.
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .context("Failed to build HTTP client")
}

/// Default source set: mid-market plus the BOT reference.
pub fn default_sources(client: &Client) -> Vec<Arc<dyn RateSource>> {
    vec![
        Arc::new(MidMarketSource::new(client.clone())),
        Arc::new(BotReferenceSource::new(client.clone())),
    ]
}

/// Run one sweep over all sources. Failures degrade to errored quotes so a
/// partially-failing sweep still returns a full provider list.
pub async fn fetch_all_quotes(sources: &[Arc<dyn RateSource>]) -> Vec<Quote> {
    let mut quotes = Vec::with_capacity(sources.len());

    for source in sources {
        match source.fetch().await {
            Ok(quote) => quotes.push(quote),
            Err(e) => {
                warn!("⚠️  Source {} failed: {:#}", source.provider(), e);
                quotes.push(Quote::errored(source.provider()));
            }
        }
    }

    quotes
}
