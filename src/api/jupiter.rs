use super::PriceOracle;
use governor::{Quota, RateLimiter};
use reqwest::{Client, Proxy};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// Jupiter Price API v3
// Docs: https://dev.jup.ag/docs/price-api/v3
pub const JUPITER_PRICE_API: &str = "https://lite-api.jup.ag/price/v3";
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// The endpoint accepts 50 ids per request and the base asset takes one slot
pub const MAX_BATCH_SIZE: usize = 49;

type PriceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("invalid proxy url '{url}': {source}")]
    Proxy {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Per-mint entry of the price response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceEntry {
    #[serde(default)]
    usd_price: Option<f64>,
}

/// Batched quote client for the Jupiter price API
///
/// Prices come back in USD and are converted to base-asset units by dividing
/// by the base asset's USD price from the same response. Cloning shares the
/// HTTP connection pool and the rate limiter.
#[derive(Clone)]
pub struct JupiterPriceClient {
    client: Client,
    base_url: String,
    base_asset: String,
    batch_size: usize,
    rate_limiter: Arc<PriceRateLimiter>,
}

impl JupiterPriceClient {
    /// Build a client against the public endpoint with SOL as base
    pub fn new() -> Result<Self, OracleError> {
        Self::builder().build()
    }

    pub fn builder() -> JupiterPriceClientBuilder {
        JupiterPriceClientBuilder::default()
    }

    pub fn base_asset(&self) -> &str {
        &self.base_asset
    }

    /// Fetch one batch; `None` means the whole batch produced nothing usable
    async fn fetch_batch(&self, chunk: &[&String]) -> Option<HashMap<String, f64>> {
        let ids = std::iter::once(self.base_asset.as_str())
            .chain(chunk.iter().map(|id| id.as_str()))
            .collect::<Vec<_>>()
            .join(",");

        self.rate_limiter.until_ready().await;

        let response = match self
            .client
            .get(&self.base_url)
            .query(&[("ids", ids.as_str())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "transport" };
                tracing::warn!(
                    "[ORACLE] Batch of {} failed ({}): {}",
                    chunk.len(),
                    kind,
                    e
                );
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("[ORACLE] Batch of {} returned HTTP {}", chunk.len(), status);
            return None;
        }

        let body: HashMap<String, Option<PriceEntry>> = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("[ORACLE] Undecodable price response: {}", e);
                return None;
            }
        };

        let usd_price = |id: &str| -> Option<f64> {
            body.get(id)?
                .as_ref()?
                .usd_price
                .filter(|p| p.is_finite() && *p > 0.0)
        };

        let Some(base_price) = usd_price(&self.base_asset) else {
            tracing::warn!(
                "[ORACLE] Base asset {} missing from response, dropping batch of {}",
                self.base_asset,
                chunk.len()
            );
            return None;
        };

        let mut rates = HashMap::with_capacity(chunk.len());
        for id in chunk {
            match usd_price(id) {
                Some(price) => {
                    rates.insert((*id).clone(), price / base_price);
                }
                None => tracing::debug!("[ORACLE] No price for {} this round", id),
            }
        }

        Some(rates)
    }
}

impl PriceOracle for JupiterPriceClient {
    async fn quote(&self, asset_ids: &[String]) -> HashMap<String, f64> {
        let mut seen = HashSet::new();
        let mut wants_base = false;
        let unique: Vec<&String> = asset_ids
            .iter()
            .filter(|id| {
                if **id == self.base_asset {
                    wants_base = true;
                    return false;
                }
                seen.insert(id.as_str())
            })
            .collect();

        let mut rates = HashMap::new();

        if unique.is_empty() {
            // Base asset alone still needs a live base price
            if wants_base && self.fetch_batch(&[]).await.is_some() {
                rates.insert(self.base_asset.clone(), 1.0);
            }
            return rates;
        }

        let mut base_seen = false;
        for chunk in unique.chunks(self.batch_size) {
            if let Some(batch) = self.fetch_batch(chunk).await {
                base_seen = true;
                rates.extend(batch);
            }
        }

        if wants_base && base_seen {
            rates.insert(self.base_asset.clone(), 1.0);
        }

        rates
    }
}

/// Builder for [`JupiterPriceClient`]
#[derive(Debug, Clone)]
pub struct JupiterPriceClientBuilder {
    base_url: String,
    base_asset: String,
    batch_size: usize,
    timeout: Duration,
    proxy_url: Option<String>,
    requests_per_minute: u32,
}

impl Default for JupiterPriceClientBuilder {
    fn default() -> Self {
        Self {
            base_url: JUPITER_PRICE_API.to_string(),
            base_asset: SOL_MINT.to_string(),
            batch_size: MAX_BATCH_SIZE,
            timeout: Duration::from_secs(5),
            proxy_url: None,
            requests_per_minute: 60,
        }
    }
}

impl JupiterPriceClientBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn base_asset(mut self, mint: impl Into<String>) -> Self {
        self.base_asset = mint.into();
        self
    }

    /// Clamped to `1..=MAX_BATCH_SIZE`
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Route every request through this proxy (e.g. `socks5h://127.0.0.1:9050`)
    pub fn proxy(mut self, url: Option<String>) -> Self {
        self.proxy_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    pub fn build(self) -> Result<JupiterPriceClient, OracleError> {
        let mut builder = Client::builder().timeout(self.timeout);

        if let Some(url) = &self.proxy_url {
            let proxy = Proxy::all(url).map_err(|source| OracleError::Proxy {
                url: url.clone(),
                source,
            })?;
            builder = builder.proxy(proxy);
            tracing::info!("[ORACLE] Routing price requests through proxy {}", url);
        }

        let client = builder.build()?;

        let rpm = NonZeroU32::new(self.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(JupiterPriceClient {
            client,
            base_url: self.base_url,
            base_asset: self.base_asset,
            batch_size: self.batch_size,
            rate_limiter,
        })
    }
}
