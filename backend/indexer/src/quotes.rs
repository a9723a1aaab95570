//! Token price quotes.
//!
//! Rates are fetched per token from a CoinGecko-compatible
//! `simple/token_price` endpoint and collected into a [`QuoteTable`].
//! Independent tokens are fetched concurrently and joined before use.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qf_engine::{EngineError, QuoteTable, TokenAddress};
use reqwest::Client;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::errors::{IndexerError, Result};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Reference-currency price of one whole `token`.
    async fn get_exchange_rate(&self, token: &TokenAddress) -> Result<f64>;
}

pub struct HttpQuoteProvider {
    client: Client,
    base_url: String,
    platform: String,
    currency: String,
}

impl HttpQuoteProvider {
    pub fn new(client: Client, base_url: &str, platform: &str, currency: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            platform: platform.to_string(),
            currency: currency.to_lowercase(),
        }
    }

    fn url(&self, token: &TokenAddress) -> String {
        format!(
            "{}/simple/token_price/{}?contract_addresses={}&vs_currencies={}",
            self.base_url, self.platform, token, self.currency
        )
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    async fn get_exchange_rate(&self, token: &TokenAddress) -> Result<f64> {
        let url = self.url(token);
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 1..=MAX_ATTEMPTS {
            let resp = self.client.get(&url).send().await?;
            let status = resp.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if attempt == MAX_ATTEMPTS {
                    break;
                }
                warn!("Quote API returned {status} for {token} (retry in {backoff}ms)");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                backoff *= 2;
                continue;
            }
            if !status.is_success() {
                return Err(IndexerError::Quote(format!("{status} for {token}")));
            }

            let body: HashMap<String, HashMap<String, f64>> = resp.json().await?;
            return parse_rate(&body, token, &self.currency);
        }

        Err(IndexerError::Quote(format!(
            "quote API unavailable for {token} after {MAX_ATTEMPTS} attempts"
        )))
    }
}

fn parse_rate(
    body: &HashMap<String, HashMap<String, f64>>,
    token: &TokenAddress,
    currency: &str,
) -> Result<f64> {
    let wanted = token.to_string();
    body.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(&wanted))
        .and_then(|(_, prices)| prices.get(currency).copied())
        .filter(|rate| *rate > 0.0 && rate.is_finite())
        .ok_or_else(|| EngineError::MissingQuote(*token).into())
}

/// Fetch quotes for `tokens` concurrently. Any failure fails the whole call;
/// the remaining fetches are aborted.
pub async fn fetch_quotes(
    provider: Arc<dyn QuoteProvider>,
    tokens: &[TokenAddress],
) -> Result<QuoteTable> {
    let unique: BTreeSet<TokenAddress> = tokens.iter().copied().collect();
    let mut tasks = JoinSet::new();
    for token in unique {
        let provider = provider.clone();
        tasks.spawn(async move {
            let rate = provider.get_exchange_rate(&token).await?;
            Ok::<_, IndexerError>((token, rate))
        });
    }

    let mut quotes = QuoteTable::new();
    while let Some(joined) = tasks.join_next().await {
        let (token, rate) = joined
            .map_err(|e| IndexerError::Quote(format!("quote task failed: {e}")))??;
        quotes.insert(token, rate);
    }
    debug!("Fetched {} quotes", quotes.len());
    Ok(quotes)
}

#[cfg(test)]
pub mod fixed {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider answering from a fixed table, counting lookups.
    #[derive(Default)]
    pub struct FixedQuotes {
        pub rates: HashMap<TokenAddress, f64>,
        pub calls: AtomicUsize,
    }

    impl FixedQuotes {
        pub fn new(rates: impl IntoIterator<Item = (TokenAddress, f64)>) -> Self {
            Self {
                rates: rates.into_iter().collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QuoteProvider for FixedQuotes {
        async fn get_exchange_rate(&self, token: &TokenAddress) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rates
                .get(token)
                .copied()
                .ok_or_else(|| EngineError::MissingQuote(*token).into())
        }
    }
}
