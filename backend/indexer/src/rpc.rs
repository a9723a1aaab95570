//! Ethereum JSON-RPC client: polls `eth_getLogs` and decodes donation logs.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied when the RPC returns an error or rate-limit
//!   response, up to [`MAX_BACKOFF_SECS`] seconds.
//! * Transient network errors (connection reset, timeout) are retried silently.

use std::time::Duration;

use qf_engine::{Address, GrantId};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::errors::{IndexerError, Result};
use crate::events::{GrantDonationLog, GRANT_DONATION_TOPIC};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    from: String,
}

// ─────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────

/// Issue one JSON-RPC call, retrying transport errors, rate limits and soft
/// RPC errors with back-off.
pub async fn call<T: DeserializeOwned>(
    client: &Client,
    rpc_url: &str,
    method: &str,
    params: Value,
) -> Result<Option<T>> {
    let mut backoff = INITIAL_BACKOFF_SECS;

    loop {
        let response = client
            .post(rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await;

        match response {
            Err(e) => {
                warn!("RPC {method} failed (will retry in {backoff}s): {e}");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                continue;
            }
            Ok(resp) => {
                if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    warn!("Rate-limited by RPC (will retry in {backoff}s)");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }

                let body: RpcResponse<T> = resp.json().await?;

                if let Some(err) = body.error {
                    // Malformed request / unknown method / bad params are hard failures.
                    if matches!(err.code, -32600 | -32601 | -32602) {
                        return Err(IndexerError::Rpc(format!(
                            "{method} hard error {}: {}",
                            err.code, err.message
                        )));
                    }
                    warn!(
                        "RPC soft error (will retry in {backoff}s): {} {}",
                        err.code, err.message
                    );
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }

                return Ok(body.result);
            }
        }
    }
}

/// Latest block number known to the node.
pub async fn block_number(client: &Client, rpc_url: &str) -> Result<u64> {
    let raw: String = call(client, rpc_url, "eth_blockNumber", json!([]))
        .await?
        .ok_or_else(|| IndexerError::Rpc("Empty result from eth_blockNumber".to_string()))?;
    parse_quantity(&raw)
}

/// Fetch `GrantDonation` logs of `contract` in `[from_block, to_block]`.
pub async fn get_donation_logs(
    client: &Client,
    rpc_url: &str,
    contract: &Address,
    from_block: u64,
    to_block: u64,
) -> Result<Vec<RawLog>> {
    let params = json!([{
        "address": contract.to_string(),
        "fromBlock": format!("0x{from_block:x}"),
        "toBlock": format!("0x{to_block:x}"),
        "topics": [GRANT_DONATION_TOPIC],
    }]);
    let logs: Vec<RawLog> = call(client, rpc_url, "eth_getLogs", params)
        .await?
        .unwrap_or_default();
    debug!("Fetched {} logs for blocks {from_block}..={to_block}", logs.len());
    Ok(logs)
}

/// Sender of a transaction; the payer of every donation in it.
pub async fn transaction_sender(client: &Client, rpc_url: &str, tx_hash: &str) -> Result<Address> {
    let tx: RawTransaction = call(client, rpc_url, "eth_getTransactionByHash", json!([tx_hash]))
        .await?
        .ok_or_else(|| IndexerError::Rpc(format!("Unknown transaction {tx_hash}")))?;
    Ok(tx.from.parse()?)
}

// ─────────────────────────────────────────────────────────
// Log decoding
// ─────────────────────────────────────────────────────────

/// Decode the `GrantDonation` logs emitted by `contract`.
///
/// Removed logs and logs from other contracts or events are skipped. A
/// donation log that fails to decode fails the whole batch, so the caller
/// never moves its cursor past it.
pub fn decode_logs(raw: &[RawLog], contract: &Address) -> Result<Vec<GrantDonationLog>> {
    let mut decoded = Vec::with_capacity(raw.len());
    for log in raw.iter().filter(|l| !l.removed) {
        if !is_donation_log(log, contract) {
            debug!("Ignoring foreign log {:?}", log.transaction_hash);
            continue;
        }
        match decode_single(log) {
            Ok(d) => decoded.push(d),
            Err(e) => {
                error!(
                    "Undecodable donation log in block {} (tx {}): {e}",
                    log.block_number.as_deref().unwrap_or("?"),
                    log.transaction_hash.as_deref().unwrap_or("?")
                );
                return Err(e);
            }
        }
    }
    Ok(decoded)
}

fn is_donation_log(raw: &RawLog, contract: &Address) -> bool {
    let from_contract = raw
        .address
        .parse::<Address>()
        .is_ok_and(|a| &a == contract);
    let topic_matches = raw
        .topics
        .first()
        .is_some_and(|t| t.eq_ignore_ascii_case(GRANT_DONATION_TOPIC));
    from_contract && topic_matches
}

fn decode_single(raw: &RawLog) -> Result<GrantDonationLog> {
    let topic0 = raw
        .topics
        .first()
        .ok_or_else(|| IndexerError::EventParse("log has no topics".to_string()))?;
    if !topic0.eq_ignore_ascii_case(GRANT_DONATION_TOPIC) {
        return Err(IndexerError::EventParse(format!("unexpected topic {topic0}")));
    }
    if raw.topics.len() < 3 {
        return Err(IndexerError::EventParse("missing indexed topics".to_string()));
    }

    let grant_id = word_to_u128(&decode_word(&raw.topics[1])?)?;
    let grant_id = u64::try_from(grant_id)
        .map_err(|_| IndexerError::EventParse(format!("grant id {grant_id} out of range")))?;
    let token_in = Address::from_word(&decode_word(&raw.topics[2])?);

    let data = decode_hex(&raw.data)?;
    let words = data_words(&data)?;
    let donation_amount = word_to_u128(words.first().ok_or_else(short_data)?)?;
    let rounds_offset = word_to_usize(words.get(1).ok_or_else(short_data)?)?;
    let time = word_to_u128(words.get(2).ok_or_else(short_data)?)?;

    // Dynamic array: length word at the offset, then one address per word.
    if rounds_offset % 32 != 0 {
        return Err(IndexerError::EventParse("unaligned rounds offset".to_string()));
    }
    let first = rounds_offset / 32;
    let len = word_to_usize(words.get(first).ok_or_else(short_data)?)?;
    let rounds = (0..len)
        .map(|i| {
            words
                .get(first + 1 + i)
                .map(Address::from_word)
                .ok_or_else(short_data)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(GrantDonationLog {
        grant_id: GrantId(grant_id),
        token_in,
        donation_amount,
        rounds,
        time: i64::try_from(time)
            .map_err(|_| IndexerError::EventParse("timestamp out of range".to_string()))?,
        tx_hash: raw
            .transaction_hash
            .clone()
            .ok_or_else(|| IndexerError::EventParse("log without transaction hash".to_string()))?,
        log_index: raw.log_index.as_deref().map(parse_quantity).transpose()?.unwrap_or(0),
        block_number: raw
            .block_number
            .as_deref()
            .map(parse_quantity)
            .transpose()?
            .unwrap_or(0),
    })
}

fn short_data() -> IndexerError {
    IndexerError::EventParse("log data too short".to_string())
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let body = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(body).map_err(|e| IndexerError::EventParse(format!("bad hex {raw:?}: {e}")))
}

fn decode_word(raw: &str) -> Result<[u8; 32]> {
    let bytes = decode_hex(raw)?;
    bytes
        .try_into()
        .map_err(|_| IndexerError::EventParse(format!("topic is not 32 bytes: {raw}")))
}

fn data_words(data: &[u8]) -> Result<Vec<[u8; 32]>> {
    if data.len() % 32 != 0 {
        return Err(IndexerError::EventParse("data is not word aligned".to_string()));
    }
    Ok(data
        .chunks_exact(32)
        .map(|c| {
            let mut w = [0u8; 32];
            w.copy_from_slice(c);
            w
        })
        .collect())
}

/// uint256 word to u128; values past 128 bits are rejected.
fn word_to_u128(word: &[u8; 32]) -> Result<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(IndexerError::EventParse("uint256 exceeds 128 bits".to_string()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn word_to_usize(word: &[u8; 32]) -> Result<usize> {
    usize::try_from(word_to_u128(word)?)
        .map_err(|_| IndexerError::EventParse("offset out of range".to_string()))
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(raw: &str) -> Result<u64> {
    let body = raw
        .strip_prefix("0x")
        .ok_or_else(|| IndexerError::EventParse(format!("quantity without 0x: {raw}")))?;
    u64::from_str_radix(body, 16)
        .map_err(|_| IndexerError::EventParse(format!("bad quantity {raw}")))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
