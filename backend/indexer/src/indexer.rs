//! Long-running background task that polls the JSON-RPC node and writes
//! decoded donations to the database.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use qf_engine::Address;
use reqwest::Client;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::db;
use crate::errors::Result;
use crate::events::IndexedDonation;
use crate::rpc;

pub struct IndexerState {
    pub pool: SqlitePool,
    pub config: Config,
    pub client: Client,
}

/// Run the indexer loop until `shutdown` is cancelled.
pub async fn run(state: Arc<IndexerState>, shutdown: CancellationToken) {
    info!(
        "Indexer starting, round manager: {}",
        state.config.round_manager_address
    );

    // Load the cursor from the DB; fall back to config start_block.
    let saved = db::get_next_block(&state.pool).await.unwrap_or(0);
    let mut next_block = if saved > 0 {
        saved
    } else {
        state.config.start_block
    };
    info!("Resuming from block {next_block}");

    loop {
        // A poll stuck in RPC retries is dropped on shutdown. The cursor is
        // saved after the page is stored, so nothing is half-applied.
        let polled = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Indexer stopping at block {next_block}");
                return;
            }
            polled = poll_once(&state.pool, &state.client, &state.config, next_block) => polled,
        };

        let behind = match polled {
            Ok(progress) => {
                next_block = progress.next_block;
                progress.is_behind()
            }
            Err(e) => {
                error!("Indexer poll error: {e}");
                false
            }
        };
        if behind {
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Indexer stopping at block {next_block}");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(state.config.poll_interval_secs)) => {}
        }
    }
}

/// Where a poll left the cursor relative to the chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProgress {
    pub next_block: u64,
    pub head: u64,
}

impl PollProgress {
    /// More blocks are already available; poll again without waiting.
    pub fn is_behind(&self) -> bool {
        self.next_block <= self.head
    }
}

/// Inclusive block range of the next page, or `None` when `from_block` is
/// past `head`.
pub fn page_range(from_block: u64, head: u64, blocks_per_page: u64) -> Option<(u64, u64)> {
    if from_block > head {
        return None;
    }
    let span = blocks_per_page.max(1) - 1;
    Some((from_block, head.min(from_block.saturating_add(span))))
}

/// Index one page of blocks starting at `from_block`.
///
/// The cursor only moves once the page is stored, so a failed poll retries
/// the same range.
async fn poll_once(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    from_block: u64,
) -> Result<PollProgress> {
    let head = rpc::block_number(client, &config.rpc_url).await?;
    let Some((from_block, to_block)) = page_range(from_block, head, config.blocks_per_page) else {
        debug!("No new blocks (head {head})");
        return Ok(PollProgress {
            next_block: from_block,
            head,
        });
    };

    let raw_logs = rpc::get_donation_logs(
        client,
        &config.rpc_url,
        &config.round_manager_address,
        from_block,
        to_block,
    )
    .await?;

    if !raw_logs.is_empty() {
        let decoded = rpc::decode_logs(&raw_logs, &config.round_manager_address)?;

        // Every log of a transaction shares its sender.
        let mut payers: HashMap<String, Address> = HashMap::new();
        let mut donations = Vec::with_capacity(decoded.len());
        for log in decoded {
            let payer = match payers.get(&log.tx_hash) {
                Some(p) => *p,
                None => {
                    let p = rpc::transaction_sender(client, &config.rpc_url, &log.tx_hash).await?;
                    payers.insert(log.tx_hash.clone(), p);
                    p
                }
            };
            donations.push(IndexedDonation { log, payer });
        }

        let inserted = db::insert_donations(pool, &donations).await?;
        info!(
            "Blocks {from_block}..={to_block}: {} raw logs → {} new donations stored",
            raw_logs.len(),
            inserted
        );
    }

    let next_block = to_block + 1;
    db::save_next_block(pool, next_block).await?;
    if next_block <= head {
        debug!("Still {} blocks behind head {head}", head - to_block);
    }
    Ok(PollProgress { next_block, head })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_capped_at_head() {
        assert_eq!(page_range(0, 10_000, 2000), Some((0, 1999)));
        assert_eq!(page_range(9_500, 10_000, 2000), Some((9_500, 10_000)));
        assert_eq!(page_range(10_000, 10_000, 2000), Some((10_000, 10_000)));
        assert_eq!(page_range(10_001, 10_000, 2000), None);
    }

    #[test]
    fn progress_reports_backlog() {
        let behind = PollProgress { next_block: 2000, head: 2_000_000 };
        let caught_up = PollProgress { next_block: 2_000_001, head: 2_000_000 };
        assert!(behind.is_behind());
        assert!(!caught_up.is_behind());
    }

    #[tokio::test]
    async fn stops_promptly_when_node_is_unreachable() {
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        let state = Arc::new(IndexerState {
            pool,
            config: Config::for_tests("http://127.0.0.1:1"),
            client: Client::new(),
        });
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(state, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();

        let stopped = tokio::time::timeout(Duration::from_secs(10), task).await;
        assert!(stopped.is_ok(), "indexer kept retrying after cancellation");
    }
}
