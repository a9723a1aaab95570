//! Database layer: migrations, queries, and cursor management.

use qf_engine::Address;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::cache::CacheEntry;
use crate::errors::Result;
use crate::events::{join_rounds, ContributionRecord, IndexedDonation};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    connect(database_url, 5).await
}

/// Pool over `url` with at most `max_connections`, migrated.
///
/// In-memory databases are per connection, so tests use a single one.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Cursor helpers
// ─────────────────────────────────────────────────────────

/// Next block the indexer should scan. `0` when nothing was indexed yet.
pub async fn get_next_block(pool: &SqlitePool) -> Result<u64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT next_block FROM indexer_cursor WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v.max(0) as u64).unwrap_or(0))
}

/// Highest block fully indexed, the height cached values are tagged with.
pub async fn get_indexed_height(pool: &SqlitePool) -> Result<u64> {
    Ok(get_next_block(pool).await?.saturating_sub(1))
}

pub async fn save_next_block(pool: &SqlitePool, next_block: u64) -> Result<()> {
    sqlx::query("UPDATE indexer_cursor SET next_block = ?1 WHERE id = 1")
        .bind(next_block as i64)
        .execute(pool)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Contribution writes
// ─────────────────────────────────────────────────────────

/// Persist a batch of donations in one transaction. Donations that share
/// `(tx_hash, log_index)` with a stored row are ignored, so re-indexing a
/// block range is harmless.
pub async fn insert_donations(pool: &SqlitePool, donations: &[IndexedDonation]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let mut count = 0usize;

    for d in donations {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO contributions
                (tx_hash, log_index, block_number, grant_id, payer, token_in, amount_raw, rounds, time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&d.log.tx_hash)
        .bind(d.log.log_index as i64)
        .bind(d.log.block_number as i64)
        .bind(d.log.grant_id.0 as i64)
        .bind(d.payer.to_string())
        .bind(d.log.token_in.to_string())
        .bind(d.log.donation_amount.to_string())
        .bind(join_rounds(&d.log.rounds))
        .bind(d.log.time)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            continue;
        }
        let contribution_id = result.last_insert_rowid();
        for round in &d.log.rounds {
            sqlx::query(
                "INSERT OR IGNORE INTO contribution_rounds (contribution_id, round_address) VALUES (?1, ?2)",
            )
            .bind(contribution_id)
            .bind(round.to_string())
            .execute(&mut *tx)
            .await?;
        }
        count += 1;
    }

    tx.commit().await?;
    Ok(count)
}

// ─────────────────────────────────────────────────────────
// Contribution reads
// ─────────────────────────────────────────────────────────

/// Contributions credited to `round`, in chain order.
pub async fn get_contributions_for_round(
    pool: &SqlitePool,
    round: &Address,
) -> Result<Vec<ContributionRecord>> {
    let rows = sqlx::query_as::<_, ContributionRecord>(
        r#"
        SELECT c.id, c.tx_hash, c.log_index, c.block_number, c.grant_id, c.payer,
               c.token_in, c.amount_raw, c.rounds, c.time, c.created_at
        FROM   contributions c
        JOIN   contribution_rounds r ON r.contribution_id = c.id
        WHERE  r.round_address = ?1
        ORDER  BY c.block_number ASC, c.log_index ASC
        "#,
    )
    .bind(round.to_string())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Cache entries
// ─────────────────────────────────────────────────────────

pub async fn read_cache_entry(pool: &SqlitePool, key: &str) -> Result<Option<CacheEntry>> {
    let row: Option<(i64, String)> =
        sqlx::query_as("SELECT block_height, data FROM cache_entries WHERE cache_key = ?1")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(block_height, data)| CacheEntry {
        block_height: block_height.max(0) as u64,
        data,
    }))
}

pub async fn write_cache_entry(
    pool: &SqlitePool,
    key: &str,
    block_height: u64,
    data: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cache_entries (cache_key, block_height, data, updated_at)
        VALUES (?1, ?2, ?3, strftime('%s', 'now'))
        ON CONFLICT (cache_key) DO UPDATE
            SET block_height = excluded.block_height,
                data         = excluded.data,
                updated_at   = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(block_height as i64)
    .bind(data)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_cache_entry(pool: &SqlitePool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM cache_entries WHERE cache_key = ?1")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}
