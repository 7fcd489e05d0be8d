use crate::decoder::{DecodedBlock, OutputLookup, SpentOutput};
use crate::repository::r#trait::{Checkpoint, CheckpointAdvance, Repository};
use crate::types::AppError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS blocks (
        hash TEXT PRIMARY KEY, height BIGINT NOT NULL, timestamp BIGINT NOT NULL,
        nonce TEXT NOT NULL, version BIGINT NOT NULL, bits TEXT NOT NULL,
        difficulty DOUBLE PRECISION NOT NULL, merkle_root TEXT NOT NULL,
        chainwork TEXT NOT NULL, size BIGINT NOT NULL, num_transactions BIGINT NOT NULL,
        total_outputs BIGINT NOT NULL, total_inputs BIGINT NOT NULL,
        total_transparent_input NUMERIC NOT NULL, total_transparent_output NUMERIC NOT NULL,
        transaction_ids TEXT[] NOT NULL, prev_block_hash TEXT NOT NULL DEFAULT '',
        next_block_hash TEXT NOT NULL DEFAULT '')",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_blocks_height ON blocks(height)",
    "CREATE TABLE IF NOT EXISTS transactions (
        tx_id TEXT PRIMARY KEY, block_hash TEXT NOT NULL, block_height BIGINT NOT NULL,
        block_timestamp BIGINT NOT NULL, version BIGINT NOT NULL, overwintered BOOLEAN NOT NULL,
        hex TEXT NOT NULL, num_inputs BIGINT NOT NULL, num_outputs BIGINT NOT NULL,
        total_public_input NUMERIC NOT NULL, total_public_output NUMERIC NOT NULL)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block_height ON transactions(block_height)",
    "CREATE TABLE IF NOT EXISTS transparent_outputs (
        tx_id TEXT NOT NULL, output_index BIGINT NOT NULL, value NUMERIC NOT NULL,
        recipients TEXT[] NOT NULL, PRIMARY KEY (tx_id, output_index))",
    "CREATE TABLE IF NOT EXISTS transparent_inputs (
        tx_id TEXT NOT NULL, input_index BIGINT NOT NULL, spent_tx_id TEXT NOT NULL,
        spent_output_index BIGINT NOT NULL, value NUMERIC NOT NULL, senders TEXT[] NOT NULL,
        coinbase TEXT NOT NULL DEFAULT '', PRIMARY KEY (tx_id, input_index))",
    "CREATE TABLE IF NOT EXISTS checkpoints (
        chunk_start BIGINT PRIMARY KEY, chunk_end BIGINT NOT NULL, last_committed BIGINT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS missed_blocks (height BIGINT PRIMARY KEY)",
    "CREATE TABLE IF NOT EXISTS node_snapshots (
        kind TEXT PRIMARY KEY, refreshed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        payload JSONB NOT NULL)",
];

/// PostgreSQL-backed repository.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connects with five connections per hardware thread (each persistence
    /// worker holds one for the duration of a block transaction) and runs the
    /// idempotent schema creation.
    pub async fn connect(db_url: &str) -> Result<Self, AppError> {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let pool = PgPoolOptions::new()
            .max_connections((parallelism * 5) as u32)
            .connect(db_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to PostgreSQL: {}", e)))?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OutputLookup for PostgresRepository {
    async fn lookup_output(
        &self,
        tx_id: &str,
        output_index: u32,
    ) -> Result<Option<SpentOutput>, AppError> {
        let row: Option<(Decimal, Vec<String>)> = sqlx::query_as(
            "SELECT value, recipients FROM transparent_outputs WHERE tx_id = $1 AND output_index = $2",
        )
        .bind(tx_id).bind(output_index as i64)
        .fetch_optional(&self.pool).await?;
        Ok(row.map(|(value, recipients)| SpentOutput { value, recipients }))
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_synced_block_height(&self) -> Result<u64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(height), 0) FROM blocks")
            .fetch_one(&self.pool).await?;
        Ok(row.0 as u64)
    }

    async fn insert_block(
        &self,
        block: &DecodedBlock,
        advance: Option<CheckpointAdvance>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let b = &block.block;
        sqlx::query(
            "INSERT INTO blocks (hash, height, timestamp, nonce, version, bits, difficulty, \
             merkle_root, chainwork, size, num_transactions, total_outputs, total_inputs, \
             total_transparent_input, total_transparent_output, transaction_ids, \
             prev_block_hash, next_block_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (hash) DO NOTHING",
        )
        .bind(&b.hash).bind(b.height as i64).bind(b.timestamp as i64).bind(&b.nonce)
        .bind(b.version).bind(&b.bits).bind(b.difficulty).bind(&b.merkle_root)
        .bind(&b.chainwork).bind(b.size as i64).bind(b.num_transactions as i64)
        .bind(b.total_outputs as i64).bind(b.total_inputs as i64)
        .bind(b.total_transparent_input).bind(b.total_transparent_output)
        .bind(&b.transaction_ids).bind(&b.prev_block_hash).bind(&b.next_block_hash)
        .execute(&mut *tx).await?;

        for t in &block.transactions {
            sqlx::query(
                "INSERT INTO transactions (tx_id, block_hash, block_height, block_timestamp, \
                 version, overwintered, hex, num_inputs, num_outputs, total_public_input, \
                 total_public_output) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (tx_id) DO NOTHING",
            )
            .bind(&t.tx_id).bind(&t.block_hash).bind(t.block_height as i64)
            .bind(t.block_timestamp as i64).bind(t.version).bind(t.overwintered)
            .bind(&t.hex).bind(t.num_inputs as i64).bind(t.num_outputs as i64)
            .bind(t.total_public_input).bind(t.total_public_output)
            .execute(&mut *tx).await?;
        }

        for o in &block.outputs {
            sqlx::query(
                "INSERT INTO transparent_outputs (tx_id, output_index, value, recipients) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (tx_id, output_index) DO NOTHING",
            )
            .bind(&o.tx_id).bind(o.output_index as i64).bind(o.value).bind(&o.recipients)
            .execute(&mut *tx).await?;
        }

        for i in &block.inputs {
            sqlx::query(
                "INSERT INTO transparent_inputs (tx_id, input_index, spent_tx_id, \
                 spent_output_index, value, senders, coinbase) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (tx_id, input_index) DO NOTHING",
            )
            .bind(&i.tx_id).bind(i.input_index as i64).bind(&i.spent_tx_id)
            .bind(i.spent_output_index as i64).bind(i.value).bind(&i.senders).bind(&i.coinbase)
            .execute(&mut *tx).await?;
        }

        if let Some(advance) = advance {
            if advance.finished {
                sqlx::query("DELETE FROM checkpoints WHERE chunk_start = $1")
                    .bind(advance.chunk_start as i64)
                    .execute(&mut *tx).await?;
            } else {
                sqlx::query("UPDATE checkpoints SET last_committed = $2 WHERE chunk_start = $1")
                    .bind(advance.chunk_start as i64).bind(advance.last_committed as i64)
                    .execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_checkpoint(&self, chunk_start: u64) -> Result<Option<Checkpoint>, AppError> {
        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            "SELECT chunk_start, chunk_end, last_committed FROM checkpoints WHERE chunk_start = $1",
        )
        .bind(chunk_start as i64)
        .fetch_optional(&self.pool).await?;
        Ok(row.map(|(chunk_start, chunk_end, last_committed)| Checkpoint {
            chunk_start: chunk_start as u64,
            chunk_end: chunk_end as u64,
            last_committed,
        }))
    }

    async fn create_checkpoint_if_absent(
        &self,
        chunk_start: u64,
        chunk_end: u64,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO checkpoints (chunk_start, chunk_end, last_committed) \
             VALUES ($1, $2, $3) ON CONFLICT (chunk_start) DO NOTHING",
        )
        .bind(chunk_start as i64).bind(chunk_end as i64).bind(chunk_start as i64 - 1)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_unfinished_checkpoints(&self) -> Result<Vec<Checkpoint>, AppError> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT chunk_start, chunk_end, last_committed FROM checkpoints ORDER BY chunk_start DESC",
        )
        .fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(chunk_start, chunk_end, last_committed)| Checkpoint {
                chunk_start: chunk_start as u64,
                chunk_end: chunk_end as u64,
                last_committed,
            })
            .collect())
    }

    async fn add_missed_block(&self, height: u64) -> Result<(), AppError> {
        sqlx::query("INSERT INTO missed_blocks (height) VALUES ($1) ON CONFLICT (height) DO NOTHING")
            .bind(height as i64)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_missed_blocks(&self) -> Result<Vec<u64>, AppError> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT height FROM missed_blocks ORDER BY height")
            .fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(height,)| height as u64).collect())
    }

    async fn store_node_snapshot(&self, kind: &str, payload: &Value) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO node_snapshots (kind, payload) VALUES ($1, $2) \
             ON CONFLICT (kind) DO UPDATE SET payload = EXCLUDED.payload, refreshed_at = now()",
        )
        .bind(kind).bind(payload)
        .execute(&self.pool).await?;
        Ok(())
    }
}
