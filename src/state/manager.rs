//! PostgreSQL state manager

use super::RelayStore;
use crate::config::DatabaseConfig;
use crate::error::{RelayError, RelayResult};
use crate::gas::GasPriceSample;
use crate::tx::{TransactionRecord, TxStatus};

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::H256;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> RelayResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relay_transactions (
                id UUID PRIMARY KEY,
                user_address VARCHAR(42) NOT NULL,
                to_address VARCHAR(42) NOT NULL,
                data BYTEA NOT NULL,
                value VARCHAR(78) NOT NULL,
                tx_hash VARCHAR(66) NOT NULL UNIQUE,
                gas_price VARCHAR(78) NOT NULL,
                gas_limit BIGINT NOT NULL,
                fee_payer VARCHAR(42) NOT NULL,
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                submitted_at TIMESTAMPTZ NOT NULL,
                finalized_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_relay_transactions_user
            ON relay_transactions (user_address)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gas_price_samples (
                id BIGSERIAL PRIMARY KEY,
                network VARCHAR(64) NOT NULL,
                gas_price VARCHAR(78) NOT NULL,
                fetched_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl RelayStore for StateManager {
    async fn save_transaction_record(&self, record: &TransactionRecord) -> RelayResult<()> {
        sqlx::query(
            r#"
            INSERT INTO relay_transactions
                (id, user_address, to_address, data, value, tx_hash,
                 gas_price, gas_limit, fee_payer, status, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(format!("{:?}", record.user_address))
        .bind(format!("{:?}", record.to))
        .bind(record.data.to_vec())
        .bind(record.value.to_string())
        .bind(format!("{:?}", record.tx_hash))
        .bind(record.gas_price.to_string())
        .bind(record.gas_limit as i64)
        .bind(format!("{:?}", record.fee_payer))
        .bind(record.status.as_str())
        .bind(record.submitted_at)
        .execute(&self.pool)
        .await?;

        debug!("Stored relay record {:?}", record.tx_hash);
        Ok(())
    }

    async fn update_transaction_status(&self, tx_hash: H256, status: TxStatus) -> RelayResult<()> {
        let finalized_at = status.is_terminal().then(Utc::now);

        // Only pending rows move; terminal rows are left untouched
        let result = sqlx::query(
            r#"
            UPDATE relay_transactions
            SET status = $1, finalized_at = $2
            WHERE tx_hash = $3 AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(finalized_at)
        .bind(format!("{:?}", tx_hash))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RelayError::Storage(format!(
                "no pending record for {:?}",
                tx_hash
            )));
        }
        Ok(())
    }

    async fn save_gas_price_sample(&self, sample: &GasPriceSample) -> RelayResult<()> {
        sqlx::query(
            r#"
            INSERT INTO gas_price_samples (network, gas_price, fetched_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&sample.network)
        .bind(sample.gas_price.to_string())
        .bind(sample.fetched_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn health_check(&self) -> RelayResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
