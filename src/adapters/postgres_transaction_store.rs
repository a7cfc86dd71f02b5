//! Postgres implementation of TransactionStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::domain::{StatusChange, Transaction, TransactionStatus};
use crate::ports::{
    classify_unmatched, RejectionReason, RepositoryError, RepositoryResult, TransactionStore,
    TransitionMetadata, TransitionResult,
};

/// Postgres-backed transaction store.
///
/// `transition` is a single conditional UPDATE guarded by the current status,
/// committed together with its history row, so concurrent deliveries for one
/// reference cannot both apply.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_history<'e, E>(executor: E, transaction_id: Uuid) -> RepositoryResult<Vec<StatusChange>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT status, source_event_id, raw_response, created_at
            FROM transaction_status_history
            WHERE transaction_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(transaction_id)
        .fetch_all(executor)
        .await?;

        rows.into_iter().map(HistoryRow::into_domain).collect()
    }

    async fn hydrate(&self, row: Option<TransactionRow>) -> RepositoryResult<Option<Transaction>> {
        match row {
            Some(row) => {
                let history = Self::load_history(&self.pool, row.id).await?;
                Ok(Some(row.into_domain(history)?))
            }
            None => Ok(None),
        }
    }
}

fn map_write_error(e: sqlx::Error, what: &str) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Duplicate(what.to_string())
        }
        _ => RepositoryError::from(e),
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn insert(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut db_tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, reference, provider_reference, channel_id, amount, currency, email,
                description, status, payment_method, invoice_id, service_id, metadata,
                authorization_url, amount_mismatch, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(tx.id)
        .bind(&tx.reference)
        .bind(&tx.provider_reference)
        .bind(&tx.channel_id)
        .bind(&tx.amount)
        .bind(&tx.currency)
        .bind(&tx.email)
        .bind(&tx.description)
        .bind(tx.status.as_str())
        .bind(&tx.payment_method)
        .bind(&tx.invoice_id)
        .bind(&tx.service_id)
        .bind(&tx.metadata)
        .bind(&tx.authorization_url)
        .bind(tx.amount_mismatch)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| map_write_error(e, &tx.reference))?;

        for change in &tx.status_history {
            insert_history(&mut db_tx, tx.id, change).await?;
        }

        db_tx.commit().await?;
        Ok(tx.clone())
    }

    async fn find_by_reference(&self, reference: &str) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE reference = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn find_by_provider_reference(
        &self,
        provider_reference: &str,
    ) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE provider_reference = $1",
        )
        .bind(provider_reference)
        .fetch_optional(&self.pool)
        .await?;
        self.hydrate(row).await
    }

    async fn transition(
        &self,
        reference: &str,
        from: &[TransactionStatus],
        to: TransactionStatus,
        metadata: TransitionMetadata,
    ) -> RepositoryResult<TransitionResult> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let now = Utc::now();
        let mut db_tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions
            SET status = $2,
                updated_at = $3,
                provider_reference = COALESCE(provider_reference, $4),
                payment_method = COALESCE(payment_method, $5),
                amount_mismatch = amount_mismatch OR ($6::NUMERIC IS NOT NULL AND amount <> $6::NUMERIC)
            WHERE reference = $1 AND status = ANY($7)
            RETURNING *
            "#,
        )
        .bind(reference)
        .bind(to.as_str())
        .bind(now)
        .bind(&metadata.provider_reference)
        .bind(&metadata.payment_method)
        .bind(&metadata.reported_amount)
        .bind(from)
        .fetch_optional(&mut *db_tx)
        .await
        .map_err(|e| map_write_error(e, "provider reference is bound to another transaction"))?;

        let Some(row) = updated else {
            let current = sqlx::query_as::<_, TransactionRow>(
                "SELECT * FROM transactions WHERE reference = $1",
            )
            .bind(reference)
            .fetch_optional(&mut *db_tx)
            .await?;
            db_tx.rollback().await?;

            return match current {
                None => Ok(TransitionResult::Rejected(RejectionReason::NotFound)),
                Some(row) => {
                    let history = Self::load_history(&self.pool, row.id).await?;
                    Ok(classify_unmatched(&row.into_domain(history)?, to))
                }
            };
        };

        insert_history(
            &mut db_tx,
            row.id,
            &StatusChange {
                status: to,
                at: now,
                source_event_id: metadata.source_event_id,
                raw_response: metadata.raw_response,
            },
        )
        .await?;

        let history = Self::load_history(&mut *db_tx, row.id).await?;
        db_tx.commit().await?;

        Ok(TransitionResult::Applied(row.into_domain(history)?))
    }

    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in rows {
            let history = Self::load_history(&self.pool, row.id).await?;
            transactions.push(row.into_domain(history)?);
        }
        Ok(transactions)
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert_history(
    db_tx: &mut sqlx::Transaction<'_, Postgres>,
    transaction_id: Uuid,
    change: &StatusChange,
) -> RepositoryResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transaction_status_history (transaction_id, status, source_event_id, raw_response, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(transaction_id)
    .bind(change.status.as_str())
    .bind(change.source_event_id)
    .bind(&change.raw_response)
    .bind(change.at)
    .execute(&mut **db_tx)
    .await?;
    Ok(())
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    reference: String,
    provider_reference: Option<String>,
    channel_id: String,
    amount: bigdecimal::BigDecimal,
    currency: String,
    email: String,
    description: Option<String>,
    status: String,
    payment_method: Option<String>,
    invoice_id: Option<String>,
    service_id: Option<String>,
    metadata: Option<serde_json::Value>,
    authorization_url: Option<String>,
    amount_mismatch: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self, status_history: Vec<StatusChange>) -> RepositoryResult<Transaction> {
        let status = self
            .status
            .parse::<TransactionStatus>()
            .map_err(|e| RepositoryError::Corrupt(e.to_string()))?;

        Ok(Transaction {
            id: self.id,
            reference: self.reference,
            provider_reference: self.provider_reference,
            channel_id: self.channel_id,
            amount: self.amount,
            currency: self.currency,
            email: self.email,
            description: self.description,
            status,
            payment_method: self.payment_method,
            invoice_id: self.invoice_id,
            service_id: self.service_id,
            metadata: self.metadata,
            authorization_url: self.authorization_url,
            amount_mismatch: self.amount_mismatch,
            status_history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    status: String,
    source_event_id: Option<Uuid>,
    raw_response: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_domain(self) -> RepositoryResult<StatusChange> {
        Ok(StatusChange {
            status: self
                .status
                .parse::<TransactionStatus>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            at: self.created_at,
            source_event_id: self.source_event_id,
            raw_response: self.raw_response,
        })
    }
}
