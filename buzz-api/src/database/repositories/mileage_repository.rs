//! SQLx-based mileage repository implementation
//!
//! The balance read, the ledger insert and the account update run inside
//! one database transaction with the account row locked, so concurrent
//! ledger events against the same account are fully serialized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use buzz_core::error::{Error, Result};
use buzz_core::mileage::{
    MileageAccount, MileageRepository, MileageTransaction, TransactionContext, TransactionKind,
    EXPIRY_REFERENCE_TYPE,
};

use crate::database::connection::DatabasePool;

/// SQLx-based mileage repository implementation
pub struct SqlxMileageRepository {
    pool: DatabasePool,
}

impl SqlxMileageRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Convert a PostgreSQL row to a MileageAccount
    fn row_to_account(&self, row: &sqlx::postgres::PgRow) -> Result<MileageAccount> {
        Ok(MileageAccount {
            user_id: row
                .try_get("user_id")
                .map_err(|e| Error::Storage(format!("Failed to get user_id: {}", e)))?,
            balance: row
                .try_get("balance")
                .map_err(|e| Error::Storage(format!("Failed to get balance: {}", e)))?,
            total_earned: row
                .try_get("total_earned")
                .map_err(|e| Error::Storage(format!("Failed to get total_earned: {}", e)))?,
            total_used: row
                .try_get("total_used")
                .map_err(|e| Error::Storage(format!("Failed to get total_used: {}", e)))?,
            total_expired: row
                .try_get("total_expired")
                .map_err(|e| Error::Storage(format!("Failed to get total_expired: {}", e)))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::Storage(format!("Failed to get updated_at: {}", e)))?,
        })
    }

    /// Convert a PostgreSQL row to a MileageTransaction
    fn row_to_transaction(&self, row: &sqlx::postgres::PgRow) -> Result<MileageTransaction> {
        let kind: String = row
            .try_get("kind")
            .map_err(|e| Error::Storage(format!("Failed to get kind: {}", e)))?;

        Ok(MileageTransaction {
            id: row
                .try_get("id")
                .map_err(|e| Error::Storage(format!("Failed to get id: {}", e)))?,
            user_id: row
                .try_get("user_id")
                .map_err(|e| Error::Storage(format!("Failed to get user_id: {}", e)))?,
            kind: kind.parse()?,
            amount: row
                .try_get("amount")
                .map_err(|e| Error::Storage(format!("Failed to get amount: {}", e)))?,
            balance_before: row
                .try_get("balance_before")
                .map_err(|e| Error::Storage(format!("Failed to get balance_before: {}", e)))?,
            balance_after: row
                .try_get("balance_after")
                .map_err(|e| Error::Storage(format!("Failed to get balance_after: {}", e)))?,
            description: row
                .try_get("description")
                .map_err(|e| Error::Storage(format!("Failed to get description: {}", e)))?,
            reference_type: row
                .try_get("reference_type")
                .map_err(|e| Error::Storage(format!("Failed to get reference_type: {}", e)))?,
            reference_id: row
                .try_get("reference_id")
                .map_err(|e| Error::Storage(format!("Failed to get reference_id: {}", e)))?,
            business_id: row
                .try_get("business_id")
                .map_err(|e| Error::Storage(format!("Failed to get business_id: {}", e)))?,
            expires_at: row
                .try_get("expires_at")
                .map_err(|e| Error::Storage(format!("Failed to get expires_at: {}", e)))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::Storage(format!("Failed to get created_at: {}", e)))?,
        })
    }
}

const INSERT_ACCOUNT_IF_ABSENT: &str = r#"
    INSERT INTO mileage_accounts (user_id, balance, total_earned, total_used, total_expired, updated_at)
    VALUES ($1, 0, 0, 0, 0, $2)
    ON CONFLICT (user_id) DO NOTHING
"#;

const SELECT_ACCOUNT_FOR_UPDATE: &str = r#"
    SELECT user_id, balance, total_earned, total_used, total_expired, updated_at
    FROM mileage_accounts
    WHERE user_id = $1
    FOR UPDATE
"#;

const INSERT_TRANSACTION: &str = r#"
    INSERT INTO mileage_transactions
        (id, user_id, kind, amount, balance_before, balance_after, description,
         reference_type, reference_id, business_id, expires_at, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
"#;

const UPDATE_ACCOUNT: &str = r#"
    UPDATE mileage_accounts
    SET balance = $2, total_earned = $3, total_used = $4, total_expired = $5, updated_at = $6
    WHERE user_id = $1
"#;

// An earn row has lapsed once an expire row references it.
const NOT_LAPSED: &str = r#"
    NOT EXISTS (
        SELECT 1 FROM mileage_transactions e
        WHERE e.kind = 'expire'
          AND e.reference_type = 'mileage_earn'
          AND e.reference_id = t.id::text
    )
"#;

#[async_trait]
impl MileageRepository for SqlxMileageRepository {
    async fn get_or_create_account(&self, user_id: &Uuid) -> Result<MileageAccount> {
        sqlx::query(INSERT_ACCOUNT_IF_ABSENT)
            .bind(user_id)
            .bind(Utc::now())
            .execute(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to create mileage account: {}", e)))?;

        let row = sqlx::query(
            r#"
            SELECT user_id, balance, total_earned, total_used, total_expired, updated_at
            FROM mileage_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to fetch mileage account: {}", e)))?;

        self.row_to_account(&row)
    }

    async fn record(
        &self,
        user_id: &Uuid,
        kind: TransactionKind,
        amount: Decimal,
        context: &TransactionContext,
    ) -> Result<MileageTransaction> {
        info!("Recording {} transaction for user: {}", kind.as_str(), user_id);

        let now = Utc::now();
        let mut tx = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query(INSERT_ACCOUNT_IF_ABSENT)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create mileage account: {}", e)))?;

        let row = sqlx::query(SELECT_ACCOUNT_FOR_UPDATE)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to lock mileage account: {}", e)))?;
        let mut account = self.row_to_account(&row)?;

        // Domain validation happens on the locked snapshot; an error here
        // drops the transaction and rolls everything back.
        let (balance_before, balance_after) = account.apply(kind, amount, now)?;

        let transaction = MileageTransaction {
            id: Uuid::new_v4(),
            user_id: *user_id,
            kind,
            amount,
            balance_before,
            balance_after,
            description: context.description.clone(),
            reference_type: context.reference_type.clone(),
            reference_id: context.reference_id.clone(),
            business_id: context.business_id,
            expires_at: if kind == TransactionKind::Earn {
                context.expires_at
            } else {
                None
            },
            created_at: now,
        };

        sqlx::query(INSERT_TRANSACTION)
            .bind(transaction.id)
            .bind(transaction.user_id)
            .bind(transaction.kind.as_str())
            .bind(transaction.amount)
            .bind(transaction.balance_before)
            .bind(transaction.balance_after)
            .bind(&transaction.description)
            .bind(&transaction.reference_type)
            .bind(&transaction.reference_id)
            .bind(transaction.business_id)
            .bind(transaction.expires_at)
            .bind(transaction.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to insert ledger transaction: {}", e)))?;

        sqlx::query(UPDATE_ACCOUNT)
            .bind(account.user_id)
            .bind(account.balance)
            .bind(account.total_earned)
            .bind(account.total_used)
            .bind(account.total_expired)
            .bind(account.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to update mileage account: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("Failed to commit transaction: {}", e)))?;

        info!("Ledger transaction recorded: {}", transaction.id);
        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        user_id: &Uuid,
        kind: Option<TransactionKind>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<MileageTransaction>, i64)> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = (page - 1) * page_size;
        let kind_str = kind.map(|k| k.as_str());

        let total_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM mileage_transactions
            WHERE user_id = $1 AND ($2::text IS NULL OR kind = $2)
            "#,
        )
        .bind(user_id)
        .bind(kind_str)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to count ledger transactions: {}", e)))?;
        let total: i64 = total_row
            .try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, kind, amount, balance_before, balance_after, description,
                   reference_type, reference_id, business_id, expires_at, created_at
            FROM mileage_transactions
            WHERE user_id = $1 AND ($2::text IS NULL OR kind = $2)
            ORDER BY seq DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(kind_str)
        .bind(page_size)
        .bind(offset)
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to list ledger transactions: {}", e)))?;

        let transactions = rows
            .iter()
            .map(|row| self.row_to_transaction(row))
            .collect::<Result<Vec<_>>>()?;

        Ok((transactions, total))
    }

    async fn expiring_amount(
        &self,
        user_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal> {
        let query = format!(
            r#"
            SELECT COALESCE(SUM(t.amount), 0) AS amount
            FROM mileage_transactions t
            WHERE t.user_id = $1
              AND t.kind = 'earn'
              AND t.expires_at > $2
              AND t.expires_at <= $3
              AND {}
            "#,
            NOT_LAPSED
        );

        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(from)
            .bind(to)
            .fetch_one(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to sum expiring mileage: {}", e)))?;

        row.try_get("amount")
            .map_err(|e| Error::Storage(format!("Failed to get amount: {}", e)))
    }

    async fn expire_due(
        &self,
        as_of: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<(Vec<MileageTransaction>, i64)> {
        info!("Running mileage expiry sweep (dry_run: {})", dry_run);

        let candidates_query = format!(
            r#"
            SELECT t.id, t.user_id, t.kind, t.amount, t.balance_before, t.balance_after,
                   t.description, t.reference_type, t.reference_id, t.business_id,
                   t.expires_at, t.created_at
            FROM mileage_transactions t
            WHERE t.kind = 'earn'
              AND t.expires_at IS NOT NULL
              AND t.expires_at <= $1
              AND {}
            ORDER BY t.seq
            "#,
            NOT_LAPSED
        );

        let mut tx = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        let rows = sqlx::query(&candidates_query)
            .bind(as_of)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to find expirable earns: {}", e)))?;
        let mut candidates = rows
            .iter()
            .map(|row| self.row_to_transaction(row))
            .collect::<Result<Vec<_>>>()?;

        let mut user_ids: Vec<Uuid> = candidates.iter().map(|c| c.user_id).collect();
        user_ids.sort();
        user_ids.dedup();

        let mut accounts: std::collections::HashMap<Uuid, MileageAccount> =
            std::collections::HashMap::new();
        if !user_ids.is_empty() {
            let lock_query = if dry_run {
                // Dry runs project without blocking concurrent writers.
                r#"
                SELECT user_id, balance, total_earned, total_used, total_expired, updated_at
                FROM mileage_accounts
                WHERE user_id = ANY($1)
                "#
            } else {
                r#"
                SELECT user_id, balance, total_earned, total_used, total_expired, updated_at
                FROM mileage_accounts
                WHERE user_id = ANY($1)
                FOR UPDATE
                "#
            };
            let account_rows = sqlx::query(lock_query)
                .bind(&user_ids)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| Error::Storage(format!("Failed to lock mileage accounts: {}", e)))?;
            for row in &account_rows {
                let account = self.row_to_account(row)?;
                accounts.insert(account.user_id, account);
            }

            if !dry_run {
                // Re-read under the account locks; a concurrent sweep may
                // have lapsed some candidates before we locked.
                let rows = sqlx::query(&candidates_query)
                    .bind(as_of)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(|e| Error::Storage(format!("Failed to find expirable earns: {}", e)))?;
                candidates = rows
                    .iter()
                    .map(|row| self.row_to_transaction(row))
                    .collect::<Result<Vec<_>>>()?;
                candidates.retain(|c| user_ids.contains(&c.user_id));
            }
        }

        let now = Utc::now();
        let mut written = Vec::new();
        let mut affected: std::collections::HashSet<Uuid> = std::collections::HashSet::new();

        for earn in candidates {
            let account = accounts
                .entry(earn.user_id)
                .or_insert_with(|| MileageAccount::new(earn.user_id));

            // The user may have spent part of the earn already; lapse only
            // what the balance can still cover. A zero remainder is left
            // for a later sweep.
            let amount = earn.amount.min(account.balance);
            if amount <= Decimal::ZERO {
                continue;
            }

            let (balance_before, balance_after) =
                account.apply(TransactionKind::Expire, amount, now)?;
            let transaction = MileageTransaction {
                id: Uuid::new_v4(),
                user_id: earn.user_id,
                kind: TransactionKind::Expire,
                amount,
                balance_before,
                balance_after,
                description: Some("Mileage expired".to_string()),
                reference_type: Some(EXPIRY_REFERENCE_TYPE.to_string()),
                reference_id: Some(earn.id.to_string()),
                business_id: None,
                expires_at: None,
                created_at: now,
            };

            if !dry_run {
                sqlx::query(INSERT_TRANSACTION)
                    .bind(transaction.id)
                    .bind(transaction.user_id)
                    .bind(transaction.kind.as_str())
                    .bind(transaction.amount)
                    .bind(transaction.balance_before)
                    .bind(transaction.balance_after)
                    .bind(&transaction.description)
                    .bind(&transaction.reference_type)
                    .bind(&transaction.reference_id)
                    .bind(transaction.business_id)
                    .bind(transaction.expires_at)
                    .bind(transaction.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        Error::Storage(format!("Failed to insert expire transaction: {}", e))
                    })?;
            }
            affected.insert(earn.user_id);
            written.push(transaction);
        }

        if !dry_run {
            for user_id in &affected {
                if let Some(account) = accounts.get(user_id) {
                    sqlx::query(UPDATE_ACCOUNT)
                        .bind(account.user_id)
                        .bind(account.balance)
                        .bind(account.total_earned)
                        .bind(account.total_used)
                        .bind(account.total_expired)
                        .bind(account.updated_at)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| {
                            Error::Storage(format!("Failed to update mileage account: {}", e))
                        })?;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("Failed to commit transaction: {}", e)))?;

        info!(
            "Expiry sweep complete: {} transactions, {} users (dry_run: {})",
            written.len(),
            affected.len(),
            dry_run
        );
        Ok((written, affected.len() as i64))
    }

    async fn used_total_for_business(
        &self,
        business_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, Decimal)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count, COALESCE(SUM(amount), 0) AS total
            FROM mileage_transactions
            WHERE kind = 'use'
              AND business_id = $1
              AND created_at >= $2
              AND created_at < $3
            "#,
        )
        .bind(business_id)
        .bind(from)
        .bind(to)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to sum business mileage usage: {}", e)))?;

        let count: i64 = row
            .try_get("count")
            .map_err(|e| Error::Storage(format!("Failed to get count: {}", e)))?;
        let total: Decimal = row
            .try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))?;
        Ok((count, total))
    }

    async fn earned_total(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS total
            FROM mileage_transactions
            WHERE kind = 'earn'
              AND created_at >= $1
              AND created_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to sum earned mileage: {}", e)))?;

        row.try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))
    }
}
