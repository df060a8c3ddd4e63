//! SQLx-based settlement repository implementation
//!
//! The one-pending-per-business and one-live-request-per-date invariants
//! are checked up front for clean domain errors and backed by partial
//! unique indexes, so a concurrent insert racing past the checks still
//! fails with the right error.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use buzz_core::error::{Error, Result};
use buzz_core::settlement::{
    BankInfo, SettlementRepository, SettlementRequest, SettlementStatus, SettlementSummary,
};

use crate::database::connection::DatabasePool;

/// SQLx-based settlement repository implementation
pub struct SqlxSettlementRepository {
    pool: DatabasePool,
}

impl SqlxSettlementRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Convert a PostgreSQL row to a SettlementRequest
    fn row_to_request(&self, row: &PgRow) -> Result<SettlementRequest> {
        let status: String = row
            .try_get("status")
            .map_err(|e| Error::Storage(format!("Failed to get status: {}", e)))?;

        Ok(SettlementRequest {
            id: row
                .try_get("id")
                .map_err(|e| Error::Storage(format!("Failed to get id: {}", e)))?,
            business_id: row
                .try_get("business_id")
                .map_err(|e| Error::Storage(format!("Failed to get business_id: {}", e)))?,
            settlement_date: row
                .try_get("settlement_date")
                .map_err(|e| Error::Storage(format!("Failed to get settlement_date: {}", e)))?,
            coupon_count: row
                .try_get("coupon_count")
                .map_err(|e| Error::Storage(format!("Failed to get coupon_count: {}", e)))?,
            coupon_amount: row
                .try_get("coupon_amount")
                .map_err(|e| Error::Storage(format!("Failed to get coupon_amount: {}", e)))?,
            mileage_count: row
                .try_get("mileage_count")
                .map_err(|e| Error::Storage(format!("Failed to get mileage_count: {}", e)))?,
            mileage_amount: row
                .try_get("mileage_amount")
                .map_err(|e| Error::Storage(format!("Failed to get mileage_amount: {}", e)))?,
            total_amount: row
                .try_get("total_amount")
                .map_err(|e| Error::Storage(format!("Failed to get total_amount: {}", e)))?,
            bank_info: BankInfo {
                bank_name: row
                    .try_get("bank_name")
                    .map_err(|e| Error::Storage(format!("Failed to get bank_name: {}", e)))?,
                bank_account: row
                    .try_get("bank_account")
                    .map_err(|e| Error::Storage(format!("Failed to get bank_account: {}", e)))?,
                account_holder: row
                    .try_get("account_holder")
                    .map_err(|e| Error::Storage(format!("Failed to get account_holder: {}", e)))?,
            },
            status: status.parse()?,
            reject_reason: row
                .try_get("reject_reason")
                .map_err(|e| Error::Storage(format!("Failed to get reject_reason: {}", e)))?,
            cancel_reason: row
                .try_get("cancel_reason")
                .map_err(|e| Error::Storage(format!("Failed to get cancel_reason: {}", e)))?,
            requested_at: row
                .try_get("requested_at")
                .map_err(|e| Error::Storage(format!("Failed to get requested_at: {}", e)))?,
            decided_at: row
                .try_get("decided_at")
                .map_err(|e| Error::Storage(format!("Failed to get decided_at: {}", e)))?,
            paid_at: row
                .try_get("paid_at")
                .map_err(|e| Error::Storage(format!("Failed to get paid_at: {}", e)))?,
            estimated_payment_date: row.try_get("estimated_payment_date").map_err(|e| {
                Error::Storage(format!("Failed to get estimated_payment_date: {}", e))
            })?,
        })
    }
}

const SELECT_REQUEST_COLUMNS: &str = r#"
    SELECT id, business_id, settlement_date, coupon_count, coupon_amount, mileage_count,
           mileage_amount, total_amount, bank_name, bank_account, account_holder, status,
           reject_reason, cancel_reason, requested_at, decided_at, paid_at,
           estimated_payment_date
    FROM settlement_requests
"#;

#[async_trait]
impl SettlementRepository for SqlxSettlementRepository {
    async fn create(&self, request: &SettlementRequest) -> Result<SettlementRequest> {
        info!(
            "Creating settlement request for business {} on {}",
            request.business_id, request.settlement_date
        );

        let pending_row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM settlement_requests
                WHERE business_id = $1 AND status = 'pending'
            ) AS found
            "#,
        )
        .bind(request.business_id)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to check pending settlements: {}", e)))?;
        let pending: bool = pending_row
            .try_get("found")
            .map_err(|e| Error::Storage(format!("Failed to get found: {}", e)))?;
        if pending {
            return Err(Error::PendingSettlementExists);
        }

        // Cancelled and rejected requests free their date up again
        let duplicate_row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM settlement_requests
                WHERE business_id = $1
                  AND settlement_date = $2
                  AND status NOT IN ('cancelled', 'rejected')
            ) AS found
            "#,
        )
        .bind(request.business_id)
        .bind(request.settlement_date)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to check settlement dates: {}", e)))?;
        let duplicate: bool = duplicate_row
            .try_get("found")
            .map_err(|e| Error::Storage(format!("Failed to get found: {}", e)))?;
        if duplicate {
            return Err(Error::DuplicateSettlementDate);
        }

        let query = r#"
            INSERT INTO settlement_requests
                (id, business_id, settlement_date, coupon_count, coupon_amount, mileage_count,
                 mileage_amount, total_amount, bank_name, bank_account, account_holder, status,
                 reject_reason, cancel_reason, requested_at, decided_at, paid_at,
                 estimated_payment_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#;
        sqlx::query(query)
            .bind(request.id)
            .bind(request.business_id)
            .bind(request.settlement_date)
            .bind(request.coupon_count)
            .bind(request.coupon_amount)
            .bind(request.mileage_count)
            .bind(request.mileage_amount)
            .bind(request.total_amount)
            .bind(&request.bank_info.bank_name)
            .bind(&request.bank_info.bank_account)
            .bind(&request.bank_info.account_holder)
            .bind(request.status.as_str())
            .bind(&request.reject_reason)
            .bind(&request.cancel_reason)
            .bind(request.requested_at)
            .bind(request.decided_at)
            .bind(request.paid_at)
            .bind(request.estimated_payment_date)
            .execute(self.pool.inner())
            .await
            .map_err(|e| match e.as_database_error().and_then(|d| d.constraint()) {
                Some("idx_settlements_one_pending") => Error::PendingSettlementExists,
                Some("idx_settlements_live_date") => Error::DuplicateSettlementDate,
                _ => Error::Storage(format!("Failed to create settlement request: {}", e)),
            })?;

        info!("Settlement request created: {}", request.id);
        Ok(request.clone())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<SettlementRequest>> {
        let query = format!("{} WHERE id = $1", SELECT_REQUEST_COLUMNS);

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to fetch settlement request: {}", e)))?;

        row.map(|row| self.row_to_request(&row)).transpose()
    }

    async fn list(
        &self,
        business_id: Option<Uuid>,
        status: Option<SettlementStatus>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<SettlementRequest>, i64)> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = (page - 1) * page_size;
        let status_str = status.map(|s| s.as_str());

        let total_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM settlement_requests
            WHERE ($1::uuid IS NULL OR business_id = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(business_id)
        .bind(status_str)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to count settlement requests: {}", e)))?;
        let total: i64 = total_row
            .try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))?;

        let query = format!(
            r#"{}
            WHERE ($1::uuid IS NULL OR business_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY requested_at DESC, id ASC
            LIMIT $3 OFFSET $4
            "#,
            SELECT_REQUEST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(business_id)
            .bind(status_str)
            .bind(page_size)
            .bind(offset)
            .fetch_all(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to list settlement requests: {}", e)))?;

        let requests = rows
            .iter()
            .map(|row| self.row_to_request(row))
            .collect::<Result<Vec<_>>>()?;

        Ok((requests, total))
    }

    async fn transition(
        &self,
        id: &Uuid,
        next: SettlementStatus,
        reason: Option<String>,
    ) -> Result<SettlementRequest> {
        info!("Transitioning settlement {} to {}", id, next.as_str());

        let mut tx = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        let query = format!("{} WHERE id = $1 FOR UPDATE", SELECT_REQUEST_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to lock settlement request: {}", e)))?
            .ok_or_else(|| Error::NotFound("Settlement request".to_string()))?;
        let mut request = self.row_to_request(&row)?;

        if !request.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: request.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        let now = Utc::now();
        request.status = next;
        match next {
            SettlementStatus::Approved => request.decided_at = Some(now),
            SettlementStatus::Rejected => {
                request.decided_at = Some(now);
                request.reject_reason = reason;
            }
            SettlementStatus::Cancelled => {
                request.decided_at = Some(now);
                request.cancel_reason = reason;
            }
            SettlementStatus::Paid => request.paid_at = Some(now),
            SettlementStatus::Pending => {}
        }

        sqlx::query(
            r#"
            UPDATE settlement_requests
            SET status = $2, reject_reason = $3, cancel_reason = $4, decided_at = $5, paid_at = $6
            WHERE id = $1
            "#,
        )
        .bind(request.id)
        .bind(request.status.as_str())
        .bind(&request.reject_reason)
        .bind(&request.cancel_reason)
        .bind(request.decided_at)
        .bind(request.paid_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(format!("Failed to update settlement request: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("Failed to commit transaction: {}", e)))?;

        info!("Settlement {} is now {}", id, next.as_str());
        Ok(request)
    }

    async fn summary(&self, business_id: Option<Uuid>) -> Result<SettlementSummary> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count, COALESCE(SUM(total_amount), 0) AS amount
            FROM settlement_requests
            WHERE ($1::uuid IS NULL OR business_id = $1)
            GROUP BY status
            "#,
        )
        .bind(business_id)
        .fetch_all(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to summarize settlements: {}", e)))?;

        let mut summary = SettlementSummary::default();
        for row in &rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| Error::Storage(format!("Failed to get status: {}", e)))?;
            let count: i64 = row
                .try_get("count")
                .map_err(|e| Error::Storage(format!("Failed to get count: {}", e)))?;
            let amount: Decimal = row
                .try_get("amount")
                .map_err(|e| Error::Storage(format!("Failed to get amount: {}", e)))?;

            let bucket = match status.parse::<SettlementStatus>()? {
                SettlementStatus::Pending => &mut summary.pending,
                SettlementStatus::Approved => &mut summary.approved,
                SettlementStatus::Rejected => &mut summary.rejected,
                SettlementStatus::Paid => &mut summary.paid,
                SettlementStatus::Cancelled => &mut summary.cancelled,
            };
            bucket.count = count;
            bucket.amount = amount;
        }

        Ok(summary)
    }

    async fn amount_in_period(
        &self,
        statuses: &[SettlementStatus],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Decimal> {
        let status_strs: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(total_amount), 0) AS total
            FROM settlement_requests
            WHERE status = ANY($1)
              AND settlement_date >= $2
              AND settlement_date < $3
            "#,
        )
        .bind(&status_strs)
        .bind(from)
        .bind(to)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to sum settlement amounts: {}", e)))?;

        row.try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))
    }
}
