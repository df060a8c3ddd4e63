//! SQLx-based budget policy store implementation
//!
//! The policy is a singleton row, replaced wholesale on every update.
//! Limits and thresholds are stored as typed columns rather than an
//! opaque document, so the schema carries the shape.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::info;

use buzz_core::budget::{
    BudgetCategory, BudgetPolicy, BudgetPolicyStore, BudgetThresholds, CategoryLimits,
};
use buzz_core::error::{Error, Result};

use crate::database::connection::DatabasePool;

/// SQLx-based budget policy store implementation
pub struct SqlxBudgetPolicyStore {
    pool: DatabasePool,
}

impl SqlxBudgetPolicyStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Convert a PostgreSQL row to a BudgetPolicy
    fn row_to_policy(&self, row: &PgRow) -> Result<BudgetPolicy> {
        let restricted: Vec<String> = row
            .try_get("restricted_categories")
            .map_err(|e| Error::Storage(format!("Failed to get restricted_categories: {}", e)))?;
        let restricted_categories = restricted
            .iter()
            .map(|s| s.parse::<BudgetCategory>())
            .collect::<Result<Vec<_>>>()?;

        Ok(BudgetPolicy {
            monthly_limits: CategoryLimits {
                mileage: row
                    .try_get("monthly_mileage_limit")
                    .map_err(|e| Error::Storage(format!("Failed to get monthly_mileage_limit: {}", e)))?,
                coupon: row
                    .try_get("monthly_coupon_limit")
                    .map_err(|e| Error::Storage(format!("Failed to get monthly_coupon_limit: {}", e)))?,
                settlement: row
                    .try_get("monthly_settlement_limit")
                    .map_err(|e| Error::Storage(format!("Failed to get monthly_settlement_limit: {}", e)))?,
            },
            daily_limits: CategoryLimits {
                mileage: row
                    .try_get("daily_mileage_limit")
                    .map_err(|e| Error::Storage(format!("Failed to get daily_mileage_limit: {}", e)))?,
                coupon: row
                    .try_get("daily_coupon_limit")
                    .map_err(|e| Error::Storage(format!("Failed to get daily_coupon_limit: {}", e)))?,
                settlement: row
                    .try_get("daily_settlement_limit")
                    .map_err(|e| Error::Storage(format!("Failed to get daily_settlement_limit: {}", e)))?,
            },
            thresholds: BudgetThresholds {
                caution: row
                    .try_get("caution_threshold")
                    .map_err(|e| Error::Storage(format!("Failed to get caution_threshold: {}", e)))?,
                warning: row
                    .try_get("warning_threshold")
                    .map_err(|e| Error::Storage(format!("Failed to get warning_threshold: {}", e)))?,
                critical: row
                    .try_get("critical_threshold")
                    .map_err(|e| Error::Storage(format!("Failed to get critical_threshold: {}", e)))?,
            },
            emergency_mode: row
                .try_get("emergency_mode")
                .map_err(|e| Error::Storage(format!("Failed to get emergency_mode: {}", e)))?,
            restricted_categories,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::Storage(format!("Failed to get updated_at: {}", e)))?,
        })
    }
}

#[async_trait]
impl BudgetPolicyStore for SqlxBudgetPolicyStore {
    async fn get(&self) -> Result<BudgetPolicy> {
        let row = sqlx::query(
            r#"
            SELECT monthly_mileage_limit, monthly_coupon_limit, monthly_settlement_limit,
                   daily_mileage_limit, daily_coupon_limit, daily_settlement_limit,
                   caution_threshold, warning_threshold, critical_threshold,
                   emergency_mode, restricted_categories, updated_at
            FROM budget_policies
            WHERE id = 1
            "#,
        )
        .fetch_optional(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to fetch budget policy: {}", e)))?;

        match row {
            Some(row) => self.row_to_policy(&row),
            None => Ok(BudgetPolicy::default()),
        }
    }

    async fn put(&self, policy: &BudgetPolicy) -> Result<BudgetPolicy> {
        info!("Updating budget policy");

        let restricted: Vec<String> = policy
            .restricted_categories
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();

        let query = r#"
            INSERT INTO budget_policies
                (id, monthly_mileage_limit, monthly_coupon_limit, monthly_settlement_limit,
                 daily_mileage_limit, daily_coupon_limit, daily_settlement_limit,
                 caution_threshold, warning_threshold, critical_threshold,
                 emergency_mode, restricted_categories, updated_at)
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                monthly_mileage_limit = EXCLUDED.monthly_mileage_limit,
                monthly_coupon_limit = EXCLUDED.monthly_coupon_limit,
                monthly_settlement_limit = EXCLUDED.monthly_settlement_limit,
                daily_mileage_limit = EXCLUDED.daily_mileage_limit,
                daily_coupon_limit = EXCLUDED.daily_coupon_limit,
                daily_settlement_limit = EXCLUDED.daily_settlement_limit,
                caution_threshold = EXCLUDED.caution_threshold,
                warning_threshold = EXCLUDED.warning_threshold,
                critical_threshold = EXCLUDED.critical_threshold,
                emergency_mode = EXCLUDED.emergency_mode,
                restricted_categories = EXCLUDED.restricted_categories,
                updated_at = EXCLUDED.updated_at
        "#;
        sqlx::query(query)
            .bind(policy.monthly_limits.mileage)
            .bind(policy.monthly_limits.coupon)
            .bind(policy.monthly_limits.settlement)
            .bind(policy.daily_limits.mileage)
            .bind(policy.daily_limits.coupon)
            .bind(policy.daily_limits.settlement)
            .bind(policy.thresholds.caution)
            .bind(policy.thresholds.warning)
            .bind(policy.thresholds.critical)
            .bind(policy.emergency_mode)
            .bind(&restricted)
            .bind(policy.updated_at)
            .execute(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to store budget policy: {}", e)))?;

        Ok(policy.clone())
    }
}
