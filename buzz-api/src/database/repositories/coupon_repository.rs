//! SQLx-based coupon repository implementation
//!
//! Redemption locks the coupon, template and business rows in that order,
//! so the status flip, the quantity counter and the scan counter commit as
//! one unit and a coupon can transition to `used` exactly once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use buzz_core::business::BusinessStatus;
use buzz_core::coupon::{
    CouponIssue, CouponRedemption, CouponRepository, CouponStatus, CouponTemplate,
    RedemptionAttempt, UserCoupon,
};
use buzz_core::error::{Error, Result};

use crate::database::connection::DatabasePool;

/// SQLx-based coupon repository implementation
pub struct SqlxCouponRepository {
    pool: DatabasePool,
}

impl SqlxCouponRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Convert a PostgreSQL row to a CouponTemplate
    fn row_to_template(&self, row: &PgRow) -> Result<CouponTemplate> {
        let discount_kind: String = row
            .try_get("discount_kind")
            .map_err(|e| Error::Storage(format!("Failed to get discount_kind: {}", e)))?;

        Ok(CouponTemplate {
            id: row
                .try_get("id")
                .map_err(|e| Error::Storage(format!("Failed to get id: {}", e)))?,
            name: row
                .try_get("name")
                .map_err(|e| Error::Storage(format!("Failed to get name: {}", e)))?,
            description: row
                .try_get("description")
                .map_err(|e| Error::Storage(format!("Failed to get description: {}", e)))?,
            discount_kind: discount_kind.parse()?,
            discount_value: row
                .try_get("discount_value")
                .map_err(|e| Error::Storage(format!("Failed to get discount_value: {}", e)))?,
            min_purchase_amount: row
                .try_get("min_purchase_amount")
                .map_err(|e| Error::Storage(format!("Failed to get min_purchase_amount: {}", e)))?,
            max_discount_amount: row
                .try_get("max_discount_amount")
                .map_err(|e| Error::Storage(format!("Failed to get max_discount_amount: {}", e)))?,
            valid_from: row
                .try_get("valid_from")
                .map_err(|e| Error::Storage(format!("Failed to get valid_from: {}", e)))?,
            valid_until: row
                .try_get("valid_until")
                .map_err(|e| Error::Storage(format!("Failed to get valid_until: {}", e)))?,
            validity_days: row
                .try_get("validity_days")
                .map_err(|e| Error::Storage(format!("Failed to get validity_days: {}", e)))?,
            total_quantity: row
                .try_get("total_quantity")
                .map_err(|e| Error::Storage(format!("Failed to get total_quantity: {}", e)))?,
            used_quantity: row
                .try_get("used_quantity")
                .map_err(|e| Error::Storage(format!("Failed to get used_quantity: {}", e)))?,
            applicable_businesses: row
                .try_get("applicable_businesses")
                .map_err(|e| {
                    Error::Storage(format!("Failed to get applicable_businesses: {}", e))
                })?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::Storage(format!("Failed to get created_at: {}", e)))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::Storage(format!("Failed to get updated_at: {}", e)))?,
        })
    }

    /// Convert a PostgreSQL row to a UserCoupon
    fn row_to_coupon(&self, row: &PgRow) -> Result<UserCoupon> {
        let status: String = row
            .try_get("status")
            .map_err(|e| Error::Storage(format!("Failed to get status: {}", e)))?;

        Ok(UserCoupon {
            id: row
                .try_get("id")
                .map_err(|e| Error::Storage(format!("Failed to get id: {}", e)))?,
            user_id: row
                .try_get("user_id")
                .map_err(|e| Error::Storage(format!("Failed to get user_id: {}", e)))?,
            template_id: row
                .try_get("template_id")
                .map_err(|e| Error::Storage(format!("Failed to get template_id: {}", e)))?,
            status: status.parse()?,
            qr_code_data: row
                .try_get("qr_code_data")
                .map_err(|e| Error::Storage(format!("Failed to get qr_code_data: {}", e)))?,
            issued_at: row
                .try_get("issued_at")
                .map_err(|e| Error::Storage(format!("Failed to get issued_at: {}", e)))?,
            used_at: row
                .try_get("used_at")
                .map_err(|e| Error::Storage(format!("Failed to get used_at: {}", e)))?,
            used_business_id: row
                .try_get("used_business_id")
                .map_err(|e| Error::Storage(format!("Failed to get used_business_id: {}", e)))?,
            used_amount: row
                .try_get("used_amount")
                .map_err(|e| Error::Storage(format!("Failed to get used_amount: {}", e)))?,
            expires_at: row
                .try_get("expires_at")
                .map_err(|e| Error::Storage(format!("Failed to get expires_at: {}", e)))?,
        })
    }

    /// Mark an expired coupon as lapsed. The lapse must stick even though
    /// the redemption attempt fails, so it commits on its own.
    async fn persist_lapse(
        &self,
        mut tx: Transaction<'_, Postgres>,
        coupon_id: &Uuid,
    ) -> Result<()> {
        sqlx::query("UPDATE user_coupons SET status = 'expired' WHERE id = $1")
            .bind(coupon_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to mark coupon expired: {}", e)))?;
        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }
}

const SELECT_TEMPLATE_COLUMNS: &str = r#"
    SELECT id, name, description, discount_kind, discount_value, min_purchase_amount,
           max_discount_amount, valid_from, valid_until, validity_days, total_quantity,
           used_quantity, applicable_businesses, created_at, updated_at
    FROM coupon_templates
"#;

const SELECT_COUPON_COLUMNS: &str = r#"
    SELECT id, user_id, template_id, status, qr_code_data, issued_at, used_at,
           used_business_id, used_amount, expires_at
    FROM user_coupons
"#;

#[async_trait]
impl CouponRepository for SqlxCouponRepository {
    async fn create_template(&self, template: &CouponTemplate) -> Result<CouponTemplate> {
        info!("Creating coupon template: {}", template.name);

        let query = r#"
            INSERT INTO coupon_templates
                (id, name, description, discount_kind, discount_value, min_purchase_amount,
                 max_discount_amount, valid_from, valid_until, validity_days, total_quantity,
                 used_quantity, applicable_businesses, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#;

        sqlx::query(query)
            .bind(template.id)
            .bind(&template.name)
            .bind(&template.description)
            .bind(template.discount_kind.as_str())
            .bind(template.discount_value)
            .bind(template.min_purchase_amount)
            .bind(template.max_discount_amount)
            .bind(template.valid_from)
            .bind(template.valid_until)
            .bind(template.validity_days)
            .bind(template.total_quantity)
            .bind(template.used_quantity)
            .bind(&template.applicable_businesses)
            .bind(template.created_at)
            .bind(template.updated_at)
            .execute(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to create coupon template: {}", e)))?;

        info!("Coupon template created: {}", template.id);
        Ok(template.clone())
    }

    async fn get_template(&self, id: &Uuid) -> Result<Option<CouponTemplate>> {
        let query = format!("{} WHERE id = $1", SELECT_TEMPLATE_COLUMNS);

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to fetch coupon template: {}", e)))?;

        row.map(|row| self.row_to_template(&row)).transpose()
    }

    async fn list_templates(
        &self,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<CouponTemplate>, i64)> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = (page - 1) * page_size;

        let total_row = sqlx::query("SELECT COUNT(*) AS total FROM coupon_templates")
            .fetch_one(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to count coupon templates: {}", e)))?;
        let total: i64 = total_row
            .try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))?;

        let query = format!(
            "{} ORDER BY created_at DESC, id ASC LIMIT $1 OFFSET $2",
            SELECT_TEMPLATE_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(page_size)
            .bind(offset)
            .fetch_all(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to list coupon templates: {}", e)))?;

        let templates = rows
            .iter()
            .map(|row| self.row_to_template(row))
            .collect::<Result<Vec<_>>>()?;

        Ok((templates, total))
    }

    async fn issue(&self, issue: &CouponIssue, now: DateTime<Utc>) -> Result<UserCoupon> {
        info!(
            "Issuing coupon from template {} to user {}",
            issue.template_id, issue.user_id
        );

        let template = self
            .get_template(&issue.template_id)
            .await?
            .ok_or_else(|| Error::NotFound("Coupon template".to_string()))?;
        if !template.has_remaining_quantity() {
            return Err(Error::QuantityExhausted);
        }
        if !template.is_within_validity(now) {
            return Err(Error::OutsideValidity);
        }

        let coupon = UserCoupon {
            id: issue.id,
            user_id: issue.user_id,
            template_id: issue.template_id,
            status: CouponStatus::Active,
            qr_code_data: issue.qr_code_data.clone(),
            issued_at: now,
            used_at: None,
            used_business_id: None,
            used_amount: None,
            expires_at: issue.expires_at,
        };

        let query = r#"
            INSERT INTO user_coupons
                (id, user_id, template_id, status, qr_code_data, issued_at, used_at,
                 used_business_id, used_amount, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#;
        sqlx::query(query)
            .bind(coupon.id)
            .bind(coupon.user_id)
            .bind(coupon.template_id)
            .bind(coupon.status.as_str())
            .bind(&coupon.qr_code_data)
            .bind(coupon.issued_at)
            .bind(coupon.used_at)
            .bind(coupon.used_business_id)
            .bind(coupon.used_amount)
            .bind(coupon.expires_at)
            .execute(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to insert coupon: {}", e)))?;

        info!("Coupon issued: {}", coupon.id);
        Ok(coupon)
    }

    async fn get_coupon(&self, id: &Uuid) -> Result<Option<UserCoupon>> {
        let query = format!("{} WHERE id = $1", SELECT_COUPON_COLUMNS);

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to fetch coupon: {}", e)))?;

        row.map(|row| self.row_to_coupon(&row)).transpose()
    }

    async fn list_coupons(
        &self,
        user_id: &Uuid,
        status: Option<CouponStatus>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<UserCoupon>, i64)> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = (page - 1) * page_size;
        let status_str = status.map(|s| s.as_str());

        let total_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM user_coupons
            WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(user_id)
        .bind(status_str)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to count coupons: {}", e)))?;
        let total: i64 = total_row
            .try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))?;

        let query = format!(
            r#"{}
            WHERE user_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY issued_at DESC, id ASC
            LIMIT $3 OFFSET $4
            "#,
            SELECT_COUPON_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(status_str)
            .bind(page_size)
            .bind(offset)
            .fetch_all(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to list coupons: {}", e)))?;

        let coupons = rows
            .iter()
            .map(|row| self.row_to_coupon(row))
            .collect::<Result<Vec<_>>>()?;

        Ok((coupons, total))
    }

    async fn redeem(
        &self,
        attempt: &RedemptionAttempt,
        now: DateTime<Utc>,
    ) -> Result<CouponRedemption> {
        if attempt.purchase_amount <= Decimal::ZERO {
            return Err(Error::Validation(
                "purchase amount must be positive".to_string(),
            ));
        }

        info!(
            "Redeeming coupon {} at business {}",
            attempt.coupon_id, attempt.business_id
        );

        // Lock order: coupon, then template, then business.
        let mut tx = self
            .pool
            .inner()
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        let coupon_query = format!("{} WHERE id = $1 FOR UPDATE", SELECT_COUPON_COLUMNS);
        let row = sqlx::query(&coupon_query)
            .bind(attempt.coupon_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to lock coupon: {}", e)))?
            .ok_or_else(|| Error::NotFound("Coupon".to_string()))?;
        let mut coupon = self.row_to_coupon(&row)?;

        if let Some(expected) = attempt.expected_user {
            if coupon.user_id != expected {
                return Err(Error::NotFound("Coupon".to_string()));
            }
        }
        if coupon.status != CouponStatus::Active {
            return Err(Error::CouponNotActive(coupon.status.as_str().to_string()));
        }
        if coupon.expires_at <= now {
            // Lapse is persisted even though the attempt fails
            self.persist_lapse(tx, &coupon.id).await?;
            return Err(Error::CouponExpired);
        }

        let template_query = format!("{} WHERE id = $1 FOR UPDATE", SELECT_TEMPLATE_COLUMNS);
        let row = sqlx::query(&template_query)
            .bind(coupon.template_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("Failed to lock coupon template: {}", e)))?
            .ok_or_else(|| Error::NotFound("Coupon template".to_string()))?;
        let template = self.row_to_template(&row)?;

        let row = sqlx::query(
            r#"
            SELECT id, name, status FROM businesses WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(attempt.business_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Storage(format!("Failed to lock business: {}", e)))?
        .ok_or_else(|| Error::NotFound("Business".to_string()))?;
        let business_name: String = row
            .try_get("name")
            .map_err(|e| Error::Storage(format!("Failed to get name: {}", e)))?;
        let business_status: String = row
            .try_get("status")
            .map_err(|e| Error::Storage(format!("Failed to get status: {}", e)))?;

        if business_status.parse::<BusinessStatus>()? == BusinessStatus::Suspended {
            return Err(Error::BusinessSuspended);
        }
        if !template.applies_to(&attempt.business_id) {
            return Err(Error::CouponNotApplicable);
        }
        if attempt.purchase_amount < template.min_purchase_amount {
            return Err(Error::MinPurchaseNotMet {
                min: template.min_purchase_amount,
                got: attempt.purchase_amount,
            });
        }
        if !template.has_remaining_quantity() {
            return Err(Error::QuantityExhausted);
        }

        let discount_amount = template.compute_discount(attempt.purchase_amount);
        let final_amount = attempt.purchase_amount - discount_amount;

        coupon.status = CouponStatus::Used;
        coupon.used_at = Some(now);
        coupon.used_business_id = Some(attempt.business_id);
        coupon.used_amount = Some(discount_amount);

        sqlx::query(
            r#"
            UPDATE user_coupons
            SET status = 'used', used_at = $2, used_business_id = $3, used_amount = $4
            WHERE id = $1
            "#,
        )
        .bind(coupon.id)
        .bind(coupon.used_at)
        .bind(coupon.used_business_id)
        .bind(coupon.used_amount)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(format!("Failed to update coupon: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE coupon_templates
            SET used_quantity = used_quantity + 1, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(template.id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(format!("Failed to update coupon template: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE businesses
            SET scan_count = scan_count + 1, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(attempt.business_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(format!("Failed to update business scan count: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("Failed to commit transaction: {}", e)))?;

        info!(
            "Coupon redeemed: {} (discount: {})",
            coupon.id, discount_amount
        );
        Ok(CouponRedemption {
            coupon,
            template_name: template.name,
            business_name,
            discount_amount,
            final_amount,
        })
    }

    async fn redeemed_total_for_business(
        &self,
        business_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, Decimal)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count, COALESCE(SUM(used_amount), 0) AS total
            FROM user_coupons
            WHERE status = 'used'
              AND used_business_id = $1
              AND used_at >= $2
              AND used_at < $3
            "#,
        )
        .bind(business_id)
        .bind(from)
        .bind(to)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to sum business redemptions: {}", e)))?;

        let count: i64 = row
            .try_get("count")
            .map_err(|e| Error::Storage(format!("Failed to get count: {}", e)))?;
        let total: Decimal = row
            .try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))?;
        Ok((count, total))
    }

    async fn redeemed_total(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(used_amount), 0) AS total
            FROM user_coupons
            WHERE status = 'used'
              AND used_at >= $1
              AND used_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to sum redemptions: {}", e)))?;

        row.try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))
    }
}
