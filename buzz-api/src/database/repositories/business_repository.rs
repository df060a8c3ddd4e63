//! SQLx-based business directory implementation

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use buzz_core::business::{Business, BusinessDirectory, BusinessStatus};
use buzz_core::error::{Error, Result};

use crate::database::connection::DatabasePool;

/// SQLx-based business directory implementation
pub struct SqlxBusinessDirectory {
    pool: DatabasePool,
}

impl SqlxBusinessDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Convert a PostgreSQL row to a Business
    fn row_to_business(&self, row: &PgRow) -> Result<Business> {
        let status: String = row
            .try_get("status")
            .map_err(|e| Error::Storage(format!("Failed to get status: {}", e)))?;

        Ok(Business {
            id: row
                .try_get("id")
                .map_err(|e| Error::Storage(format!("Failed to get id: {}", e)))?,
            name: row
                .try_get("name")
                .map_err(|e| Error::Storage(format!("Failed to get name: {}", e)))?,
            category: row
                .try_get("category")
                .map_err(|e| Error::Storage(format!("Failed to get category: {}", e)))?,
            status: status.parse()?,
            scan_count: row
                .try_get("scan_count")
                .map_err(|e| Error::Storage(format!("Failed to get scan_count: {}", e)))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::Storage(format!("Failed to get created_at: {}", e)))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::Storage(format!("Failed to get updated_at: {}", e)))?,
        })
    }
}

const SELECT_BUSINESS_COLUMNS: &str = r#"
    SELECT id, name, category, status, scan_count, created_at, updated_at
    FROM businesses
"#;

#[async_trait]
impl BusinessDirectory for SqlxBusinessDirectory {
    async fn register(&self, business: &Business) -> Result<Business> {
        info!("Registering business: {}", business.name);

        let query = r#"
            INSERT INTO businesses (id, name, category, status, scan_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#;
        sqlx::query(query)
            .bind(business.id)
            .bind(&business.name)
            .bind(&business.category)
            .bind(business.status.as_str())
            .bind(business.scan_count)
            .bind(business.created_at)
            .bind(business.updated_at)
            .execute(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to register business: {}", e)))?;

        info!("Business registered: {}", business.id);
        Ok(business.clone())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Business>> {
        let query = format!("{} WHERE id = $1", SELECT_BUSINESS_COLUMNS);

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to fetch business: {}", e)))?;

        row.map(|row| self.row_to_business(&row)).transpose()
    }

    async fn list(
        &self,
        status: Option<BusinessStatus>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<Business>, i64)> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = (page - 1) * page_size;
        let status_str = status.map(|s| s.as_str());

        let total_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM businesses
            WHERE ($1::text IS NULL OR status = $1)
            "#,
        )
        .bind(status_str)
        .fetch_one(self.pool.inner())
        .await
        .map_err(|e| Error::Storage(format!("Failed to count businesses: {}", e)))?;
        let total: i64 = total_row
            .try_get("total")
            .map_err(|e| Error::Storage(format!("Failed to get total: {}", e)))?;

        let query = format!(
            r#"{}
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
            SELECT_BUSINESS_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(status_str)
            .bind(page_size)
            .bind(offset)
            .fetch_all(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to list businesses: {}", e)))?;

        let businesses = rows
            .iter()
            .map(|row| self.row_to_business(row))
            .collect::<Result<Vec<_>>>()?;

        Ok((businesses, total))
    }

    async fn set_status(&self, id: &Uuid, status: BusinessStatus) -> Result<Business> {
        info!("Setting business {} status to {}", id, status.as_str());

        let query = format!(
            r#"
            UPDATE businesses
            SET status = $2, updated_at = $3
            WHERE id = $1
            RETURNING {}
            "#,
            "id, name, category, status, scan_count, created_at, updated_at"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(status.as_str())
            .bind(Utc::now())
            .fetch_optional(self.pool.inner())
            .await
            .map_err(|e| Error::Storage(format!("Failed to update business status: {}", e)))?
            .ok_or_else(|| Error::NotFound("Business".to_string()))?;

        self.row_to_business(&row)
    }
}
