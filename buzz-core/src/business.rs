//! Partner business directory
//!
//! Holds already-approved businesses. Approval workflows live outside the
//! engine; redemption and settlement only need to resolve a business, check
//! that it is not suspended, and count QR scans.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Business status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessStatus {
    Active,
    Suspended,
}

impl BusinessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessStatus::Active => "active",
            BusinessStatus::Suspended => "suspended",
        }
    }
}

impl std::str::FromStr for BusinessStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(BusinessStatus::Active),
            "suspended" => Ok(BusinessStatus::Suspended),
            other => Err(Error::Validation(format!(
                "unknown business status '{}'",
                other
            ))),
        }
    }
}

/// Affiliated business entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub status: BusinessStatus,
    pub scan_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Business {
    pub fn new(name: impl Into<String>, category: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category,
            status: BusinessStatus::Active,
            scan_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Repository trait for the business directory
#[async_trait::async_trait]
pub trait BusinessDirectory: Send + Sync {
    async fn register(&self, business: &Business) -> Result<Business>;
    async fn get(&self, id: &Uuid) -> Result<Option<Business>>;
    async fn list(
        &self,
        status: Option<BusinessStatus>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<Business>, i64)>;
    async fn set_status(&self, id: &Uuid, status: BusinessStatus) -> Result<Business>;
}

/// In-memory directory for development and testing
#[derive(Debug, Default)]
pub struct InMemoryBusinessDirectory {
    businesses: RwLock<HashMap<Uuid, Business>>,
}

impl InMemoryBusinessDirectory {
    /// Synchronous lookup for sibling in-memory stores that need the
    /// business row inside their own critical sections.
    pub(crate) fn get_sync(&self, id: &Uuid) -> Option<Business> {
        self.businesses.read().unwrap().get(id).cloned()
    }

    /// Synchronous scan-counter bump used by coupon redemption so the
    /// counter moves in the same unit as the coupon state change.
    pub(crate) fn bump_scan_sync(&self, id: &Uuid) -> Result<()> {
        let mut businesses = self.businesses.write().unwrap();
        let business = businesses
            .get_mut(id)
            .ok_or_else(|| Error::NotFound("Business".to_string()))?;
        business.scan_count += 1;
        business.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait::async_trait]
impl BusinessDirectory for InMemoryBusinessDirectory {
    async fn register(&self, business: &Business) -> Result<Business> {
        let mut businesses = self.businesses.write().unwrap();
        businesses.insert(business.id, business.clone());
        Ok(business.clone())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Business>> {
        let businesses = self.businesses.read().unwrap();
        Ok(businesses.get(id).cloned())
    }

    async fn list(
        &self,
        status: Option<BusinessStatus>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<Business>, i64)> {
        let businesses = self.businesses.read().unwrap();

        let mut filtered: Vec<Business> = businesses
            .values()
            .filter(|b| status.map_or(true, |s| b.status == s))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let total_count = filtered.len() as i64;
        let page = page.max(1);
        let page_size = page_size.max(1);
        let start = ((page - 1) * page_size) as usize;
        let end = std::cmp::min(start + page_size as usize, filtered.len());

        let items = if start < filtered.len() {
            filtered[start..end].to_vec()
        } else {
            Vec::new()
        };

        Ok((items, total_count))
    }

    async fn set_status(&self, id: &Uuid, status: BusinessStatus) -> Result<Business> {
        let mut businesses = self.businesses.write().unwrap();
        let business = businesses
            .get_mut(id)
            .ok_or_else(|| Error::NotFound("Business".to_string()))?;
        business.status = status;
        business.updated_at = Utc::now();
        Ok(business.clone())
    }
}
