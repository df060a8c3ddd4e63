//! In-memory implementation of CouponRepository

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    CouponIssue, CouponRedemption, CouponRepository, CouponStatus, CouponTemplate,
    RedemptionAttempt, UserCoupon,
};
use crate::business::{BusinessStatus, InMemoryBusinessDirectory};
use crate::error::{Error, Result};

/// In-memory store for development and testing
///
/// Redemption holds the coupon and template locks for the whole attempt,
/// and reaches into the shared business directory for the scan counter,
/// so the three mutations land together.
#[derive(Debug)]
pub struct InMemoryCouponRepository {
    templates: RwLock<HashMap<Uuid, CouponTemplate>>,
    coupons: RwLock<HashMap<Uuid, UserCoupon>>,
    businesses: Arc<InMemoryBusinessDirectory>,
}

impl InMemoryCouponRepository {
    pub fn new(businesses: Arc<InMemoryBusinessDirectory>) -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
            coupons: RwLock::new(HashMap::new()),
            businesses,
        }
    }
}

#[async_trait::async_trait]
impl CouponRepository for InMemoryCouponRepository {
    async fn create_template(&self, template: &CouponTemplate) -> Result<CouponTemplate> {
        let mut templates = self.templates.write().unwrap();
        templates.insert(template.id, template.clone());
        Ok(template.clone())
    }

    async fn get_template(&self, id: &Uuid) -> Result<Option<CouponTemplate>> {
        let templates = self.templates.read().unwrap();
        Ok(templates.get(id).cloned())
    }

    async fn list_templates(
        &self,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<CouponTemplate>, i64)> {
        let templates = self.templates.read().unwrap();

        let mut all: Vec<CouponTemplate> = templates.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total_count = all.len() as i64;
        let page = page.max(1);
        let page_size = page_size.max(1);
        let start = ((page - 1) * page_size) as usize;
        let end = std::cmp::min(start + page_size as usize, all.len());

        let items = if start < all.len() {
            all[start..end].to_vec()
        } else {
            Vec::new()
        };

        Ok((items, total_count))
    }

    async fn issue(&self, issue: &CouponIssue, now: DateTime<Utc>) -> Result<UserCoupon> {
        let templates = self.templates.read().unwrap();
        let template = templates
            .get(&issue.template_id)
            .ok_or_else(|| Error::NotFound("Coupon template".to_string()))?;
        if !template.has_remaining_quantity() {
            return Err(Error::QuantityExhausted);
        }
        if !template.is_within_validity(now) {
            return Err(Error::OutsideValidity);
        }
        drop(templates);

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
        self.coupons.write().unwrap().insert(coupon.id, coupon.clone());

        Ok(coupon)
    }

    async fn get_coupon(&self, id: &Uuid) -> Result<Option<UserCoupon>> {
        let coupons = self.coupons.read().unwrap();
        Ok(coupons.get(id).cloned())
    }

    async fn list_coupons(
        &self,
        user_id: &Uuid,
        status: Option<CouponStatus>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<UserCoupon>, i64)> {
        let coupons = self.coupons.read().unwrap();

        let mut filtered: Vec<UserCoupon> = coupons
            .values()
            .filter(|c| c.user_id == *user_id)
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| b.issued_at.cmp(&a.issued_at).then(a.id.cmp(&b.id)));

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

        // Lock order: coupons, then templates, then the directory.
        let mut coupons = self.coupons.write().unwrap();
        let mut templates = self.templates.write().unwrap();

        let coupon = coupons
            .get_mut(&attempt.coupon_id)
            .ok_or_else(|| Error::NotFound("Coupon".to_string()))?;
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
            coupon.status = CouponStatus::Expired;
            return Err(Error::CouponExpired);
        }

        let template = templates
            .get_mut(&coupon.template_id)
            .ok_or_else(|| Error::NotFound("Coupon template".to_string()))?;

        let business = self
            .businesses
            .get_sync(&attempt.business_id)
            .ok_or_else(|| Error::NotFound("Business".to_string()))?;
        if business.status == BusinessStatus::Suspended {
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

        template.used_quantity += 1;
        template.updated_at = now;

        self.businesses.bump_scan_sync(&attempt.business_id)?;

        Ok(CouponRedemption {
            coupon: coupon.clone(),
            template_name: template.name.clone(),
            business_name: business.name,
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
        let coupons = self.coupons.read().unwrap();

        let mut count = 0i64;
        let mut total = Decimal::ZERO;
        for coupon in coupons.values() {
            if coupon.status == CouponStatus::Used
                && coupon.used_business_id == Some(*business_id)
                && coupon
                    .used_at
                    .map_or(false, |used| used >= from && used < to)
            {
                count += 1;
                total += coupon.used_amount.unwrap_or(Decimal::ZERO);
            }
        }

        Ok((count, total))
    }

    async fn redeemed_total(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Decimal> {
        let coupons = self.coupons.read().unwrap();

        let total = coupons
            .values()
            .filter(|c| c.status == CouponStatus::Used)
            .filter(|c| c.used_at.map_or(false, |used| used >= from && used < to))
            .map(|c| c.used_amount.unwrap_or(Decimal::ZERO))
            .sum();

        Ok(total)
    }
}
