//! Coupon templates, issued coupons, and redemption

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub mod memory;

pub use memory::InMemoryCouponRepository;

/// Discount types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Fixed,
    Percentage,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Fixed => "fixed",
            DiscountKind::Percentage => "percentage",
        }
    }
}

impl std::str::FromStr for DiscountKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed" => Ok(DiscountKind::Fixed),
            "percentage" => Ok(DiscountKind::Percentage),
            other => Err(Error::Validation(format!(
                "unknown discount type '{}'",
                other
            ))),
        }
    }
}

/// Issued coupon status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponStatus {
    Active,
    Used,
    Expired,
}

impl CouponStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponStatus::Active => "active",
            CouponStatus::Used => "used",
            CouponStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for CouponStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(CouponStatus::Active),
            "used" => Ok(CouponStatus::Used),
            "expired" => Ok(CouponStatus::Expired),
            other => Err(Error::Validation(format!(
                "unknown coupon status '{}'",
                other
            ))),
        }
    }
}

/// Reusable offer definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub discount_kind: DiscountKind,
    pub discount_value: Decimal,
    pub min_purchase_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,

    // Issuance window
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    // Per-coupon lifetime after issuance; the coupon never outlives the
    // template window either way
    pub validity_days: Option<i32>,

    // Quantity cap; the counter is advanced at redemption
    pub total_quantity: Option<i32>,
    pub used_quantity: i32,

    // Empty set means redeemable at every business
    pub applicable_businesses: Vec<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CouponTemplate {
    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }

    pub fn has_remaining_quantity(&self) -> bool {
        match self.total_quantity {
            Some(total) => self.used_quantity < total,
            None => true,
        }
    }

    pub fn applies_to(&self, business_id: &Uuid) -> bool {
        self.applicable_businesses.is_empty() || self.applicable_businesses.contains(business_id)
    }

    /// Expiry of a coupon issued at `issued_at`.
    pub fn coupon_expiry(&self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        match self.validity_days {
            Some(days) => (issued_at + Duration::days(days as i64)).min(self.valid_until),
            None => self.valid_until,
        }
    }

    /// Discount for a purchase: fixed value or percentage of the purchase,
    /// clamped to `max_discount_amount` when set, and never more than the
    /// purchase itself.
    pub fn compute_discount(&self, purchase_amount: Decimal) -> Decimal {
        let raw = match self.discount_kind {
            DiscountKind::Fixed => self.discount_value,
            DiscountKind::Percentage => purchase_amount * self.discount_value / Decimal::from(100),
        };
        let capped = match self.max_discount_amount {
            Some(max) => raw.min(max),
            None => raw,
        };
        capped.min(purchase_amount)
    }
}

/// One coupon instance issued to one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCoupon {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub status: CouponStatus,
    pub qr_code_data: String,
    pub issued_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_business_id: Option<Uuid>,
    pub used_amount: Option<Decimal>,
    pub expires_at: DateTime<Utc>,
}

/// Parameters for issuing one coupon
#[derive(Debug, Clone)]
pub struct CouponIssue {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub qr_code_data: String,
    pub expires_at: DateTime<Utc>,
}

/// Parameters for one redemption attempt
#[derive(Debug, Clone)]
pub struct RedemptionAttempt {
    pub coupon_id: Uuid,
    pub business_id: Uuid,
    pub purchase_amount: Decimal,
    /// When set, the coupon must belong to this user; a mismatch is
    /// reported as not-found rather than leaking the coupon's existence.
    pub expected_user: Option<Uuid>,
}

/// Outcome of a committed redemption
#[derive(Debug, Clone)]
pub struct CouponRedemption {
    pub coupon: UserCoupon,
    pub template_name: String,
    pub business_name: String,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

/// Repository trait for coupon operations
///
/// `redeem` is the atomic unit for the coupon side of the ledger: the
/// status transition, the template counter and the business scan counter
/// commit together, and a coupon can transition to `used` exactly once.
#[async_trait::async_trait]
pub trait CouponRepository: Send + Sync {
    async fn create_template(&self, template: &CouponTemplate) -> Result<CouponTemplate>;
    async fn get_template(&self, id: &Uuid) -> Result<Option<CouponTemplate>>;
    async fn list_templates(&self, page: i32, page_size: i32)
        -> Result<(Vec<CouponTemplate>, i64)>;

    /// Issue one coupon from a template, enforcing the quantity cap and
    /// the validity window.
    async fn issue(&self, issue: &CouponIssue, now: DateTime<Utc>) -> Result<UserCoupon>;

    async fn get_coupon(&self, id: &Uuid) -> Result<Option<UserCoupon>>;

    /// A user's coupons, newest first. `page` is 1-based.
    async fn list_coupons(
        &self,
        user_id: &Uuid,
        status: Option<CouponStatus>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<UserCoupon>, i64)>;

    /// Redeem a coupon against a purchase. A coupon found past its
    /// expiry is transitioned to `expired` as a persisted side effect
    /// before the attempt fails.
    async fn redeem(
        &self,
        attempt: &RedemptionAttempt,
        now: DateTime<Utc>,
    ) -> Result<CouponRedemption>;

    /// Count and sum of redeemed discounts for a business within
    /// `[from, to)`, for settlement aggregation.
    async fn redeemed_total_for_business(
        &self,
        business_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, Decimal)>;

    /// Sum of all redeemed discounts within `[from, to)`, for budget
    /// monitoring.
    async fn redeemed_total(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Decimal>;
}
