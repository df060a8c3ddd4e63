//! Advisory budget monitoring
//!
//! Classifies reward spend against administrator-configured ceilings. The
//! monitor reports; it does not gate issuance or redemption.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod memory;

pub use memory::InMemoryBudgetPolicyStore;

/// Spend categories tracked by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetCategory {
    Mileage,
    Coupon,
    Settlement,
}

impl BudgetCategory {
    pub const ALL: [BudgetCategory; 3] = [
        BudgetCategory::Mileage,
        BudgetCategory::Coupon,
        BudgetCategory::Settlement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetCategory::Mileage => "mileage",
            BudgetCategory::Coupon => "coupon",
            BudgetCategory::Settlement => "settlement",
        }
    }
}

impl std::str::FromStr for BudgetCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mileage" => Ok(BudgetCategory::Mileage),
            "coupon" => Ok(BudgetCategory::Coupon),
            "settlement" => Ok(BudgetCategory::Settlement),
            other => Err(Error::Validation(format!(
                "unknown budget category '{}'",
                other
            ))),
        }
    }
}

/// Classification of spend against a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Normal,
    Caution,
    Warning,
    Critical,
}

impl BudgetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetStatus::Normal => "normal",
            BudgetStatus::Caution => "caution",
            BudgetStatus::Warning => "warning",
            BudgetStatus::Critical => "critical",
        }
    }
}

/// Percentage-of-limit thresholds for the status ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetThresholds {
    pub caution: Decimal,
    pub warning: Decimal,
    pub critical: Decimal,
}

impl Default for BudgetThresholds {
    fn default() -> Self {
        Self {
            caution: Decimal::from(70),
            warning: Decimal::from(85),
            critical: Decimal::from(95),
        }
    }
}

/// Per-category ceilings; `None` means unlimited
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryLimits {
    pub mileage: Option<Decimal>,
    pub coupon: Option<Decimal>,
    pub settlement: Option<Decimal>,
}

impl CategoryLimits {
    pub fn get(&self, category: BudgetCategory) -> Option<Decimal> {
        match category {
            BudgetCategory::Mileage => self.mileage,
            BudgetCategory::Coupon => self.coupon,
            BudgetCategory::Settlement => self.settlement,
        }
    }
}

/// Administrator-configured budget policy, replaced wholesale on update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPolicy {
    pub monthly_limits: CategoryLimits,
    pub daily_limits: CategoryLimits,
    pub thresholds: BudgetThresholds,
    pub emergency_mode: bool,
    /// Categories the emergency applies to; empty means all of them
    pub restricted_categories: Vec<BudgetCategory>,
    pub updated_at: DateTime<Utc>,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            monthly_limits: CategoryLimits::default(),
            daily_limits: CategoryLimits::default(),
            thresholds: BudgetThresholds::default(),
            emergency_mode: false,
            restricted_categories: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// One category's spend against its limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub category: BudgetCategory,
    pub spent: Decimal,
    pub limit: Option<Decimal>,
    pub percentage: Decimal,
    pub status: BudgetStatus,
}

impl BudgetPolicy {
    pub fn evaluate_monthly(&self, category: BudgetCategory, spent: Decimal) -> BudgetUsage {
        let limit = self.monthly_limits.get(category);
        let (percentage, status) = classify(spent, limit, &self.thresholds);
        BudgetUsage {
            category,
            spent,
            limit,
            percentage,
            status,
        }
    }

    pub fn evaluate_daily(&self, category: BudgetCategory, spent: Decimal) -> BudgetUsage {
        let limit = self.daily_limits.get(category);
        let (percentage, status) = classify(spent, limit, &self.thresholds);
        BudgetUsage {
            category,
            spent,
            limit,
            percentage,
            status,
        }
    }

    /// Whether the emergency flag covers the category. Advisory: callers
    /// report this signal, nothing in the engine enforces it.
    pub fn is_restricted(&self, category: BudgetCategory) -> bool {
        self.emergency_mode
            && (self.restricted_categories.is_empty()
                || self.restricted_categories.contains(&category))
    }
}

/// Percentage of limit consumed and the resulting status. Without a
/// usable limit the spend is unclassifiable and reads as normal.
pub fn classify(
    spent: Decimal,
    limit: Option<Decimal>,
    thresholds: &BudgetThresholds,
) -> (Decimal, BudgetStatus) {
    let limit = match limit {
        Some(l) if l > Decimal::ZERO => l,
        _ => return (Decimal::ZERO, BudgetStatus::Normal),
    };

    let percentage = (spent * Decimal::from(100) / limit).round_dp(2);
    let status = if percentage >= thresholds.critical {
        BudgetStatus::Critical
    } else if percentage >= thresholds.warning {
        BudgetStatus::Warning
    } else if percentage >= thresholds.caution {
        BudgetStatus::Caution
    } else {
        BudgetStatus::Normal
    };

    (percentage, status)
}

/// Store trait for the budget policy singleton
#[async_trait::async_trait]
pub trait BudgetPolicyStore: Send + Sync {
    /// Current policy; the default when none has been configured yet.
    async fn get(&self) -> Result<BudgetPolicy>;

    /// Replace the policy wholesale.
    async fn put(&self, policy: &BudgetPolicy) -> Result<BudgetPolicy>;
}
