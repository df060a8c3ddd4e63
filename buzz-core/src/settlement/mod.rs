//! Settlement requests and the approval state machine

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub mod memory;

pub use memory::InMemorySettlementRepository;

/// Settlement request status
///
/// The only transitions are `pending -> approved | rejected | cancelled`
/// and `approved -> paid`; everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
    Cancelled,
}

impl SettlementStatus {
    pub fn can_transition_to(&self, next: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) | (Approved, Paid)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SettlementStatus::Rejected | SettlementStatus::Paid | SettlementStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Approved => "approved",
            SettlementStatus::Rejected => "rejected",
            SettlementStatus::Paid => "paid",
            SettlementStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for SettlementStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SettlementStatus::Pending),
            "approved" => Ok(SettlementStatus::Approved),
            "rejected" => Ok(SettlementStatus::Rejected),
            "paid" => Ok(SettlementStatus::Paid),
            "cancelled" => Ok(SettlementStatus::Cancelled),
            other => Err(Error::Validation(format!(
                "unknown settlement status '{}'",
                other
            ))),
        }
    }
}

/// Payout destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankInfo {
    pub bank_name: String,
    pub bank_account: String,
    pub account_holder: String,
}

/// One payout request, aggregating a business's redemptions for a single
/// calendar day. Amounts are frozen at request time; approval actions
/// never recompute them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub id: Uuid,
    pub business_id: Uuid,
    pub settlement_date: NaiveDate,

    pub coupon_count: i64,
    pub coupon_amount: Decimal,
    pub mileage_count: i64,
    pub mileage_amount: Decimal,
    pub total_amount: Decimal,

    pub bank_info: BankInfo,
    pub status: SettlementStatus,
    pub reject_reason: Option<String>,
    pub cancel_reason: Option<String>,

    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub estimated_payment_date: NaiveDate,
}

/// Count and amount rollup for one status bucket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusTotals {
    pub count: i64,
    pub amount: Decimal,
}

/// Totals by status for a business (or platform-wide)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub pending: StatusTotals,
    pub approved: StatusTotals,
    pub rejected: StatusTotals,
    pub paid: StatusTotals,
    pub cancelled: StatusTotals,
}

impl SettlementSummary {
    pub fn add(&mut self, status: SettlementStatus, amount: Decimal) {
        let bucket = match status {
            SettlementStatus::Pending => &mut self.pending,
            SettlementStatus::Approved => &mut self.approved,
            SettlementStatus::Rejected => &mut self.rejected,
            SettlementStatus::Paid => &mut self.paid,
            SettlementStatus::Cancelled => &mut self.cancelled,
        };
        bucket.count += 1;
        bucket.amount += amount;
    }
}

/// Repository trait for settlement operations
#[async_trait::async_trait]
pub trait SettlementRepository: Send + Sync {
    /// Insert a new request. At most one pending request may exist per
    /// business, and a settlement date already covered by a live request
    /// cannot be requested again; both checks commit atomically with the
    /// insert.
    async fn create(&self, request: &SettlementRequest) -> Result<SettlementRequest>;

    async fn get(&self, id: &Uuid) -> Result<Option<SettlementRequest>>;

    /// Requests, newest first. `page` is 1-based.
    async fn list(
        &self,
        business_id: Option<Uuid>,
        status: Option<SettlementStatus>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<SettlementRequest>, i64)>;

    /// Move a request through the state machine. `reason` lands in
    /// `reject_reason` or `cancel_reason` depending on the target state.
    async fn transition(
        &self,
        id: &Uuid,
        next: SettlementStatus,
        reason: Option<String>,
    ) -> Result<SettlementRequest>;

    async fn summary(&self, business_id: Option<Uuid>) -> Result<SettlementSummary>;

    /// Sum of request totals in the given statuses whose settlement date
    /// falls within `[from, to)`, for budget monitoring.
    async fn amount_in_period(
        &self,
        statuses: &[SettlementStatus],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Decimal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_specified_transitions_are_legal() {
        use SettlementStatus::*;
        let all = [Pending, Approved, Rejected, Paid, Cancelled];

        for from in all {
            for to in all {
                let legal = matches!(
                    (from, to),
                    (Pending, Approved)
                        | (Pending, Rejected)
                        | (Pending, Cancelled)
                        | (Approved, Paid)
                );
                assert_eq!(
                    from.can_transition_to(to),
                    legal,
                    "{} -> {}",
                    from.as_str(),
                    to.as_str()
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use SettlementStatus::*;
        for status in [Rejected, Paid, Cancelled] {
            assert!(status.is_terminal());
            for to in [Pending, Approved, Rejected, Paid, Cancelled] {
                assert!(!status.can_transition_to(to));
            }
        }
        assert!(!Pending.is_terminal());
        assert!(!Approved.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        use SettlementStatus::*;
        for status in [Pending, Approved, Rejected, Paid, Cancelled] {
            assert_eq!(
                status.as_str().parse::<SettlementStatus>().unwrap(),
                status
            );
        }
        assert!("unknown".parse::<SettlementStatus>().is_err());
    }

    #[test]
    fn summary_buckets_by_status() {
        let mut summary = SettlementSummary::default();
        summary.add(SettlementStatus::Pending, Decimal::from(1000));
        summary.add(SettlementStatus::Pending, Decimal::from(500));
        summary.add(SettlementStatus::Paid, Decimal::from(2000));

        assert_eq!(summary.pending.count, 2);
        assert_eq!(summary.pending.amount, Decimal::from(1500));
        assert_eq!(summary.paid.count, 1);
        assert_eq!(summary.paid.amount, Decimal::from(2000));
        assert_eq!(summary.rejected.count, 0);
    }
}
