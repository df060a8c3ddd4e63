//! In-memory implementation of SettlementRepository

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    SettlementRepository, SettlementRequest, SettlementStatus, SettlementSummary,
};
use crate::error::{Error, Result};

/// In-memory store for development and testing
///
/// The write lock spans check and insert in `create`, so the uniqueness
/// invariants cannot be raced past.
#[derive(Debug, Default)]
pub struct InMemorySettlementRepository {
    requests: RwLock<HashMap<Uuid, SettlementRequest>>,
}

#[async_trait::async_trait]
impl SettlementRepository for InMemorySettlementRepository {
    async fn create(&self, request: &SettlementRequest) -> Result<SettlementRequest> {
        let mut requests = self.requests.write().unwrap();

        for existing in requests.values() {
            if existing.business_id != request.business_id {
                continue;
            }
            if existing.status == SettlementStatus::Pending {
                return Err(Error::PendingSettlementExists);
            }
            // Cancelled and rejected requests free their date up again
            if existing.settlement_date == request.settlement_date
                && !matches!(
                    existing.status,
                    SettlementStatus::Cancelled | SettlementStatus::Rejected
                )
            {
                return Err(Error::DuplicateSettlementDate);
            }
        }

        requests.insert(request.id, request.clone());
        Ok(request.clone())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<SettlementRequest>> {
        let requests = self.requests.read().unwrap();
        Ok(requests.get(id).cloned())
    }

    async fn list(
        &self,
        business_id: Option<Uuid>,
        status: Option<SettlementStatus>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<SettlementRequest>, i64)> {
        let requests = self.requests.read().unwrap();

        let mut filtered: Vec<SettlementRequest> = requests
            .values()
            .filter(|r| business_id.map_or(true, |b| r.business_id == b))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(a.id.cmp(&b.id)));

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

    async fn transition(
        &self,
        id: &Uuid,
        next: SettlementStatus,
        reason: Option<String>,
    ) -> Result<SettlementRequest> {
        let mut requests = self.requests.write().unwrap();
        let request = requests
            .get_mut(id)
            .ok_or_else(|| Error::NotFound("Settlement request".to_string()))?;

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

        Ok(request.clone())
    }

    async fn summary(&self, business_id: Option<Uuid>) -> Result<SettlementSummary> {
        let requests = self.requests.read().unwrap();

        let mut summary = SettlementSummary::default();
        for request in requests.values() {
            if business_id.map_or(true, |b| request.business_id == b) {
                summary.add(request.status, request.total_amount);
            }
        }

        Ok(summary)
    }

    async fn amount_in_period(
        &self,
        statuses: &[SettlementStatus],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Decimal> {
        let requests = self.requests.read().unwrap();

        let total = requests
            .values()
            .filter(|r| statuses.contains(&r.status))
            .filter(|r| r.settlement_date >= from && r.settlement_date < to)
            .map(|r| r.total_amount)
            .sum();

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::BankInfo;
    use chrono::{Datelike, Duration};

    fn dec(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn date(offset_days: i64) -> NaiveDate {
        (Utc::now() - Duration::days(offset_days)).date_naive()
    }

    fn request(business_id: Uuid, settlement_date: NaiveDate, total: i64) -> SettlementRequest {
        let now = Utc::now();
        SettlementRequest {
            id: Uuid::new_v4(),
            business_id,
            settlement_date,
            coupon_count: 2,
            coupon_amount: dec(total / 2),
            mileage_count: 1,
            mileage_amount: dec(total - total / 2),
            total_amount: dec(total),
            bank_info: BankInfo {
                bank_name: "Kookmin".to_string(),
                bank_account: "123-456-789".to_string(),
                account_holder: "Cafe Haru".to_string(),
            },
            status: SettlementStatus::Pending,
            reject_reason: None,
            cancel_reason: None,
            requested_at: now,
            decided_at: None,
            paid_at: None,
            estimated_payment_date: (now + Duration::days(7)).date_naive(),
        }
    }

    #[tokio::test]
    async fn a_second_request_while_one_is_pending_is_rejected() {
        let repo = InMemorySettlementRepository::default();
        let business_id = Uuid::new_v4();

        repo.create(&request(business_id, date(1), 5000))
            .await
            .unwrap();

        // Same date or a different one, the pending request blocks both
        assert_eq!(
            repo.create(&request(business_id, date(1), 3000))
                .await
                .unwrap_err(),
            Error::PendingSettlementExists
        );
        assert_eq!(
            repo.create(&request(business_id, date(2), 3000))
                .await
                .unwrap_err(),
            Error::PendingSettlementExists
        );

        // Another business is unaffected
        repo.create(&request(Uuid::new_v4(), date(1), 1000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn a_settled_date_cannot_be_requested_twice() {
        let repo = InMemorySettlementRepository::default();
        let business_id = Uuid::new_v4();

        let first = repo
            .create(&request(business_id, date(3), 5000))
            .await
            .unwrap();
        repo.transition(&first.id, SettlementStatus::Approved, None)
            .await
            .unwrap();

        assert_eq!(
            repo.create(&request(business_id, date(3), 5000))
                .await
                .unwrap_err(),
            Error::DuplicateSettlementDate
        );

        // A different date goes through
        repo.create(&request(business_id, date(4), 2000))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_dates_are_freed_up_again() {
        let repo = InMemorySettlementRepository::default();
        let business_id = Uuid::new_v4();

        let first = repo
            .create(&request(business_id, date(5), 5000))
            .await
            .unwrap();
        repo.transition(
            &first.id,
            SettlementStatus::Cancelled,
            Some("wrong bank account".to_string()),
        )
        .await
        .unwrap();

        let retried = repo
            .create(&request(business_id, date(5), 5000))
            .await
            .unwrap();
        assert_eq!(retried.status, SettlementStatus::Pending);
    }

    #[tokio::test]
    async fn approval_flow_stamps_timestamps_and_reasons() {
        let repo = InMemorySettlementRepository::default();
        let business_id = Uuid::new_v4();

        let created = repo
            .create(&request(business_id, date(1), 5000))
            .await
            .unwrap();

        let approved = repo
            .transition(&created.id, SettlementStatus::Approved, None)
            .await
            .unwrap();
        assert_eq!(approved.status, SettlementStatus::Approved);
        assert!(approved.decided_at.is_some());
        assert!(approved.paid_at.is_none());

        let paid = repo
            .transition(&created.id, SettlementStatus::Paid, None)
            .await
            .unwrap();
        assert_eq!(paid.status, SettlementStatus::Paid);
        assert!(paid.paid_at.is_some());

        let rejected_req = repo
            .create(&request(business_id, date(2), 800))
            .await
            .unwrap();
        let rejected = repo
            .transition(
                &rejected_req.id,
                SettlementStatus::Rejected,
                Some("amounts do not match".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(
            rejected.reject_reason.as_deref(),
            Some("amounts do not match")
        );
    }

    #[tokio::test]
    async fn illegal_transitions_are_conflicts() {
        let repo = InMemorySettlementRepository::default();
        let created = repo
            .create(&request(Uuid::new_v4(), date(1), 5000))
            .await
            .unwrap();

        // Straight to paid is not allowed from pending
        let err = repo
            .transition(&created.id, SettlementStatus::Paid, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidTransition {
                from: "pending".to_string(),
                to: "paid".to_string(),
            }
        );

        repo.transition(&created.id, SettlementStatus::Rejected, None)
            .await
            .unwrap();
        // Terminal states stay terminal
        assert!(repo
            .transition(&created.id, SettlementStatus::Approved, None)
            .await
            .is_err());

        assert!(matches!(
            repo.transition(&Uuid::new_v4(), SettlementStatus::Approved, None)
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_filters_and_summary_buckets() {
        let repo = InMemorySettlementRepository::default();
        let business_id = Uuid::new_v4();

        let a = repo
            .create(&request(business_id, date(10), 1000))
            .await
            .unwrap();
        repo.transition(&a.id, SettlementStatus::Approved, None)
            .await
            .unwrap();
        repo.transition(&a.id, SettlementStatus::Paid, None)
            .await
            .unwrap();

        let b = repo
            .create(&request(business_id, date(9), 2000))
            .await
            .unwrap();
        repo.transition(&b.id, SettlementStatus::Rejected, Some("mismatch".to_string()))
            .await
            .unwrap();

        repo.create(&request(business_id, date(8), 3000))
            .await
            .unwrap();
        repo.create(&request(Uuid::new_v4(), date(8), 999))
            .await
            .unwrap();

        let (mine, total) = repo
            .list(Some(business_id), None, 1, 20)
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(mine.len(), 3);

        let (pending, total) = repo
            .list(Some(business_id), Some(SettlementStatus::Pending), 1, 20)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(pending[0].total_amount, dec(3000));

        let summary = repo.summary(Some(business_id)).await.unwrap();
        assert_eq!(summary.paid.amount, dec(1000));
        assert_eq!(summary.rejected.amount, dec(2000));
        assert_eq!(summary.pending.amount, dec(3000));
        assert_eq!(summary.approved.count, 0);

        let everyone = repo.summary(None).await.unwrap();
        assert_eq!(everyone.pending.count, 2);
    }

    #[tokio::test]
    async fn period_amounts_cover_pending_and_paid() {
        let repo = InMemorySettlementRepository::default();
        let business_id = Uuid::new_v4();
        let today = Utc::now().date_naive();
        let month_start = today.with_day(1).unwrap();

        let a = repo
            .create(&request(business_id, today, 4000))
            .await
            .unwrap();
        repo.transition(&a.id, SettlementStatus::Approved, None)
            .await
            .unwrap();
        repo.transition(&a.id, SettlementStatus::Paid, None)
            .await
            .unwrap();

        let other_business = Uuid::new_v4();
        repo.create(&request(other_business, today, 1500))
            .await
            .unwrap();

        let amount = repo
            .amount_in_period(
                &[SettlementStatus::Pending, SettlementStatus::Paid],
                month_start,
                month_start + Duration::days(32),
            )
            .await
            .unwrap();
        assert_eq!(amount, dec(5500));

        // Approved-only is excluded from the spend view
        let approved_only = repo
            .amount_in_period(
                &[SettlementStatus::Approved],
                month_start,
                month_start + Duration::days(32),
            )
            .await
            .unwrap();
        assert_eq!(approved_only, dec(0));
    }
}
