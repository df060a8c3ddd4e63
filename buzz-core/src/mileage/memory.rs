//! In-memory implementation of MileageRepository

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    MileageAccount, MileageRepository, MileageTransaction, TransactionContext, TransactionKind,
    EXPIRY_REFERENCE_TYPE,
};
use crate::error::Result;

/// In-memory store for development and testing
///
/// The accounts lock is held for the whole of `record`, so concurrent
/// ledger events against the same account are fully serialized.
#[derive(Debug, Default)]
pub struct InMemoryMileageRepository {
    accounts: RwLock<HashMap<Uuid, MileageAccount>>,
    ledger: RwLock<Vec<MileageTransaction>>,
}

fn lapsed_earn_ids(ledger: &[MileageTransaction]) -> HashSet<String> {
    ledger
        .iter()
        .filter(|tx| {
            tx.kind == TransactionKind::Expire
                && tx.reference_type.as_deref() == Some(EXPIRY_REFERENCE_TYPE)
        })
        .filter_map(|tx| tx.reference_id.clone())
        .collect()
}

#[async_trait::async_trait]
impl MileageRepository for InMemoryMileageRepository {
    async fn get_or_create_account(&self, user_id: &Uuid) -> Result<MileageAccount> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .entry(*user_id)
            .or_insert_with(|| MileageAccount::new(*user_id));
        Ok(account.clone())
    }

    async fn record(
        &self,
        user_id: &Uuid,
        kind: TransactionKind,
        amount: Decimal,
        context: &TransactionContext,
    ) -> Result<MileageTransaction> {
        // Balance read, ledger append and account update happen under one
        // write section so no concurrent record can interleave.
        let mut accounts = self.accounts.write().unwrap();
        let now = Utc::now();

        let account = accounts
            .entry(*user_id)
            .or_insert_with(|| MileageAccount::new(*user_id));
        let (balance_before, balance_after) = account.apply(kind, amount, now)?;

        let transaction = MileageTransaction {
            id: Uuid::new_v4(),
            user_id: *user_id,
            kind,
            amount,
            balance_before,
            balance_after,
            description: context.description.clone(),
            reference_type: context.reference_type.clone(),
            reference_id: context.reference_id.clone(),
            business_id: context.business_id,
            expires_at: if kind == TransactionKind::Earn {
                context.expires_at
            } else {
                None
            },
            created_at: now,
        };
        self.ledger.write().unwrap().push(transaction.clone());

        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        user_id: &Uuid,
        kind: Option<TransactionKind>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<MileageTransaction>, i64)> {
        let ledger = self.ledger.read().unwrap();

        let mut filtered: Vec<MileageTransaction> = ledger
            .iter()
            .filter(|tx| tx.user_id == *user_id)
            .filter(|tx| kind.map_or(true, |k| tx.kind == k))
            .cloned()
            .collect();
        // Ledger is append-only, so reversing insertion order gives
        // newest first.
        filtered.reverse();

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

    async fn expiring_amount(
        &self,
        user_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal> {
        let ledger = self.ledger.read().unwrap();
        let lapsed = lapsed_earn_ids(&ledger);

        let amount = ledger
            .iter()
            .filter(|tx| tx.user_id == *user_id && tx.kind == TransactionKind::Earn)
            .filter(|tx| tx.expires_at.map_or(false, |exp| exp > from && exp <= to))
            .filter(|tx| !lapsed.contains(&tx.id.to_string()))
            .map(|tx| tx.amount)
            .sum();

        Ok(amount)
    }

    async fn expire_due(
        &self,
        as_of: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<(Vec<MileageTransaction>, i64)> {
        let mut accounts = self.accounts.write().unwrap();
        let mut ledger = self.ledger.write().unwrap();

        let lapsed = lapsed_earn_ids(&ledger);
        let candidates: Vec<MileageTransaction> = ledger
            .iter()
            .filter(|tx| tx.kind == TransactionKind::Earn)
            .filter(|tx| tx.expires_at.map_or(false, |exp| exp <= as_of))
            .filter(|tx| !lapsed.contains(&tx.id.to_string()))
            .cloned()
            .collect();

        let now = Utc::now();
        let mut written = Vec::new();
        let mut affected: HashSet<Uuid> = HashSet::new();
        // Scratch copies carry the cumulative effect across candidates;
        // they are written back only when this is not a dry run.
        let mut scratch: HashMap<Uuid, MileageAccount> = HashMap::new();

        for earn in candidates {
            let account = scratch.entry(earn.user_id).or_insert_with(|| {
                accounts
                    .get(&earn.user_id)
                    .cloned()
                    .unwrap_or_else(|| MileageAccount::new(earn.user_id))
            });

            // The user may have spent part of the earn already; lapse
            // only what the balance can still cover. A zero remainder is
            // left for a later sweep.
            let amount = earn.amount.min(account.balance);
            if amount <= Decimal::ZERO {
                continue;
            }

            let (balance_before, balance_after) =
                account.apply(TransactionKind::Expire, amount, now)?;
            let transaction = MileageTransaction {
                id: Uuid::new_v4(),
                user_id: earn.user_id,
                kind: TransactionKind::Expire,
                amount,
                balance_before,
                balance_after,
                description: Some("Mileage expired".to_string()),
                reference_type: Some(EXPIRY_REFERENCE_TYPE.to_string()),
                reference_id: Some(earn.id.to_string()),
                business_id: None,
                expires_at: None,
                created_at: now,
            };

            if !dry_run {
                ledger.push(transaction.clone());
            }
            affected.insert(earn.user_id);
            written.push(transaction);
        }

        if !dry_run {
            for (user_id, account) in scratch {
                accounts.insert(user_id, account);
            }
        }

        Ok((written, affected.len() as i64))
    }

    async fn used_total_for_business(
        &self,
        business_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, Decimal)> {
        let ledger = self.ledger.read().unwrap();

        let mut count = 0i64;
        let mut total = Decimal::ZERO;
        for tx in ledger.iter() {
            if tx.kind == TransactionKind::Use
                && tx.business_id == Some(*business_id)
                && tx.created_at >= from
                && tx.created_at < to
            {
                count += 1;
                total += tx.amount;
            }
        }

        Ok((count, total))
    }

    async fn earned_total(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Decimal> {
        let ledger = self.ledger.read().unwrap();

        let total = ledger
            .iter()
            .filter(|tx| tx.kind == TransactionKind::Earn)
            .filter(|tx| tx.created_at >= from && tx.created_at < to)
            .map(|tx| tx.amount)
            .sum();

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::Duration;
    use std::sync::Arc;

    fn dec(n: i64) -> Decimal {
        Decimal::from(n)
    }

    fn ctx() -> TransactionContext {
        TransactionContext::default()
    }

    #[tokio::test]
    async fn earn_then_use_chains_balance_snapshots() {
        let repo = InMemoryMileageRepository::default();
        let user_id = Uuid::new_v4();

        repo.record(&user_id, TransactionKind::Earn, dec(1000), &ctx())
            .await
            .unwrap();
        repo.record(&user_id, TransactionKind::Use, dec(400), &ctx())
            .await
            .unwrap();

        let account = repo.get_or_create_account(&user_id).await.unwrap();
        assert_eq!(account.balance, dec(600));
        assert!(account.is_consistent());

        let (transactions, total) = repo
            .list_transactions(&user_id, None, 1, 20)
            .await
            .unwrap();
        assert_eq!(total, 2);
        // Newest first: the use follows the earn
        assert_eq!(transactions[0].kind, TransactionKind::Use);
        assert_eq!(transactions[0].balance_before, dec(1000));
        assert_eq!(transactions[0].balance_after, dec(600));
        assert_eq!(transactions[1].kind, TransactionKind::Earn);
        assert_eq!(transactions[1].balance_before, dec(0));
        assert_eq!(transactions[1].balance_after, dec(1000));
    }

    #[tokio::test]
    async fn overdraft_fails_and_writes_nothing() {
        let repo = InMemoryMileageRepository::default();
        let user_id = Uuid::new_v4();

        repo.record(&user_id, TransactionKind::Earn, dec(100), &ctx())
            .await
            .unwrap();
        let err = repo
            .record(&user_id, TransactionKind::Use, dec(500), &ctx())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InsufficientBalance { .. }));
        let account = repo.get_or_create_account(&user_id).await.unwrap();
        assert_eq!(account.balance, dec(100));

        let (_, total) = repo
            .list_transactions(&user_id, None, 1, 20)
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_uses_drain_balance_exactly() {
        let repo = Arc::new(InMemoryMileageRepository::default());
        let user_id = Uuid::new_v4();

        repo.record(&user_id, TransactionKind::Earn, dec(1000), &ctx())
            .await
            .unwrap();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.record(&user_id, TransactionKind::Use, dec(100), &ctx())
                        .await
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let account = repo.get_or_create_account(&user_id).await.unwrap();
        assert_eq!(account.balance, dec(0));
        assert_eq!(account.total_used, dec(1000));
        assert!(account.is_consistent());

        // Every snapshot pair chains onto another transaction's result
        let (transactions, _) = repo
            .list_transactions(&user_id, Some(TransactionKind::Use), 1, 50)
            .await
            .unwrap();
        let mut afters: Vec<Decimal> = transactions.iter().map(|t| t.balance_after).collect();
        afters.sort();
        assert_eq!(afters, (0..10).map(|n| dec(n * 100)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn history_filters_by_kind_and_paginates() {
        let repo = InMemoryMileageRepository::default();
        let user_id = Uuid::new_v4();

        for _ in 0..3 {
            repo.record(&user_id, TransactionKind::Earn, dec(100), &ctx())
                .await
                .unwrap();
        }
        repo.record(&user_id, TransactionKind::Use, dec(50), &ctx())
            .await
            .unwrap();

        let (earns, total) = repo
            .list_transactions(&user_id, Some(TransactionKind::Earn), 1, 2)
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(earns.len(), 2);

        let (second_page, _) = repo
            .list_transactions(&user_id, Some(TransactionKind::Earn), 2, 2)
            .await
            .unwrap();
        assert_eq!(second_page.len(), 1);

        let (far_page, _) = repo
            .list_transactions(&user_id, None, 5, 20)
            .await
            .unwrap();
        assert!(far_page.is_empty());
    }

    #[tokio::test]
    async fn expiring_amount_counts_only_the_window() {
        let repo = InMemoryMileageRepository::default();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let soon = TransactionContext {
            expires_at: Some(now + Duration::days(10)),
            ..Default::default()
        };
        let later = TransactionContext {
            expires_at: Some(now + Duration::days(90)),
            ..Default::default()
        };
        repo.record(&user_id, TransactionKind::Earn, dec(300), &soon)
            .await
            .unwrap();
        repo.record(&user_id, TransactionKind::Earn, dec(700), &later)
            .await
            .unwrap();
        repo.record(&user_id, TransactionKind::Earn, dec(111), &ctx())
            .await
            .unwrap();

        let amount = repo
            .expiring_amount(&user_id, now, now + Duration::days(30))
            .await
            .unwrap();
        assert_eq!(amount, dec(300));
    }

    #[tokio::test]
    async fn expire_sweep_is_clamped_and_idempotent() {
        let repo = InMemoryMileageRepository::default();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let expired = TransactionContext {
            expires_at: Some(now - Duration::days(1)),
            ..Default::default()
        };
        repo.record(&user_id, TransactionKind::Earn, dec(500), &expired)
            .await
            .unwrap();
        repo.record(&user_id, TransactionKind::Use, dec(400), &ctx())
            .await
            .unwrap();

        // Dry run reports without mutating
        let (projected, users) = repo.expire_due(now, true).await.unwrap();
        assert_eq!(projected.len(), 1);
        assert_eq!(users, 1);
        assert_eq!(projected[0].amount, dec(100));
        let account = repo.get_or_create_account(&user_id).await.unwrap();
        assert_eq!(account.balance, dec(100));
        assert_eq!(account.total_expired, dec(0));

        // Real sweep lapses only what the balance still covers
        let (written, _) = repo.expire_due(now, false).await.unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].amount, dec(100));

        let account = repo.get_or_create_account(&user_id).await.unwrap();
        assert_eq!(account.balance, dec(0));
        assert_eq!(account.total_expired, dec(100));
        assert!(account.is_consistent());

        // A second sweep finds nothing left to lapse
        let (again, _) = repo.expire_due(now, false).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn business_usage_totals_are_windowed() {
        let repo = InMemoryMileageRepository::default();
        let user_id = Uuid::new_v4();
        let business_id = Uuid::new_v4();
        let now = Utc::now();

        repo.record(&user_id, TransactionKind::Earn, dec(1000), &ctx())
            .await
            .unwrap();
        let at_business = TransactionContext {
            business_id: Some(business_id),
            ..Default::default()
        };
        repo.record(&user_id, TransactionKind::Use, dec(200), &at_business)
            .await
            .unwrap();
        repo.record(&user_id, TransactionKind::Use, dec(300), &at_business)
            .await
            .unwrap();
        // A use somewhere else does not count
        let elsewhere = TransactionContext {
            business_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        repo.record(&user_id, TransactionKind::Use, dec(50), &elsewhere)
            .await
            .unwrap();

        let (count, total) = repo
            .used_total_for_business(
                &business_id,
                now - Duration::hours(1),
                now + Duration::hours(1),
            )
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(total, dec(500));

        let (count, total) = repo
            .used_total_for_business(
                &business_id,
                now - Duration::days(2),
                now - Duration::days(1),
            )
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(total, dec(0));

        let earned = repo
            .earned_total(now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(earned, dec(1000));
    }
}
