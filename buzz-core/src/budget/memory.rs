//! In-memory implementation of BudgetPolicyStore

use std::sync::RwLock;

use chrono::Utc;

use super::{BudgetPolicy, BudgetPolicyStore};
use crate::error::Result;

/// In-memory policy store for development and testing
#[derive(Debug, Default)]
pub struct InMemoryBudgetPolicyStore {
    policy: RwLock<Option<BudgetPolicy>>,
}

#[async_trait::async_trait]
impl BudgetPolicyStore for InMemoryBudgetPolicyStore {
    async fn get(&self) -> Result<BudgetPolicy> {
        let policy = self.policy.read().unwrap();
        Ok(policy.clone().unwrap_or_default())
    }

    async fn put(&self, policy: &BudgetPolicy) -> Result<BudgetPolicy> {
        let mut stored = self.policy.write().unwrap();
        let mut policy = policy.clone();
        policy.updated_at = Utc::now();
        *stored = Some(policy.clone());
        Ok(policy)
    }
}
