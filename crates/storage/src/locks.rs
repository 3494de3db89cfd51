use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use matchbook_core::AccountId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per account. Operations touching several accounts take
/// them in ascending id order, so two operations never wait on each other
/// in opposite directions.
#[derive(Debug, Default, Clone)]
pub struct AccountLocks {
    inner: Arc<Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of one operation; dropping it releases every account.
#[derive(Debug)]
pub struct AccountGuard {
    accounts: Vec<AccountId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountGuard {
    pub fn covers(&self, account: AccountId) -> bool {
        self.accounts.binary_search(&account).is_ok()
    }

    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts that have ever been locked.
    pub fn tracked(&self) -> usize {
        match self.inner.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn handle(&self, account: AccountId) -> Arc<AsyncMutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(account).or_default().clone()
    }

    pub async fn lock<I>(&self, accounts: I) -> AccountGuard
    where
        I: IntoIterator<Item = AccountId>,
    {
        let ordered: BTreeSet<AccountId> = accounts.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for account in &ordered {
            guards.push(self.handle(*account).lock_owned().await);
        }
        AccountGuard {
            accounts: ordered.into_iter().collect(),
            _guards: guards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn guard_reports_sorted_unique_accounts() {
        let locks = AccountLocks::new();
        let guard = locks
            .lock([AccountId(3), AccountId(1), AccountId(3)])
            .await;
        assert_eq!(guard.accounts(), &[AccountId(1), AccountId(3)]);
        assert!(guard.covers(AccountId(3)));
        assert!(!guard.covers(AccountId(2)));
        assert_eq!(locks.tracked(), 2);
    }

    #[tokio::test]
    async fn second_locker_waits_for_release() {
        let locks = AccountLocks::new();
        let guard = locks.lock([AccountId(1)]).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock([AccountId(2), AccountId(1)]).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn disjoint_accounts_do_not_block() {
        let locks = AccountLocks::new();
        let _a = locks.lock([AccountId(1)]).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock([AccountId(2)])).await;
        assert!(b.is_ok());
    }
}
