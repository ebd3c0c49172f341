//! Transaction manager for long-term memory.
//!
//! Two commit policies:
//!
//! - **Eager**: every write runs in its own begin/commit pair.
//! - **Lazy**: one write transaction is opened after schema creation and
//!   stays open; it is committed only by [`TransactionManager::commit`]
//!   (explicit flush) or [`TransactionManager::close`] (clean shutdown).
//!
//! Under either policy an explicit [`TransactionManager::begin`] makes the
//! following writes join one transaction until the next commit.

use redb::{Database, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::StoreResult;
use crate::store::schema::Tables;

/// When writes are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitPolicy {
    Eager,
    Lazy,
}

/// Owns the database handle and the (at most one) open write transaction.
pub struct TransactionManager {
    db: Database,
    policy: CommitPolicy,
    open: Option<WriteTransaction>,
}

impl TransactionManager {
    /// Create the schema in its own commit, then start the long-lived
    /// transaction if the policy is lazy.
    pub fn new(db: Database, policy: CommitPolicy) -> StoreResult<Self> {
        let txn = db.begin_write().map_err(StoreError::redb("begin_write"))?;
        Tables::create(&txn)?;
        txn.commit().map_err(StoreError::redb("commit schema"))?;

        let mut manager = Self {
            db,
            policy,
            open: None,
        };
        if policy == CommitPolicy::Lazy {
            manager.begin()?;
        }
        Ok(manager)
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Whether a write transaction is currently open.
    pub fn in_transaction(&self) -> bool {
        self.open.is_some()
    }

    /// Open a transaction that subsequent writes join. No-op if one is open.
    pub fn begin(&mut self) -> StoreResult<()> {
        if self.open.is_none() {
            let txn = self
                .db
                .begin_write()
                .map_err(StoreError::redb("begin_write"))?;
            self.open = Some(txn);
        }
        Ok(())
    }

    /// Commit the open transaction. Under the lazy policy a new one is
    /// started right away.
    pub fn commit(&mut self) -> StoreResult<()> {
        if let Some(txn) = self.open.take() {
            txn.commit().map_err(StoreError::redb("commit"))?;
        }
        if self.policy == CommitPolicy::Lazy {
            self.begin()?;
        }
        Ok(())
    }

    /// Discard the open transaction. Under the lazy policy a new one is
    /// started right away.
    pub fn rollback(&mut self) -> StoreResult<()> {
        if let Some(txn) = self.open.take() {
            txn.abort().map_err(StoreError::redb("abort"))?;
        }
        if self.policy == CommitPolicy::Lazy {
            self.begin()?;
        }
        Ok(())
    }

    /// Commit whatever is open and leave no transaction behind.
    pub fn close(&mut self) -> StoreResult<()> {
        if let Some(txn) = self.open.take() {
            txn.commit().map_err(StoreError::redb("commit on close"))?;
        }
        Ok(())
    }

    /// Run `f` against the tables of the current transaction.
    ///
    /// With no transaction open (eager policy, no explicit `begin`), `f`
    /// runs in a fresh transaction that is committed on success. On error
    /// the transaction `f` ran in is aborted, including any earlier work it
    /// had joined.
    pub fn write<R>(
        &mut self,
        f: impl FnOnce(&mut Tables<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let joined = self.open.is_some();
        let txn = match self.open.take() {
            Some(txn) => txn,
            None => self
                .db
                .begin_write()
                .map_err(StoreError::redb("begin_write"))?,
        };

        let result = Tables::open(&txn).and_then(|mut tables| f(&mut tables));
        match result {
            Ok(value) => {
                if joined || self.policy == CommitPolicy::Lazy {
                    self.open = Some(txn);
                } else {
                    txn.commit().map_err(StoreError::redb("commit"))?;
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    tracing::warn!(error = %abort, "abort after failed write also failed");
                }
                Err(e)
            }
        }
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "failed to commit long-term memory on shutdown");
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("policy", &self.policy)
            .field("in_transaction", &self.open.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::durable;
    use crate::store::schema::VAR_MAX_CYCLE;
    use tempfile::TempDir;

    fn bump(manager: &mut TransactionManager) -> u64 {
        manager.write(|t| t.next_var(VAR_MAX_CYCLE)).unwrap()
    }

    fn read(manager: &mut TransactionManager) -> u64 {
        manager.write(|t| t.var(VAR_MAX_CYCLE)).unwrap()
    }

    #[test]
    fn eager_commits_every_write() {
        let mut manager =
            TransactionManager::new(durable::open_in_memory().unwrap(), CommitPolicy::Eager)
                .unwrap();
        assert!(!manager.in_transaction());
        assert_eq!(bump(&mut manager), 1);
        assert!(!manager.in_transaction());
        assert_eq!(read(&mut manager), 1);
    }

    #[test]
    fn lazy_keeps_one_transaction_open() {
        let mut manager =
            TransactionManager::new(durable::open_in_memory().unwrap(), CommitPolicy::Lazy)
                .unwrap();
        assert!(manager.in_transaction());
        bump(&mut manager);
        bump(&mut manager);
        assert!(manager.in_transaction());
        assert_eq!(read(&mut manager), 2);

        manager.commit().unwrap();
        assert!(manager.in_transaction());
        assert_eq!(read(&mut manager), 2);
    }

    #[test]
    fn rollback_discards_uncommitted_work() {
        let mut manager =
            TransactionManager::new(durable::open_in_memory().unwrap(), CommitPolicy::Lazy)
                .unwrap();
        bump(&mut manager);
        manager.commit().unwrap();
        bump(&mut manager);
        manager.rollback().unwrap();
        assert_eq!(read(&mut manager), 1);
    }

    #[test]
    fn explicit_begin_groups_eager_writes() {
        let mut manager =
            TransactionManager::new(durable::open_in_memory().unwrap(), CommitPolicy::Eager)
                .unwrap();
        manager.begin().unwrap();
        bump(&mut manager);
        bump(&mut manager);
        manager.rollback().unwrap();
        assert!(!manager.in_transaction());
        assert_eq!(read(&mut manager), 0);
    }

    #[test]
    fn failed_write_is_aborted() {
        let mut manager =
            TransactionManager::new(durable::open_in_memory().unwrap(), CommitPolicy::Eager)
                .unwrap();
        let result: StoreResult<()> = manager.write(|t| {
            t.next_var(VAR_MAX_CYCLE)?;
            Err(StoreError::Dangling { what: "lti", id: 1 })
        });
        assert!(result.is_err());
        assert_eq!(read(&mut manager), 0);
    }

    #[test]
    fn lazy_work_is_committed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ltm.redb");
        {
            let mut manager =
                TransactionManager::new(durable::open_file(&path).unwrap(), CommitPolicy::Lazy)
                    .unwrap();
            bump(&mut manager);
        }
        let mut manager =
            TransactionManager::new(durable::open_file(&path).unwrap(), CommitPolicy::Eager)
                .unwrap();
        assert_eq!(read(&mut manager), 1);
    }
}
