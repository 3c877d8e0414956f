use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{database, history, HistoryEntry, HistoryKind, LedgerDatabase};

use super::balance::{OrgBalance, StudentBalance};
use super::error::LedgerError;

/// Student balances after a successful allocation or deallocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewBalances {
    pub new_allocated: u64,
    pub new_remaining: u64,
}

/// Moves credits between an organization's pool and one of its students.
/// Every successful call mutates the student's `credits_allocated`, the
/// org's `student_credits_allocated` and appends one history entry, all
/// inside a single transaction.
#[derive(Clone)]
pub struct AllocationProcessor {
    database: Arc<LedgerDatabase>,
    max_attempts: u32,
}

impl AllocationProcessor {
    pub fn new(database: Arc<LedgerDatabase>, max_attempts: u32) -> Self {
        Self {
            database,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Positive `amount` grants credits from the org pool; negative
    /// `amount` reclaims unused credits back into it. Zero is rejected.
    pub fn allocate(
        &self,
        org_id: &str,
        student_id: &str,
        amount: i64,
        reason: &str,
        performed_by: &str,
    ) -> Result<NewBalances, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(0));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_allocate(org_id, student_id, amount, reason, performed_by) {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    debug!(org_id, student_id, attempt, "allocation hit write contention, retrying");
                    continue;
                }
                Err(err) if err.is_transient() => {
                    return Err(LedgerError::TransactionConflict { attempts: attempt });
                }
                Ok(balances) => {
                    info!(
                        org_id,
                        student_id,
                        amount,
                        new_allocated = balances.new_allocated,
                        performed_by,
                        "allocation applied"
                    );
                    return Ok(balances);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_allocate(
        &self,
        org_id: &str,
        student_id: &str,
        amount: i64,
        reason: &str,
        performed_by: &str,
    ) -> Result<NewBalances, LedgerError> {
        self.database.with_transaction(|tx| {
            let org = database::get_org(tx, org_id)?
                .ok_or_else(|| LedgerError::AccountNotFound(org_id.to_string()))?;
            let student = database::get_student(tx, student_id)?
                .filter(|s| s.org_id == org.org_id)
                .ok_or_else(|| LedgerError::AccountNotFound(student_id.to_string()))?;

            let org_balance = OrgBalance::from(&org);
            let student_balance = StudentBalance::from(&student);

            let (kind, magnitude, new_allocated) = if amount > 0 {
                let grant = amount as u64;
                let available = org_balance.available();
                if grant > available {
                    return Err(LedgerError::InsufficientOrgCredits { available });
                }
                (HistoryKind::Allocated, grant, student.credits_allocated + grant)
            } else {
                let reclaim = amount.unsigned_abs();
                let unused = student_balance.remaining();
                if reclaim > unused {
                    return Err(LedgerError::InsufficientUnusedCredits { available: unused });
                }
                (
                    HistoryKind::Deallocated,
                    reclaim,
                    student.credits_allocated - reclaim,
                )
            };

            let new_org_allocated = if amount > 0 {
                org.student_credits_allocated + magnitude
            } else {
                org.student_credits_allocated - magnitude
            };

            database::update_student_counters(tx, student_id, new_allocated, student.credits_used)?;
            database::update_org_counters(
                tx,
                org_id,
                org.quota_used,
                new_org_allocated,
                org.student_credits_used,
            )?;

            let entry = HistoryEntry::new(
                org_id,
                Some(student_id),
                kind,
                magnitude,
                reason,
                performed_by,
                student.credits_allocated,
                new_allocated,
            );
            history::append_entry(tx, &entry)?;

            Ok(NewBalances {
                new_allocated,
                new_remaining: new_allocated - student.credits_used,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::HistoryFilter;

    fn setup() -> (tempfile::TempDir, Arc<LedgerDatabase>, AllocationProcessor) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(LedgerDatabase::new(dir.path().to_path_buf()).expect("open database"));
        db.create_org_account("org-1", 100).unwrap();
        db.create_student_account("org-1", "s1").unwrap();
        let processor = AllocationProcessor::new(Arc::clone(&db), 4);
        (dir, db, processor)
    }

    #[test]
    fn grant_moves_credits_and_records_history() {
        let (_dir, db, processor) = setup();

        let balances = processor.allocate("org-1", "s1", 30, "initial grant", "admin").unwrap();
        assert_eq!(balances.new_allocated, 30);
        assert_eq!(balances.new_remaining, 30);

        let org = db.get_org_account("org-1").unwrap().unwrap();
        assert_eq!(org.student_credits_allocated, 30);

        let entries = db
            .with_transaction::<_, LedgerError, _>(|tx| {
                Ok(history::list_entries(tx, "org-1", &HistoryFilter::default())?)
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, HistoryKind::Allocated);
        assert_eq!(entries[0].amount, 30);
        assert_eq!(entries[0].balance_before, 0);
        assert_eq!(entries[0].balance_after, 30);
        assert_eq!(entries[0].performed_by, "admin");
    }

    #[test]
    fn over_allocation_fails_with_available_and_leaves_state_untouched() {
        let (_dir, db, processor) = setup();
        processor.allocate("org-1", "s1", 30, "initial grant", "admin").unwrap();

        let err = processor
            .allocate("org-1", "s1", 80, "too much", "admin")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientOrgCredits { available: 70 }));

        let org = db.get_org_account("org-1").unwrap().unwrap();
        let student = db.get_student_account("s1").unwrap().unwrap();
        assert_eq!(org.student_credits_allocated, 30);
        assert_eq!(student.credits_allocated, 30);
    }

    #[test]
    fn reclaim_returns_credits_to_the_pool() {
        let (_dir, db, processor) = setup();
        processor.allocate("org-1", "s1", 30, "initial grant", "admin").unwrap();

        let balances = processor
            .allocate("org-1", "s1", -10, "reclaim unused", "admin")
            .unwrap();
        assert_eq!(balances.new_allocated, 20);

        let org = db.get_org_account("org-1").unwrap().unwrap();
        assert_eq!(org.student_credits_allocated, 20);

        let entries = db
            .with_transaction::<_, LedgerError, _>(|tx| {
                Ok(history::list_entries(
                    tx,
                    "org-1",
                    &HistoryFilter {
                        kind: Some(HistoryKind::Deallocated),
                        ..Default::default()
                    },
                )?)
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 10);
    }

    #[test]
    fn used_credits_can_never_be_reclaimed() {
        let (_dir, db, processor) = setup();
        processor.allocate("org-1", "s1", 10, "initial grant", "admin").unwrap();

        // Mark everything as consumed.
        db.with_transaction::<_, LedgerError, _>(|tx| {
            database::update_student_counters(tx, "s1", 10, 10)?;
            Ok(())
        })
        .unwrap();

        let err = processor
            .allocate("org-1", "s1", -1, "reclaim", "admin")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientUnusedCredits { available: 0 }));

        let student = db.get_student_account("s1").unwrap().unwrap();
        assert_eq!(student.credits_allocated, 10);
        assert_eq!(student.credits_used, 10);
    }

    #[test]
    fn zero_amount_is_rejected() {
        let (_dir, _db, processor) = setup();
        let err = processor.allocate("org-1", "s1", 0, "noop", "admin").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(0)));
    }

    #[test]
    fn unknown_accounts_are_rejected() {
        let (_dir, _db, processor) = setup();

        let err = processor
            .allocate("org-missing", "s1", 5, "grant", "admin")
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));

        let err = processor
            .allocate("org-1", "s-missing", 5, "grant", "admin")
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[test]
    fn student_of_another_org_is_not_found() {
        let (_dir, db, processor) = setup();
        db.create_org_account("org-2", 50).unwrap();
        db.create_student_account("org-2", "s2").unwrap();

        let err = processor
            .allocate("org-1", "s2", 5, "cross-org grant", "admin")
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[test]
    fn org_aggregate_tracks_sum_of_student_allocations() {
        let (_dir, db, processor) = setup();
        db.create_student_account("org-1", "s2").unwrap();

        processor.allocate("org-1", "s1", 30, "grant", "admin").unwrap();
        processor.allocate("org-1", "s2", 25, "grant", "admin").unwrap();
        processor.allocate("org-1", "s1", -5, "reclaim", "admin").unwrap();

        let org = db.get_org_account("org-1").unwrap().unwrap();
        let sum: u64 = db
            .list_student_accounts("org-1")
            .unwrap()
            .iter()
            .map(|s| s.credits_allocated)
            .sum();
        assert_eq!(org.student_credits_allocated, sum);
        assert_eq!(sum, 50);
    }
}
