use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{database, history, HistoryEntry, HistoryKind, LedgerDatabase};

use super::balance::{OrgBalance, StudentBalance};
use super::error::LedgerError;

pub const CONSUME_REASON: &str = "interview session created";

/// Who a credit is debited from: a student's allocation, or the
/// organization's own pool for users without a student record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Student,
    OrgDirect,
}

/// Debits exactly one credit per call. Deliberately not idempotent: the
/// caller owns at-most-once invocation per interview session.
#[derive(Clone)]
pub struct ConsumptionProcessor {
    database: Arc<LedgerDatabase>,
    max_attempts: u32,
}

impl ConsumptionProcessor {
    pub fn new(database: Arc<LedgerDatabase>, max_attempts: u32) -> Self {
        Self {
            database,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn consume(
        &self,
        org_id: &str,
        subject_id: &str,
        kind: SubjectKind,
    ) -> Result<(), LedgerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match kind {
                SubjectKind::Student => self.try_consume_student(org_id, subject_id),
                SubjectKind::OrgDirect => self.try_consume_org_direct(org_id, subject_id),
            };

            match result {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    debug!(org_id, subject_id, attempt, "consumption hit write contention, retrying");
                    continue;
                }
                Err(err) if err.is_transient() => {
                    return Err(LedgerError::TransactionConflict { attempts: attempt });
                }
                Ok(()) => {
                    info!(org_id, subject_id, ?kind, "credit consumed");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn try_consume_student(&self, org_id: &str, student_id: &str) -> Result<(), LedgerError> {
        self.database.with_transaction(|tx| {
            let org = database::get_org(tx, org_id)?
                .ok_or_else(|| LedgerError::AccountNotFound(org_id.to_string()))?;
            let student = database::get_student(tx, student_id)?
                .filter(|s| s.org_id == org.org_id)
                .ok_or_else(|| LedgerError::AccountNotFound(student_id.to_string()))?;

            if StudentBalance::from(&student).remaining() == 0 {
                return Err(LedgerError::NoCreditsRemaining);
            }

            let new_used = student.credits_used + 1;
            database::update_student_counters(tx, student_id, student.credits_allocated, new_used)?;
            // Org-level usage aggregate is reporting-only, but it moves in
            // the same transaction so readers never see it lag.
            database::update_org_counters(
                tx,
                org_id,
                org.quota_used,
                org.student_credits_allocated,
                org.student_credits_used + 1,
            )?;

            let entry = HistoryEntry::new(
                org_id,
                Some(student_id),
                HistoryKind::Consumed,
                1,
                CONSUME_REASON,
                student_id,
                student.credits_used,
                new_used,
            );
            history::append_entry(tx, &entry)?;
            Ok(())
        })
    }

    fn try_consume_org_direct(&self, org_id: &str, subject_id: &str) -> Result<(), LedgerError> {
        self.database.with_transaction(|tx| {
            let org = database::get_org(tx, org_id)?
                .ok_or_else(|| LedgerError::AccountNotFound(org_id.to_string()))?;

            // A zero limit means no quota was ever assigned. Credits
            // already promised to students stay off-limits here, otherwise
            // the org invariant would break.
            let balance = OrgBalance::from(&org);
            if org.quota_limit == 0 || balance.available() == 0 {
                return Err(LedgerError::NoCreditsRemaining);
            }

            let new_used = org.quota_used + 1;
            database::update_org_counters(
                tx,
                org_id,
                new_used,
                org.student_credits_allocated,
                org.student_credits_used,
            )?;

            let entry = HistoryEntry::new(
                org_id,
                None,
                HistoryKind::Consumed,
                1,
                CONSUME_REASON,
                subject_id,
                org.quota_used,
                new_used,
            );
            history::append_entry(tx, &entry)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::allocation::AllocationProcessor;
    use crate::storage::HistoryFilter;

    fn setup() -> (
        tempfile::TempDir,
        Arc<LedgerDatabase>,
        AllocationProcessor,
        ConsumptionProcessor,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(LedgerDatabase::new(dir.path().to_path_buf()).expect("open database"));
        db.create_org_account("org-1", 100).unwrap();
        db.create_student_account("org-1", "s1").unwrap();
        let allocations = AllocationProcessor::new(Arc::clone(&db), 4);
        let consumption = ConsumptionProcessor::new(Arc::clone(&db), 4);
        (dir, db, allocations, consumption)
    }

    #[test]
    fn student_consumes_until_allocation_is_exhausted() {
        let (_dir, db, allocations, consumption) = setup();
        allocations.allocate("org-1", "s1", 5, "grant", "admin").unwrap();

        for _ in 0..5 {
            consumption.consume("org-1", "s1", SubjectKind::Student).unwrap();
        }

        let err = consumption
            .consume("org-1", "s1", SubjectKind::Student)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoCreditsRemaining));

        let student = db.get_student_account("s1").unwrap().unwrap();
        assert_eq!(student.credits_used, 5);
        let org = db.get_org_account("org-1").unwrap().unwrap();
        assert_eq!(org.student_credits_used, 5);
    }

    #[test]
    fn rejected_consume_mutates_nothing() {
        let (_dir, db, _allocations, consumption) = setup();

        let err = consumption
            .consume("org-1", "s1", SubjectKind::Student)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoCreditsRemaining));

        let student = db.get_student_account("s1").unwrap().unwrap();
        assert_eq!(student.credits_allocated, 0);
        assert_eq!(student.credits_used, 0);
        let org = db.get_org_account("org-1").unwrap().unwrap();
        assert_eq!(org.student_credits_used, 0);

        let entries = db
            .with_transaction::<_, LedgerError, _>(|tx| {
                Ok(history::list_entries(tx, "org-1", &HistoryFilter::default())?)
            })
            .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn org_direct_consume_debits_the_pool() {
        let (_dir, db, _allocations, consumption) = setup();

        consumption
            .consume("org-1", "signup-user-1", SubjectKind::OrgDirect)
            .unwrap();

        let org = db.get_org_account("org-1").unwrap().unwrap();
        assert_eq!(org.quota_used, 1);

        let entries = db
            .with_transaction::<_, LedgerError, _>(|tx| {
                Ok(history::list_entries(tx, "org-1", &HistoryFilter::default())?)
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].student_id, None);
        assert_eq!(entries[0].performed_by, "signup-user-1");
        assert_eq!(entries[0].balance_before, 0);
        assert_eq!(entries[0].balance_after, 1);
    }

    #[test]
    fn org_with_zero_limit_has_no_credits() {
        let (_dir, db, _allocations, consumption) = setup();
        db.create_org_account("org-empty", 0).unwrap();

        let err = consumption
            .consume("org-empty", "signup-user-1", SubjectKind::OrgDirect)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoCreditsRemaining));
    }

    #[test]
    fn org_direct_respects_credits_promised_to_students() {
        let (_dir, db, allocations, consumption) = setup();
        db.set_quota_limit("org-1", 10).unwrap();
        allocations.allocate("org-1", "s1", 10, "grant all", "admin").unwrap();

        let err = consumption
            .consume("org-1", "signup-user-1", SubjectKind::OrgDirect)
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoCreditsRemaining));

        let org = db.get_org_account("org-1").unwrap().unwrap();
        assert_eq!(org.quota_used, 0);
    }

    #[test]
    fn unknown_subjects_are_rejected() {
        let (_dir, _db, _allocations, consumption) = setup();

        let err = consumption
            .consume("org-1", "s-missing", SubjectKind::Student)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));

        let err = consumption
            .consume("org-missing", "anyone", SubjectKind::OrgDirect)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }
}
