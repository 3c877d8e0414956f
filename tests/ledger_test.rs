use std::sync::Arc;
use std::thread;

use credit_ledger::ledger::{
    AllocationProcessor, ConsumptionProcessor, LedgerError, LedgerQueryService, SubjectKind,
};
use credit_ledger::storage::{history, HistoryFilter, LedgerDatabase};

const MAX_ATTEMPTS: u32 = 4;

struct Harness {
    _dir: tempfile::TempDir,
    database: Arc<LedgerDatabase>,
    allocations: AllocationProcessor,
    consumption: ConsumptionProcessor,
    queries: LedgerQueryService,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let database =
        Arc::new(LedgerDatabase::new(dir.path().to_path_buf()).expect("open database"));
    let allocations = AllocationProcessor::new(Arc::clone(&database), MAX_ATTEMPTS);
    let consumption = ConsumptionProcessor::new(Arc::clone(&database), MAX_ATTEMPTS);
    let queries = LedgerQueryService::new(Arc::clone(&database), 25);
    Harness {
        _dir: dir,
        database,
        allocations,
        consumption,
        queries,
    }
}

fn assert_invariants(h: &Harness, org_id: &str) {
    let org = h.database.get_org_account(org_id).unwrap().unwrap();
    assert!(
        org.quota_used + org.student_credits_allocated <= org.quota_limit,
        "org overcommitted: used={} allocated={} limit={}",
        org.quota_used,
        org.student_credits_allocated,
        org.quota_limit
    );

    let students = h.database.list_student_accounts(org_id).unwrap();
    let mut sum = 0u64;
    for student in &students {
        assert!(
            student.credits_used <= student.credits_allocated,
            "student {} used more than allocated",
            student.student_id
        );
        sum += student.credits_allocated;
    }
    assert_eq!(
        org.student_credits_allocated, sum,
        "org aggregate drifted from student allocations"
    );
}

#[test]
fn invariants_hold_across_a_mixed_operation_sequence() {
    let h = harness();
    h.database.create_org_account("org-1", 100).unwrap();
    h.database.create_student_account("org-1", "s1").unwrap();
    h.database.create_student_account("org-1", "s2").unwrap();

    h.allocations.allocate("org-1", "s1", 30, "grant", "admin").unwrap();
    assert_invariants(&h, "org-1");

    let err = h
        .allocations
        .allocate("org-1", "s1", 80, "too much", "admin")
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientOrgCredits { available: 70 }));
    assert_invariants(&h, "org-1");

    h.allocations.allocate("org-1", "s2", 40, "grant", "admin").unwrap();
    h.consumption.consume("org-1", "s1", SubjectKind::Student).unwrap();
    h.consumption.consume("org-1", "s2", SubjectKind::Student).unwrap();
    h.consumption
        .consume("org-1", "signup-user", SubjectKind::OrgDirect)
        .unwrap();
    h.allocations.allocate("org-1", "s2", -10, "reclaim", "admin").unwrap();
    assert_invariants(&h, "org-1");

    let report = h.queries.reconcile("org-1").unwrap();
    assert!(report.is_consistent());
}

#[test]
fn concurrent_consumers_cannot_double_spend_the_last_credit() {
    let h = harness();
    h.database.create_org_account("org-1", 10).unwrap();
    h.database.create_student_account("org-1", "s1").unwrap();
    h.allocations.allocate("org-1", "s1", 1, "single credit", "admin").unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let consumption = h.consumption.clone();
        handles.push(thread::spawn(move || {
            consumption.consume("org-1", "s1", SubjectKind::Student)
        }));
    }

    let results: Vec<Result<(), LedgerError>> =
        handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejections = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::NoCreditsRemaining)))
        .count();
    assert_eq!(successes, 1, "exactly one consumer may win the last credit");
    assert_eq!(rejections, 1);

    let student = h.database.get_student_account("s1").unwrap().unwrap();
    assert_eq!(student.credits_used, 1);
    assert_invariants(&h, "org-1");
}

#[test]
fn rejected_operations_leave_counters_byte_identical() {
    let h = harness();
    h.database.create_org_account("org-1", 20).unwrap();
    h.database.create_student_account("org-1", "s1").unwrap();
    h.allocations.allocate("org-1", "s1", 10, "grant", "admin").unwrap();
    h.consumption.consume("org-1", "s1", SubjectKind::Student).unwrap();

    let org_before = h.database.get_org_account("org-1").unwrap().unwrap();
    let student_before = h.database.get_student_account("s1").unwrap().unwrap();

    assert!(h
        .allocations
        .allocate("org-1", "s1", 11, "over pool", "admin")
        .is_err());
    assert!(h
        .allocations
        .allocate("org-1", "s1", -10, "over remaining", "admin")
        .is_err());
    assert!(h.allocations.allocate("org-1", "s1", 0, "zero", "admin").is_err());

    let org_after = h.database.get_org_account("org-1").unwrap().unwrap();
    let student_after = h.database.get_student_account("s1").unwrap().unwrap();

    assert_eq!(org_before.quota_used, org_after.quota_used);
    assert_eq!(
        org_before.student_credits_allocated,
        org_after.student_credits_allocated
    );
    assert_eq!(org_before.student_credits_used, org_after.student_credits_used);
    assert_eq!(org_before.quota_limit, org_after.quota_limit);
    assert_eq!(student_before.credits_allocated, student_after.credits_allocated);
    assert_eq!(student_before.credits_used, student_after.credits_used);
}

#[test]
fn replaying_history_reproduces_stored_balances() {
    let h = harness();
    h.database.create_org_account("org-1", 100).unwrap();
    h.database.create_student_account("org-1", "s1").unwrap();

    h.allocations.allocate("org-1", "s1", 12, "grant", "admin").unwrap();
    h.consumption.consume("org-1", "s1", SubjectKind::Student).unwrap();
    h.consumption.consume("org-1", "s1", SubjectKind::Student).unwrap();
    h.allocations.allocate("org-1", "s1", -3, "reclaim", "admin").unwrap();
    h.allocations.allocate("org-1", "s1", 5, "top up", "admin").unwrap();

    let entries = h
        .queries
        .history(
            "org-1",
            &HistoryFilter {
                student_id: Some("s1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(entries.len(), 5);

    let replayed = history::replay(&entries);
    let student = h.database.get_student_account("s1").unwrap().unwrap();
    assert_eq!(replayed.credits_allocated, student.credits_allocated);
    assert_eq!(replayed.credits_used, student.credits_used);
    assert_eq!(student.credits_allocated, 14);
    assert_eq!(student.credits_used, 2);
}

#[test]
fn five_credits_support_exactly_five_sessions() {
    let h = harness();
    h.database.create_org_account("org-1", 5).unwrap();
    h.database.create_student_account("org-1", "s1").unwrap();
    h.allocations.allocate("org-1", "s1", 5, "grant", "admin").unwrap();

    for _ in 0..5 {
        h.consumption.consume("org-1", "s1", SubjectKind::Student).unwrap();
    }
    let err = h
        .consumption
        .consume("org-1", "s1", SubjectKind::Student)
        .unwrap_err();
    assert!(matches!(err, LedgerError::NoCreditsRemaining));
}

#[test]
fn fully_consumed_allocation_cannot_be_reclaimed() {
    let h = harness();
    h.database.create_org_account("org-1", 10).unwrap();
    h.database.create_student_account("org-1", "s1").unwrap();
    h.allocations.allocate("org-1", "s1", 10, "grant", "admin").unwrap();
    for _ in 0..10 {
        h.consumption.consume("org-1", "s1", SubjectKind::Student).unwrap();
    }

    let err = h
        .allocations
        .allocate("org-1", "s1", -1, "reclaim", "admin")
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientUnusedCredits { available: 0 }));
}
