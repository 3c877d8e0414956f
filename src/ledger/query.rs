use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error};

use crate::storage::{history, HistoryEntry, HistoryFilter, LedgerDatabase};

use super::balance::{OrgBalance, StudentBalance};
use super::error::LedgerError;

#[derive(Debug, Clone, Serialize)]
pub struct OrgMetrics {
    pub org_id: String,
    pub quota_limit: u64,
    pub quota_used: u64,
    pub student_credits_allocated: u64,
    pub student_credits_used: u64,
    pub available: u64,
    pub utilization_percent: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentMetrics {
    pub student_id: String,
    pub credits_allocated: u64,
    pub credits_used: u64,
    pub credits_remaining: u64,
    pub utilization_percent: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrgSummary {
    pub org: OrgMetrics,
    pub students: Vec<StudentMetrics>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub org_id: String,
    pub recorded_allocated: u64,
    pub computed_allocated: u64,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.recorded_allocated == self.computed_allocated
    }
}

/// Read-only reporting over the ledger. Never mutates state; a slightly
/// stale answer is acceptable for dashboards.
#[derive(Clone)]
pub struct LedgerQueryService {
    database: Arc<LedgerDatabase>,
    low_utilization_threshold: u32,
}

impl LedgerQueryService {
    pub fn new(database: Arc<LedgerDatabase>, low_utilization_threshold: u32) -> Self {
        Self {
            database,
            low_utilization_threshold,
        }
    }

    pub fn get_summary(&self, org_id: &str) -> Result<OrgSummary, LedgerError> {
        let org = self
            .database
            .get_org_account(org_id)?
            .ok_or_else(|| LedgerError::AccountNotFound(org_id.to_string()))?;
        let students = self.database.list_student_accounts(org_id)?;

        let org_balance = OrgBalance::from(&org);
        let org_metrics = OrgMetrics {
            org_id: org.org_id.clone(),
            quota_limit: org.quota_limit,
            quota_used: org.quota_used,
            student_credits_allocated: org.student_credits_allocated,
            student_credits_used: org.student_credits_used,
            available: org_balance.available(),
            utilization_percent: org_balance.utilization_percent(),
        };

        let student_metrics: Vec<StudentMetrics> = students
            .iter()
            .map(|row| {
                let balance = StudentBalance::from(row);
                StudentMetrics {
                    student_id: row.student_id.clone(),
                    credits_allocated: row.credits_allocated,
                    credits_used: row.credits_used,
                    credits_remaining: balance.remaining(),
                    utilization_percent: balance.utilization_percent(),
                }
            })
            .collect();

        let sum_allocated: u64 = student_metrics.iter().map(|s| s.credits_allocated).sum();
        let recommendations = self.build_recommendations(&org_metrics, &student_metrics, sum_allocated);

        Ok(OrgSummary {
            org: org_metrics,
            students: student_metrics,
            recommendations,
        })
    }

    pub fn history(
        &self,
        org_id: &str,
        filter: &HistoryFilter,
    ) -> Result<Vec<HistoryEntry>, LedgerError> {
        if self.database.get_org_account(org_id)?.is_none() {
            return Err(LedgerError::AccountNotFound(org_id.to_string()));
        }
        self.database
            .with_transaction(|tx| Ok(history::list_entries(tx, org_id, filter)?))
    }

    /// Recomputes the per-student allocation sum and compares it against
    /// the stored org aggregate. Drift indicates a bug elsewhere; this
    /// check reports and never repairs.
    pub fn reconcile(&self, org_id: &str) -> Result<ReconciliationReport, LedgerError> {
        let org = self
            .database
            .get_org_account(org_id)?
            .ok_or_else(|| LedgerError::AccountNotFound(org_id.to_string()))?;
        let computed: u64 = self
            .database
            .list_student_accounts(org_id)?
            .iter()
            .map(|s| s.credits_allocated)
            .sum();

        Ok(ReconciliationReport {
            org_id: org.org_id,
            recorded_allocated: org.student_credits_allocated,
            computed_allocated: computed,
        })
    }

    pub fn start_reconciliation_task(&self, period: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match service.reconcile_all() {
                    Ok(checked) => debug!(orgs = checked, "reconciliation sweep complete"),
                    Err(err) => error!(error = %err, "reconciliation sweep failed"),
                }
            }
        })
    }

    fn reconcile_all(&self) -> Result<usize, LedgerError> {
        let org_ids = self.database.list_org_ids()?;
        let checked = org_ids.len();

        for org_id in org_ids {
            let report = self.reconcile(&org_id)?;
            if !report.is_consistent() {
                error!(
                    org_id = %report.org_id,
                    recorded = report.recorded_allocated,
                    computed = report.computed_allocated,
                    "org allocation aggregate drifted from student balances"
                );
            }
        }
        Ok(checked)
    }

    fn build_recommendations(
        &self,
        org: &OrgMetrics,
        students: &[StudentMetrics],
        sum_allocated: u64,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();

        let idle = students
            .iter()
            .filter(|s| s.credits_allocated > 0 && s.credits_used == 0)
            .count();
        if idle > 0 {
            recommendations.push(format!(
                "{idle} student(s) have allocated credits but no recorded usage; consider reclaiming unused credits"
            ));
        }

        if org.quota_limit > 0 && org.utilization_percent < self.low_utilization_threshold {
            recommendations.push(format!(
                "organization utilization is {}%, below the {}% threshold",
                org.utilization_percent, self.low_utilization_threshold
            ));
        }

        if org.quota_limit > 0 && org.available == 0 {
            recommendations.push("organization credit pool is exhausted".to_string());
        }

        if org.student_credits_allocated != sum_allocated {
            recommendations.push(format!(
                "stored allocation aggregate ({}) does not match the sum of student allocations ({}); reconciliation required",
                org.student_credits_allocated, sum_allocated
            ));
        }

        recommendations
    }
}
