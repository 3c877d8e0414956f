use serde::{Deserialize, Serialize};

use crate::storage::{OrgAccountRow, StudentAccountRow};

/// Point-in-time snapshot of an organization's counters. All derived
/// quantities are computed here and nowhere else, so the processors and
/// the reporting surface cannot disagree about what "available" means.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrgBalance {
    pub quota_limit: u64,
    pub quota_used: u64,
    pub student_credits_allocated: u64,
    pub student_credits_used: u64,
}

impl From<&OrgAccountRow> for OrgBalance {
    fn from(row: &OrgAccountRow) -> Self {
        Self {
            quota_limit: row.quota_limit,
            quota_used: row.quota_used,
            student_credits_allocated: row.student_credits_allocated,
            student_credits_used: row.student_credits_used,
        }
    }
}

impl OrgBalance {
    /// Credits already spoken for: consumed directly plus handed out to
    /// students. Never exceeds `quota_limit` for a consistent ledger.
    pub fn committed(&self) -> u64 {
        self.quota_used + self.student_credits_allocated
    }

    /// Credits still free for new allocations or direct consumption.
    pub fn available(&self) -> u64 {
        self.quota_limit.saturating_sub(self.committed())
    }

    pub fn utilization_percent(&self) -> u32 {
        utilization_percent(self.committed(), self.quota_limit)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StudentBalance {
    pub credits_allocated: u64,
    pub credits_used: u64,
}

impl From<&StudentAccountRow> for StudentBalance {
    fn from(row: &StudentAccountRow) -> Self {
        Self {
            credits_allocated: row.credits_allocated,
            credits_used: row.credits_used,
        }
    }
}

impl StudentBalance {
    pub fn remaining(&self) -> u64 {
        self.credits_allocated.saturating_sub(self.credits_used)
    }

    pub fn utilization_percent(&self) -> u32 {
        utilization_percent(self.credits_used, self.credits_allocated)
    }
}

fn utilization_percent(used: u64, limit: u64) -> u32 {
    if limit == 0 {
        return 0;
    }
    ((used as f64 / limit as f64) * 100.0).round() as u32
}
