use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StorageError;

/// Direction of a balance change. The stored amount is always the positive
/// magnitude; the kind carries the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Allocated,
    Deallocated,
    Consumed,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Allocated => "allocated",
            HistoryKind::Deallocated => "deallocated",
            HistoryKind::Consumed => "consumed",
        }
    }
}

impl FromSql for HistoryKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "allocated" => Ok(HistoryKind::Allocated),
            "deallocated" => Ok(HistoryKind::Deallocated),
            "consumed" => Ok(HistoryKind::Consumed),
            other => Err(FromSqlError::Other(
                format!("unknown history kind: {other}").into(),
            )),
        }
    }
}

/// One immutable audit record. `balance_before`/`balance_after` snapshot
/// the affected counter (a student's `credits_allocated` for allocations
/// and deallocations, the debited `*_used` counter for consumption) so an
/// auditor can verify a point in time without replaying everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entry_id: String,
    pub org_id: String,
    pub student_id: Option<String>,
    pub kind: HistoryKind,
    pub amount: u64,
    pub reason: String,
    pub performed_by: String,
    pub timestamp: String,
    pub balance_before: u64,
    pub balance_after: u64,
}

impl HistoryEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        org_id: &str,
        student_id: Option<&str>,
        kind: HistoryKind,
        amount: u64,
        reason: &str,
        performed_by: &str,
        balance_before: u64,
        balance_after: u64,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            student_id: student_id.map(str::to_string),
            kind,
            amount,
            reason: reason.to_string(),
            performed_by: performed_by.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            balance_before,
            balance_after,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub student_id: Option<String>,
    pub kind: Option<HistoryKind>,
    pub limit: Option<usize>,
}

pub fn append_entry(conn: &Connection, entry: &HistoryEntry) -> Result<(), StorageError> {
    conn.execute(
        r#"
        INSERT INTO ledger_history (
            entry_id, org_id, student_id, kind, amount,
            reason, performed_by, timestamp, balance_before, balance_after
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            entry.entry_id,
            entry.org_id,
            entry.student_id,
            entry.kind.as_str(),
            entry.amount as i64,
            entry.reason,
            entry.performed_by,
            entry.timestamp,
            entry.balance_before as i64,
            entry.balance_after as i64,
        ],
    )?;
    Ok(())
}

pub fn list_entries(
    conn: &Connection,
    org_id: &str,
    filter: &HistoryFilter,
) -> Result<Vec<HistoryEntry>, StorageError> {
    let mut sql = String::from(
        "SELECT entry_id, org_id, student_id, kind, amount, reason, performed_by, \
         timestamp, balance_before, balance_after \
         FROM ledger_history WHERE org_id = ?1",
    );
    let mut bindings: Vec<Value> = vec![org_id.to_string().into()];

    if let Some(student_id) = &filter.student_id {
        bindings.push(student_id.clone().into());
        sql.push_str(&format!(" AND student_id = ?{}", bindings.len()));
    }
    if let Some(kind) = filter.kind {
        bindings.push(kind.as_str().to_string().into());
        sql.push_str(&format!(" AND kind = ?{}", bindings.len()));
    }

    sql.push_str(" ORDER BY timestamp DESC, entry_id DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ");
        sql.push_str(&limit.to_string());
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(bindings), |row| {
        Ok(HistoryEntry {
            entry_id: row.get(0)?,
            org_id: row.get(1)?,
            student_id: row.get(2)?,
            kind: row.get(3)?,
            amount: row.get::<_, i64>(4)? as u64,
            reason: row.get(5)?,
            performed_by: row.get(6)?,
            timestamp: row.get(7)?,
            balance_before: row.get::<_, i64>(8)? as u64,
            balance_after: row.get::<_, i64>(9)? as u64,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayedBalances {
    pub credits_allocated: u64,
    pub credits_used: u64,
}

/// Folds a set of history entries from zero balances. All deltas commute,
/// so the entry order does not matter. Used by the reconciliation check
/// and by tests to confirm the stored counters match the audit trail.
pub fn replay(entries: &[HistoryEntry]) -> ReplayedBalances {
    let mut allocated: i64 = 0;
    let mut used: i64 = 0;

    for entry in entries {
        let amount = entry.amount as i64;
        match entry.kind {
            HistoryKind::Allocated => allocated += amount,
            HistoryKind::Deallocated => allocated -= amount,
            HistoryKind::Consumed => used += amount,
        }
    }

    ReplayedBalances {
        credits_allocated: allocated.max(0) as u64,
        credits_used: used.max(0) as u64,
    }
}
