use anyhow::Result;
use rusqlite::Connection;

pub const ORG_ACCOUNTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS org_accounts (
    org_id TEXT PRIMARY KEY,
    quota_limit INTEGER NOT NULL,
    quota_used INTEGER NOT NULL DEFAULT 0,
    student_credits_allocated INTEGER NOT NULL DEFAULT 0,
    student_credits_used INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const STUDENT_ACCOUNTS_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS student_accounts (
    student_id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL REFERENCES org_accounts(org_id),
    credits_allocated INTEGER NOT NULL DEFAULT 0,
    credits_used INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const LEDGER_HISTORY_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_history (
    entry_id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    student_id TEXT,
    kind TEXT NOT NULL,
    amount INTEGER NOT NULL,
    reason TEXT NOT NULL,
    performed_by TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    balance_before INTEGER NOT NULL,
    balance_after INTEGER NOT NULL
);
"#;

pub const LEDGER_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_students_org ON student_accounts(org_id);
CREATE INDEX IF NOT EXISTS idx_history_org_timestamp ON ledger_history(org_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_history_student ON ledger_history(student_id);
"#;

pub fn init_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(ORG_ACCOUNTS_TABLE_SCHEMA)?;
    conn.execute_batch(STUDENT_ACCOUNTS_TABLE_SCHEMA)?;
    conn.execute_batch(LEDGER_HISTORY_TABLE_SCHEMA)?;
    conn.execute_batch(LEDGER_INDEXES)?;
    Ok(())
}
