use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::error::StorageError;
use super::schema::init_database;
use super::LEDGER_DB_FILENAME;

#[derive(Debug, Clone)]
pub struct OrgAccountRow {
    pub org_id: String,
    pub quota_limit: u64,
    pub quota_used: u64,
    pub student_credits_allocated: u64,
    pub student_credits_used: u64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct StudentAccountRow {
    pub student_id: String,
    pub org_id: String,
    pub credits_allocated: u64,
    pub credits_used: u64,
    pub created_at: String,
    pub updated_at: String,
}

pub struct LedgerDatabase {
    conn: Mutex<Connection>,
}

impl LedgerDatabase {
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(LEDGER_DB_FILENAME);
        let is_new = !db_path.exists();
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        if is_new {
            init_database(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` inside an IMMEDIATE transaction and commits on success.
    /// The write lock is taken up front, so concurrent writers surface as
    /// SQLITE_BUSY rather than mid-transaction upgrades.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&Transaction) -> Result<T, E>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::ConnectionPoisoned)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StorageError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(value)
    }

    pub fn create_org_account(
        &self,
        org_id: &str,
        quota_limit: u64,
    ) -> Result<(), StorageError> {
        if org_id.trim().is_empty() {
            return Err(StorageError::InvalidValue("org_id cannot be empty".into()));
        }

        self.with_transaction(|tx| {
            if get_org(tx, org_id)?.is_some() {
                return Err(StorageError::AccountExists(org_id.to_string()));
            }
            let now = Utc::now().to_rfc3339();
            tx.execute(
                r#"
                INSERT INTO org_accounts (
                    org_id, quota_limit, quota_used,
                    student_credits_allocated, student_credits_used,
                    created_at, updated_at
                ) VALUES (?1, ?2, 0, 0, 0, ?3, ?4)
                "#,
                params![org_id, quota_limit as i64, now, now],
            )?;
            Ok(())
        })
    }

    /// Admin resize of an organization's purchased quota. Shrinking below
    /// already committed credits would break the org-level invariant, so
    /// that is rejected instead of clamped.
    pub fn set_quota_limit(&self, org_id: &str, quota_limit: u64) -> Result<(), StorageError> {
        self.with_transaction(|tx| {
            let org = get_org(tx, org_id)?
                .ok_or_else(|| StorageError::AccountNotFound(org_id.to_string()))?;

            let committed = org.quota_used + org.student_credits_allocated;
            if quota_limit < committed {
                return Err(StorageError::QuotaBelowCommitted {
                    requested: quota_limit,
                    committed,
                });
            }

            let now = Utc::now().to_rfc3339();
            tx.execute(
                "UPDATE org_accounts SET quota_limit = ?1, updated_at = ?2 WHERE org_id = ?3",
                params![quota_limit as i64, now, org_id],
            )?;
            Ok(())
        })
    }

    pub fn create_student_account(
        &self,
        org_id: &str,
        student_id: &str,
    ) -> Result<(), StorageError> {
        if student_id.trim().is_empty() {
            return Err(StorageError::InvalidValue(
                "student_id cannot be empty".into(),
            ));
        }

        self.with_transaction(|tx| {
            if get_org(tx, org_id)?.is_none() {
                return Err(StorageError::AccountNotFound(org_id.to_string()));
            }
            if get_student(tx, student_id)?.is_some() {
                return Err(StorageError::AccountExists(student_id.to_string()));
            }
            let now = Utc::now().to_rfc3339();
            tx.execute(
                r#"
                INSERT INTO student_accounts (
                    student_id, org_id, credits_allocated, credits_used,
                    created_at, updated_at
                ) VALUES (?1, ?2, 0, 0, ?3, ?4)
                "#,
                params![student_id, org_id, now, now],
            )?;
            Ok(())
        })
    }

    pub fn get_org_account(&self, org_id: &str) -> Result<Option<OrgAccountRow>, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::ConnectionPoisoned)?;
        get_org(&conn, org_id)
    }

    pub fn get_student_account(
        &self,
        student_id: &str,
    ) -> Result<Option<StudentAccountRow>, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::ConnectionPoisoned)?;
        get_student(&conn, student_id)
    }

    pub fn list_student_accounts(
        &self,
        org_id: &str,
    ) -> Result<Vec<StudentAccountRow>, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::ConnectionPoisoned)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT student_id, org_id, credits_allocated, credits_used, created_at, updated_at
            FROM student_accounts
            WHERE org_id = ?1
            ORDER BY student_id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![org_id], student_from_row)?;

        let mut students = Vec::new();
        for row in rows {
            students.push(row?);
        }
        Ok(students)
    }

    pub fn list_org_ids(&self) -> Result<Vec<String>, StorageError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::ConnectionPoisoned)?;

        let mut stmt = conn.prepare("SELECT org_id FROM org_accounts ORDER BY org_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

pub fn get_org(conn: &Connection, org_id: &str) -> Result<Option<OrgAccountRow>, StorageError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT org_id, quota_limit, quota_used,
               student_credits_allocated, student_credits_used,
               created_at, updated_at
        FROM org_accounts
        WHERE org_id = ?1
        "#,
    )?;

    let result = stmt.query_row(params![org_id], org_from_row).optional()?;
    Ok(result)
}

pub fn get_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<StudentAccountRow>, StorageError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT student_id, org_id, credits_allocated, credits_used, created_at, updated_at
        FROM student_accounts
        WHERE student_id = ?1
        "#,
    )?;

    let result = stmt.query_row(params![student_id], student_from_row).optional()?;
    Ok(result)
}

pub fn update_org_counters(
    conn: &Connection,
    org_id: &str,
    quota_used: u64,
    student_credits_allocated: u64,
    student_credits_used: u64,
) -> Result<(), StorageError> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        r#"
        UPDATE org_accounts
        SET quota_used = ?1,
            student_credits_allocated = ?2,
            student_credits_used = ?3,
            updated_at = ?4
        WHERE org_id = ?5
        "#,
        params![
            quota_used as i64,
            student_credits_allocated as i64,
            student_credits_used as i64,
            now,
            org_id
        ],
    )?;

    if updated == 0 {
        return Err(StorageError::AccountNotFound(org_id.to_string()));
    }
    Ok(())
}

pub fn update_student_counters(
    conn: &Connection,
    student_id: &str,
    credits_allocated: u64,
    credits_used: u64,
) -> Result<(), StorageError> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        r#"
        UPDATE student_accounts
        SET credits_allocated = ?1,
            credits_used = ?2,
            updated_at = ?3
        WHERE student_id = ?4
        "#,
        params![credits_allocated as i64, credits_used as i64, now, student_id],
    )?;

    if updated == 0 {
        return Err(StorageError::AccountNotFound(student_id.to_string()));
    }
    Ok(())
}

fn org_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrgAccountRow> {
    Ok(OrgAccountRow {
        org_id: row.get(0)?,
        quota_limit: row.get::<_, i64>(1)? as u64,
        quota_used: row.get::<_, i64>(2)? as u64,
        student_credits_allocated: row.get::<_, i64>(3)? as u64,
        student_credits_used: row.get::<_, i64>(4)? as u64,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentAccountRow> {
    Ok(StudentAccountRow {
        student_id: row.get(0)?,
        org_id: row.get(1)?,
        credits_allocated: row.get::<_, i64>(2)? as u64,
        credits_used: row.get::<_, i64>(3)? as u64,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
