pub mod database;
pub mod error;
pub mod history;
pub mod schema;

pub use database::{LedgerDatabase, OrgAccountRow, StudentAccountRow};
pub use error::StorageError;
pub use history::{HistoryEntry, HistoryFilter, HistoryKind};

pub const LEDGER_DB_FILENAME: &str = "ledger.db";
pub const ORG_ACCOUNTS_TABLE: &str = "org_accounts";
pub const STUDENT_ACCOUNTS_TABLE: &str = "student_accounts";
pub const LEDGER_HISTORY_TABLE: &str = "ledger_history";
