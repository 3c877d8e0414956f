pub mod allocation;
pub mod balance;
pub mod consumption;
pub mod error;
pub mod query;

pub use allocation::{AllocationProcessor, NewBalances};
pub use balance::{OrgBalance, StudentBalance};
pub use consumption::{ConsumptionProcessor, SubjectKind};
pub use error::LedgerError;
pub use query::{LedgerQueryService, OrgSummary, ReconciliationReport};
