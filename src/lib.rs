//! Two-tier interview-credit ledger. An organization buys a quota of
//! credits; portions of that quota are allocated to students, and one
//! credit is consumed per interview session. Every balance change is
//! applied in a single database transaction together with an append-only
//! history entry, so balances are never double-spent and are always
//! reconstructible from the audit trail.

pub mod api;
pub mod config;
pub mod ledger;
pub mod storage;
