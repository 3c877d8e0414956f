use std::sync::Arc;

pub mod handlers;
pub mod router;
pub mod types;

pub use router::create_router;

use crate::config::LedgerConfig;
use crate::ledger::{AllocationProcessor, ConsumptionProcessor, LedgerQueryService};
use crate::storage::LedgerDatabase;

pub struct ApiState {
    pub allocations: AllocationProcessor,
    pub consumption: ConsumptionProcessor,
    pub queries: LedgerQueryService,
    pub database: Arc<LedgerDatabase>,
    pub config: Arc<LedgerConfig>,
}

impl ApiState {
    pub fn new(
        allocations: AllocationProcessor,
        consumption: ConsumptionProcessor,
        queries: LedgerQueryService,
        database: Arc<LedgerDatabase>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            allocations,
            consumption,
            queries,
            database,
            config: Arc::new(config),
        }
    }
}
