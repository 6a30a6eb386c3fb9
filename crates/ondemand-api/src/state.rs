//! Application state.

use ondemand_config::SchedulerConfig;
use ondemand_scheduler::{BatchHandler, JobQueue};
use ondemand_transform::Expander;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SchedulerConfig>,
    pub queue: Arc<dyn JobQueue>,
    pub batch: BatchHandler,
    pub expander: Arc<Expander>,
}

impl AppState {
    /// Configuration is taken from the batch handler's dispatcher.
    pub fn new(queue: Arc<dyn JobQueue>, batch: BatchHandler) -> Self {
        let config = Arc::new(batch.dispatcher().config().clone());
        let expander = Arc::new(Expander::from_config(&config));

        Self {
            config,
            queue,
            batch,
            expander,
        }
    }
}
