//! Job queue batch boundary.
//!
//! Every message in a batch is dispatched concurrently and independently. The
//! batch only reports success once all of them were attempted; a single
//! failure fails the batch so the transport redelivers.

use futures::future::join_all;
use ondemand_core::Result;
use ondemand_core::orchestrator::TaskSubmission;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::dispatch::Dispatcher;
use crate::queue::JobMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub status_code: u16,
}

impl BatchResponse {
    pub fn ok() -> Self {
        Self { status_code: 200 }
    }
}

#[derive(Clone)]
pub struct BatchHandler {
    dispatcher: Arc<Dispatcher>,
}

impl BatchHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Dispatch all messages, returning one result per message in order.
    pub async fn handle_all(&self, messages: &[JobMessage]) -> Vec<Result<TaskSubmission>> {
        let results = join_all(messages.iter().map(|m| self.dispatcher.dispatch(m))).await;

        for (message, result) in messages.iter().zip(&results) {
            if let Err(e) = result {
                error!(job_id = %message.job.identifier, error = %e, "Failed to dispatch job");
            }
        }
        results
    }

    /// Dispatch all messages and fail with the first error, if any.
    pub async fn handle(&self, messages: &[JobMessage]) -> Result<BatchResponse> {
        for result in self.handle_all(messages).await {
            result?;
        }
        Ok(BatchResponse::ok())
    }
}
