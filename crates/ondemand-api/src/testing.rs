//! Router test fixtures.

use async_trait::async_trait;
use axum::response::Response;
use ondemand_config::SchedulerConfig;
use ondemand_core::orchestrator::{Orchestrator, RunTaskParams, TaskSubmission};
use ondemand_core::task::TaskSpec;
use ondemand_core::{Error, Result};
use ondemand_scheduler::{
    BatchHandler, ChannelQueue, Delivery, Dispatcher, RetryPolicy, Submitter,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const TOKEN: &str = "webhook-token";

/// Jobs with this identifier are rejected on submission.
pub const REJECTED_JOB: &str = "rejected";

struct AcceptingOrchestrator;

#[async_trait]
impl Orchestrator for AcceptingOrchestrator {
    fn name(&self) -> &'static str {
        "accepting"
    }

    async fn describe_task_specification(&self, family: &str) -> Result<Option<String>> {
        Ok(Some(family.to_string()))
    }

    async fn register_task_specification(&self, spec: &TaskSpec) -> Result<String> {
        Ok(spec.family.to_string())
    }

    async fn submit_task(&self, params: &RunTaskParams) -> Result<TaskSubmission> {
        match params.job_id() {
            Some(REJECTED_JOB) => Err(Error::Orchestrator("capacity unavailable".to_string())),
            job => Ok(TaskSubmission {
                tasks: vec![format!("task-{}", job.unwrap_or_default())],
                failures: Vec::new(),
            }),
        }
    }
}

pub fn config() -> SchedulerConfig {
    SchedulerConfig {
        cluster: Some("ci".to_string()),
        subnets: vec!["subnet-a".to_string()],
        queue: Some("ondemand".to_string()),
        webhook_token: Some(TOKEN.to_string()),
        ..Default::default()
    }
}

pub fn state(config: SchedulerConfig) -> (crate::AppState, mpsc::UnboundedReceiver<Delivery>) {
    let submitter =
        Submitter::new(Arc::new(AcceptingOrchestrator)).with_policy(RetryPolicy::quadratic(1));
    let dispatcher = Arc::new(Dispatcher::new(config.clone(), submitter));
    let (queue, receiver) = ChannelQueue::new(config.max_deliveries);
    let state = crate::AppState::new(Arc::new(queue), BatchHandler::new(dispatcher));
    (state, receiver)
}

pub async fn read_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
