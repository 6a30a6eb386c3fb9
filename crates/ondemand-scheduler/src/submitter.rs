//! Retrying task submission.

use ondemand_core::orchestrator::{Orchestrator, TaskSubmission};
use ondemand_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::launch::LaunchPlan;
use crate::retry::{Exhausted, RetryPolicy, Sleeper, retry_with_backoff, tokio_sleeper};

/// Registers a plan's definition when its family is unknown, then starts the
/// task, retrying the whole sequence with backoff.
///
/// Every failure is retried the same way; after the last attempt the error
/// becomes [`Error::SubmissionExhausted`].
pub struct Submitter {
    orchestrator: Arc<dyn Orchestrator>,
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl Submitter {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            orchestrator,
            policy: RetryPolicy::default(),
            sleeper: tokio_sleeper(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    pub async fn submit(&self, plan: &LaunchPlan) -> Result<TaskSubmission> {
        let result = retry_with_backoff(
            &self.policy,
            "submit_task",
            move |attempt| self.attempt(plan, attempt),
            move |delay| (self.sleeper)(delay),
        )
        .await;

        match result {
            Ok(submission) => {
                info!(
                    family = %plan.family,
                    job_id = plan.job_id().unwrap_or("-"),
                    tasks = ?submission.tasks,
                    "Submitted task"
                );
                Ok(submission)
            }
            Err(Exhausted {
                attempts,
                last_error,
            }) => Err(Error::SubmissionExhausted {
                attempts,
                last_error: last_error.to_string(),
            }),
        }
    }

    async fn attempt(&self, plan: &LaunchPlan, attempt: u32) -> Result<TaskSubmission> {
        debug!(family = %plan.family, attempt, orchestrator = self.orchestrator.name(), "Submitting task");

        let definition = match self
            .orchestrator
            .describe_task_specification(&plan.family)
            .await?
        {
            Some(existing) => existing,
            None => {
                let registered = self
                    .orchestrator
                    .register_task_specification(&plan.definition)
                    .await?;
                info!(family = %plan.family, definition = %registered, "Registered task definition");
                registered
            }
        };

        let mut params = plan.params.clone();
        params.task_definition = definition;

        let submission = self.orchestrator.submit_task(&params).await?;
        if submission.tasks.is_empty() {
            return Err(Error::Orchestrator(format!(
                "no task started: {}",
                submission.failures.join(", ")
            )));
        }
        Ok(submission)
    }
}
