//! Per-job compile and submit pipeline.

use chrono::{DateTime, Utc};
use ondemand_config::{Layout, SchedulerConfig};
use ondemand_core::orchestrator::TaskSubmission;
use ondemand_core::template::TemplateLibrary;
use ondemand_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::builder::{BuilderConfig, TaskBuilder, TaskRequest};
use crate::launch::LaunchPlan;
use crate::queue::JobMessage;
use crate::submitter::Submitter;

pub struct Dispatcher {
    config: SchedulerConfig,
    builder: TaskBuilder,
    library: Option<Arc<dyn TemplateLibrary>>,
    submitter: Submitter,
}

impl Dispatcher {
    pub fn new(config: SchedulerConfig, submitter: Submitter) -> Self {
        let builder = TaskBuilder::new(BuilderConfig::runtime(&config));
        Self {
            config,
            builder,
            library: None,
            submitter,
        }
    }

    pub fn with_library(mut self, library: Arc<dyn TemplateLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Base layout for a job. Anything that prevents loading a named layout
    /// falls back to the built-in one.
    pub async fn resolve_layout(&self, name: Option<&str>) -> Layout {
        let Some(name) = name else {
            return Layout::builtin();
        };
        let Some(library) = &self.library else {
            warn!(layout = %name, "No template library configured, using default layout");
            return Layout::builtin();
        };

        let bytes = match library.fetch(name).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(layout = %name, error = %e, "Failed to fetch layout, using default");
                return Layout::builtin();
            }
        };
        match Layout::from_bytes(&bytes) {
            Ok(layout) => {
                debug!(layout = %layout.name, containers = layout.containers.len(), "Loaded layout");
                layout
            }
            Err(e) => {
                warn!(layout = %name, error = %e, "Failed to parse layout, using default");
                Layout::builtin()
            }
        }
    }

    /// Compile a message into a launch plan against `layout`.
    pub fn plan(&self, message: &JobMessage, layout: &Layout, now: DateTime<Utc>) -> Result<LaunchPlan> {
        let request = TaskRequest::from_job(&message.job, &self.config.seed_image);
        let task = self.builder.build(&request, layout, now)?;

        let cluster = message
            .cluster
            .as_deref()
            .or(self.config.cluster.as_deref())
            .ok_or_else(|| Error::Configuration("no cluster configured".to_string()))?;
        let subnets = self.config.require_subnets()?;

        LaunchPlan::new(task, cluster, subnets)
    }

    pub async fn dispatch(&self, message: &JobMessage) -> Result<TaskSubmission> {
        let job = &message.job;
        let directives = job.directives();
        let layout = self.resolve_layout(directives.task_definition()).await;

        let plan = self.plan(message, &layout, Utc::now())?;
        info!(
            job_id = %job.identifier,
            family = %plan.family,
            layout = %layout.name,
            cluster = %plan.params.cluster,
            task_role = ?plan.definition.task_role_arn,
            execution_role = ?plan.definition.execution_role_arn,
            execution_policies = plan.execution_role.policies.len(),
            "Dispatching job"
        );

        self.submitter.submit(&plan).await
    }
}
