//! Launch plans.
//!
//! A plan splits a built task into the job-independent definition that gets
//! registered once per family and the job-scoped overrides applied when the
//! task is started. Keeping the job identifier out of the definition is what
//! lets many jobs share one registered revision.
//!
//! The roles compiled alongside the task travel with the plan. A task that
//! needs a synthesized role with permissions can only be launched when a
//! role ARN was configured to stand in for it.

use ondemand_core::orchestrator::{
    AssignPublicIp, AwsVpcConfiguration, ContainerOverride, LaunchType, NetworkConfiguration,
    OverrideEnv, RunTaskParams, TaskOverride, literal,
};
use ondemand_core::policy::{CompiledTask, RoleSpec, TaskRoleBinding};
use ondemand_core::task::{AGENT_CONTAINER, TaskSpec};
use ondemand_core::{Error, Result};

use crate::builder::env;

/// Agent flags that make a launched agent exit after its single job.
pub const DISCONNECT_FLAGS: [&str; 2] = ["--disconnect-after-job", "--disconnect-after-idle-timeout=10"];

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub family: String,
    /// Registered as is; contains no job-specific values.
    pub definition: TaskSpec,
    pub params: RunTaskParams,
    pub task_role: TaskRoleBinding,
    /// Permissions the definition's execution role must grant.
    pub execution_role: RoleSpec,
}

impl LaunchPlan {
    pub fn new(task: CompiledTask, cluster: &str, subnets: &[String]) -> Result<Self> {
        if subnets.is_empty() {
            return Err(Error::Configuration(
                "no subnets configured for task networking".to_string(),
            ));
        }
        let CompiledTask {
            mut spec,
            execution_role,
            task_role,
        } = task;
        let family = literal("family", &spec.family)?.to_string();

        if let TaskRoleBinding::Synthesized(role) = &task_role {
            if !role.policies.is_empty() && spec.task_role_arn.is_none() {
                let policies: Vec<&str> =
                    role.policies.iter().map(|p| p.policy_name.as_str()).collect();
                return Err(Error::Configuration(format!(
                    "task '{}' needs a task role granting {} but no default task role ARN is configured",
                    family,
                    policies.join(", ")
                )));
            }
        }

        let agent = spec
            .container_mut(AGENT_CONTAINER)
            .ok_or_else(|| Error::Validation(format!("no '{}' container", AGENT_CONTAINER)))?;

        let mut environment = Vec::new();
        if let Some(job_id) = agent.take_env(env::ACQUIRE_JOB) {
            environment.push(OverrideEnv {
                name: env::ACQUIRE_JOB.to_string(),
                value: literal(env::ACQUIRE_JOB, &job_id)?.to_string(),
            });
        }

        let mut command = if agent.command.is_empty() {
            vec!["start".to_string()]
        } else {
            agent.command.clone()
        };
        for flag in DISCONNECT_FLAGS {
            if !command.iter().any(|c| c == flag) {
                command.push(flag.to_string());
            }
        }

        let params = RunTaskParams {
            cluster: cluster.to_string(),
            task_definition: family.clone(),
            count: 1,
            launch_type: LaunchType::Fargate,
            network_configuration: NetworkConfiguration {
                awsvpc_configuration: AwsVpcConfiguration {
                    subnets: subnets.to_vec(),
                    assign_public_ip: AssignPublicIp::Enabled,
                },
            },
            overrides: TaskOverride {
                container_overrides: vec![ContainerOverride {
                    name: AGENT_CONTAINER.to_string(),
                    command,
                    environment,
                }],
                task_role_arn: None,
            },
        };

        Ok(Self {
            family,
            definition: spec,
            params,
            task_role,
            execution_role,
        })
    }

    /// Job identifier carried in the overrides.
    pub fn job_id(&self) -> Option<&str> {
        self.params.job_id()
    }
}
