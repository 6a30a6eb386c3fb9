//! Orchestrator trait and launch types.
//!
//! Orchestrators register task specifications and launch tasks from them
//! (ECS, Kubernetes, ...).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::expr::Expr;
use crate::task::TaskSpec;

/// Override variable naming the job a launched agent acquires.
pub const ACQUIRE_JOB_ENV: &str = "BUILDKITE_AGENT_ACQUIRE_JOB";

/// Parameters for launching one task from a registered specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskParams {
    pub cluster: String,
    /// Identifier returned by registration, or a family name.
    pub task_definition: String,
    pub count: u32,
    pub launch_type: LaunchType,
    pub network_configuration: NetworkConfiguration,
    pub overrides: TaskOverride,
}

impl RunTaskParams {
    /// Job identifier carried in the container overrides.
    pub fn job_id(&self) -> Option<&str> {
        self.overrides
            .container_overrides
            .iter()
            .flat_map(|o| &o.environment)
            .find(|e| e.name == ACQUIRE_JOB_ENV)
            .map(|e| e.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LaunchType {
    #[default]
    Fargate,
    Ec2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfiguration {
    pub awsvpc_configuration: AwsVpcConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsVpcConfiguration {
    pub subnets: Vec<String>,
    pub assign_public_ip: AssignPublicIp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssignPublicIp {
    #[default]
    Enabled,
    Disabled,
}

/// Job-scoped changes applied on top of the registered specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOverride {
    pub container_overrides: Vec<ContainerOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<OverrideEnv>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEnv {
    pub name: String,
    pub value: String,
}

/// What the orchestrator reported for a launch request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Identifiers of started tasks.
    pub tasks: Vec<String>,
    /// Per-task placement failures reported alongside a successful call.
    pub failures: Vec<String>,
}

/// Trait for container orchestrators.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Name of this orchestrator.
    fn name(&self) -> &'static str;

    /// Look up a registered specification by family, returning its identifier.
    async fn describe_task_specification(&self, family: &str) -> Result<Option<String>>;

    /// Register a specification, returning its identifier.
    async fn register_task_specification(&self, spec: &TaskSpec) -> Result<String>;

    /// Launch a task.
    async fn submit_task(&self, params: &RunTaskParams) -> Result<TaskSubmission>;
}

/// Require a literal value, as orchestrator APIs cannot resolve template expressions.
pub fn literal<'a>(field: &str, expr: &'a Expr) -> Result<&'a str> {
    expr.as_literal().ok_or_else(|| {
        crate::Error::Validation(format!(
            "{} is an unresolved template expression: {}",
            field, expr
        ))
    })
}
