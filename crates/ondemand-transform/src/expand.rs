//! Placeholder resource expansion.

use chrono::Utc;
use ondemand_config::SchedulerConfig;
use ondemand_config::layout::Layout;
use ondemand_config::system::{DEFAULT_AGENT_TOKEN_PATH, DEFAULT_SSH_AGENT_IMAGE};
use ondemand_core::Expr;
use ondemand_core::policy::TaskRoleBinding;
use ondemand_core::quantum::{DEFAULT_CPU, DEFAULT_MEMORY};
use ondemand_scheduler::builder::{BuilderConfig, Resources, RoleRequest, TaskBuilder, TaskRequest};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{ExpansionError, ExpansionResult};
use crate::properties::AgentProperties;
use crate::render;
use crate::request::{ExpansionRequest, ExpansionResponse};

/// Resource types expanded by this crate.
pub const PLACEHOLDER_TYPES: [&str; 2] = ["Buildkite::ECS::Agent", "Buildkite::ECS::TaskDefinition"];

const GLOBALS: &str = "Globals";
const RESOURCES: &str = "Resources";

/// Expands placeholder resources of a template fragment.
#[derive(Debug, Clone)]
pub struct Expander {
    agent_token_path: String,
    ssh_agent_image: String,
}

impl Default for Expander {
    fn default() -> Self {
        Self {
            agent_token_path: DEFAULT_AGENT_TOKEN_PATH.to_string(),
            ssh_agent_image: DEFAULT_SSH_AGENT_IMAGE.to_string(),
        }
    }
}

impl Expander {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            agent_token_path: config.agent_token_path.clone(),
            ssh_agent_image: config.ssh_agent_image.clone(),
        }
    }

    /// Expand a request. Failures are reported in the response, never raised.
    pub fn expand(&self, request: &ExpansionRequest) -> ExpansionResponse {
        match self.expand_fragment(request.fragment.clone()) {
            Ok(fragment) => ExpansionResponse::success(&request.request_id, fragment),
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "Template expansion failed");
                ExpansionResponse::error(&request.request_id, e.to_string())
            }
        }
    }

    /// Expand every placeholder in `fragment`, dropping its `Globals` section.
    pub fn expand_fragment(&self, fragment: Value) -> ExpansionResult<Value> {
        let Value::Object(mut fragment) = fragment else {
            return Err(ExpansionError::Fragment("fragment is not an object".to_string()));
        };

        let token_path = fragment
            .remove(GLOBALS)
            .as_ref()
            .and_then(|g| g.pointer("/TaskDefinition/BuildkiteAgentTokenParameterPath"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.agent_token_path.clone());

        let resources = match fragment.remove(RESOURCES) {
            None => Map::new(),
            Some(Value::Object(resources)) => resources,
            Some(_) => {
                return Err(ExpansionError::Fragment("Resources is not an object".to_string()));
            }
        };

        let mut expanded = Map::new();
        let mut generated = Vec::new();
        for (name, resource) in resources {
            let kind = resource.get("Type").and_then(Value::as_str).unwrap_or_default();
            if !PLACEHOLDER_TYPES.contains(&kind) {
                expanded.insert(name, resource);
                continue;
            }

            let empty = Map::new();
            let properties = match resource.get("Properties") {
                None => &empty,
                Some(Value::Object(properties)) => properties,
                Some(_) => {
                    return Err(ExpansionError::InvalidProperty {
                        resource: name,
                        property: "Properties".to_string(),
                        message: "expected an object".to_string(),
                    });
                }
            };

            let props = AgentProperties::parse(&name, properties)?;
            generated.extend(self.expand_resource(&name, props, &token_path)?);
        }

        for (name, resource) in generated {
            if expanded.contains_key(&name) {
                return Err(ExpansionError::Conflict(name));
            }
            expanded.insert(name, resource);
        }

        fragment.insert(RESOURCES.to_string(), Value::Object(expanded));
        Ok(Value::Object(fragment))
    }

    /// Resources generated for one placeholder, as `(logical name, resource)`.
    pub fn expand_resource(
        &self,
        name: &str,
        props: AgentProperties,
        token_path: &str,
    ) -> ExpansionResult<Vec<(String, Value)>> {
        let task_definition_name = format!("{}TaskDefinition", name);
        let log_group_name = format!("{}LogGroup", name);
        let execution_role_name = format!("{}ExecutionRole", name);
        let task_role_name = format!("{}TaskRole", name);

        let builder = TaskBuilder::new(BuilderConfig {
            region: Expr::reference("AWS::Region"),
            account_id: Some(Expr::reference("AWS::AccountId")),
            agent_token_path: Expr::literal(token_path),
            execution_role: Some(Expr::get_att(&execution_role_name, "Arn")),
            task_role_prefix: None,
            synthesized_task_role: Some(Expr::get_att(&task_role_name, "Arn")),
            ssh_agent_image: Expr::literal(&self.ssh_agent_image),
            create_log_group: false,
        });

        let family = props.task_family.unwrap_or_else(|| Expr::literal(name));
        let request = TaskRequest {
            job_id: None,
            image: props.image,
            seed_image: props.buildkite_agent_image,
            resources: Resources::Verbatim {
                cpu: props
                    .task_cpu
                    .unwrap_or_else(|| Expr::literal(DEFAULT_CPU.to_string())),
                memory: props
                    .task_memory
                    .unwrap_or_else(|| Expr::literal(DEFAULT_MEMORY.to_string())),
            },
            task_role: props.task_role_arn.map(RoleRequest::Arn),
            ssh_agent_backend: props.ssh_agent_backend,
            secrets: props.secrets.into_iter().map(Into::into).collect(),
            environment: props.environment.into_iter().map(Into::into).collect(),
            family: Some(family.clone()),
        };

        let compiled = builder.build(&request, &Layout::builtin(), Utc::now())?;

        let mut resources = vec![
            (task_definition_name.clone(), render::task_definition(&compiled.spec)?),
            (
                log_group_name,
                render::log_group(
                    &Expr::sub("/aws/ecs/${TaskFamily}", &[("TaskFamily", &family)]),
                    &task_definition_name,
                ),
            ),
            (execution_role_name, render::role(&compiled.execution_role)?),
        ];
        if let TaskRoleBinding::Synthesized(role) = &compiled.task_role {
            resources.push((task_role_name, render::role(role)?));
        }

        info!(
            resource = %name,
            family = %family,
            containers = compiled.spec.container_definitions.len(),
            "Expanded agent resource"
        );
        debug!(resources = ?resources.iter().map(|(n, _)| n).collect::<Vec<_>>(), "Generated resources");

        Ok(resources)
    }
}
