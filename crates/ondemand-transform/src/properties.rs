//! Placeholder resource properties.

use ondemand_core::Expr;
use ondemand_core::task::{EnvVar, Secret};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ExpansionError, ExpansionResult};

/// Property names a placeholder resource may carry.
pub const SUPPORTED_PROPERTIES: [&str; 9] = [
    "Image",
    "BuildkiteAgentImage",
    "SshAgentBackend",
    "Secrets",
    "Environment",
    "TaskFamily",
    "TaskMemory",
    "TaskCpu",
    "TaskRoleArn",
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentProperties {
    pub image: Option<Expr>,
    /// Image that seeds the agent binary into `image`.
    pub buildkite_agent_image: Option<Expr>,
    pub ssh_agent_backend: Option<Expr>,
    #[serde(default)]
    pub secrets: Vec<SecretProperty>,
    #[serde(default)]
    pub environment: Vec<EnvironmentProperty>,
    pub task_family: Option<Expr>,
    pub task_memory: Option<Expr>,
    pub task_cpu: Option<Expr>,
    pub task_role_arn: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretProperty {
    pub name: String,
    pub value_from: Expr,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnvironmentProperty {
    pub name: String,
    pub value: Expr,
}

impl From<SecretProperty> for Secret {
    fn from(secret: SecretProperty) -> Self {
        Secret::new(secret.name, secret.value_from)
    }
}

impl From<EnvironmentProperty> for EnvVar {
    fn from(var: EnvironmentProperty) -> Self {
        EnvVar {
            name: var.name,
            value: var.value,
        }
    }
}

/// Names in `properties` outside [`SUPPORTED_PROPERTIES`], in document order.
pub fn unsupported(properties: &Map<String, Value>) -> Vec<String> {
    properties
        .keys()
        .filter(|key| !SUPPORTED_PROPERTIES.contains(&key.as_str()))
        .cloned()
        .collect()
}

impl AgentProperties {
    /// Check against the allow-list, then decode.
    pub fn parse(resource: &str, properties: &Map<String, Value>) -> ExpansionResult<Self> {
        let rejected = unsupported(properties);
        if !rejected.is_empty() {
            return Err(ExpansionError::UnsupportedProperties {
                resource: resource.to_string(),
                properties: rejected,
            });
        }

        let parsed: AgentProperties = serde_json::from_value(Value::Object(properties.clone()))
            .map_err(|e| ExpansionError::InvalidProperty {
                resource: resource.to_string(),
                property: "Properties".to_string(),
                message: e.to_string(),
            })?;

        if parsed.image.is_none() {
            return Err(ExpansionError::MissingProperty {
                resource: resource.to_string(),
                property: "Image".to_string(),
            });
        }
        Ok(parsed)
    }
}
