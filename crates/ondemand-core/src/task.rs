//! Container task specifications.
//!
//! A [`TaskSpec`] is a complete multi-container task description in the shape
//! orchestrators register as a task definition. Serialization uses the
//! orchestrator API's camelCase field names.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::expr::Expr;
use crate::quantum::ResourceQuantum;
use crate::{Error, Result};

/// Name of the container running the CI agent. Every task has exactly one.
pub const AGENT_CONTAINER: &str = "agent";

/// Upper bound on task family length.
pub const MAX_FAMILY_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub family: Expr,
    pub cpu: Expr,
    pub memory: Expr,
    pub network_mode: NetworkMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<Expr>,
    pub container_definitions: Vec<ContainerSpec>,
    #[serde(default, with = "named_volumes")]
    pub volumes: BTreeSet<String>,
    pub requires_compatibilities: BTreeSet<Compatibility>,
}

impl TaskSpec {
    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.container_definitions.iter().find(|c| c.name == name)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut ContainerSpec> {
        self.container_definitions.iter_mut().find(|c| c.name == name)
    }

    pub fn agent(&self) -> Option<&ContainerSpec> {
        self.container(AGENT_CONTAINER)
    }

    /// Check structural invariants: unique container names with exactly one
    /// agent among them, and a valid literal family.
    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for container in &self.container_definitions {
            if !names.insert(container.name.as_str()) && container.name != AGENT_CONTAINER {
                return Err(Error::Validation(format!(
                    "duplicate container '{}'",
                    container.name
                )));
            }
        }

        let agents = self
            .container_definitions
            .iter()
            .filter(|c| c.name == AGENT_CONTAINER)
            .count();
        if agents != 1 {
            return Err(Error::Validation(format!(
                "task must have exactly one '{}' container, found {}",
                AGENT_CONTAINER, agents
            )));
        }
        if let Some(family) = self.family.as_literal() {
            validate_family(family)?;
        }
        Ok(())
    }
}

/// Families are 1-255 characters of ASCII letters, digits and hyphens.
pub fn validate_family(family: &str) -> Result<()> {
    let valid = !family.is_empty()
        && family.len() <= MAX_FAMILY_LEN
        && family.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid task family '{}'", family)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Awsvpc,
    Bridge,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compatibility {
    Fargate,
    Ec2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: Expr,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_point: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    pub essential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<Secret>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mount_points: Vec<MountPoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes_from: Vec<VolumeFrom>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ContainerDependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<Expr>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            entry_point: Vec::new(),
            command: Vec::new(),
            essential: true,
            cpu: None,
            memory_reservation: None,
            environment: Vec::new(),
            secrets: Vec::new(),
            mount_points: Vec::new(),
            volumes_from: Vec::new(),
            depends_on: Vec::new(),
            log_configuration: None,
            health_check: None,
        }
    }

    /// Set an environment variable, replacing any existing value of the same name.
    pub fn set_env(&mut self, name: &str, value: impl Into<Expr>) {
        let value = value.into();
        match self.environment.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.value = value,
            None => self.environment.push(EnvVar {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn env(&self, name: &str) -> Option<&Expr> {
        self.environment
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.value)
    }

    /// Remove an environment variable, returning its value.
    pub fn take_env(&mut self, name: &str) -> Option<Expr> {
        let idx = self.environment.iter().position(|e| e.name == name)?;
        Some(self.environment.remove(idx).value)
    }

    pub fn set_resources(&mut self, quantum: ResourceQuantum) {
        self.cpu = Some(quantum.cpu);
        self.memory_reservation = Some(quantum.memory);
    }

    pub fn depends_on(&self, container: &str) -> Option<DependencyCondition> {
        self.depends_on
            .iter()
            .find(|d| d.container_name == container)
            .map(|d| d.condition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: Expr,
}

/// A secret injected as an environment variable from a parameter store path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub name: String,
    pub value_from: Expr,
}

impl Secret {
    pub fn new(name: impl Into<String>, value_from: impl Into<Expr>) -> Self {
        Self {
            name: name.into(),
            value_from: value_from.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPoint {
    pub source_volume: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeFrom {
    pub source_container: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDependency {
    pub container_name: String,
    pub condition: DependencyCondition,
}

/// When a dependent container may start relative to its dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyCondition {
    Start,
    Complete,
    Success,
    Healthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfiguration {
    pub log_driver: String,
    pub options: BTreeMap<String, Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub command: Vec<String>,
}

/// Volumes serialize as `[{"name": ...}]`.
mod named_volumes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeSet;

    #[derive(Serialize, Deserialize)]
    struct Named {
        name: String,
    }

    pub fn serialize<S: Serializer>(names: &BTreeSet<String>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(names.iter().map(|name| Named { name: name.clone() }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<String>, D::Error> {
        let named = Vec::<Named>::deserialize(d)?;
        Ok(named.into_iter().map(|n| n.name).collect())
    }
}
