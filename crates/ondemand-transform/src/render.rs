//! Template resource rendering.
//!
//! Task specifications serialize in the orchestrator API's camelCase; the
//! template grammar wants PascalCase property names. Log option keys and
//! expression bodies pass through untouched.

use ondemand_core::Expr;
use ondemand_core::task::{
    Compatibility, ContainerDependency, ContainerSpec, DependencyCondition, LogConfiguration,
    MountPoint, NetworkMode, TaskSpec,
};
use ondemand_core::policy::RoleSpec;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ExpansionError, ExpansionResult};

pub const TASK_DEFINITION_TYPE: &str = "AWS::ECS::TaskDefinition";
pub const LOG_GROUP_TYPE: &str = "AWS::Logs::LogGroup";
pub const ROLE_TYPE: &str = "AWS::IAM::Role";

/// Days expanded log groups keep events.
pub const LOG_RETENTION_DAYS: u32 = 1;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TaskDefinitionProperties<'a> {
    family: &'a Expr,
    cpu: &'a Expr,
    memory: &'a Expr,
    network_mode: NetworkMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_role_arn: Option<&'a Expr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_role_arn: Option<&'a Expr>,
    container_definitions: Vec<ContainerDefinition<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<Volume<'a>>,
    requires_compatibilities: &'a BTreeSet<Compatibility>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerDefinition<'a> {
    name: &'a str,
    image: &'a Expr,
    #[serde(skip_serializing_if = "no_args")]
    entry_point: &'a [String],
    #[serde(skip_serializing_if = "no_args")]
    command: &'a [String],
    essential: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_reservation: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    environment: Vec<NameValue<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    secrets: Vec<NameValueFrom<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mount_points: Vec<Mount<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes_from: Vec<SourceContainer<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<Dependency<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_configuration: Option<Logging<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    health_check: Option<Health<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct NameValue<'a> {
    name: &'a str,
    value: &'a Expr,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct NameValueFrom<'a> {
    name: &'a str,
    value_from: &'a Expr,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Mount<'a> {
    container_path: &'a str,
    source_volume: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    read_only: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SourceContainer<'a> {
    source_container: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Dependency<'a> {
    condition: DependencyCondition,
    container_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Logging<'a> {
    log_driver: &'a str,
    options: &'a BTreeMap<String, Expr>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Health<'a> {
    command: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Volume<'a> {
    name: &'a str,
}

impl<'a> From<&'a MountPoint> for Mount<'a> {
    fn from(mount: &'a MountPoint) -> Self {
        Self {
            container_path: &mount.container_path,
            source_volume: &mount.source_volume,
            read_only: mount.read_only,
        }
    }
}

impl<'a> From<&'a ContainerDependency> for Dependency<'a> {
    fn from(dependency: &'a ContainerDependency) -> Self {
        Self {
            condition: dependency.condition,
            container_name: &dependency.container_name,
        }
    }
}

impl<'a> From<&'a LogConfiguration> for Logging<'a> {
    fn from(logging: &'a LogConfiguration) -> Self {
        Self {
            log_driver: &logging.log_driver,
            options: &logging.options,
        }
    }
}

impl<'a> From<&'a ContainerSpec> for ContainerDefinition<'a> {
    fn from(c: &'a ContainerSpec) -> Self {
        Self {
            name: &c.name,
            image: &c.image,
            entry_point: &c.entry_point,
            command: &c.command,
            essential: c.essential,
            cpu: c.cpu,
            memory_reservation: c.memory_reservation,
            environment: c
                .environment
                .iter()
                .map(|e| NameValue {
                    name: &e.name,
                    value: &e.value,
                })
                .collect(),
            secrets: c
                .secrets
                .iter()
                .map(|s| NameValueFrom {
                    name: &s.name,
                    value_from: &s.value_from,
                })
                .collect(),
            mount_points: c.mount_points.iter().map(Mount::from).collect(),
            volumes_from: c
                .volumes_from
                .iter()
                .map(|v| SourceContainer {
                    source_container: &v.source_container,
                })
                .collect(),
            depends_on: c.depends_on.iter().map(Dependency::from).collect(),
            log_configuration: c.log_configuration.as_ref().map(Logging::from),
            health_check: c.health_check.as_ref().map(|h| Health { command: &h.command }),
        }
    }
}

fn no_args(args: &&[String]) -> bool {
    args.is_empty()
}

fn to_value<T: Serialize>(value: &T) -> ExpansionResult<Value> {
    serde_json::to_value(value).map_err(|e| ExpansionError::Fragment(e.to_string()))
}

/// `AWS::ECS::TaskDefinition` resource for a task specification.
pub fn task_definition(spec: &TaskSpec) -> ExpansionResult<Value> {
    let properties = TaskDefinitionProperties {
        family: &spec.family,
        cpu: &spec.cpu,
        memory: &spec.memory,
        network_mode: spec.network_mode,
        execution_role_arn: spec.execution_role_arn.as_ref(),
        task_role_arn: spec.task_role_arn.as_ref(),
        container_definitions: spec.container_definitions.iter().map(ContainerDefinition::from).collect(),
        volumes: spec.volumes.iter().map(|name| Volume { name }).collect(),
        requires_compatibilities: &spec.requires_compatibilities,
    };
    Ok(json!({
        "Type": TASK_DEFINITION_TYPE,
        "Properties": to_value(&properties)?,
    }))
}

/// `AWS::Logs::LogGroup` resource created after the task definition.
pub fn log_group(name: &Expr, task_definition: &str) -> Value {
    json!({
        "Type": LOG_GROUP_TYPE,
        "DependsOn": task_definition,
        "Properties": {
            "LogGroupName": name,
            "RetentionInDays": LOG_RETENTION_DAYS,
        },
    })
}

/// `AWS::IAM::Role` resource.
pub fn role(role: &RoleSpec) -> ExpansionResult<Value> {
    Ok(json!({
        "Type": ROLE_TYPE,
        "Properties": to_value(role)?,
    }))
}
