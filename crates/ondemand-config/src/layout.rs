//! Container layout parsing.
//!
//! A layout is the base container arrangement a task is built from. Named
//! layouts live in a template library as KDL documents:
//!
//! ```kdl
//! layout "elastic-ci-stack"
//! volume "docker-socket"
//!
//! container "agent" {
//!     image "keithduncan/elastic-ci-stack:latest"
//!     env {
//!         DOCKER_HOST "unix:///var/run/docker.sock"
//!     }
//!     mount "docker-socket" "/var/run/"
//!     depends-on "dockerd" condition="HEALTHY"
//! }
//!
//! container "dockerd" essential=#false {
//!     image "docker:20-dind"
//!     command "dockerd"
//!     mount "docker-socket" "/var/run/"
//!     health-check "test" "-S" "/var/run/docker.sock"
//! }
//! ```

use crate::nodes::{
    get_all_string_args, get_bool_prop, get_first_int_arg, get_first_string_arg, get_string_prop,
};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use ondemand_core::task::{
    AGENT_CONTAINER, ContainerDependency, ContainerSpec, DependencyCondition, HealthCheck,
    MountPoint, Secret, VolumeFrom,
};
use std::collections::BTreeSet;

/// Image of the agent container in the built-in layout.
pub const DEFAULT_AGENT_IMAGE: &str = "buildkite/agent:3";

/// Name of the built-in layout.
pub const DEFAULT_LAYOUT: &str = "default";

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub name: String,
    /// Role the layout's containers run as, when the layout pins one.
    pub task_role_arn: Option<String>,
    pub volumes: BTreeSet<String>,
    pub containers: Vec<ContainerSpec>,
}

impl Layout {
    /// A single stock agent container.
    pub fn builtin() -> Self {
        let mut agent = ContainerSpec::new(AGENT_CONTAINER, DEFAULT_AGENT_IMAGE);
        agent.entry_point = vec!["buildkite-agent".to_string()];
        agent.command = vec!["start".to_string()];
        Self {
            name: DEFAULT_LAYOUT.to_string(),
            task_role_arn: None,
            volumes: BTreeSet::new(),
            containers: vec![agent],
        }
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn agent(&self) -> Option<&ContainerSpec> {
        self.container(AGENT_CONTAINER)
    }

    /// Parse a layout document fetched as raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> ConfigResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| ConfigError::InvalidValue {
            field: "layout".to_string(),
            message: e.to_string(),
        })?;
        parse_layout(text)
    }
}

/// Parse a layout from KDL text.
pub fn parse_layout(kdl: &str) -> ConfigResult<Layout> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut task_role_arn = None;
    let mut volumes = BTreeSet::new();
    let mut containers: Vec<ContainerSpec> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "layout" => {
                name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("layout name".to_string()))?;
            }
            "task-role" => {
                task_role_arn = get_first_string_arg(node);
            }
            "volume" => {
                volumes.extend(get_all_string_args(node));
            }
            "container" => {
                let container = parse_container(node)?;
                if containers.iter().any(|c| c.name == container.name) {
                    return Err(ConfigError::Duplicate(format!(
                        "container '{}'",
                        container.name
                    )));
                }
                containers.push(container);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("layout name".to_string()));
    }

    check_references(&containers, &volumes)?;

    Ok(Layout {
        name,
        task_role_arn,
        volumes,
        containers,
    })
}

fn parse_container(node: &KdlNode) -> ConfigResult<ContainerSpec> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("container name".to_string()))?;

    let mut image = String::new();
    let mut container = ContainerSpec::new(name.clone(), "");
    container.essential = get_bool_prop(node, "essential").unwrap_or(true);

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => {
                    image = get_first_string_arg(child).unwrap_or_default();
                }
                "entry-point" => {
                    container.entry_point = get_all_string_args(child);
                }
                "command" => {
                    container.command = get_all_string_args(child);
                }
                "cpu" => {
                    container.cpu = Some(positive(child, &name)?);
                }
                "memory" => {
                    container.memory_reservation = Some(positive(child, &name)?);
                }
                "env" => {
                    if let Some(vars) = child.children() {
                        for var in vars.nodes() {
                            if let Some(value) = get_first_string_arg(var) {
                                container.set_env(var.name().value(), value);
                            }
                        }
                    }
                }
                "secret" => {
                    let args = get_all_string_args(child);
                    let [secret, path] = args.as_slice() else {
                        return Err(ConfigError::InvalidValue {
                            field: format!("secret in container '{}'", name),
                            message: "expected a name and a source path".to_string(),
                        });
                    };
                    container.secrets.push(Secret::new(secret.clone(), path.clone()));
                }
                "mount" => {
                    let args = get_all_string_args(child);
                    let [volume, path] = args.as_slice() else {
                        return Err(ConfigError::InvalidValue {
                            field: format!("mount in container '{}'", name),
                            message: "expected a volume and a container path".to_string(),
                        });
                    };
                    container.mount_points.push(MountPoint {
                        source_volume: volume.clone(),
                        container_path: path.clone(),
                        read_only: get_bool_prop(child, "read-only").unwrap_or(false),
                    });
                }
                "volumes-from" => {
                    for source in get_all_string_args(child) {
                        container.volumes_from.push(VolumeFrom {
                            source_container: source,
                        });
                    }
                }
                "depends-on" => {
                    let target = get_first_string_arg(child).ok_or_else(|| {
                        ConfigError::MissingField(format!("depends-on target in '{}'", name))
                    })?;
                    let condition = get_string_prop(child, "condition")
                        .map(|c| parse_condition(&c))
                        .transpose()?
                        .unwrap_or(DependencyCondition::Start);
                    container.depends_on.push(ContainerDependency {
                        container_name: target,
                        condition,
                    });
                }
                "health-check" => {
                    container.health_check = Some(HealthCheck {
                        command: get_all_string_args(child),
                    });
                }
                _ => {}
            }
        }
    }

    if image.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "image for container '{}'",
            name
        )));
    }
    container.image = image.into();

    Ok(container)
}

fn positive(node: &KdlNode, container: &str) -> ConfigResult<u32> {
    get_first_int_arg(node)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: format!("{} in container '{}'", node.name().value(), container),
            message: "expected a positive integer".to_string(),
        })
}

fn parse_condition(raw: &str) -> ConfigResult<DependencyCondition> {
    match raw.to_ascii_uppercase().as_str() {
        "START" => Ok(DependencyCondition::Start),
        "COMPLETE" => Ok(DependencyCondition::Complete),
        "SUCCESS" => Ok(DependencyCondition::Success),
        "HEALTHY" => Ok(DependencyCondition::Healthy),
        _ => Err(ConfigError::InvalidValue {
            field: "condition".to_string(),
            message: format!("unknown dependency condition: {}", raw),
        }),
    }
}

/// Every mount names a declared volume and every dependency a declared container.
fn check_references(containers: &[ContainerSpec], volumes: &BTreeSet<String>) -> ConfigResult<()> {
    let names: BTreeSet<&str> = containers.iter().map(|c| c.name.as_str()).collect();

    for container in containers {
        for mount in &container.mount_points {
            if !volumes.contains(&mount.source_volume) {
                return Err(ConfigError::InvalidValue {
                    field: format!("mount in container '{}'", container.name),
                    message: format!("unknown volume '{}'", mount.source_volume),
                });
            }
        }

        let referenced = container
            .depends_on
            .iter()
            .map(|d| d.container_name.as_str())
            .chain(container.volumes_from.iter().map(|v| v.source_container.as_str()));
        for target in referenced {
            if target == container.name || !names.contains(target) {
                return Err(ConfigError::InvalidValue {
                    field: format!("container '{}'", container.name),
                    message: format!("unknown container reference '{}'", target),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ondemand_core::Expr;

    const ELASTIC: &str = r#"
        layout "elastic-ci-stack"
        task-role "arn:aws:iam::123456789012:role/elastic-ci-stack"
        volume "docker-socket"

        container "agent" {
            image "keithduncan/elastic-ci-stack:latest"
            command "start"
            env {
                BUILDKITE_QUEUE "eks"
                DOCKER_EXPERIMENTAL "true"
            }
            secret "DOCKER_PASSWORD" "/ci/docker-password"
            mount "docker-socket" "/var/run/"
            depends-on "dockerd" condition="healthy"
            memory 2048
        }

        container "dockerd" essential=#false {
            image "docker:20-dind"
            command "dockerd"
            mount "docker-socket" "/var/run/"
            health-check "test" "-S" "/var/run/docker.sock"
        }
    "#;

    #[test]
    fn test_parse_layout() {
        let layout = parse_layout(ELASTIC).unwrap();
        assert_eq!(layout.name, "elastic-ci-stack");
        assert_eq!(layout.containers.len(), 2);
        assert!(layout.volumes.contains("docker-socket"));
        assert!(layout.task_role_arn.is_some());

        let agent = layout.agent().unwrap();
        assert_eq!(agent.image, Expr::literal("keithduncan/elastic-ci-stack:latest"));
        assert_eq!(agent.env("BUILDKITE_QUEUE"), Some(&Expr::literal("eks")));
        assert_eq!(agent.secrets.len(), 1);
        assert_eq!(agent.memory_reservation, Some(2048));
        assert_eq!(agent.depends_on("dockerd"), Some(DependencyCondition::Healthy));

        let dockerd = layout.container("dockerd").unwrap();
        assert!(!dockerd.essential);
        assert_eq!(
            dockerd.health_check.as_ref().unwrap().command,
            vec!["test", "-S", "/var/run/docker.sock"]
        );
    }

    #[test]
    fn test_builtin_has_agent() {
        let layout = Layout::builtin();
        assert_eq!(layout.agent().unwrap().image, Expr::literal(DEFAULT_AGENT_IMAGE));
        assert_eq!(layout.containers.len(), 1);
    }

    #[test]
    fn test_layout_without_agent_parses() {
        // Missing agent is rejected when the task is built, not here.
        let layout = parse_layout(
            r#"
            layout "no-agent"
            container "main" { image "alpine" }
            "#,
        )
        .unwrap();
        assert!(layout.agent().is_none());
    }

    #[test]
    fn test_missing_image() {
        let result = parse_layout(
            r#"
            layout "broken"
            container "agent" { command "start" }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_duplicate_container() {
        let result = parse_layout(
            r#"
            layout "twice"
            container "agent" { image "a" }
            container "agent" { image "b" }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_unknown_references() {
        let unknown_volume = parse_layout(
            r#"
            layout "x"
            container "agent" {
                image "a"
                mount "missing" "/data"
            }
            "#,
        );
        assert!(matches!(unknown_volume, Err(ConfigError::InvalidValue { .. })));

        let unknown_container = parse_layout(
            r#"
            layout "x"
            container "agent" {
                image "a"
                depends-on "ghost"
            }
            "#,
        );
        assert!(matches!(unknown_container, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_from_bytes_rejects_invalid_utf8() {
        assert!(Layout::from_bytes(&[0xff, 0xfe]).is_err());
    }
}
