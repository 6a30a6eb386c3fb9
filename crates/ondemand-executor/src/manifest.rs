//! Kubernetes manifests for task specifications.
//!
//! Containers another container waits on become init containers: a
//! `SUCCESS`/`COMPLETE` dependency runs to completion first, a `HEALTHY`/`START`
//! dependency becomes a native sidecar (`restartPolicy: Always`) whose health
//! check is its startup probe. Task volumes are `emptyDir`s. Secrets are read
//! from a Kubernetes secret named after the parameter path.
//!
//! `volumesFrom` has no pod equivalent. The source container's image content
//! under [`SHARED_VOLUME_PATH`] is copied into an `emptyDir` mounted at
//! [`SEED_MOUNT_PATH`], and consumers mount that volume at
//! [`SHARED_VOLUME_PATH`].

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ExecAction, PodSpec, PodTemplate,
    PodTemplateSpec, Probe, ResourceRequirements, SecretKeySelector, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use ondemand_core::orchestrator::{RunTaskParams, literal};
use ondemand_core::task::{ContainerSpec, DependencyCondition, TaskSpec};
use ondemand_core::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGER: &str = "ondemand";
pub const FAMILY_LABEL: &str = "ondemand.io/family";
pub const JOB_LABEL: &str = "ondemand.io/job";
pub const TASK_ROLE_ANNOTATION: &str = "ondemand.io/task-role-arn";

/// Key holding the value inside a referenced secret.
pub const SECRET_KEY: &str = "value";

/// Finished Jobs are garbage collected after ten minutes.
pub const JOB_TTL_SECONDS: i32 = 600;

/// Where consumers of a `volumesFrom` source see its shared volume.
pub const SHARED_VOLUME_PATH: &str = "/buildkite";

/// Where the source container itself mounts the shared volume. Mounting it at
/// [`SHARED_VOLUME_PATH`] would hide the image content to be shared.
pub const SEED_MOUNT_PATH: &str = "/seed";

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 253;

/// Lowercase DNS-1123 name: `[a-z0-9-]`, no leading or trailing hyphen.
pub fn resource_name(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.truncate(max_len);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// `PodTemplate` name for a task family.
pub fn template_name(family: &str) -> String {
    resource_name(family, MAX_NAME_LEN)
}

/// Secret holding a parameter path, e.g. `/buildkite/agent-token` → `buildkite-agent-token`.
pub fn secret_name(parameter_path: &str) -> String {
    resource_name(parameter_path, MAX_NAME_LEN)
}

fn shared_volume(source_container: &str) -> String {
    resource_name(&format!("{}-volumes", source_container), MAX_LABEL_LEN)
}

/// Container cpu units (1024 per vCPU) as a millicore quantity.
fn cpu_quantity(units: u32) -> Quantity {
    Quantity(format!("{}m", u64::from(units) * 1000 / 1024))
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

fn container(spec: &ContainerSpec) -> Result<Container> {
    let image = literal("image", &spec.image)?;

    let mut env = Vec::new();
    for var in &spec.environment {
        env.push(EnvVar {
            name: var.name.clone(),
            value: Some(literal(&var.name, &var.value)?.to_string()),
            ..Default::default()
        });
    }
    for secret in &spec.secrets {
        let path = literal(&secret.name, &secret.value_from)?;
        env.push(EnvVar {
            name: secret.name.clone(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name(path),
                    key: SECRET_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let mut mounts: Vec<VolumeMount> = spec
        .mount_points
        .iter()
        .map(|m| VolumeMount {
            name: m.source_volume.clone(),
            mount_path: m.container_path.clone(),
            read_only: m.read_only.then_some(true),
            ..Default::default()
        })
        .collect();
    for from in &spec.volumes_from {
        mounts.push(VolumeMount {
            name: shared_volume(&from.source_container),
            mount_path: SHARED_VOLUME_PATH.to_string(),
            ..Default::default()
        });
    }

    let mut requests = BTreeMap::new();
    if let Some(cpu) = spec.cpu {
        requests.insert("cpu".to_string(), cpu_quantity(cpu));
    }
    if let Some(memory) = spec.memory_reservation {
        requests.insert("memory".to_string(), Quantity(format!("{}Mi", memory)));
    }

    Ok(Container {
        name: spec.name.clone(),
        image: Some(image.to_string()),
        command: non_empty(&spec.entry_point),
        args: non_empty(&spec.command),
        env: (!env.is_empty()).then_some(env),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        resources: (!requests.is_empty()).then(|| ResourceRequirements {
            requests: Some(requests),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn exec_probe(command: &[String]) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(command.to_vec()),
        }),
        period_seconds: Some(1),
        failure_threshold: Some(30),
        ..Default::default()
    }
}

/// Register form of a task specification.
pub fn pod_template(spec: &TaskSpec) -> Result<PodTemplate> {
    let family = literal("family", &spec.family)?;

    // first condition any container waits on, per dependency target
    let mut awaited: BTreeMap<&str, DependencyCondition> = BTreeMap::new();
    for dependency in spec.container_definitions.iter().flat_map(|c| &c.depends_on) {
        awaited
            .entry(dependency.container_name.as_str())
            .or_insert(dependency.condition);
    }

    let mut init_containers = Vec::new();
    let mut containers = Vec::new();
    let mut volumes: BTreeSet<String> = spec.volumes.clone();

    for c in &spec.container_definitions {
        volumes.extend(c.volumes_from.iter().map(|v| shared_volume(&v.source_container)));

        let mut built = container(c)?;
        match awaited.get(c.name.as_str()) {
            Some(DependencyCondition::Success | DependencyCondition::Complete) => {
                init_containers.push(built);
            }
            Some(DependencyCondition::Healthy | DependencyCondition::Start) => {
                built.restart_policy = Some("Always".to_string());
                built.startup_probe = c.health_check.as_ref().map(|h| exec_probe(&h.command));
                init_containers.push(built);
            }
            None => {
                built.readiness_probe = c.health_check.as_ref().map(|h| exec_probe(&h.command));
                containers.push(built);
            }
        }
    }

    // a source container's volume has to exist for both sides of volumesFrom
    for c in &spec.container_definitions {
        if spec.container_definitions.iter().any(|other| {
            other.volumes_from.iter().any(|v| v.source_container == c.name)
        }) {
            let name = shared_volume(&c.name);
            let target = init_containers
                .iter_mut()
                .chain(containers.iter_mut())
                .find(|k| k.name == c.name);
            if let Some(target) = target {
                target.volume_mounts.get_or_insert_with(Vec::new).push(VolumeMount {
                    name,
                    mount_path: SEED_MOUNT_PATH.to_string(),
                    ..Default::default()
                });
                target.command = Some(vec!["/bin/sh".to_string(), "-c".to_string()]);
                target.args = Some(vec![format!(
                    "cp -a {}/. {}/",
                    SHARED_VOLUME_PATH, SEED_MOUNT_PATH
                )]);
            }
        }
    }

    let family_label = resource_name(family, MAX_LABEL_LEN);
    let pod_labels = BTreeMap::from([(FAMILY_LABEL.to_string(), family_label.clone())]);
    let mut labels = pod_labels.clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER.to_string());

    let annotations = spec
        .task_role_arn
        .as_ref()
        .and_then(|arn| arn.as_literal())
        .map(|arn| BTreeMap::from([(TASK_ROLE_ANNOTATION.to_string(), arn.to_string())]));

    let pod_spec = PodSpec {
        containers,
        init_containers: (!init_containers.is_empty()).then_some(init_containers),
        volumes: (!volumes.is_empty()).then(|| {
            volumes
                .into_iter()
                .map(|name| Volume {
                    name,
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                })
                .collect()
        }),
        restart_policy: Some("Never".to_string()),
        ..Default::default()
    };

    Ok(PodTemplate {
        metadata: ObjectMeta {
            name: Some(template_name(family)),
            labels: Some(labels),
            annotations,
            ..Default::default()
        },
        template: Some(PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(pod_labels),
                ..Default::default()
            }),
            spec: Some(pod_spec),
        }),
    })
}

/// Job launching one task from a registered template with the launch overrides applied.
pub fn job(template: &PodTemplate, params: &RunTaskParams) -> Result<Job> {
    let mut pod = template
        .template
        .clone()
        .ok_or_else(|| Error::Orchestrator("pod template has no pod spec".to_string()))?;
    let spec = pod
        .spec
        .as_mut()
        .ok_or_else(|| Error::Orchestrator("pod template has no pod spec".to_string()))?;

    for o in &params.overrides.container_overrides {
        let target = spec
            .containers
            .iter_mut()
            .find(|c| c.name == o.name)
            .ok_or_else(|| Error::Validation(format!("no container '{}' to override", o.name)))?;
        if !o.command.is_empty() {
            target.args = Some(o.command.clone());
        }
        let env = target.env.get_or_insert_with(Vec::new);
        for var in &o.environment {
            env.retain(|e| e.name != var.name);
            env.push(EnvVar {
                name: var.name.clone(),
                value: Some(var.value.clone()),
                ..Default::default()
            });
        }
    }

    let name = match params.job_id() {
        Some(job_id) => resource_name(job_id, MAX_LABEL_LEN),
        None => format!(
            "{}-{}",
            resource_name(&params.task_definition, MAX_LABEL_LEN - 9),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ),
    };
    if name.is_empty() {
        return Err(Error::Validation("job identifier yields an empty name".to_string()));
    }

    let mut labels = pod
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    labels.insert(JOB_LABEL.to_string(), name.clone());
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER.to_string());

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: pod,
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ondemand_core::Expr;
    use ondemand_core::orchestrator::{
        ACQUIRE_JOB_ENV, AssignPublicIp, AwsVpcConfiguration, ContainerOverride, LaunchType,
        NetworkConfiguration, OverrideEnv, TaskOverride,
    };
    use ondemand_core::task::{
        Compatibility, ContainerDependency, HealthCheck, MountPoint, NetworkMode, Secret,
        VolumeFrom,
    };

    fn spec() -> TaskSpec {
        let mut agent = ContainerSpec::new("agent", "node:20");
        agent.entry_point = vec!["/buildkite/bin/buildkite-agent".to_string()];
        agent.command = vec!["start".to_string()];
        agent.cpu = Some(512);
        agent.memory_reservation = Some(1024);
        agent.set_env("SSH_AUTH_SOCK", "/ssh/socket");
        agent.secrets.push(Secret::new("BUILDKITE_AGENT_TOKEN", "/buildkite/agent-token"));
        agent.mount_points.push(MountPoint {
            source_volume: "ssh-agent".to_string(),
            container_path: "/ssh".to_string(),
            read_only: false,
        });
        agent.volumes_from.push(VolumeFrom {
            source_container: "agent-init".to_string(),
        });
        agent.depends_on = vec![
            ContainerDependency {
                container_name: "agent-init".to_string(),
                condition: DependencyCondition::Success,
            },
            ContainerDependency {
                container_name: "ssh-agent".to_string(),
                condition: DependencyCondition::Healthy,
            },
        ];

        let mut init = ContainerSpec::new("agent-init", "keithduncan/buildkite-sidecar");
        init.essential = false;

        let mut ssh = ContainerSpec::new("ssh-agent", "keithduncan/iam-ssh-agent");
        ssh.health_check = Some(HealthCheck {
            command: vec!["test".to_string(), "-S".to_string(), "/ssh/socket".to_string()],
        });

        TaskSpec {
            family: Expr::literal("ondemand-node-20-0a1b2c3d-202610"),
            cpu: Expr::literal("512"),
            memory: Expr::literal("1024"),
            network_mode: NetworkMode::Awsvpc,
            execution_role_arn: None,
            task_role_arn: Some(Expr::literal("arn:aws:iam::123456789012:role/ci")),
            container_definitions: vec![agent, init, ssh],
            volumes: BTreeSet::from(["ssh-agent".to_string()]),
            requires_compatibilities: BTreeSet::from([Compatibility::Fargate]),
        }
    }

    fn params(job_id: Option<&str>) -> RunTaskParams {
        RunTaskParams {
            cluster: "ci".to_string(),
            task_definition: "ondemand-node-20-0a1b2c3d-202610".to_string(),
            count: 1,
            launch_type: LaunchType::Fargate,
            network_configuration: NetworkConfiguration {
                awsvpc_configuration: AwsVpcConfiguration {
                    subnets: vec!["subnet-a".to_string()],
                    assign_public_ip: AssignPublicIp::Enabled,
                },
            },
            overrides: TaskOverride {
                container_overrides: vec![ContainerOverride {
                    name: "agent".to_string(),
                    command: vec!["start".to_string(), "--disconnect-after-job".to_string()],
                    environment: job_id
                        .map(|id| OverrideEnv {
                            name: ACQUIRE_JOB_ENV.to_string(),
                            value: id.to_string(),
                        })
                        .into_iter()
                        .collect(),
                }],
                task_role_arn: None,
            },
        }
    }

    #[test]
    fn test_resource_name() {
        assert_eq!(resource_name("Ondemand-Node_20", 63), "ondemand-node-20");
        assert_eq!(resource_name("/buildkite/agent-token", 253), "buildkite-agent-token");
        assert_eq!(resource_name(&"a-".repeat(40), 63).len(), 63);
        assert!(!resource_name("ab-cd", 3).ends_with('-'));
    }

    #[test]
    fn test_dependencies_become_init_containers() {
        let template = pod_template(&spec()).unwrap();
        let pod = template.template.unwrap().spec.unwrap();

        let main: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(main, vec!["agent"]);

        let init = pod.init_containers.unwrap();
        assert_eq!(init[0].name, "agent-init");
        assert!(init[0].restart_policy.is_none());
        assert_eq!(init[1].name, "ssh-agent");
        assert_eq!(init[1].restart_policy.as_deref(), Some("Always"));
        assert!(init[1].startup_probe.is_some());

        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let volumes: Vec<_> = pod.volumes.unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(volumes, vec!["agent-init-volumes", "ssh-agent"]);
    }

    #[test]
    fn test_container_mapping() {
        let template = pod_template(&spec()).unwrap();
        assert_eq!(
            template.metadata.name.as_deref(),
            Some("ondemand-node-20-0a1b2c3d-202610")
        );
        assert_eq!(
            template.metadata.annotations.unwrap()[TASK_ROLE_ANNOTATION],
            "arn:aws:iam::123456789012:role/ci"
        );

        let pod = template.template.unwrap().spec.unwrap();
        let agent = &pod.containers[0];
        assert_eq!(agent.command, Some(vec!["/buildkite/bin/buildkite-agent".to_string()]));
        assert_eq!(agent.args, Some(vec!["start".to_string()]));

        let requests = agent.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["cpu"], Quantity("500m".to_string()));
        assert_eq!(requests["memory"], Quantity("1024Mi".to_string()));

        let env = agent.env.as_ref().unwrap();
        let token = env.iter().find(|e| e.name == "BUILDKITE_AGENT_TOKEN").unwrap();
        let selector = token.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(selector.name, "buildkite-agent-token");
        assert_eq!(selector.key, SECRET_KEY);

        let mounts: Vec<_> = agent
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert_eq!(mounts, vec!["/ssh", SHARED_VOLUME_PATH]);

        let init = &pod.init_containers.unwrap()[0];
        assert_eq!(init.volume_mounts.as_ref().unwrap()[0].name, "agent-init-volumes");
    }

    #[test]
    fn test_seed_content_is_copied_into_shared_volume() {
        let template = pod_template(&spec()).unwrap();
        let pod = template.template.unwrap().spec.unwrap();

        let init = &pod.init_containers.unwrap()[0];
        assert_eq!(init.name, "agent-init");
        let mount = &init.volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, "agent-init-volumes");
        assert_eq!(mount.mount_path, SEED_MOUNT_PATH);
        assert_ne!(mount.mount_path, SHARED_VOLUME_PATH);
        assert_eq!(
            init.command,
            Some(vec!["/bin/sh".to_string(), "-c".to_string()])
        );
        assert_eq!(init.args, Some(vec!["cp -a /buildkite/. /seed/".to_string()]));

        let agent = &pod.containers[0];
        let shared = agent
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .find(|m| m.name == "agent-init-volumes")
            .unwrap();
        assert_eq!(shared.mount_path, SHARED_VOLUME_PATH);
    }

    #[test]
    fn test_template_expressions_are_rejected() {
        let mut spec = spec();
        spec.container_definitions[0].image = Expr::reference("Image");
        assert!(matches!(pod_template(&spec), Err(Error::Validation(_))));
    }

    #[test]
    fn test_job_applies_overrides() {
        let template = pod_template(&spec()).unwrap();
        let job = job(&template, &params(Some("0190ABCD-job"))).unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("0190abcd-job"));
        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels[JOB_LABEL], "0190abcd-job");
        assert_eq!(labels[FAMILY_LABEL], "ondemand-node-20-0a1b2c3d-202610");

        let spec = job.spec.unwrap();
        assert_eq!(spec.ttl_seconds_after_finished, Some(JOB_TTL_SECONDS));
        assert_eq!(spec.backoff_limit, Some(0));

        let agent = &spec.template.spec.unwrap().containers[0];
        assert_eq!(
            agent.args,
            Some(vec!["start".to_string(), "--disconnect-after-job".to_string()])
        );
        let acquire = agent
            .env
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.name == ACQUIRE_JOB_ENV)
            .unwrap();
        assert_eq!(acquire.value.as_deref(), Some("0190ABCD-job"));
    }

    #[test]
    fn test_job_without_identifier_gets_generated_name() {
        let template = pod_template(&spec()).unwrap();
        let job = job(&template, &params(None)).unwrap();
        let name = job.metadata.name.unwrap();
        assert!(name.starts_with("ondemand-node-20-"));
        assert!(name.len() <= MAX_LABEL_LEN);
    }

    #[test]
    fn test_override_for_unknown_container() {
        let template = pod_template(&spec()).unwrap();
        let mut params = params(Some("job"));
        params.overrides.container_overrides[0].name = "ghost".to_string();
        assert!(matches!(job(&template, &params), Err(Error::Validation(_))));
    }
}
