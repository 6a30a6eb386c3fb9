//! Task specification builder.
//!
//! Compiles a job (or a template resource) plus a base [`Layout`] into a
//! [`CompiledTask`]: the task specification with its sidecars, secrets,
//! start-order dependencies and log configuration, the execution role scoped
//! to the referenced secrets, and the task role binding.
//!
//! The builder is a pure function of its inputs. All values flow through
//! [`Expr`], so the same code produces literal specifications at run time and
//! template fragments at deployment time.

use chrono::{DateTime, Utc};
use ondemand_config::{Layout, SchedulerConfig};
use ondemand_core::policy::{
    AccessPolicy, CompiledTask, NamedPolicy, RoleSpec, Statement, TaskRoleBinding,
};
use ondemand_core::quantum::{DEFAULT_CPU, DEFAULT_MEMORY};
use ondemand_core::task::{
    AGENT_CONTAINER, Compatibility, ContainerDependency, ContainerSpec, DependencyCondition,
    EnvVar, HealthCheck, LogConfiguration, MountPoint, NetworkMode, Secret, TaskSpec,
    VolumeFrom,
};
use ondemand_core::{Error, Expr, JobId, JobRequest, Result, quantize};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::family;

pub const AGENT_INIT_CONTAINER: &str = "agent-init";
pub const SSH_AGENT_CONTAINER: &str = "ssh-agent";
pub const SSH_AGENT_VOLUME: &str = "ssh-agent";

const SSH_MOUNT_PATH: &str = "/ssh";
const SSH_SOCKET: &str = "/ssh/socket";
const SEEDED_AGENT_BINARY: &str = "/buildkite/bin/buildkite-agent";

pub const EXECUTION_ROLE_PATH: &str = "/BuildkiteTaskExecutionRole/";
pub const TASK_ROLE_PATH: &str = "/BuildkiteAgentTask/";
pub const EXECUTION_ROLE_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy";
pub const FETCH_SECRETS_POLICY: &str = "FetchDecryptSecrets";
pub const SSH_AGENT_POLICY: &str = "SshAgentApi";

pub const LOG_DRIVER: &str = "awslogs";
pub const LOG_STREAM_PREFIX: &str = "ecs";

/// Environment variables the builder sets.
pub mod env {
    pub const ACQUIRE_JOB: &str = ondemand_core::orchestrator::ACQUIRE_JOB_ENV;
    pub const AGENT_TOKEN: &str = "BUILDKITE_AGENT_TOKEN";
    pub const ABOUT_PLATFORM: &str = "BUILDKITE_ABOUT_PLATFORM";
    pub const BUILD_PATH: &str = "BUILDKITE_BUILD_PATH";
    pub const HOOKS_PATH: &str = "BUILDKITE_HOOKS_PATH";
    pub const PLUGINS_PATH: &str = "BUILDKITE_PLUGINS_PATH";
    pub const SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";
    pub const SSH_BACKEND_URL: &str = "IAM_SSH_AGENT_BACKEND_URL";
}

/// Ambient inputs that do not vary per job.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub region: Expr,
    /// Account used in generated ARNs; `*` when unknown.
    pub account_id: Option<Expr>,
    pub agent_token_path: Expr,
    pub execution_role: Option<Expr>,
    /// Joined with a `task-role` directive as `<prefix>/<role>`.
    pub task_role_prefix: Option<String>,
    /// How the task specification refers to a synthesized task role.
    pub synthesized_task_role: Option<Expr>,
    pub ssh_agent_image: Expr,
    pub create_log_group: bool,
}

impl BuilderConfig {
    /// Literal configuration for building tasks at run time.
    pub fn runtime(config: &SchedulerConfig) -> Self {
        Self {
            region: Expr::literal(&config.region),
            account_id: config.account_id.as_deref().map(Expr::literal),
            agent_token_path: Expr::literal(&config.agent_token_path),
            execution_role: config.execution_role_arn.as_deref().map(Expr::literal),
            task_role_prefix: config.task_role_arn_prefix.clone(),
            synthesized_task_role: config.default_task_role_arn.as_deref().map(Expr::literal),
            ssh_agent_image: Expr::literal(&config.ssh_agent_image),
            create_log_group: true,
        }
    }
}

/// How the caller asks for cpu and memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Resources {
    /// Rounded onto the supported lattice; absent values use the defaults.
    Quantize { cpu: Option<u32>, memory: Option<u32> },
    /// Used as given.
    Verbatim { cpu: Expr, memory: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoleRequest {
    /// Role name joined with the configured prefix.
    Named(String),
    Arn(Expr),
}

/// Everything job specific the builder needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub job_id: Option<JobId>,
    pub image: Option<Expr>,
    /// Image seeding the agent binary into a custom image. Ignored without `image`.
    pub seed_image: Option<Expr>,
    pub resources: Resources,
    pub task_role: Option<RoleRequest>,
    pub ssh_agent_backend: Option<Expr>,
    pub secrets: Vec<Secret>,
    pub environment: Vec<EnvVar>,
    pub family: Option<Expr>,
}

impl TaskRequest {
    /// Request from a job's directives. A custom image always gets the agent seeded.
    pub fn from_job(job: &JobRequest, seed_image: &str) -> Self {
        let directives = job.directives();
        let image = directives.image().map(Expr::literal);
        Self {
            job_id: Some(job.identifier.clone()),
            seed_image: image.as_ref().map(|_| Expr::literal(seed_image)),
            image,
            resources: Resources::Quantize {
                cpu: directives.cpu(),
                memory: directives.memory(),
            },
            task_role: directives.task_role().map(|r| RoleRequest::Named(r.to_string())),
            ssh_agent_backend: directives.ssh_agent_backend().map(Expr::literal),
            secrets: Vec::new(),
            environment: Vec::new(),
            family: None,
        }
    }
}

/// Inputs hashed into the family name. Excludes anything job specific.
#[derive(Serialize)]
struct Fingerprint<'a> {
    layout: &'a str,
    cpu: &'a Expr,
    memory: &'a Expr,
    task_role: Option<&'a Expr>,
    volumes: &'a BTreeSet<String>,
    containers: &'a [ContainerSpec],
}

pub struct TaskBuilder {
    config: BuilderConfig,
}

impl TaskBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Compile a request against a base layout.
    ///
    /// `now` only selects the family's time bucket.
    pub fn build(
        &self,
        request: &TaskRequest,
        layout: &Layout,
        now: DateTime<Utc>,
    ) -> Result<CompiledTask> {
        if layout.agent().is_none() {
            return Err(Error::Validation(format!(
                "layout '{}' has no '{}' container",
                layout.name, AGENT_CONTAINER
            )));
        }

        let mut containers = layout.containers.clone();
        let mut volumes = layout.volumes.clone();
        let mut sidecars = Vec::new();
        let agent = agent_mut(&mut containers)?;

        if let Some(image) = &request.image {
            agent.image = image.clone();
            if let Some(seed) = &request.seed_image {
                sidecars.push(seed_agent(agent, seed.clone()));
            }
        }

        let (cpu, memory) = match &request.resources {
            Resources::Quantize { cpu, memory } => {
                let wanted = (cpu.unwrap_or(DEFAULT_CPU), memory.unwrap_or(DEFAULT_MEMORY));
                let quantum = quantize(wanted.0, wanted.1);
                if (quantum.cpu, quantum.memory) != wanted {
                    debug!(cpu = wanted.0, memory = wanted.1, quantum = %quantum, "Rounded resource request");
                }
                agent.set_resources(quantum);
                (
                    Expr::literal(quantum.cpu.to_string()),
                    Expr::literal(quantum.memory.to_string()),
                )
            }
            Resources::Verbatim { cpu, memory } => (cpu.clone(), memory.clone()),
        };

        let token = Secret::new(env::AGENT_TOKEN, self.config.agent_token_path.clone());
        agent.secrets.insert(0, token);
        agent.secrets.extend(request.secrets.iter().cloned());
        for var in &request.environment {
            agent.set_env(&var.name, var.value.clone());
        }

        if let Some(backend) = &request.ssh_agent_backend {
            let url = ssh_backend_url(backend)?;
            sidecars.push(self.attach_ssh_agent(agent, url));
            volumes.insert(SSH_AGENT_VOLUME.to_string());
        }

        containers.extend(sidecars);

        let task_role = self.task_role(request, layout)?;
        let task_role_arn = match &task_role {
            TaskRoleBinding::Provided(arn) => Some(arn.clone()),
            TaskRoleBinding::Synthesized(_) => self.config.synthesized_task_role.clone(),
        };

        let family = match &request.family {
            Some(family) => family.clone(),
            None => {
                let digest = family::content_digest(&Fingerprint {
                    layout: &layout.name,
                    cpu: &cpu,
                    memory: &memory,
                    task_role: task_role_arn.as_ref(),
                    volumes: &volumes,
                    containers: &containers,
                })?;
                let image = agent_mut(&mut containers)?.image.clone();
                Expr::literal(family::family_name(&image, &digest, now))
            }
        };

        let agent = agent_mut(&mut containers)?;
        let about = Expr::sub(
            "ECS Task\nTask Family: ${TaskFamily}\nImage: ${Image}\nRole: ${TaskRole}",
            &[
                ("TaskFamily", &family),
                ("Image", &agent.image.clone()),
                ("TaskRole", &task_role_arn.clone().unwrap_or_else(|| Expr::literal("none"))),
            ],
        );
        agent.set_env(env::ABOUT_PLATFORM, about);
        if let Some(job_id) = &request.job_id {
            agent.set_env(env::ACQUIRE_JOB, job_id.as_str());
        }

        let logging = self.log_configuration(&family);
        for container in &mut containers {
            container.log_configuration = Some(logging.clone());
        }

        let spec = TaskSpec {
            family,
            cpu,
            memory,
            network_mode: NetworkMode::Awsvpc,
            execution_role_arn: self.config.execution_role.clone(),
            task_role_arn,
            container_definitions: containers,
            volumes,
            requires_compatibilities: BTreeSet::from([Compatibility::Fargate]),
        };
        spec.validate()?;

        info!(
            family = %spec.family,
            cpu = %spec.cpu,
            memory = %spec.memory,
            containers = spec.container_definitions.len(),
            "Built task specification"
        );

        Ok(CompiledTask {
            execution_role: self.execution_role(&spec),
            spec,
            task_role,
        })
    }

    fn attach_ssh_agent(&self, agent: &mut ContainerSpec, backend_url: Expr) -> ContainerSpec {
        let mut sidecar = ContainerSpec::new(SSH_AGENT_CONTAINER, self.config.ssh_agent_image.clone());
        sidecar.command = vec![
            "iam-ssh-agent".to_string(),
            "daemon".to_string(),
            format!("--bind-to={}", SSH_SOCKET),
        ];
        sidecar.set_env(env::SSH_BACKEND_URL, backend_url);
        sidecar.health_check = Some(HealthCheck {
            command: vec!["test".to_string(), "-S".to_string(), SSH_SOCKET.to_string()],
        });
        sidecar.mount_points.push(ssh_mount());

        agent.set_env(env::SSH_AUTH_SOCK, SSH_SOCKET);
        agent.mount_points.push(ssh_mount());
        agent.depends_on.push(ContainerDependency {
            container_name: SSH_AGENT_CONTAINER.to_string(),
            condition: DependencyCondition::Healthy,
        });

        sidecar
    }

    fn task_role(&self, request: &TaskRequest, layout: &Layout) -> Result<TaskRoleBinding> {
        match &request.task_role {
            Some(RoleRequest::Named(name)) => {
                let prefix = self.config.task_role_prefix.as_deref().ok_or_else(|| {
                    Error::Configuration(format!(
                        "task role '{}' requested but no task role ARN prefix is configured",
                        name
                    ))
                })?;
                let arn = format!("{}/{}", prefix.trim_end_matches('/'), name);
                Ok(TaskRoleBinding::Provided(Expr::literal(arn)))
            }
            Some(RoleRequest::Arn(arn)) => Ok(TaskRoleBinding::Provided(arn.clone())),
            None => match &layout.task_role_arn {
                Some(arn) => Ok(TaskRoleBinding::Provided(Expr::literal(arn))),
                None => Ok(TaskRoleBinding::Synthesized(synthesized_task_role(
                    request.ssh_agent_backend.as_ref(),
                ))),
            },
        }
    }

    fn log_configuration(&self, family: &Expr) -> LogConfiguration {
        let mut options = BTreeMap::new();
        options.insert("awslogs-region".to_string(), self.config.region.clone());
        options.insert(
            "awslogs-group".to_string(),
            Expr::sub("/aws/ecs/${TaskFamily}", &[("TaskFamily", family)]),
        );
        options.insert("awslogs-stream-prefix".to_string(), Expr::literal(LOG_STREAM_PREFIX));
        if self.config.create_log_group {
            options.insert("awslogs-create-group".to_string(), Expr::literal("true"));
        }
        LogConfiguration {
            log_driver: LOG_DRIVER.to_string(),
            options,
        }
    }

    /// Execution role allowed to read exactly the secrets the task references.
    fn execution_role(&self, spec: &TaskSpec) -> RoleSpec {
        let account = self
            .config
            .account_id
            .clone()
            .unwrap_or_else(|| Expr::literal("*"));
        let region = &self.config.region;

        let mut parameters: Vec<Expr> = Vec::new();
        for secret in spec.container_definitions.iter().flat_map(|c| &c.secrets) {
            let arn = parameter_arn(&secret.value_from, region, &account);
            if !parameters.contains(&arn) {
                parameters.push(arn);
            }
        }

        let kms_key = Expr::sub(
            "arn:aws:kms:${Region}:${AccountId}:key/aws/ssm",
            &[("Region", region), ("AccountId", &account)],
        );

        let mut role = RoleSpec::for_tasks(EXECUTION_ROLE_PATH);
        role.managed_policy_arns = vec![EXECUTION_ROLE_POLICY_ARN.to_string()];
        role.policies.push(NamedPolicy {
            policy_name: FETCH_SECRETS_POLICY.to_string(),
            policy_document: AccessPolicy::new(vec![
                Statement::allow(&["ssm:GetParameter", "ssm:GetParameters"], parameters),
                Statement::allow(&["kms:Decrypt"], vec![kms_key]),
            ]),
        });
        role
    }
}

fn agent_mut(containers: &mut [ContainerSpec]) -> Result<&mut ContainerSpec> {
    containers
        .iter_mut()
        .find(|c| c.name == AGENT_CONTAINER)
        .ok_or_else(|| Error::Validation(format!("no '{}' container", AGENT_CONTAINER)))
}

/// Point the agent at a seeded binary and return the seeding container.
fn seed_agent(agent: &mut ContainerSpec, seed_image: Expr) -> ContainerSpec {
    agent.entry_point = vec![SEEDED_AGENT_BINARY.to_string()];
    agent.set_env(env::BUILD_PATH, "/buildkite/builds");
    agent.set_env(env::HOOKS_PATH, "/buildkite/hooks");
    agent.set_env(env::PLUGINS_PATH, "/buildkite/plugins");
    agent.volumes_from.push(VolumeFrom {
        source_container: AGENT_INIT_CONTAINER.to_string(),
    });
    agent.depends_on.push(ContainerDependency {
        container_name: AGENT_INIT_CONTAINER.to_string(),
        condition: DependencyCondition::Success,
    });

    let mut init = ContainerSpec::new(AGENT_INIT_CONTAINER, seed_image);
    init.essential = false;
    init.entry_point = vec!["/bin/sh".to_string(), "-c".to_string()];
    init.command = vec!["echo container=agent-init at=initialised".to_string()];
    init
}

fn ssh_mount() -> MountPoint {
    MountPoint {
        source_volume: SSH_AGENT_VOLUME.to_string(),
        container_path: SSH_MOUNT_PATH.to_string(),
        read_only: false,
    }
}

/// Task role trusting the task service, allowed to call the ssh-agent backend if any.
pub fn synthesized_task_role(ssh_agent_backend: Option<&Expr>) -> RoleSpec {
    let mut role = RoleSpec::for_tasks(TASK_ROLE_PATH);
    if let Some(backend) = ssh_agent_backend.filter(|b| is_api_arn(b)) {
        let resource = Expr::sub("${SshAgentBackend}/*/*", &[("SshAgentBackend", backend)]);
        role.policies.push(NamedPolicy {
            policy_name: SSH_AGENT_POLICY.to_string(),
            policy_document: AccessPolicy::new(vec![Statement::allow(
                &["execute-api:Invoke"],
                vec![resource],
            )]),
        });
    }
    role
}

/// Parameter store ARN for a secret source. Sources that already are ARNs pass through.
fn parameter_arn(value_from: &Expr, region: &Expr, account: &Expr) -> Expr {
    if value_from.as_literal().is_some_and(|v| v.starts_with("arn:")) {
        return value_from.clone();
    }
    Expr::sub(
        "arn:aws:ssm:${Region}:${AccountId}:parameter${ValueFrom}",
        &[("Region", region), ("AccountId", account), ("ValueFrom", value_from)],
    )
}

/// Whether a backend is given as an ARN rather than a plain URL. Template
/// values are assumed to resolve to an ARN.
fn is_api_arn(backend: &Expr) -> bool {
    backend.as_literal().is_none_or(|b| b.starts_with("arn:"))
}

/// Invoke URL of an `execute-api` backend ARN,
/// `arn:aws:execute-api:<region>:<account>:<api-id>/<stage>`. Literal
/// backends that are not ARNs are taken to be the URL already.
pub fn ssh_backend_url(backend: &Expr) -> Result<Expr> {
    const TEMPLATE: &str = "https://${ApiId}.execute-api.${Region}.amazonaws.com/${Stage}";

    match backend {
        Expr::Literal(url) if !url.starts_with("arn:") => Ok(backend.clone()),
        Expr::Literal(arn) => {
            let invalid =
                || Error::Validation(format!("ssh agent backend is not an API ARN: '{}'", arn));
            let (head, path) = arn.split_once('/').ok_or_else(invalid)?;
            let fields: Vec<&str> = head.split(':').collect();
            let stage = path.split('/').next().filter(|s| !s.is_empty());
            match (fields.as_slice(), stage) {
                (["arn", _, "execute-api", region, _, api_id], Some(stage))
                    if !region.is_empty() && !api_id.is_empty() =>
                {
                    let (api_id, region, stage) =
                        (Expr::literal(*api_id), Expr::literal(*region), Expr::literal(stage));
                    Ok(Expr::sub(
                        TEMPLATE,
                        &[("ApiId", &api_id), ("Region", &region), ("Stage", &stage)],
                    ))
                }
                _ => Err(invalid()),
            }
        }
        Expr::Template(_) => {
            let head = Expr::select(0, Expr::split("/", backend.clone()));
            let field = |index| Expr::select(index, Expr::split(":", head.clone()));
            let stage = Expr::select(1, Expr::split("/", backend.clone()));
            Ok(Expr::sub(
                TEMPLATE,
                &[("ApiId", &field(5)), ("Region", &field(3)), ("Stage", &stage)],
            ))
        }
    }
}
