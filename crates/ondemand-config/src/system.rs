//! Scheduler configuration.
//!
//! Loaded either from environment-style lookups (the deployed service) or from
//! a KDL file (local runs and the CLI). Both produce the same
//! [`SchedulerConfig`]; nothing reads the environment after construction.

use crate::nodes::{get_all_string_args, get_first_int_arg, get_first_string_arg};
use crate::{ConfigError, ConfigResult};
use kdl::KdlDocument;
use serde::{Deserialize, Serialize};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_AGENT_TOKEN_PATH: &str = "/buildkite/agent-token";
pub const DEFAULT_SEED_IMAGE: &str = "keithduncan/buildkite-sidecar";
pub const DEFAULT_SSH_AGENT_IMAGE: &str = "keithduncan/iam-ssh-agent";
pub const DEFAULT_MAX_DELIVERIES: u32 = 3;

/// Environment variable names read by [`SchedulerConfig::from_lookup`].
pub mod env {
    pub const CLUSTER: &str = "ECS_CLUSTER_NAME";
    pub const SUBNETS: &str = "VPC_SUBNETS";
    pub const EXECUTION_ROLE_ARN: &str = "DEFAULT_EXECUTION_ROLE_ARN";
    pub const TASK_ROLE_ARN_PREFIX: &str = "TASK_ROLE_ARN_PREFIX";
    pub const DEFAULT_TASK_ROLE_ARN: &str = "DEFAULT_TASK_ROLE_ARN";
    pub const REGION: &str = "AWS_REGION";
    pub const ACCOUNT_ID: &str = "AWS_ACCOUNT_ID";
    pub const QUEUE: &str = "BUILDKITE_QUEUE";
    pub const AGENT_TOKEN_PATH: &str = "BUILDKITE_AGENT_TOKEN_PATH";
    pub const WEBHOOK_TOKEN: &str = "BUILDKITE_WEBHOOK_TOKEN";
    pub const SEED_IMAGE: &str = "AGENT_SEED_IMAGE";
    pub const SSH_AGENT_IMAGE: &str = "SSH_AGENT_IMAGE";
    pub const TEMPLATE_LIBRARY: &str = "TEMPLATE_LIBRARY";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cluster tasks are launched into unless a message names one.
    pub cluster: Option<String>,
    /// Subnets for awsvpc networking. Required to launch tasks.
    pub subnets: Vec<String>,
    pub region: String,
    pub account_id: Option<String>,
    pub execution_role_arn: Option<String>,
    /// Prefix joined with the `task-role` directive, e.g. `arn:aws:iam::123:role`.
    pub task_role_arn_prefix: Option<String>,
    pub default_task_role_arn: Option<String>,
    /// Jobs targeting any other queue are ignored.
    pub queue: Option<String>,
    pub agent_token_path: String,
    pub webhook_token: Option<String>,
    pub seed_image: String,
    pub ssh_agent_image: String,
    /// Directory path or http(s) base URL of named layouts.
    pub template_library: Option<String>,
    pub max_deliveries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cluster: None,
            subnets: Vec::new(),
            region: DEFAULT_REGION.to_string(),
            account_id: None,
            execution_role_arn: None,
            task_role_arn_prefix: None,
            default_task_role_arn: None,
            queue: None,
            agent_token_path: DEFAULT_AGENT_TOKEN_PATH.to_string(),
            webhook_token: None,
            seed_image: DEFAULT_SEED_IMAGE.to_string(),
            ssh_agent_image: DEFAULT_SSH_AGENT_IMAGE.to_string(),
            template_library: None,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }
}

impl SchedulerConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from a key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            cluster: get(env::CLUSTER),
            subnets: get(env::SUBNETS)
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            region: get(env::REGION).unwrap_or(defaults.region),
            account_id: get(env::ACCOUNT_ID),
            execution_role_arn: get(env::EXECUTION_ROLE_ARN),
            task_role_arn_prefix: get(env::TASK_ROLE_ARN_PREFIX),
            default_task_role_arn: get(env::DEFAULT_TASK_ROLE_ARN),
            queue: get(env::QUEUE),
            agent_token_path: get(env::AGENT_TOKEN_PATH).unwrap_or(defaults.agent_token_path),
            webhook_token: get(env::WEBHOOK_TOKEN),
            seed_image: get(env::SEED_IMAGE).unwrap_or(defaults.seed_image),
            ssh_agent_image: get(env::SSH_AGENT_IMAGE).unwrap_or(defaults.ssh_agent_image),
            template_library: get(env::TEMPLATE_LIBRARY),
            max_deliveries: defaults.max_deliveries,
        }
    }

    /// Subnets, or a configuration error when none are set.
    pub fn require_subnets(&self) -> ConfigResult<&[String]> {
        if self.subnets.is_empty() {
            return Err(ConfigError::MissingField(env::SUBNETS.to_string()));
        }
        Ok(&self.subnets)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse scheduler configuration from KDL text.
///
/// ```kdl
/// cluster "ci"
/// subnets "subnet-a" "subnet-b"
/// region "eu-west-1"
/// queue "ondemand"
/// max-deliveries 5
/// ```
pub fn parse_scheduler_config(kdl: &str) -> ConfigResult<SchedulerConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SchedulerConfig::default();

    for node in doc.nodes() {
        let key = node.name().value();
        let string = || {
            get_first_string_arg(node).ok_or_else(|| ConfigError::InvalidValue {
                field: key.to_string(),
                message: "expected a string argument".to_string(),
            })
        };

        match key {
            "cluster" => config.cluster = Some(string()?),
            "subnets" => config.subnets = get_all_string_args(node),
            "region" => config.region = string()?,
            "account-id" => config.account_id = Some(string()?),
            "execution-role" => config.execution_role_arn = Some(string()?),
            "task-role-prefix" => config.task_role_arn_prefix = Some(string()?),
            "default-task-role" => config.default_task_role_arn = Some(string()?),
            "queue" => config.queue = Some(string()?),
            "agent-token-path" => config.agent_token_path = string()?,
            "webhook-token" => config.webhook_token = Some(string()?),
            "seed-image" => config.seed_image = string()?,
            "ssh-agent-image" => config.ssh_agent_image = string()?,
            "template-library" => config.template_library = Some(string()?),
            "max-deliveries" => {
                let value = get_first_int_arg(node)
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: key.to_string(),
                        message: "expected a positive integer".to_string(),
                    })?;
                config.max_deliveries = value;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}
