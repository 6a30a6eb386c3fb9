//! IAM-style access policies and roles synthesized for a task.
//!
//! Policy documents serialize in the IAM JSON grammar (`Version`, `Statement`,
//! `Effect`, `Action`, `Resource`), which is the same at run time and inside
//! infrastructure templates.

use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::task::TaskSpec;

pub const POLICY_VERSION: &str = "2012-10-17";

/// Service principal that runs container tasks.
pub const TASK_SERVICE_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: Effect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<Expr>,
}

impl Statement {
    pub fn allow(actions: &[&str], resources: Vec<Expr>) -> Self {
        Self {
            effect: Effect::Allow,
            principal: None,
            action: actions.iter().map(|a| a.to_string()).collect(),
            resource: resources,
        }
    }

    /// `sts:AssumeRole` for a service principal.
    pub fn assume_role(service: &str) -> Self {
        Self {
            effect: Effect::Allow,
            principal: Some(Principal {
                service: vec![service.to_string()],
            }),
            action: vec!["sts:AssumeRole".to_string()],
            resource: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessPolicy {
    pub version: String,
    pub statement: Vec<Statement>,
}

impl AccessPolicy {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: statements,
        }
    }

    /// All resources granted by `action`.
    pub fn resources_for(&self, action: &str) -> Vec<&Expr> {
        self.statement
            .iter()
            .filter(|s| s.effect == Effect::Allow && s.action.iter().any(|a| a == action))
            .flat_map(|s| s.resource.iter())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NamedPolicy {
    pub policy_name: String,
    pub policy_document: AccessPolicy,
}

/// A role to be created alongside the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleSpec {
    pub path: String,
    pub assume_role_policy_document: AccessPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<String>,
    #[serde(default)]
    pub policies: Vec<NamedPolicy>,
}

impl RoleSpec {
    /// A role assumable by container tasks, with no permissions yet.
    pub fn for_tasks(path: &str) -> Self {
        Self {
            path: path.to_string(),
            assume_role_policy_document: AccessPolicy::new(vec![Statement::assume_role(
                TASK_SERVICE_PRINCIPAL,
            )]),
            managed_policy_arns: Vec::new(),
            policies: Vec::new(),
        }
    }

    pub fn policy(&self, name: &str) -> Option<&AccessPolicy> {
        self.policies
            .iter()
            .find(|p| p.policy_name == name)
            .map(|p| &p.policy_document)
    }
}

/// How the task's own role is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRoleBinding {
    /// An existing role, referenced by ARN.
    Provided(Expr),
    /// A role that has to be created for this task.
    Synthesized(RoleSpec),
}

/// Output of compiling a job or template resource into a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledTask {
    pub spec: TaskSpec,
    /// Role the orchestrator uses to pull images and fetch secrets.
    pub execution_role: RoleSpec,
    pub task_role: TaskRoleBinding,
}
