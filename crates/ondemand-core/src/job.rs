//! Job requests and agent query rule directives.
//!
//! A job carries a list of `key=value` agent query rules. Rules are looked up
//! by key in order and the first match wins; later rules with the same key are
//! ignored.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::id::JobId;

/// Directive keys understood by the scheduler.
pub mod keys {
    pub const QUEUE: &str = "queue";
    pub const IMAGE: &str = "image";
    pub const CPU: &str = "cpu";
    pub const MEMORY: &str = "memory";
    pub const TASK_ROLE: &str = "task-role";
    pub const TASK_DEFINITION: &str = "task-definition";
    pub const POD_DEFINITION: &str = "pod-definition";
    pub const SSH_AGENT_BACKEND: &str = "ssh-agent-backend";
}

/// A single `key=value` agent query rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentQueryRule(String);

impl AgentQueryRule {
    pub fn new(rule: impl Into<String>) -> Self {
        Self(rule.into())
    }

    /// Split at the first `=`. Rules without one have no value.
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0.split_once('=')
    }

    pub fn key(&self) -> &str {
        self.split().map(|(k, _)| k).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentQueryRule {
    fn from(rule: &str) -> Self {
        Self::new(rule)
    }
}

/// A CI job waiting for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireJob", into = "WireJob")]
pub struct JobRequest {
    /// Unique job identifier; the launched agent acquires exactly this job.
    pub identifier: JobId,
    pub query_rules: Vec<AgentQueryRule>,
}

impl JobRequest {
    pub fn new(identifier: impl Into<String>, rules: &[&str]) -> Self {
        Self {
            identifier: JobId::new(identifier),
            query_rules: rules.iter().map(|r| AgentQueryRule::from(*r)).collect(),
        }
    }

    pub fn directives(&self) -> Directives<'_> {
        Directives::new(&self.query_rules)
    }
}

/// Job shape as delivered by the CI service webhook.
#[derive(Serialize, Deserialize)]
struct WireJob {
    id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uuid: Option<JobId>,
    #[serde(default)]
    agent_query_rules: Vec<AgentQueryRule>,
}

impl From<WireJob> for JobRequest {
    fn from(job: WireJob) -> Self {
        Self {
            identifier: job.uuid.unwrap_or(job.id),
            query_rules: job.agent_query_rules,
        }
    }
}

impl From<JobRequest> for WireJob {
    fn from(job: JobRequest) -> Self {
        Self {
            id: job.identifier,
            uuid: None,
            agent_query_rules: job.query_rules,
        }
    }
}

/// Return the value of the first rule whose key equals `key`.
pub fn lookup<'a>(key: &str, rules: &'a [AgentQueryRule]) -> Option<&'a str> {
    rules
        .iter()
        .filter_map(AgentQueryRule::split)
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Typed view over a job's query rules.
#[derive(Debug, Clone, Copy)]
pub struct Directives<'a> {
    rules: &'a [AgentQueryRule],
}

impl<'a> Directives<'a> {
    pub fn new(rules: &'a [AgentQueryRule]) -> Self {
        Self { rules }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        lookup(key, self.rules)
    }

    pub fn queue(&self) -> Option<&'a str> {
        self.get(keys::QUEUE)
    }

    pub fn image(&self) -> Option<&'a str> {
        self.get(keys::IMAGE)
    }

    pub fn cpu(&self) -> Option<u32> {
        self.positive(keys::CPU)
    }

    pub fn memory(&self) -> Option<u32> {
        self.positive(keys::MEMORY)
    }

    pub fn task_role(&self) -> Option<&'a str> {
        self.get(keys::TASK_ROLE)
    }

    /// Named base layout. `pod-definition` is accepted as an alias.
    pub fn task_definition(&self) -> Option<&'a str> {
        self.get(keys::TASK_DEFINITION)
            .or_else(|| self.get(keys::POD_DEFINITION))
    }

    pub fn ssh_agent_backend(&self) -> Option<&'a str> {
        self.get(keys::SSH_AGENT_BACKEND)
    }

    /// Positive integer directive; anything else is treated as absent.
    fn positive(&self, key: &str) -> Option<u32> {
        let raw = self.get(key)?;
        match raw.trim().parse::<u32>() {
            Ok(0) => None,
            Ok(n) => Some(n),
            Err(e) => {
                warn!(directive = key, value = raw, error = %e, "Ignoring unparseable directive");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(raw: &[&str]) -> Vec<AgentQueryRule> {
        raw.iter().map(|r| AgentQueryRule::from(*r)).collect()
    }

    #[test]
    fn test_first_match_wins() {
        let rules = rules(&["queue=default", "image=alpine", "image=ubuntu"]);
        assert_eq!(lookup("image", &rules), Some("alpine"));
        assert_eq!(lookup("queue", &rules), Some("default"));
    }

    #[test]
    fn test_missing_key_is_absent() {
        let rules = rules(&["queue=default"]);
        assert_eq!(lookup("image", &rules), None);
    }

    #[test]
    fn test_key_must_match_exactly() {
        let rules = rules(&["images=alpine", "image"]);
        assert_eq!(lookup("image", &rules), None);
    }

    #[test]
    fn test_value_keeps_later_equals_signs() {
        let rules = rules(&["image=registry/app@sha256:abc=="]);
        assert_eq!(lookup("image", &rules), Some("registry/app@sha256:abc=="));
    }

    #[test]
    fn test_numeric_directives() {
        let parsed = rules(&["cpu=1024", "memory=zero"]);
        let directives = Directives::new(&parsed);
        assert_eq!(directives.cpu(), Some(1024));
        assert_eq!(directives.memory(), None);

        let zero = rules(&["cpu=0"]);
        assert_eq!(Directives::new(&zero).cpu(), None);
    }

    #[test]
    fn test_job_prefers_uuid() {
        let job: JobRequest = serde_json::from_str(
            r#"{"id": "123", "uuid": "0190-abcd", "agent_query_rules": ["queue=ondemand"]}"#,
        )
        .unwrap();
        assert_eq!(job.identifier.as_str(), "0190-abcd");
        assert_eq!(job.directives().queue(), Some("ondemand"));

        let job: JobRequest = serde_json::from_str(r#"{"id": "123"}"#).unwrap();
        assert_eq!(job.identifier.as_str(), "123");
        assert!(job.query_rules.is_empty());
    }
}
