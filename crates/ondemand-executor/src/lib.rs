//! Orchestrator backends for ondemand.
//!
//! Provides orchestrator implementations for launching agent tasks:
//! - Kubernetes (task specifications registered as `PodTemplate`s, tasks
//!   launched as `batch/v1` Jobs)

pub mod kubernetes;
pub mod manifest;

pub use kubernetes::KubernetesOrchestrator;
pub use ondemand_core::orchestrator::{Orchestrator, RunTaskParams, TaskSubmission};
