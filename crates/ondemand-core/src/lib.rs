//! Core domain types and traits for on-demand CI agent scheduling.
//!
//! This crate contains:
//! - Job requests and agent query rule directives
//! - Resource quantization onto supported cpu/memory pairs
//! - Task specifications, policies and roles
//! - Template expressions shared by run-time and deployment-time builds
//! - Orchestrator and template library traits

pub mod error;
pub mod expr;
pub mod id;
pub mod job;
pub mod orchestrator;
pub mod policy;
pub mod quantum;
pub mod task;
pub mod template;

pub use error::{Error, Result};
pub use expr::Expr;
pub use id::{JobId, MessageId};
pub use job::{AgentQueryRule, Directives, JobRequest};
pub use quantum::{ResourceQuantum, quantize};
