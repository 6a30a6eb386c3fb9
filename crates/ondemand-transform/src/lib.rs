//! Infrastructure template expansion.
//!
//! Expands placeholder agent resources in a template fragment into a task
//! definition, its log group and the roles it needs, using the same task
//! builder the scheduler runs per job.
//!
//! Supported placeholder types:
//! - `Buildkite::ECS::Agent`
//! - `Buildkite::ECS::TaskDefinition`

pub mod error;
pub mod expand;
pub mod properties;
pub mod render;
pub mod request;

pub use error::{ExpansionError, ExpansionResult};
pub use expand::Expander;
pub use properties::AgentProperties;
pub use request::{ExpansionRequest, ExpansionResponse, ExpansionStatus};
