//! Task compilation and submission for ondemand.
//!
//! Turns job requests into task specifications, registers them under
//! content-addressed families and launches them with bounded retry. Also
//! hosts the job queue, the worker feeding it to the batch handler, and the
//! queue filter applied to incoming webhooks.

pub mod batch;
pub mod builder;
pub mod dispatch;
pub mod family;
pub mod launch;
pub mod queue;
pub mod retry;
pub mod schedule;
pub mod submitter;
pub mod worker;

#[cfg(test)]
mod testing;

pub use batch::{BatchHandler, BatchResponse};
pub use builder::{BuilderConfig, Resources, RoleRequest, TaskBuilder, TaskRequest};
pub use dispatch::Dispatcher;
pub use launch::LaunchPlan;
pub use queue::{ChannelQueue, Delivery, JobMessage, JobQueue};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use schedule::{ScheduleOutcome, schedule_job};
pub use submitter::Submitter;
pub use worker::Worker;
