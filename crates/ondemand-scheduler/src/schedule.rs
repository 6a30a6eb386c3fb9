//! Queue filtering for incoming jobs.

use ondemand_core::{JobRequest, MessageId, Result};
use tracing::{debug, info};

use crate::queue::{JobMessage, JobQueue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled(MessageId),
    Ignored { reason: String },
}

/// Enqueue `job` when its `queue` directive targets this scheduler.
///
/// With no `expected` queue every job is accepted.
pub async fn schedule_job(
    queue: &dyn JobQueue,
    expected: Option<&str>,
    job: JobRequest,
) -> Result<ScheduleOutcome> {
    let requested = job.directives().queue();

    if let Some(expected) = expected {
        if requested != Some(expected) {
            let reason = format!(
                "ignoring this job, the agent query rules specify queue='{}' which doesn't match '{}'",
                requested.unwrap_or_default(),
                expected
            );
            debug!(job_id = %job.identifier, %reason, "Ignoring job");
            return Ok(ScheduleOutcome::Ignored { reason });
        }
    }

    let job_id = job.identifier.clone();
    let message_id = queue.enqueue(JobMessage::new(job)).await?;
    info!(job_id = %job_id, message_id = %message_id, "Scheduled job");
    Ok(ScheduleOutcome::Scheduled(message_id))
}
