//! Worker that feeds queued jobs to the batch handler.

use crate::batch::BatchHandler;
use crate::queue::{ChannelQueue, Delivery, JobMessage};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Deliveries handed to the batch handler at once.
pub const DEFAULT_BATCH_SIZE: usize = 10;

pub struct Worker {
    queue: ChannelQueue,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    handler: BatchHandler,
    batch_size: usize,
}

impl Worker {
    pub fn new(
        queue: ChannelQueue,
        receiver: mpsc::UnboundedReceiver<Delivery>,
        handler: BatchHandler,
    ) -> Self {
        Self {
            queue,
            receiver,
            handler,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run the worker loop until the queue closes.
    pub async fn run(mut self) {
        info!(batch_size = self.batch_size, "Starting worker");

        while let Some(first) = self.receiver.recv().await {
            let mut batch = vec![first];
            while batch.len() < self.batch_size {
                match self.receiver.try_recv() {
                    Ok(delivery) => batch.push(delivery),
                    Err(_) => break,
                }
            }
            self.process(batch).await;
        }

        info!("Job queue closed, stopping worker");
    }

    /// Dispatch one batch and redeliver its transient failures. Messages that
    /// fail validation or configuration are dropped. Returns the number of failures.
    pub async fn process(&self, batch: Vec<Delivery>) -> usize {
        let messages: Vec<JobMessage> = batch.iter().map(|d| d.message.clone()).collect();
        let results = self.handler.handle_all(&messages).await;

        let mut failures = 0;
        for (delivery, result) in batch.into_iter().zip(results) {
            let Err(e) = result else {
                continue;
            };
            failures += 1;
            if e.is_transient() {
                warn!(
                    message_id = %delivery.id,
                    attempt = delivery.attempt,
                    "Job failed, returning message to queue"
                );
                self.queue.redeliver(delivery);
            } else {
                error!(
                    message_id = %delivery.id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Job cannot succeed, dropping message"
                );
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::queue::JobQueue;
    use crate::submitter::Submitter;
    use crate::testing::{RecordingSleeper, StubOrchestrator, config};
    use ondemand_config::SchedulerConfig;
    use ondemand_core::JobRequest;
    use std::sync::Arc;

    fn worker(orchestrator: Arc<StubOrchestrator>, max_deliveries: u32) -> (ChannelQueue, Worker) {
        worker_with(orchestrator, config(), max_deliveries)
    }

    fn worker_with(
        orchestrator: Arc<StubOrchestrator>,
        config: SchedulerConfig,
        max_deliveries: u32,
    ) -> (ChannelQueue, Worker) {
        let submitter = Submitter::new(orchestrator).with_sleeper(RecordingSleeper::default().sleeper());
        let handler = BatchHandler::new(Arc::new(Dispatcher::new(config, submitter)));
        let (queue, receiver) = ChannelQueue::new(max_deliveries);
        (queue.clone(), Worker::new(queue, receiver, handler))
    }

    fn drain(worker: &mut Worker) -> Vec<Delivery> {
        let mut batch = Vec::new();
        while let Ok(delivery) = worker.receiver.try_recv() {
            batch.push(delivery);
        }
        batch
    }

    #[tokio::test]
    async fn test_successful_batch_is_consumed() {
        let orchestrator = Arc::new(StubOrchestrator::default());
        let (queue, mut worker) = worker(orchestrator.clone(), 3);
        for job in ["job-1", "job-2"] {
            queue.enqueue(JobMessage::new(JobRequest::new(job, &[]))).await.unwrap();
        }

        let batch = drain(&mut worker);
        assert_eq!(worker.process(batch).await, 0);
        assert_eq!(orchestrator.submitted().len(), 2);
        assert!(drain(&mut worker).is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_redelivered_until_dropped() {
        let orchestrator = Arc::new(StubOrchestrator::failing_jobs(&["job-bad"]));
        let (queue, mut worker) = worker(orchestrator.clone(), 2);
        queue.enqueue(JobMessage::new(JobRequest::new("job-ok", &[]))).await.unwrap();
        queue.enqueue(JobMessage::new(JobRequest::new("job-bad", &[]))).await.unwrap();

        let batch = drain(&mut worker);
        assert_eq!(worker.process(batch).await, 1);

        let redelivered = drain(&mut worker);
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message.job.identifier.as_str(), "job-bad");
        assert_eq!(redelivered[0].attempt, 2);

        assert_eq!(worker.process(redelivered).await, 1);
        assert!(drain(&mut worker).is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_redelivered() {
        let orchestrator = Arc::new(StubOrchestrator::default());
        let config = SchedulerConfig {
            subnets: Vec::new(),
            ..config()
        };
        let (queue, mut worker) = worker_with(orchestrator.clone(), config, 5);
        queue.enqueue(JobMessage::new(JobRequest::new("job-1", &[]))).await.unwrap();
        queue.enqueue(JobMessage::new(JobRequest::new("job-2", &[]))).await.unwrap();

        let batch = drain(&mut worker);
        assert_eq!(batch.len(), 2);
        assert_eq!(worker.process(batch).await, 2);
        assert!(drain(&mut worker).is_empty());
        assert_eq!(orchestrator.attempts(), 0);
    }

    #[tokio::test]
    async fn test_run_processes_queued_jobs() {
        let orchestrator = Arc::new(StubOrchestrator::default());
        let (queue, worker) = worker(orchestrator.clone(), 3);
        queue.enqueue(JobMessage::new(JobRequest::new("job-1", &[]))).await.unwrap();

        let handle = tokio::spawn(worker.run());
        for _ in 0..100 {
            if !orchestrator.submitted().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(orchestrator.submitted().len(), 1);
    }
}
