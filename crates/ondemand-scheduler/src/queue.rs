//! Job queue.
//!
//! Messages carry one job each. The in-process [`ChannelQueue`] redelivers a
//! failed message until it has been delivered `max_deliveries` times.

use async_trait::async_trait;
use ondemand_core::{Error, JobRequest, MessageId, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Queue message body: `{"Job": {...}, "Cluster": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobMessage {
    pub job: JobRequest,
    /// Overrides the configured cluster for this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl JobMessage {
    pub fn new(job: JobRequest) -> Self {
        Self { job, cluster: None }
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: MessageId,
    /// 1-based delivery count.
    pub attempt: u32,
    pub message: JobMessage,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, message: JobMessage) -> Result<MessageId>;
}

/// Unbounded tokio channel queue.
#[derive(Clone)]
pub struct ChannelQueue {
    sender: mpsc::UnboundedSender<Delivery>,
    max_deliveries: u32,
}

impl ChannelQueue {
    pub fn new(max_deliveries: u32) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Self {
            sender,
            max_deliveries: max_deliveries.max(1),
        };
        (queue, receiver)
    }

    pub fn max_deliveries(&self) -> u32 {
        self.max_deliveries
    }

    /// Put a failed delivery back on the queue.
    ///
    /// Returns `false` when the message has used up its deliveries and was
    /// dropped, or the queue is closed.
    pub fn redeliver(&self, delivery: Delivery) -> bool {
        if delivery.attempt >= self.max_deliveries {
            error!(
                message_id = %delivery.id,
                job_id = %delivery.message.job.identifier,
                deliveries = delivery.attempt,
                "Dropping message after max deliveries"
            );
            return false;
        }

        let next = Delivery {
            attempt: delivery.attempt + 1,
            ..delivery
        };
        debug!(message_id = %next.id, attempt = next.attempt, "Redelivering message");
        match self.sender.send(next) {
            Ok(()) => true,
            Err(e) => {
                warn!(message_id = %e.0.id, "Job queue closed, message lost");
                false
            }
        }
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn enqueue(&self, message: JobMessage) -> Result<MessageId> {
        let id = MessageId::new();
        self.sender
            .send(Delivery {
                id,
                attempt: 1,
                message,
            })
            .map_err(|_| Error::Internal("job queue is closed".to_string()))?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(job: &str) -> JobMessage {
        JobMessage::new(JobRequest::new(job, &["queue=ondemand"]))
    }

    #[tokio::test]
    async fn test_enqueue_delivers_first_attempt() {
        let (queue, mut receiver) = ChannelQueue::new(3);
        let id = queue.enqueue(message("job-1")).await.unwrap();

        let delivery = receiver.recv().await.unwrap();
        assert_eq!(delivery.id, id);
        assert_eq!(delivery.attempt, 1);
        assert_eq!(delivery.message.job.identifier.as_str(), "job-1");
    }

    #[tokio::test]
    async fn test_redelivery_is_bounded() {
        let (queue, mut receiver) = ChannelQueue::new(2);
        queue.enqueue(message("job-1")).await.unwrap();

        let first = receiver.recv().await.unwrap();
        assert!(queue.redeliver(first));
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.attempt, 2);

        assert!(!queue.redeliver(second));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_enqueue_fails_when_closed() {
        let (queue, receiver) = ChannelQueue::new(3);
        drop(receiver);
        let result = queue.enqueue(message("job-1")).await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn test_message_wire_shape() {
        let parsed: JobMessage = serde_json::from_str(
            r#"{"Job": {"id": "1", "uuid": "abc", "agent_query_rules": ["image=alpine"]}, "Cluster": "builds"}"#,
        )
        .unwrap();
        assert_eq!(parsed.job.identifier.as_str(), "abc");
        assert_eq!(parsed.cluster.as_deref(), Some("builds"));

        let value = serde_json::to_value(message("job-1")).unwrap();
        assert_eq!(value["Job"]["id"], "job-1");
        assert!(value.get("Cluster").is_none());
    }
}
