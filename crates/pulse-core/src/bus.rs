use pulse_types::message::{Message, PipelineEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// In-process fan-out of pipeline notifications.
///
/// Delivery is at-least-once from the producer's point of view only while a
/// subscriber keeps up; a lagging receiver observes `RecvError::Lagged` and is
/// expected to reconcile from the stores.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Message>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PipelineEvent) -> Result<usize, broadcast::error::SendError<Message>> {
        self.sender.send(Message::new(event))
    }

    /// Re-publish an already enveloped message (redelivery).
    pub fn republish(&self, message: Message) -> Result<usize, broadcast::error::SendError<Message>> {
        self.sender.send(message)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pulse_types::message::SnapshotWritten;
    use tokio::time::{timeout, Duration};

    fn written(indicator_id: &str, day: u32) -> PipelineEvent {
        PipelineEvent::SnapshotWritten(SnapshotWritten {
            indicator_id: indicator_id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            content_hash: format!("hash-{}", day),
            revision: 1,
            correction: false,
        })
    }

    #[tokio::test]
    async fn test_eventbus_publish_subscribe() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        let result = bus.publish(written("cpi", 1));
        assert_eq!(result.unwrap(), 1);

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("Timeout waiting for message")
            .expect("Failed to receive message");

        assert_eq!(received.topic(), "snapshot.written");
        assert_eq!(received.event.indicator_id(), "cpi");
    }

    #[tokio::test]
    async fn test_eventbus_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.publish(written("cpi", 2)).unwrap(), 2);

        let m1 = rx1.recv().await.expect("rx1 failed");
        let m2 = rx2.recv().await.expect("rx2 failed");
        assert_eq!(m1.id, m2.id);
    }

    #[tokio::test]
    async fn test_eventbus_no_subscribers() {
        let bus = EventBus::new(10);
        let rx = bus.subscribe();
        drop(rx);

        assert!(bus.publish(written("cpi", 3)).is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_eventbus_redelivery_keeps_envelope() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.publish(written("cpi", 4)).unwrap();
        let first = rx.recv().await.unwrap();
        bus.republish(first.clone()).unwrap();
        let second = rx.recv().await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.event, second.event);
    }

    #[tokio::test]
    async fn test_eventbus_capacity_overflow() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        bus.publish(written("cpi", 1)).unwrap();
        bus.publish(written("cpi", 2)).unwrap();
        bus.publish(written("cpi", 3)).unwrap();

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 1),
            _ => panic!("Expected Lagged error"),
        }

        let next = rx.recv().await.expect("Failed to receive after lag");
        match next.event {
            PipelineEvent::SnapshotWritten(e) => assert_eq!(e.content_hash, "hash-2"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
