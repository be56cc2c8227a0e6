//! Broadcast router: best-effort, non-blocking delivery into outbound buffers.

use std::sync::Arc;

use crate::domain::{ConnectionId, Event, PushError, SubscriptionRegistry};

/// What happened to one fan-out
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Targets whose buffer was full; the hub drops them as unresponsive
    pub unresponsive: Vec<ConnectionId>,
    /// Targets whose outbound duty already ended
    pub closed: Vec<ConnectionId>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BroadcastRouter;

impl BroadcastRouter {
    pub fn new() -> Self {
        Self
    }

    /// Try to enqueue `event` for every target. Never waits on a consumer.
    ///
    /// Targets that are no longer registered are skipped silently.
    pub fn deliver(
        &self,
        registry: &SubscriptionRegistry,
        targets: &[ConnectionId],
        event: &Arc<Event>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for target in targets {
            let Some(connection) = registry.get(target) else {
                continue;
            };
            match connection.try_push(event) {
                Ok(()) => {
                    report.delivered += 1;
                    tracing::debug!(
                        connection_id = %target,
                        kind = ?event.kind(),
                        "Enqueued event"
                    );
                }
                Err(PushError::Full) => {
                    tracing::warn!(
                        connection_id = %target,
                        user_id = %connection.user_id(),
                        "Outbound buffer full, treating connection as unresponsive"
                    );
                    report.unresponsive.push(*target);
                }
                Err(PushError::Closed) => {
                    tracing::debug!(connection_id = %target, "Outbound buffer already closed");
                    report.closed.push(*target);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Connection, DisplayName, OutboundReceiver, Timestamp, UserId, outbound_queue,
    };

    fn register(
        registry: &mut SubscriptionRegistry,
        capacity: usize,
    ) -> (ConnectionId, OutboundReceiver) {
        let (tx, rx) = outbound_queue(capacity);
        let connection = Connection::new(
            ConnectionId::generate(),
            UserId::generate(),
            DisplayName::new("user".to_string()).unwrap(),
            Timestamp::new(0),
            tx,
        );
        let id = connection.id();
        registry.insert(connection);
        (id, rx)
    }

    fn event() -> Arc<Event> {
        Arc::new(Event::presence_offline(UserId::generate(), Timestamp::new(0)))
    }

    #[test]
    fn test_deliver_to_all_targets() {
        // テスト項目: 全ての配信対象のキューにイベントが積まれる
        // given (前提条件):
        let mut registry = SubscriptionRegistry::new();
        let (a, mut rx_a) = register(&mut registry, 4);
        let (b, mut rx_b) = register(&mut registry, 4);
        let event = event();

        // when (操作):
        let report = BroadcastRouter::new().deliver(&registry, &[a, b], &event);

        // then (期待する結果):
        assert_eq!(report.delivered, 2);
        assert!(report.unresponsive.is_empty());
        assert_eq!(rx_a.try_recv().ok(), Some(event.clone()));
        assert_eq!(rx_b.try_recv().ok(), Some(event));
    }

    #[test]
    fn test_full_buffer_does_not_stop_other_deliveries() {
        // テスト項目: キューが満杯の接続は unresponsive として報告され、他の配信は続行される
        // given (前提条件):
        let mut registry = SubscriptionRegistry::new();
        let (slow, _rx_slow) = register(&mut registry, 1);
        let (fast, mut rx_fast) = register(&mut registry, 4);
        let router = BroadcastRouter::new();
        router.deliver(&registry, &[slow], &event());

        // when (操作):
        let second = event();
        let report = router.deliver(&registry, &[slow, fast], &second);

        // then (期待する結果):
        assert_eq!(report.delivered, 1);
        assert_eq!(report.unresponsive, vec![slow]);
        assert_eq!(rx_fast.try_recv().ok(), Some(second));
    }

    #[test]
    fn test_closed_and_unknown_targets() {
        // テスト項目: 閉じたキューは closed として報告され、未登録の接続は無視される
        // given (前提条件):
        let mut registry = SubscriptionRegistry::new();
        let (gone, rx_gone) = register(&mut registry, 4);
        drop(rx_gone);

        // when (操作):
        let report =
            BroadcastRouter::new().deliver(&registry, &[gone, ConnectionId::generate()], &event());

        // then (期待する結果):
        assert_eq!(report.delivered, 0);
        assert_eq!(report.closed, vec![gone]);
        assert!(report.unresponsive.is_empty());
    }
}
