//! Connection entity: the hub-side view of one live socket.

use std::{collections::HashSet, sync::Arc};

use thiserror::Error;
use tokio::sync::mpsc;

use super::{
    event::Event,
    value_object::{ConnectionId, DisplayName, RoomId, Timestamp, UserId},
};

/// Default number of events buffered per connection before it is considered unresponsive
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Producer side of a connection's outbound buffer (held by the hub)
pub type OutboundSender = mpsc::Sender<Arc<Event>>;

/// Consumer side of a connection's outbound buffer (held by the outbound duty)
pub type OutboundReceiver = mpsc::Receiver<Arc<Event>>;

/// Create a bounded outbound buffer
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Reasons an event could not be enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("outbound buffer is full")]
    Full,

    #[error("outbound buffer is closed")]
    Closed,
}

/// A registered connection.
///
/// The joined-room set is only changed by [`super::SubscriptionRegistry`],
/// which in turn is only touched by the hub's command loop.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    display_name: DisplayName,
    connected_at: Timestamp,
    outbound: OutboundSender,
    rooms: HashSet<RoomId>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        display_name: DisplayName,
        connected_at: Timestamp,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            id,
            user_id,
            display_name,
            connected_at,
            outbound,
            rooms: HashSet::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn display_name(&self) -> &DisplayName {
        &self.display_name
    }

    /// Milliseconds between registration and `now`
    pub fn connected_for_millis(&self, now: Timestamp) -> i64 {
        (now.value() - self.connected_at.value()).max(0)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.iter()
    }

    pub fn is_in_room(&self, room_id: &RoomId) -> bool {
        self.rooms.contains(room_id)
    }

    pub(super) fn insert_room(&mut self, room_id: RoomId) -> bool {
        self.rooms.insert(room_id)
    }

    pub(super) fn remove_room(&mut self, room_id: &RoomId) -> bool {
        self.rooms.remove(room_id)
    }

    /// Enqueue without waiting.
    pub fn try_push(&self, event: &Arc<Event>) -> Result<(), PushError> {
        self.outbound
            .try_send(Arc::clone(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PushError::Full,
                mpsc::error::TrySendError::Closed(_) => PushError::Closed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection(capacity: usize) -> (Connection, OutboundReceiver) {
        let (tx, rx) = outbound_queue(capacity);
        let connection = Connection::new(
            ConnectionId::generate(),
            UserId::generate(),
            DisplayName::new("alice".to_string()).unwrap(),
            Timestamp::new(0),
            tx,
        );
        (connection, rx)
    }

    fn test_event() -> Arc<Event> {
        Arc::new(Event::presence_offline(UserId::generate(), Timestamp::new(0)))
    }

    #[test]
    fn test_connected_for_millis_counts_from_registration() {
        // テスト項目: 接続時間は登録時刻からの経過ミリ秒で、時計が戻っても負にならない
        // given (前提条件):
        let (connection, _rx) = test_connection(1);

        // when (操作):
        let elapsed = connection.connected_for_millis(Timestamp::new(1_500));
        let skewed = connection.connected_for_millis(Timestamp::new(-10));

        // then (期待する結果):
        assert_eq!(elapsed, 1_500);
        assert_eq!(skewed, 0);
    }

    #[tokio::test]
    async fn test_try_push_enqueues_event() {
        // テスト項目: 空きがあればイベントがキューに積まれる
        // given (前提条件):
        let (connection, mut rx) = test_connection(2);
        let event = test_event();

        // when (操作):
        let result = connection.try_push(&event);

        // then (期待する結果):
        assert!(result.is_ok());
        assert_eq!(rx.recv().await, Some(event));
    }

    #[test]
    fn test_try_push_reports_full_buffer() {
        // テスト項目: 容量いっぱいのキューへの追加は Full になる
        // given (前提条件):
        let (connection, _rx) = test_connection(1);
        connection.try_push(&test_event()).unwrap();

        // when (操作):
        let result = connection.try_push(&test_event());

        // then (期待する結果):
        assert_eq!(result, Err(PushError::Full));
    }

    #[test]
    fn test_try_push_reports_closed_buffer() {
        // テスト項目: 受信側が破棄されたキューへの追加は Closed になる
        // given (前提条件):
        let (connection, rx) = test_connection(4);
        drop(rx);

        // when (操作):
        let result = connection.try_push(&test_event());

        // then (期待する結果):
        assert_eq!(result, Err(PushError::Closed));
    }
}
