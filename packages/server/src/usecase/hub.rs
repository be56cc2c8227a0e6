//! The hub: single coordinating actor owning the subscription registry.
//!
//! Every registry mutation arrives through one bounded command channel and is
//! applied by one task, so register, unregister, join, leave and publish never
//! interleave. Collaborator lookups (contacts, message senders) are handed to a
//! resolver task; their results re-enter the command stream as
//! [`HubCommand::DeliverToUsers`] in the order the lookups were issued, so the
//! loop itself never waits on I/O and a fast lookup never overtakes a slow one.
//!
//! ```ignore
//! let hub = HubBuilder::new(contacts, messages).spawn();
//! hub.register(connection).await?;
//! hub.join_room(connection_id, room_id).await;
//! hub.publish_event(event).await;
//! ```

use std::{sync::Arc, time::Duration};

use futures_util::{
    FutureExt, StreamExt,
    future::BoxFuture,
    stream::FuturesOrdered,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tsudoi_shared::time::{Clock, SystemClock};

use crate::domain::{
    Connection, ConnectionId, ContactDirectory, Event, EventBody, JoinOutcome, LeaveOutcome,
    MessageDirectory, MessageId, RoomId, Route, SubscriptionRegistry, Timestamp, UserId,
    route_for,
};

use super::{broadcast::BroadcastRouter, error::HubError};

/// Default capacity of the hub command channel
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Default upper bound on a single collaborator lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a published event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// Originated in this process; also relayed to peer instances
    Local,
    /// Received from a peer instance through the bridge; never relayed again
    Relayed,
}

/// Snapshot of registry sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub online_users: usize,
    pub active_rooms: usize,
}

#[derive(Debug)]
enum HubCommand {
    Register {
        connection: Connection,
    },
    Unregister {
        connection_id: ConnectionId,
    },
    JoinRoom {
        connection_id: ConnectionId,
        room_id: RoomId,
    },
    LeaveRoom {
        connection_id: ConnectionId,
        room_id: RoomId,
    },
    JoinRoomForUser {
        user_id: UserId,
        room_id: RoomId,
    },
    LeaveRoomForUser {
        user_id: UserId,
        room_id: RoomId,
    },
    Publish {
        event: Arc<Event>,
        origin: EventOrigin,
    },
    /// Event decoded from a client frame; checked against the sender's rooms
    ClientEvent {
        connection_id: ConnectionId,
        event: Event,
    },
    DeliverToUsers {
        event: Arc<Event>,
        recipients: Vec<UserId>,
        exclude_user: Option<UserId>,
    },
    Query(HubQuery),
}

#[derive(Debug)]
enum HubQuery {
    IsUserOnline {
        user_id: UserId,
        reply: oneshot::Sender<bool>,
    },
    OnlineUsers {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<UserId>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Configures and starts a hub
pub struct HubBuilder {
    contacts: Arc<dyn ContactDirectory>,
    messages: Arc<dyn MessageDirectory>,
    clock: Arc<dyn Clock>,
    relay: Option<mpsc::Sender<Arc<Event>>>,
    command_capacity: usize,
    lookup_timeout: Duration,
}

impl HubBuilder {
    pub fn new(contacts: Arc<dyn ContactDirectory>, messages: Arc<dyn MessageDirectory>) -> Self {
        Self {
            contacts,
            messages,
            clock: Arc::new(SystemClock),
            relay: None,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Forward locally originated events to the cross-process bridge
    pub fn relay(mut self, relay: mpsc::Sender<Arc<Event>>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Spawn the command loop on the current tokio runtime.
    ///
    /// The loop stops once every [`HubHandle`] has been dropped.
    pub fn spawn(self) -> HubHandle {
        let (tx, rx) = mpsc::channel(self.command_capacity);
        let (resolutions, requests) = mpsc::unbounded_channel();
        let resolver = Resolver {
            requests,
            messages: Arc::clone(&self.messages),
            lookup_timeout: self.lookup_timeout,
            loopback: tx.downgrade(),
        };
        let hub = Hub {
            registry: SubscriptionRegistry::new(),
            router: BroadcastRouter::new(),
            contacts: self.contacts,
            messages: self.messages,
            clock: self.clock,
            relay: self.relay,
            lookup_timeout: self.lookup_timeout,
            commands: rx,
            resolutions,
        };
        tokio::spawn(resolver.run());
        tokio::spawn(hub.run());
        HubHandle { commands: tx }
    }
}

struct Hub {
    registry: SubscriptionRegistry,
    router: BroadcastRouter,
    contacts: Arc<dyn ContactDirectory>,
    messages: Arc<dyn MessageDirectory>,
    clock: Arc<dyn Clock>,
    relay: Option<mpsc::Sender<Arc<Event>>>,
    lookup_timeout: Duration,
    commands: mpsc::Receiver<HubCommand>,
    resolutions: mpsc::UnboundedSender<Resolution>,
}

impl Hub {
    async fn run(mut self) {
        tracing::info!("Hub started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        tracing::info!(
            connections = self.registry.connection_count(),
            "Hub stopped"
        );
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { connection } => self.register(connection),
            HubCommand::Unregister { connection_id } => self.unregister(connection_id),
            HubCommand::JoinRoom {
                connection_id,
                room_id,
            } => self.join_room(connection_id, room_id),
            HubCommand::LeaveRoom {
                connection_id,
                room_id,
            } => self.leave_room(connection_id, room_id),
            HubCommand::JoinRoomForUser { user_id, room_id } => {
                for connection_id in self.registry.connections_of(&user_id) {
                    self.join_room(connection_id, room_id);
                }
            }
            HubCommand::LeaveRoomForUser { user_id, room_id } => {
                for connection_id in self.registry.connections_of(&user_id) {
                    self.leave_room(connection_id, room_id);
                }
            }
            HubCommand::Publish { event, origin } => self.publish(event, origin),
            HubCommand::ClientEvent {
                connection_id,
                event,
            } => self.client_event(connection_id, event),
            HubCommand::DeliverToUsers {
                event,
                recipients,
                exclude_user,
            } => {
                let targets = self.registry.user_targets(&recipients, exclude_user);
                self.deliver(&targets, &event);
            }
            HubCommand::Query(query) => self.query(query),
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    fn register(&mut self, connection: Connection) {
        let connection_id = connection.id();
        let user_id = connection.user_id();
        let display_name = connection.display_name().clone();

        let outcome = self.registry.insert(connection);
        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            display_name = %display_name,
            "Client connected"
        );

        if let Some(replaced) = outcome.replaced {
            tracing::warn!(connection_id = %connection_id, "Connection registered twice, overwriting");
            let replaced_user = replaced.connection.user_id();
            if replaced.user_went_offline {
                self.publish(
                    Arc::new(Event::presence_offline(replaced_user, self.now())),
                    EventOrigin::Local,
                );
            }
        }

        if outcome.user_came_online {
            let event = Event::presence_online(user_id, display_name, self.now());
            self.publish(Arc::new(event), EventOrigin::Local);
        }
    }

    fn unregister(&mut self, connection_id: ConnectionId) {
        let Some(outcome) = self.registry.remove(connection_id) else {
            return;
        };
        let user_id = outcome.connection.user_id();
        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            display_name = %outcome.connection.display_name(),
            connected_for_ms = outcome.connection.connected_for_millis(self.now()),
            "Client disconnected"
        );
        // Dropping the connection drops the only outbound sender, which ends
        // the outbound duty and closes the socket.
        drop(outcome.connection);

        if outcome.user_went_offline {
            let event = Event::presence_offline(user_id, self.now());
            self.publish(Arc::new(event), EventOrigin::Local);
        }
    }

    fn join_room(&mut self, connection_id: ConnectionId, room_id: RoomId) {
        match self.registry.join(connection_id, room_id) {
            JoinOutcome::Joined => {
                tracing::info!(connection_id = %connection_id, room_id = %room_id, "Client joined room");
            }
            JoinOutcome::AlreadyJoined => {}
            JoinOutcome::UnknownConnection => {
                tracing::debug!(connection_id = %connection_id, "Join for unknown connection ignored");
            }
        }
    }

    fn leave_room(&mut self, connection_id: ConnectionId, room_id: RoomId) {
        match self.registry.leave(connection_id, room_id) {
            LeaveOutcome::Left => {
                tracing::info!(connection_id = %connection_id, room_id = %room_id, "Client left room");
            }
            LeaveOutcome::NotJoined => {}
            LeaveOutcome::UnknownConnection => {
                tracing::debug!(connection_id = %connection_id, "Leave for unknown connection ignored");
            }
        }
    }

    fn client_event(&mut self, connection_id: ConnectionId, event: Event) {
        let Some(connection) = self.registry.get(&connection_id) else {
            return;
        };
        if let Some(room_id) = event.room_id()
            && !connection.is_in_room(&room_id)
        {
            tracing::debug!(
                connection_id = %connection_id,
                room_id = %room_id,
                kind = ?event.kind(),
                "Dropping client event for a room the connection has not joined"
            );
            return;
        }
        self.publish(Arc::new(event), EventOrigin::Local);
    }

    fn publish(&mut self, event: Arc<Event>, origin: EventOrigin) {
        if origin == EventOrigin::Local {
            self.relay(&event);
        }
        // Senders of relayed messages are recorded too, so read receipts for
        // messages posted through another instance still find their author.
        if let EventBody::MessageDelivered { message_id, .. } = event.body() {
            self.resolve(Resolution::RecordSender {
                message_id: *message_id,
                sender: event.user_id(),
            });
        }

        match route_for(&event) {
            Route::Room {
                room_id,
                exclude_user,
            } => {
                let targets = self.registry.room_targets(&room_id, exclude_user);
                self.deliver(&targets, &event);
            }
            Route::Contacts { user_id } => self.spawn_contact_lookup(user_id, event),
            Route::MessageSender { message_id, reader } => {
                let messages = Arc::clone(&self.messages);
                let timeout = self.lookup_timeout;
                self.resolve_recipients(event, Some(reader), async move {
                    match tokio::time::timeout(timeout, messages.sender_of(message_id)).await {
                        Ok(Ok(Some(sender))) => Some(vec![sender]),
                        Ok(Ok(None)) => {
                            tracing::debug!(message_id = %message_id, "Read receipt for unknown message dropped");
                            None
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(message_id = %message_id, "Message sender lookup failed: {}", e);
                            None
                        }
                        Err(_) => {
                            tracing::warn!(message_id = %message_id, "Message sender lookup timed out");
                            None
                        }
                    }
                });
            }
        }
    }

    fn spawn_contact_lookup(&self, user_id: UserId, event: Arc<Event>) {
        let contacts = Arc::clone(&self.contacts);
        let timeout = self.lookup_timeout;
        self.resolve_recipients(event, Some(user_id), async move {
            match tokio::time::timeout(timeout, contacts.contacts_of(user_id)).await {
                Ok(Ok(contacts)) => Some(contacts),
                Ok(Err(e)) => {
                    tracing::warn!(user_id = %user_id, "Contact lookup failed, skipping presence fan-out: {}", e);
                    None
                }
                Err(_) => {
                    tracing::warn!(user_id = %user_id, "Contact lookup timed out, skipping presence fan-out");
                    None
                }
            }
        });
    }

    /// Resolve recipients off the command loop; the resolver feeds them back in.
    fn resolve_recipients<F>(&self, event: Arc<Event>, exclude_user: Option<UserId>, lookup: F)
    where
        F: Future<Output = Option<Vec<UserId>>> + Send + 'static,
    {
        self.resolve(Resolution::Recipients {
            event,
            exclude_user,
            lookup: lookup.boxed(),
        });
    }

    fn resolve(&self, resolution: Resolution) {
        if self.resolutions.send(resolution).is_err() {
            tracing::debug!("Resolver stopped, lookup skipped");
        }
    }

    fn deliver(&mut self, targets: &[ConnectionId], event: &Arc<Event>) {
        if targets.is_empty() {
            return;
        }
        let report = self.router.deliver(&self.registry, targets, event);
        for connection_id in report.unresponsive.into_iter().chain(report.closed) {
            self.unregister(connection_id);
        }
    }

    fn relay(&self, event: &Arc<Event>) {
        let Some(relay) = &self.relay else {
            return;
        };
        match relay.try_send(Arc::clone(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(kind = ?event.kind(), "Bridge queue full, event not relayed");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(kind = ?event.kind(), "Bridge stopped, event not relayed");
            }
        }
    }

    fn query(&self, query: HubQuery) {
        match query {
            HubQuery::IsUserOnline { user_id, reply } => {
                let _ = reply.send(self.registry.is_user_online(&user_id));
            }
            HubQuery::OnlineUsers { room_id, reply } => {
                let _ = reply.send(self.registry.online_users(&room_id));
            }
            HubQuery::Stats { reply } => {
                let _ = reply.send(HubStats {
                    connections: self.registry.connection_count(),
                    online_users: self.registry.user_count(),
                    active_rooms: self.registry.room_count(),
                });
            }
        }
    }
}

enum Resolution {
    /// Remember the author of a delivered message for later read receipts
    RecordSender { message_id: MessageId, sender: UserId },
    Recipients {
        event: Arc<Event>,
        exclude_user: Option<UserId>,
        lookup: BoxFuture<'static, Option<Vec<UserId>>>,
    },
}

type Resolved = (Arc<Event>, Option<UserId>, Option<Vec<UserId>>);

/// Runs collaborator lookups concurrently but reports them in issue order.
///
/// A presence-offline lookup that takes longer than the presence-online
/// lookup issued after it must still reach contacts first, otherwise a quick
/// reconnect leaves contacts seeing the user offline.
struct Resolver {
    requests: mpsc::UnboundedReceiver<Resolution>,
    messages: Arc<dyn MessageDirectory>,
    lookup_timeout: Duration,
    loopback: mpsc::WeakSender<HubCommand>,
}

impl Resolver {
    async fn run(mut self) {
        let mut pending: FuturesOrdered<BoxFuture<'static, Resolved>> = FuturesOrdered::new();

        loop {
            tokio::select! {
                Some(resolved) = pending.next(), if !pending.is_empty() => {
                    self.feed_back(resolved).await;
                }
                request = self.requests.recv() => match request {
                    // Recorded inline so a lookup issued afterwards sees it
                    Some(Resolution::RecordSender { message_id, sender }) => {
                        self.record_sender(message_id, sender).await;
                    }
                    Some(Resolution::Recipients { event, exclude_user, lookup }) => {
                        pending.push_back(
                            async move { (event, exclude_user, lookup.await) }.boxed(),
                        );
                    }
                    None => break,
                },
            }
        }

        while let Some(resolved) = pending.next().await {
            self.feed_back(resolved).await;
        }
    }

    async fn record_sender(&self, message_id: MessageId, sender: UserId) {
        let record = self.messages.record_sender(message_id, sender);
        match tokio::time::timeout(self.lookup_timeout, record).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(message_id = %message_id, "Failed to record message sender: {}", e);
            }
            Err(_) => {
                tracing::warn!(message_id = %message_id, "Recording message sender timed out");
            }
        }
    }

    async fn feed_back(&self, (event, exclude_user, recipients): Resolved) {
        let Some(recipients) = recipients.filter(|recipients| !recipients.is_empty()) else {
            return;
        };
        if let Some(commands) = self.loopback.upgrade() {
            let _ = commands
                .send(HubCommand::DeliverToUsers {
                    event,
                    recipients,
                    exclude_user,
                })
                .await;
        }
    }
}

/// Cloneable entry point into the hub's command stream
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// `false` once the command loop has stopped
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Register a freshly upgraded connection
    pub async fn register(&self, connection: Connection) -> Result<(), HubError> {
        self.send(HubCommand::Register { connection }).await
    }

    /// Remove a connection and all of its subscriptions. Idempotent.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        if self
            .send(HubCommand::Unregister { connection_id })
            .await
            .is_err()
        {
            tracing::debug!(connection_id = %connection_id, "Hub stopped before unregister");
        }
    }

    pub async fn join_room(&self, connection_id: ConnectionId, room_id: RoomId) {
        let _ = self
            .send(HubCommand::JoinRoom {
                connection_id,
                room_id,
            })
            .await;
    }

    pub async fn leave_room(&self, connection_id: ConnectionId, room_id: RoomId) {
        let _ = self
            .send(HubCommand::LeaveRoom {
                connection_id,
                room_id,
            })
            .await;
    }

    /// Subscribe every live connection of `user_id` to the room
    pub async fn join_room_for_user(&self, user_id: UserId, room_id: RoomId) {
        let _ = self
            .send(HubCommand::JoinRoomForUser { user_id, room_id })
            .await;
    }

    pub async fn leave_room_for_user(&self, user_id: UserId, room_id: RoomId) {
        let _ = self
            .send(HubCommand::LeaveRoomForUser { user_id, room_id })
            .await;
    }

    /// Fan an event out to local subscribers and peer instances.
    ///
    /// Fire-and-forget: delivery problems never reach the caller.
    pub async fn publish_event(&self, event: Event) {
        self.publish(event, EventOrigin::Local).await;
    }

    /// Inject an event received from a peer instance
    pub async fn publish_relayed(&self, event: Event) {
        self.publish(event, EventOrigin::Relayed).await;
    }

    async fn publish(&self, event: Event, origin: EventOrigin) {
        let kind = event.kind();
        if self
            .send(HubCommand::Publish {
                event: Arc::new(event),
                origin,
            })
            .await
            .is_err()
        {
            tracing::warn!(kind = ?kind, "Hub stopped, event dropped");
        }
    }

    /// Publish an event decoded from a client frame on `connection_id`
    pub async fn submit_client_event(&self, connection_id: ConnectionId, event: Event) {
        let _ = self
            .send(HubCommand::ClientEvent {
                connection_id,
                event,
            })
            .await;
    }

    pub async fn is_user_online(&self, user_id: UserId) -> Result<bool, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Query(HubQuery::IsUserOnline { user_id, reply }))
            .await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Users with at least one connection subscribed to the room
    pub async fn online_users(&self, room_id: RoomId) -> Result<Vec<UserId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Query(HubQuery::OnlineUsers { room_id, reply }))
            .await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Query(HubQuery::Stats { reply })).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Live connections on this instance
    pub async fn connection_count(&self) -> Result<usize, HubError> {
        Ok(self.stats().await?.connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{
            DisplayName, EventBody, EventKind, LookupError, OutboundReceiver,
            collaborator::{MockContactDirectory, MockMessageDirectory},
            outbound_queue,
        },
        infrastructure::directory::InMemoryMessageDirectory,
    };
    use async_trait::async_trait;
    use std::{
        collections::{HashMap, VecDeque},
        sync::Mutex,
    };
    use tsudoi_shared::time::FixedClock;

    const WAIT: Duration = Duration::from_secs(1);

    fn no_contacts() -> Arc<MockContactDirectory> {
        let mut contacts = MockContactDirectory::new();
        contacts.expect_contacts_of().returning(|_| Ok(vec![]));
        Arc::new(contacts)
    }

    fn no_messages() -> Arc<MockMessageDirectory> {
        let mut messages = MockMessageDirectory::new();
        messages.expect_sender_of().returning(|_| Ok(None));
        messages.expect_record_sender().returning(|_, _| Ok(()));
        Arc::new(messages)
    }

    /// Contact directory answering each call after the next scripted delay
    struct SlowContacts {
        contacts: HashMap<UserId, Vec<UserId>>,
        delays: Mutex<VecDeque<Duration>>,
    }

    #[async_trait]
    impl ContactDirectory for SlowContacts {
        async fn contacts_of(&self, user_id: UserId) -> Result<Vec<UserId>, LookupError> {
            let delay = self.delays.lock().unwrap().pop_front().unwrap_or_default();
            tokio::time::sleep(delay).await;
            Ok(self.contacts.get(&user_id).cloned().unwrap_or_default())
        }
    }

    fn spawn_hub(
        contacts: Arc<dyn ContactDirectory>,
        messages: Arc<dyn MessageDirectory>,
    ) -> HubHandle {
        HubBuilder::new(contacts, messages)
            .clock(Arc::new(FixedClock::new(1_700_000_000_000)))
            .spawn()
    }

    async fn connect(
        hub: &HubHandle,
        user_id: UserId,
        capacity: usize,
    ) -> (ConnectionId, OutboundReceiver) {
        let (tx, rx) = outbound_queue(capacity);
        let connection = Connection::new(
            ConnectionId::generate(),
            user_id,
            DisplayName::new(format!("user-{}", &user_id.to_string()[..4])).unwrap(),
            Timestamp::new(0),
            tx,
        );
        let id = connection.id();
        hub.register(connection).await.unwrap();
        (id, rx)
    }

    fn message(room: RoomId, sender: UserId, content: &str) -> Event {
        Event::message_delivered(
            room,
            sender,
            MessageId::generate(),
            serde_json::json!({ "content": content }),
            Timestamp::new(1),
        )
    }

    /// Round-trip a query so every previously sent command has been applied
    async fn settle(hub: &HubHandle) -> HubStats {
        hub.stats().await.unwrap()
    }

    #[tokio::test]
    async fn test_room_message_reaches_others_but_not_sender() {
        // テスト項目: A と B が G1 に参加し A が "hi" を送ると、B にだけ 1 件届く
        // given (前提条件):
        let hub = spawn_hub(no_contacts(), no_messages());
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let g1 = RoomId::generate();
        let (a, mut rx_a) = connect(&hub, alice, 8).await;
        let (b, mut rx_b) = connect(&hub, bob, 8).await;
        hub.join_room(a, g1).await;
        hub.join_room(b, g1).await;

        // when (操作):
        hub.publish_event(message(g1, alice, "hi")).await;
        settle(&hub).await;

        // then (期待する結果):
        let received = rx_b.try_recv().unwrap();
        match received.body() {
            EventBody::MessageDelivered { content, .. } => {
                assert_eq!(content["content"], "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_message_fan_out_skips_every_sender_connection() {
        // テスト項目: N 人のルームで送信者以外の全接続に 1 件ずつ届き、送信者の全端末には届かない
        // given (前提条件):
        let hub = spawn_hub(no_contacts(), no_messages());
        let room = RoomId::generate();
        let sender = UserId::generate();
        let (phone, mut rx_phone) = connect(&hub, sender, 8).await;
        let (laptop, mut rx_laptop) = connect(&hub, sender, 8).await;
        hub.join_room(phone, room).await;
        hub.join_room(laptop, room).await;

        let mut others = Vec::new();
        for _ in 0..3 {
            let (id, rx) = connect(&hub, UserId::generate(), 8).await;
            hub.join_room(id, room).await;
            others.push(rx);
        }

        // when (操作):
        hub.publish_event(message(room, sender, "hello")).await;
        settle(&hub).await;

        // then (期待する結果):
        for rx in others.iter_mut() {
            assert!(rx.try_recv().is_ok());
            assert!(rx.try_recv().is_err());
        }
        assert!(rx_phone.try_recv().is_err());
        assert!(rx_laptop.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_unregisters_only_that_connection() {
        // テスト項目: キューが満杯の接続は登録解除され、同じルームの他の接続には届き続ける
        // given (前提条件):
        let hub = spawn_hub(no_contacts(), no_messages());
        let room = RoomId::generate();
        let sender = UserId::generate();
        let (slow, mut rx_slow) = connect(&hub, UserId::generate(), 1).await;
        let (fast, mut rx_fast) = connect(&hub, UserId::generate(), 8).await;
        hub.join_room(slow, room).await;
        hub.join_room(fast, room).await;
        hub.publish_event(message(room, sender, "first")).await;

        // when (操作):
        hub.publish_event(message(room, sender, "second")).await;
        let stats = settle(&hub).await;

        // then (期待する結果):
        assert_eq!(stats.connections, 1);
        assert_eq!(hub.online_users(room).await.unwrap().len(), 1);
        assert!(rx_fast.try_recv().is_ok());
        assert!(rx_fast.try_recv().is_ok());
        // the slow client keeps what it had buffered, then its queue is closed
        assert!(rx_slow.recv().await.is_some());
        assert!(rx_slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_typing_start_then_stop_keep_order() {
        // テスト項目: 同じユーザーの typing-start → typing-stop が他の接続に順番通り届く
        // given (前提条件):
        let hub = spawn_hub(no_contacts(), no_messages());
        let room = RoomId::generate();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let (a, mut rx_a) = connect(&hub, alice, 8).await;
        let (b, mut rx_b) = connect(&hub, bob, 8).await;
        hub.join_room(a, room).await;
        hub.join_room(b, room).await;
        let name = DisplayName::new("alice".to_string()).unwrap();

        // when (操作):
        hub.submit_client_event(a, Event::typing(room, alice, name.clone(), true, Timestamp::new(1)))
            .await;
        hub.submit_client_event(a, Event::typing(room, alice, name, false, Timestamp::new(2)))
            .await;
        settle(&hub).await;

        // then (期待する結果):
        assert_eq!(rx_b.try_recv().unwrap().kind(), crate::domain::EventKind::TypingStart);
        assert_eq!(rx_b.try_recv().unwrap().kind(), crate::domain::EventKind::TypingStop);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_client_event_for_unjoined_room_is_dropped() {
        // テスト項目: 参加していないルームへのクライアントイベントは破棄される
        // given (前提条件):
        let hub = spawn_hub(no_contacts(), no_messages());
        let room = RoomId::generate();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let (a, _rx_a) = connect(&hub, alice, 8).await;
        let (b, mut rx_b) = connect(&hub, bob, 8).await;
        hub.join_room(b, room).await;
        let name = DisplayName::new("alice".to_string()).unwrap();

        // when (操作):
        hub.submit_client_event(a, Event::typing(room, alice, name, true, Timestamp::new(1)))
            .await;
        settle(&hub).await;

        // then (期待する結果):
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_register_notifies_online_contacts() {
        // テスト項目: A の接続時に、オンラインの連絡先 B にプレゼンス online が届く
        // given (前提条件):
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let mut contacts = MockContactDirectory::new();
        contacts
            .expect_contacts_of()
            .returning(move |user| Ok(if user == alice { vec![bob] } else { vec![alice] }));
        let hub = spawn_hub(Arc::new(contacts), no_messages());
        let (_b, mut rx_b) = connect(&hub, bob, 8).await;

        // when (操作):
        let (_a, _rx_a) = connect(&hub, alice, 8).await;

        // then (期待する結果):
        let event = tokio::time::timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(event.kind(), crate::domain::EventKind::PresenceOnline);
        assert_eq!(event.user_id(), alice);
    }

    #[tokio::test]
    async fn test_second_device_disconnect_keeps_user_online() {
        // テスト項目: 2 台接続中に 1 台が切断しても offline は通知されず、最後の切断で通知される
        // given (前提条件):
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let mut contacts = MockContactDirectory::new();
        contacts
            .expect_contacts_of()
            .returning(move |user| Ok(if user == alice { vec![bob] } else { vec![] }));
        let hub = spawn_hub(Arc::new(contacts), no_messages());
        let (_b, mut rx_b) = connect(&hub, bob, 8).await;
        let (phone, _rx_phone) = connect(&hub, alice, 8).await;
        let (laptop, _rx_laptop) = connect(&hub, alice, 8).await;
        let online = tokio::time::timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(online.kind(), crate::domain::EventKind::PresenceOnline);

        // when (操作):
        hub.unregister(phone).await;
        settle(&hub).await;

        // then (期待する結果):
        assert!(hub.is_user_online(alice).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx_b.try_recv().is_err());

        hub.unregister(laptop).await;
        let offline = tokio::time::timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(offline.kind(), crate::domain::EventKind::PresenceOffline);
        assert!(!hub.is_user_online(alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_contact_lookup_failure_is_not_fatal() {
        // テスト項目: 連絡先の取得に失敗してもプレゼンス通知がスキップされるだけでハブは動き続ける
        // given (前提条件):
        let mut contacts = MockContactDirectory::new();
        contacts
            .expect_contacts_of()
            .returning(|_| Err(LookupError::Unavailable("db down".to_string())));
        let hub = spawn_hub(Arc::new(contacts), no_messages());
        let room = RoomId::generate();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let (b, mut rx_b) = connect(&hub, bob, 8).await;

        // when (操作):
        let (_a, _rx_a) = connect(&hub, alice, 8).await;
        hub.join_room(b, room).await;
        hub.publish_event(message(room, alice, "still works")).await;
        settle(&hub).await;

        // then (期待する結果):
        let event = rx_b.try_recv().unwrap();
        assert_eq!(event.kind(), crate::domain::EventKind::MessageDelivered);
        assert_eq!(settle(&hub).await.connections, 2);
    }

    #[tokio::test]
    async fn test_read_receipt_goes_to_message_sender_only() {
        // テスト項目: 既読通知は参照先メッセージの送信者の接続にだけ届く
        // given (前提条件):
        let (alice, bob, carol) = (UserId::generate(), UserId::generate(), UserId::generate());
        let message_id = MessageId::generate();
        let mut messages = MockMessageDirectory::new();
        messages
            .expect_sender_of()
            .returning(move |id| Ok((id == message_id).then_some(alice)));
        messages.expect_record_sender().returning(|_, _| Ok(()));
        let hub = spawn_hub(no_contacts(), Arc::new(messages));
        let room = RoomId::generate();
        let (a, mut rx_a) = connect(&hub, alice, 8).await;
        let (b, _rx_b) = connect(&hub, bob, 8).await;
        let (c, mut rx_c) = connect(&hub, carol, 8).await;
        for id in [a, b, c] {
            hub.join_room(id, room).await;
        }

        // when (操作):
        hub.submit_client_event(b, Event::read_receipt(room, bob, message_id, Timestamp::new(5)))
            .await;

        // then (期待する結果):
        let receipt = tokio::time::timeout(WAIT, rx_a.recv()).await.unwrap().unwrap();
        assert_eq!(receipt.kind(), crate::domain::EventKind::ReadReceipt);
        assert_eq!(receipt.user_id(), bob);
        settle(&hub).await;
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_room_for_user_covers_all_devices() {
        // テスト項目: ユーザー単位の参加で、そのユーザーの全接続がルームに参加する
        // given (前提条件):
        let hub = spawn_hub(no_contacts(), no_messages());
        let room = RoomId::generate();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let (_p, mut rx_phone) = connect(&hub, bob, 8).await;
        let (_l, mut rx_laptop) = connect(&hub, bob, 8).await;

        // when (操作):
        hub.join_room_for_user(bob, room).await;
        hub.publish_event(message(room, alice, "to both devices")).await;
        settle(&hub).await;

        // then (期待する結果):
        assert!(rx_phone.try_recv().is_ok());
        assert!(rx_laptop.try_recv().is_ok());
        assert_eq!(hub.online_users(room).await.unwrap(), vec![bob]);

        hub.leave_room_for_user(bob, room).await;
        assert!(hub.online_users(room).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_twice_is_noop() {
        // テスト項目: 同じ接続を 2 回登録解除しても問題なく処理される（冪等性）
        // given (前提条件):
        let hub = spawn_hub(no_contacts(), no_messages());
        let (a, mut rx_a) = connect(&hub, UserId::generate(), 8).await;

        // when (操作):
        hub.unregister(a).await;
        hub.unregister(a).await;
        let stats = settle(&hub).await;

        // then (期待する結果):
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.online_users, 0);
        assert!(rx_a.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_only_local_events_are_relayed() {
        // テスト項目: ローカル起点のイベントだけがブリッジに渡され、中継されたイベントは再送されない
        // given (前提条件):
        let (relay_tx, mut relay_rx) = mpsc::channel(8);
        let hub = HubBuilder::new(no_contacts(), no_messages())
            .relay(relay_tx)
            .spawn();
        let room = RoomId::generate();
        let sender = UserId::generate();

        // when (操作):
        hub.publish_event(message(room, sender, "local")).await;
        hub.publish_relayed(message(room, sender, "remote")).await;
        settle(&hub).await;

        // then (期待する結果):
        let relayed = relay_rx.try_recv().unwrap();
        match relayed.body() {
            EventBody::MessageDelivered { content, .. } => assert_eq!(content["content"], "local"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(relay_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_offline_lookup_does_not_overtake_reconnect() {
        // テスト項目: offline の連絡先解決が遅くても、直後の再接続の online より先に届く
        // given (前提条件):
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let contacts = SlowContacts {
            contacts: HashMap::from([(alice, vec![bob]), (bob, vec![alice])]),
            // bob 登録, alice 登録, alice 切断（遅い）, alice 再接続
            delays: Mutex::new(VecDeque::from([
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::ZERO,
            ])),
        };
        let hub = spawn_hub(Arc::new(contacts), no_messages());
        let (_b, mut rx_b) = connect(&hub, bob, 8).await;
        let (first, _rx_first) = connect(&hub, alice, 8).await;

        // when (操作):
        hub.unregister(first).await;
        let (_second, _rx_second) = connect(&hub, alice, 8).await;

        // then (期待する結果):
        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
            assert_eq!(event.user_id(), alice);
            seen.push(event.kind());
        }
        assert_eq!(
            seen,
            vec![
                EventKind::PresenceOnline,
                EventKind::PresenceOffline,
                EventKind::PresenceOnline
            ]
        );
        assert!(hub.is_user_online(alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_relayed_message_sender_routes_read_receipt() {
        // テスト項目: 他インスタンスから中継されたメッセージの送信者にも既読通知が届く
        // given (前提条件):
        let hub = spawn_hub(no_contacts(), Arc::new(InMemoryMessageDirectory::new()));
        let room = RoomId::generate();
        let (alice, bob) = (UserId::generate(), UserId::generate());
        let (a, mut rx_a) = connect(&hub, alice, 8).await;
        let (b, mut rx_b) = connect(&hub, bob, 8).await;
        hub.join_room(a, room).await;
        hub.join_room(b, room).await;
        let message_id = MessageId::generate();
        hub.publish_relayed(Event::message_delivered(
            room,
            alice,
            message_id,
            serde_json::json!({ "content": "posted elsewhere" }),
            Timestamp::new(1),
        ))
        .await;
        let delivered = tokio::time::timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(delivered.kind(), EventKind::MessageDelivered);

        // when (操作):
        hub.submit_client_event(b, Event::read_receipt(room, bob, message_id, Timestamp::new(2)))
            .await;

        // then (期待する結果):
        let receipt = tokio::time::timeout(WAIT, rx_a.recv()).await.unwrap().unwrap();
        assert_eq!(receipt.kind(), EventKind::ReadReceipt);
        assert_eq!(receipt.user_id(), bob);
    }
}
