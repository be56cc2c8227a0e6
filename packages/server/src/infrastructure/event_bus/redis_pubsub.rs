//! Redis pub/sub event bus.
//!
//! Every instance publishes bridge envelopes on one Redis channel and
//! subscribes to the same channel, so instances only need to know the Redis
//! URL, not each other.
//!
//! Nothing connects at construction time. The publishing connection is opened
//! on first use and reopened after a failure; subscriptions open their own
//! connection, and the bridge retries them when Redis is unreachable.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::{AsyncCommands, Client, Msg, aio::MultiplexedConnection};
use tokio::sync::Mutex;

use crate::domain::{EventBus, EventBusError, EventBusSubscription};

pub const DEFAULT_REDIS_CHANNEL: &str = "tsudoi:bridge";

pub struct RedisEventBus {
    client: Client,
    channel: String,
    publisher: Mutex<Option<MultiplexedConnection>>,
}

impl RedisEventBus {
    /// `url`: e.g. `redis://127.0.0.1:6379`
    pub fn new(url: &str, channel: impl Into<String>) -> Result<Self, EventBusError> {
        let client = Client::open(url).map_err(|e| EventBusError::InvalidAddress(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
            publisher: Mutex::new(None),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, EventBusError> {
        let mut publisher = self.publisher.lock().await;
        if let Some(connection) = publisher.as_ref() {
            return Ok(connection.clone());
        }
        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventBusError::PublishFailed(e.to_string()))?;
        tracing::info!(channel = %self.channel, "Connected to Redis for publishing");
        *publisher = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, payload: String) -> Result<(), EventBusError> {
        let mut connection = self.publisher().await?;
        let result: redis::RedisResult<i64> =
            connection.publish(self.channel.as_str(), payload).await;
        match result {
            Ok(receivers) => {
                tracing::debug!(channel = %self.channel, receivers, "Published to Redis");
                Ok(())
            }
            Err(e) => {
                // Reconnect on the next publish
                *self.publisher.lock().await = None;
                Err(EventBusError::PublishFailed(e.to_string()))
            }
        }
    }

    async fn subscribe(&self) -> Result<Box<dyn EventBusSubscription>, EventBusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| EventBusError::SubscribeFailed(e.to_string()))?;
        pubsub
            .subscribe(self.channel.as_str())
            .await
            .map_err(|e| EventBusError::SubscribeFailed(e.to_string()))?;
        tracing::info!(channel = %self.channel, "Subscribed to Redis channel");

        Ok(Box::new(RedisSubscription {
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }
}

struct RedisSubscription {
    messages: Pin<Box<dyn Stream<Item = Msg> + Send>>,
}

#[async_trait]
impl EventBusSubscription for RedisSubscription {
    async fn next_payload(&mut self) -> Result<String, EventBusError> {
        loop {
            let Some(message) = self.messages.next().await else {
                return Err(EventBusError::Closed);
            };
            match message.get_payload::<String>() {
                Ok(payload) => return Ok(payload),
                Err(e) => {
                    tracing::warn!("Ignoring non-text Redis payload: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Nothing listens on port 1, so every connection attempt is refused.
    const UNREACHABLE: &str = "redis://127.0.0.1:1";

    #[test]
    fn test_invalid_url_is_rejected() {
        // テスト項目: Redis の URL として不正な文字列はエラーになる
        // given (前提条件):
        let url = "not a redis url";

        // when (操作):
        let result = RedisEventBus::new(url, DEFAULT_REDIS_CHANNEL);

        // then (期待する結果):
        assert!(matches!(result, Err(EventBusError::InvalidAddress(_))));
    }

    #[test]
    fn test_construction_does_not_connect() {
        // テスト項目: 生成時には接続せず、Redis が落ちていても生成できる
        // given (前提条件):
        let url = UNREACHABLE;

        // when (操作):
        let bus = RedisEventBus::new(url, "custom").unwrap();

        // then (期待する結果):
        assert_eq!(bus.channel(), "custom");
    }

    #[tokio::test]
    async fn test_unreachable_redis_fails_publish_and_subscribe() {
        // テスト項目: Redis に接続できない場合、発行・購読はそれぞれのエラーを返す
        // given (前提条件):
        let bus = RedisEventBus::new(UNREACHABLE, DEFAULT_REDIS_CHANNEL).unwrap();

        // when (操作):
        let published = bus.publish("payload".to_string()).await;
        let subscribed = bus.subscribe().await;

        // then (期待する結果):
        assert!(matches!(published, Err(EventBusError::PublishFailed(_))));
        assert!(matches!(subscribed, Err(EventBusError::SubscribeFailed(_))));
    }
}
