//! InMemory MessageDirectory 実装
//!
//! ハブが配信したメッセージ（ローカル・他インスタンス経由の両方）の送信者を記録し、
//! 既読通知の宛先解決に使います。
//!
//! 容量を超えると、最も長く参照されていないメッセージから削除します（LRU）。

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::domain::{LookupError, MessageDirectory, MessageId, UserId};

/// Default number of message senders kept in memory
pub const DEFAULT_MESSAGE_CAPACITY: usize = 100_000;

pub struct InMemoryMessageDirectory {
    // front = least recently used
    senders: Arc<Mutex<IndexMap<MessageId, UserId>>>,
    capacity: usize,
}

impl Default for InMemoryMessageDirectory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MESSAGE_CAPACITY)
    }
}

impl InMemoryMessageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            senders: Arc::new(Mutex::new(IndexMap::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    /// Remember who sent `message_id`, evicting the least recently used entry when full
    pub async fn record(&self, message_id: MessageId, sender: UserId) {
        let mut senders = self.senders.lock().await;
        senders.shift_remove(&message_id);
        if senders.len() >= self.capacity
            && let Some((evicted, _)) = senders.shift_remove_index(0)
        {
            tracing::debug!(message_id = %evicted, "Message sender evicted");
        }
        senders.insert(message_id, sender);
    }

    pub async fn recorded_count(&self) -> usize {
        self.senders.lock().await.len()
    }
}

#[async_trait]
impl MessageDirectory for InMemoryMessageDirectory {
    async fn sender_of(&self, message_id: MessageId) -> Result<Option<UserId>, LookupError> {
        let mut senders = self.senders.lock().await;
        let Some(index) = senders.get_index_of(&message_id) else {
            return Ok(None);
        };
        let last = senders.len() - 1;
        senders.move_index(index, last);
        Ok(senders.get(&message_id).copied())
    }

    async fn record_sender(&self, message_id: MessageId, sender: UserId) -> Result<(), LookupError> {
        self.record(message_id, sender).await;
        Ok(())
    }
}
