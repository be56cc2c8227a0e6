//! InMemory EventBus 実装
//!
//! `tokio::sync::broadcast` を共有チャネルとして使用します。
//! 同一プロセス内の複数ハブ（テスト）や単一インスタンス構成で使います。

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::{EventBus, EventBusError, EventBusSubscription};

pub struct InMemoryEventBus {
    sender: broadcast::Sender<String>,
}

impl InMemoryEventBus {
    /// `capacity`: 購読者ごとに保持できる未読ペイロード数
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 同期版の publish。購読者がいない場合は破棄されます
    pub fn send(&self, payload: String) {
        let _ = self.sender.send(payload);
    }

    /// 現在の購読者数
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, payload: String) -> Result<(), EventBusError> {
        self.send(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn EventBusSubscription>, EventBusError> {
        Ok(Box::new(InMemorySubscription {
            receiver: self.sender.subscribe(),
        }))
    }
}

struct InMemorySubscription {
    receiver: broadcast::Receiver<String>,
}

#[async_trait]
impl EventBusSubscription for InMemorySubscription {
    async fn next_payload(&mut self) -> Result<String, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Ok(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Bridge subscriber lagged, payloads dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EventBusError::Closed),
            }
        }
    }
}
