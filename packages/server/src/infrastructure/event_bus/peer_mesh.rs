//! Peer-mesh event bus.
//!
//! Every instance exposes `GET /internal/bridge` and keeps one outgoing
//! WebSocket link per configured peer. Publishing writes the payload to every
//! link; payloads peers push into our bridge endpoint are handed to
//! [`PeerMeshEventBus::inject`] and reach local subscribers.
//!
//! Links authenticate with the shared internal token as a bearer credential.
//! Links reconnect forever at a fixed interval. While a link is down its queue
//! keeps filling up to capacity, after which publishes to that peer are dropped.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderValue, header::AUTHORIZATION},
        protocol::Message,
    },
};

use crate::domain::{EventBus, EventBusError, EventBusSubscription};

use super::inmemory::InMemoryEventBus;

const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_LINK_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct PeerMeshOptions {
    /// Bridge endpoints of the other instances, e.g. `ws://10.0.0.2:8080/internal/bridge`
    pub peers: Vec<String>,
    pub link_capacity: usize,
    pub reconnect_interval: Duration,
    /// Sent as `Authorization: Bearer <token>` when opening a link
    pub token: Option<String>,
}

impl PeerMeshOptions {
    pub fn new(peers: Vec<String>) -> Self {
        Self {
            peers,
            link_capacity: DEFAULT_LINK_CAPACITY,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

struct PeerLink {
    url: String,
    queue: mpsc::Sender<String>,
}

pub struct PeerMeshEventBus {
    links: Vec<PeerLink>,
    inbound: InMemoryEventBus,
}

impl PeerMeshEventBus {
    /// Start one link task per peer on the current runtime.
    pub fn spawn(options: PeerMeshOptions) -> Arc<Self> {
        let links = options
            .peers
            .into_iter()
            .map(|url| {
                let (queue, rx) = mpsc::channel(options.link_capacity.max(1));
                tokio::spawn(run_link(
                    url.clone(),
                    options.token.clone(),
                    rx,
                    options.reconnect_interval,
                ));
                PeerLink { url, queue }
            })
            .collect();

        Arc::new(Self {
            links,
            inbound: InMemoryEventBus::new(options.link_capacity),
        })
    }

    /// Hand a payload received from a peer to local subscribers
    pub fn inject(&self, payload: String) {
        self.inbound.send(payload);
    }

    pub fn peer_count(&self) -> usize {
        self.links.len()
    }
}

#[async_trait]
impl EventBus for PeerMeshEventBus {
    async fn publish(&self, payload: String) -> Result<(), EventBusError> {
        let mut failed = Vec::new();
        for link in &self.links {
            match link.queue.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => failed.push(link.url.as_str()),
                Err(mpsc::error::TrySendError::Closed(_)) => failed.push(link.url.as_str()),
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(EventBusError::PublishFailed(format!(
                "peer link unavailable: {}",
                failed.join(", ")
            )))
        }
    }

    async fn subscribe(&self) -> Result<Box<dyn EventBusSubscription>, EventBusError> {
        self.inbound.subscribe().await
    }
}

/// Keep one outgoing link alive, forwarding queued payloads as text frames
async fn run_link(
    url: String,
    token: Option<String>,
    mut queue: mpsc::Receiver<String>,
    reconnect_interval: Duration,
) {
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let request = match link_request(&url, token.as_deref()) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Invalid bridge peer {}: {}", url, e);
                return;
            }
        };
        tracing::debug!("Connecting to bridge peer {} (attempt {})", url, attempts);

        match connect_async(request).await {
            Ok((stream, _)) => {
                tracing::info!("Connected to bridge peer {}", url);
                attempts = 0;
                let (mut write, mut read) = stream.split();

                loop {
                    tokio::select! {
                        payload = queue.recv() => {
                            let Some(payload) = payload else {
                                let _ = write.send(Message::Close(None)).await;
                                tracing::debug!("Bridge link to {} closed", url);
                                return;
                            };
                            if let Err(e) = write.send(Message::Text(payload.into())).await {
                                tracing::warn!("Failed to write to bridge peer {}: {}", url, e);
                                break;
                            }
                        }
                        incoming = read.next() => match incoming {
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::warn!("Bridge peer {} closed the link", url);
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::warn!("Bridge link to {} failed: {}", url, e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to connect to bridge peer {}: {}", url, e);
            }
        }

        if queue.is_closed() {
            return;
        }
        tracing::info!(
            "Reconnecting to bridge peer {} in {:?}",
            url,
            reconnect_interval
        );
        tokio::time::sleep(reconnect_interval).await;
    }
}

fn link_request(url: &str, token: Option<&str>) -> Result<Request, String> {
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| e.to_string())?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_inject_reaches_local_subscribers() {
        // テスト項目: ピアから受け取ったペイロードがローカルの購読者に届く
        // given (前提条件):
        let bus = PeerMeshEventBus::spawn(PeerMeshOptions::new(vec![]));
        let mut sub = bus.subscribe().await.unwrap();

        // when (操作):
        bus.inject("from peer".to_string());

        // then (期待する結果):
        assert_eq!(sub.next_payload().await.unwrap(), "from peer");
    }

    #[tokio::test]
    async fn test_publish_without_peers_is_ok() {
        // テスト項目: ピアが未設定なら発行は何もせず成功する
        // given (前提条件):
        let bus = PeerMeshEventBus::spawn(PeerMeshOptions::new(vec![]));

        // when (操作):
        let result = bus.publish("payload".to_string()).await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert_eq!(bus.peer_count(), 0);
    }

    #[test]
    fn test_link_request_carries_bearer_token() {
        // テスト項目: トークンを設定したリンクは Authorization ヘッダー付きで接続する
        // given (前提条件):
        let url = "ws://127.0.0.1:8080/internal/bridge";

        // when (操作):
        let with_token = link_request(url, Some("secret")).unwrap();
        let without_token = link_request(url, None).unwrap();

        // then (期待する結果):
        assert_eq!(with_token.headers()[AUTHORIZATION], "Bearer secret");
        assert!(without_token.headers().get(AUTHORIZATION).is_none());
        assert!(link_request("not a url", None).is_err());
    }

    #[tokio::test]
    async fn test_publish_is_written_to_peer_link() {
        // テスト項目: 発行したペイロードがピアへの WebSocket リンクにテキストフレームで書き込まれる
        // given (前提条件):
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return text.to_string(),
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected frame: {other:?}"),
                }
            }
        });
        let bus = PeerMeshEventBus::spawn(PeerMeshOptions::new(vec![format!(
            "ws://{addr}/internal/bridge"
        )]));

        // when (操作):
        bus.publish("envelope".to_string()).await.unwrap();

        // then (期待する結果):
        let received = tokio::time::timeout(Duration::from_secs(5), peer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, "envelope");
    }
}
