use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use shared::{domain::ChatroomId, protocol::ChannelEvent};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

const TRANSPORT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

/// What the single active subscription is bound to: one chatroom, or the
/// channel-agnostic global feed used for cross-conversation unread badges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope {
    Chatroom(ChatroomId),
    Global,
}

/// Push notification from the transport. State changes are explicit events;
/// the lifecycle manager reacts to them and never polls.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Opened,
    Event(ChannelEvent),
    Closed,
    Errored(String),
}

/// Abstract bidirectional event channel collaborator.
///
/// A `subscribe` call replaces any previous subscription; implementations
/// keep at most one live at a time.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn subscribe(
        &self,
        scope: SubscriptionScope,
        auth_token: &str,
    ) -> Result<mpsc::Receiver<TransportEvent>>;

    async fn unsubscribe(&self);
}

/// Pure-state tracker for the subscription lifecycle.
///
/// Transitions: `Idle -> Connecting -> Connected -> Idle`. The async
/// subscribe call itself happens outside this type so no lock is held
/// across it.
#[derive(Debug, Default)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    scope: Option<SubscriptionScope>,
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn scope(&self) -> Option<&SubscriptionScope> {
        self.scope.as_ref()
    }

    pub fn begin_connect(&mut self, scope: SubscriptionScope) {
        self.state = ConnectionState::Connecting;
        self.scope = Some(scope);
    }

    pub fn confirm_connected(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
        }
    }

    pub fn reset_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.scope = None;
    }
}

/// WebSocket-backed [`EventChannel`] over `tokio-tungstenite`.
pub struct WsEventChannel {
    server_url: String,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsEventChannel {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            reader: Mutex::new(None),
        }
    }

    fn ws_url(&self, scope: &SubscriptionScope, auth_token: &str) -> Result<String> {
        let base = if self.server_url.starts_with("https://") {
            self.server_url.replacen("https://", "wss://", 1)
        } else if self.server_url.starts_with("http://") {
            self.server_url.replacen("http://", "ws://", 1)
        } else {
            return Err(anyhow!("server_url must start with http:// or https://"));
        };
        Ok(match scope {
            SubscriptionScope::Chatroom(chatroom_id) => {
                format!("{base}/ws/chatrooms/{chatroom_id}?token={auth_token}")
            }
            SubscriptionScope::Global => format!("{base}/ws/global?token={auth_token}"),
        })
    }
}

#[async_trait]
impl EventChannel for WsEventChannel {
    async fn subscribe(
        &self,
        scope: SubscriptionScope,
        auth_token: &str,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        self.unsubscribe().await;

        let ws_url = self.ws_url(&scope, auth_token)?;
        let (ws_stream, _) = connect_async(&ws_url).await?;
        let (_, mut ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(TRANSPORT_QUEUE_CAPACITY);

        let handle = tokio::spawn(async move {
            let _ = tx.send(TransportEvent::Opened).await;
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ChannelEvent>(&text) {
                        Ok(event) => {
                            if tx.send(TransportEvent::Event(event)).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            warn!("invalid channel event frame: {err}");
                            let _ = tx
                                .send(TransportEvent::Errored(format!(
                                    "invalid channel event: {err}"
                                )))
                                .await;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = tx
                            .send(TransportEvent::Errored(format!(
                                "websocket receive failed: {err}"
                            )))
                            .await;
                        break;
                    }
                }
            }
            debug!("websocket reader finished");
            let _ = tx.send(TransportEvent::Closed).await;
        });

        if let Some(previous) = self.reader.lock().await.replace(handle) {
            previous.abort();
        }

        Ok(rx)
    }

    async fn unsubscribe(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
    }
}
