#![allow(dead_code)]

use chat_common::{AddressInfo, Envelope, SymmetricKey};
use chatc::config::ClientConfig;
use chatc::connection::{chat_connection_manager, ChatCommand};
use chatc::events::{ChatEvent, EventBus};
use chatc::key_exchange::{wrap_session_key, PreSharedKey};
use chatc::session::SessionContext;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const SECRET: &str = "0123456789abcdefghijklmnopqrstuv";
pub const OWN_IP: &str = "192.0.2.10";

pub fn psk() -> PreSharedKey {
    PreSharedKey::new(SECRET).unwrap()
}

pub fn test_config(server: String, delay_ms: u64) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.server = server;
    config.reconnect.delay_ms = delay_ms;
    config.keepalive.interval_s = 30;
    config.client.ip = OWN_IP.to_string();
    config
}

/// A running client connection task plus the handles a test drives it with.
pub struct TestClient {
    pub commands: mpsc::Sender<ChatCommand>,
    pub events: broadcast::Receiver<ChatEvent>,
    pub task: JoinHandle<()>,
}

impl TestClient {
    pub fn spawn(config: ClientConfig) -> Self {
        let bus = EventBus::new(256);
        let events = bus.subscribe();
        let own = AddressInfo {
            ip: OWN_IP.to_string(),
            ..AddressInfo::default()
        };
        let ctx = SessionContext::new(psk(), own, "You", bus);
        let (commands, rx) = mpsc::channel(16);
        let task = tokio::spawn(chat_connection_manager(Arc::new(config), ctx, rx));
        Self {
            commands,
            events,
            task,
        }
    }

    /// Waits for the first event matching `pred`.
    pub async fn wait_for(&mut self, pred: impl Fn(&ChatEvent) -> bool) -> ChatEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

pub async fn start_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// Server side of one accepted chat connection.
pub struct ServerConn {
    pub ws: WebSocketStream<TcpStream>,
    pub key: SymmetricKey,
}

impl ServerConn {
    /// Accepts one client and completes the key exchange.
    pub async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut conn = Self {
            ws,
            key: SymmetricKey::generate(),
        };

        assert_eq!(
            conn.recv_plain().await,
            Envelope::ClientIp {
                ip: OWN_IP.to_string()
            }
        );
        assert_eq!(conn.recv_plain().await, Envelope::RequestSessionKey);

        let reply = Envelope::SessionKey {
            session_key: wrap_session_key(&conn.key, &psk()),
        };
        conn.send_text(reply.to_json().unwrap()).await;
        conn
    }

    pub async fn send_text(&mut self, text: String) {
        self.ws.send(Message::Text(text)).await.unwrap();
    }

    pub async fn send_sealed(&mut self, envelope: &Envelope) {
        let blob = envelope.seal(&self.key).unwrap();
        self.send_text(blob).await;
    }

    async fn next_text(&mut self) -> String {
        let next = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return text,
                    Some(Ok(_)) => {}
                    other => panic!("expected a text frame, got {other:?}"),
                }
            }
        });
        next.await.expect("timed out waiting for a frame")
    }

    pub async fn recv_plain(&mut self) -> Envelope {
        let text = self.next_text().await;
        Envelope::from_json(&text).unwrap()
    }

    pub async fn recv_sealed(&mut self) -> Envelope {
        let text = self.next_text().await;
        Envelope::open(&text, &self.key).unwrap()
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
