//! Duplex named-event channel to the coordinator, carried over a WebSocket.
//!
//! Each frame is one JSON [`Envelope`]. `emit` is fire-and-forget; inbound
//! envelopes are dispatched to the handlers subscribed to their event name,
//! in the order frames arrive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::{Context, anyhow};
use fleetdeck_core::protocol::Envelope;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use url::Url;

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);
const OUTBOUND_QUEUE: usize = 256;

pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub url: Url,
    pub connect_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            url: Url::parse(url).with_context(|| format!("parse coordinator url: {url}"))?,
            connect_timeout: Duration::from_secs(10),
        })
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<(u64, EventHandler)>>,
}

impl Registry {
    fn remove(&mut self, event: &str, id: u64) {
        if let Some(list) = self.handlers.get_mut(event) {
            list.retain(|(hid, _)| *hid != id);
            if list.is_empty() {
                self.handlers.remove(event);
            }
        }
    }
}

/// Removes its handler when unsubscribed or dropped.
pub struct Subscription {
    id: u64,
    event: String,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut reg) = registry.lock() {
                reg.remove(&self.event, self.id);
            }
        }
    }
}

#[derive(Clone)]
pub struct CoordinatorClient {
    out_tx: mpsc::Sender<Message>,
    registry: Arc<Mutex<Registry>>,
    closed_rx: watch::Receiver<bool>,
}

impl CoordinatorClient {
    pub async fn connect(cfg: CoordinatorConfig) -> anyhow::Result<Self> {
        let req = cfg
            .url
            .as_str()
            .into_client_request()
            .context("build websocket request")?;

        // Connect with a hard timeout so we can't hang on a bad network.
        let (ws, _resp) =
            tokio::time::timeout(cfg.connect_timeout, tokio_tungstenite::connect_async(req))
                .await
                .map_err(|_| anyhow!("coordinator connect timed out"))?
                .context("connect coordinator websocket")?;

        let (mut ws_write, mut ws_read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);
        let registry: Arc<Mutex<Registry>> = Arc::default();

        // Writer task: the reader never awaits socket writes.
        let writer_closed = closed_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                let res = tokio::time::timeout(WS_SEND_TIMEOUT, ws_write.send(msg)).await;
                if !matches!(res, Ok(Ok(()))) {
                    log::warn!("coordinator write failed; marking channel closed");
                    break;
                }
                if is_close {
                    break;
                }
            }
            writer_closed.send_replace(true);
        });

        let reader_registry = registry.clone();
        let pong_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                let text = match msg {
                    Ok(Message::Text(t)) => t.to_string(),
                    Ok(Message::Binary(b)) => String::from_utf8_lossy(&b).to_string(),
                    Ok(Message::Ping(p)) => {
                        if pong_tx.try_send(Message::Pong(p)).is_err() {
                            log::warn!("coordinator pong could not be queued");
                            break;
                        }
                        continue;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        log::warn!("coordinator read failed: {e}");
                        break;
                    }
                };
                dispatch(&reader_registry, &text);
            }
            log::info!("coordinator channel closed");
            closed_tx.send_replace(true);
        });

        Ok(Self {
            out_tx,
            registry,
            closed_rx,
        })
    }

    /// Queues one event for the coordinator. Fails only when the channel is
    /// closed or the outbound queue is saturated.
    pub fn emit(&self, event: &str, payload: Value) -> anyhow::Result<()> {
        if self.is_closed() {
            return Err(anyhow!("coordinator channel closed"));
        }
        let env = Envelope {
            event: event.to_string(),
            data: payload,
        };
        let text = serde_json::to_string(&env).context("encode envelope")?;
        self.out_tx
            .try_send(Message::Text(text.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => anyhow!("coordinator outbound queue full"),
                mpsc::error::TrySendError::Closed(_) => anyhow!("coordinator channel closed"),
            })
    }

    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = match self.registry.lock() {
            Ok(mut reg) => {
                reg.next_id += 1;
                let id = reg.next_id;
                reg.handlers
                    .entry(event.to_string())
                    .or_default()
                    .push((id, Arc::new(handler)));
                id
            }
            Err(_) => {
                log::error!("coordinator registry poisoned; subscription to {event} ignored");
                0
            }
        };
        Subscription {
            id,
            event: event.to_string(),
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves once the channel has closed (remote close, read/write failure).
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub async fn close(&self) {
        let _ = self.out_tx.send(Message::Close(None)).await;
    }
}

fn dispatch(registry: &Mutex<Registry>, text: &str) {
    let env: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("dropping unparseable coordinator frame: {e}");
            return;
        }
    };

    // Clone the handler list so handlers run without the registry lock held.
    let handlers: Vec<EventHandler> = match registry.lock() {
        Ok(reg) => reg
            .handlers
            .get(&env.event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default(),
        Err(_) => return,
    };

    if handlers.is_empty() {
        log::debug!("no subscribers for coordinator event {}", env.event);
        return;
    }
    for h in handlers {
        h(env.data.clone());
    }
}
