use crate::types;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

pub(crate) mod config;
mod consts;
mod utils;

pub type ClientTx = tokio::sync::mpsc::Sender<types::ClientEvent>;
type ServerTx = tokio::sync::broadcast::Sender<types::ServerEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<types::ServerEvent>;

/// A websocket connection to the voice-conversation service.
///
/// Outgoing events are queued on an mpsc channel and written by a dedicated
/// task; incoming events are decoded and broadcast to every subscriber.
pub struct Client {
    capacity: usize,
    config: config::Config,
    c_tx: Option<ClientTx>,
    s_tx: Option<ServerTx>,
}

impl Client {
    fn new(capacity: usize, config: config::Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_tx: None,
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.c_tx.is_some() {
            return Err(anyhow::anyhow!("already connected"));
        }

        let request = utils::build_request(&self.config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<types::ClientEvent>(self.capacity);
        let (s_tx, _) = tokio::sync::broadcast::channel(self.capacity);

        self.c_tx = Some(c_tx);
        self.s_tx = Some(s_tx.clone());

        tokio::spawn(async move {
            while let Some(event) = c_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize event: {}", e);
                    }
                }
            }
            // Every sender is gone; close the socket politely.
            if let Err(e) = write.close().await {
                tracing::debug!("failed to close websocket: {}", e);
            }
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        let _ = s_tx.send(types::ServerEvent::Close {
                            reason: Some(e.to_string()),
                        });
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<types::ServerEvent>(&text) {
                        Ok(event) => {
                            tracing::debug!("received event: {:?}", event);
                            if s_tx.send(event).is_err() {
                                tracing::debug!("no subscribers for server event");
                            }
                        }
                        Err(e) => {
                            // Vendors add event kinds freely; unknown ones are skipped.
                            let kind = serde_json::from_str::<serde_json::Value>(&text)
                                .ok()
                                .and_then(|json| {
                                    json.get("type").and_then(|v| v.as_str()).map(str::to_string)
                                });
                            tracing::debug!(
                                "skipping event type={}: {}",
                                kind.as_deref().unwrap_or("unknown"),
                                e
                            );
                        }
                    },
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message of {} bytes", bin.len());
                    }
                    Message::Close(reason) => {
                        tracing::info!("connection closed: {:?}", reason);
                        let close_event = types::ServerEvent::Close {
                            reason: reason.map(|v| format!("{:?}", v)),
                        };
                        if let Err(e) = s_tx.send(close_event) {
                            tracing::error!("failed to send close event: {}", e);
                        }
                        break;
                    }
                    _ => {}
                }
            }
            drop(s_tx);
        });
        Ok(())
    }

    /// Subscribes to decoded server events. Events sent before subscribing are not replayed.
    pub fn server_events(&self) -> Result<ServerRx> {
        match self.s_tx {
            Some(ref tx) => Ok(tx.subscribe()),
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    async fn send_client_event(&mut self, event: types::ClientEvent) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(event).await?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    pub async fn start_session(&mut self, start: types::SessionStartEvent) -> Result<()> {
        self.send_client_event(types::ClientEvent::SessionStart(start))
            .await
    }

    pub async fn end_session(&mut self) -> Result<()> {
        self.send_client_event(types::ClientEvent::SessionEnd).await
    }

    /// Drops the outgoing queue; the writer task closes the socket once it drains.
    pub fn disconnect(&mut self) {
        self.c_tx = None;
    }
}

pub async fn connect_with_config(capacity: usize, config: config::Config) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect().await?;
    Ok(client)
}

/// Connects using `VOICE_BASE_URL` and `VOICE_API_KEY` from the environment.
pub async fn connect() -> Result<Client> {
    let config = config::Config::new();
    connect_with_config(1024, config).await
}
