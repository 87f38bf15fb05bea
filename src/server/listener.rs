//! WebSocket listener
//!
//! One task per connection reads JSON events and forwards them to the hub;
//! a second task drains the connection's outbox onto the socket.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::hub::{HubCommand, HubHandle};
use crate::config::ServerSettings;
use crate::error::Error;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::{ChannelHandle, Outbound};

/// How long a writer may keep flushing after its reader stopped
const WRITER_LINGER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct ListenerOptions {
    pub outbox_capacity: usize,
    pub max_message_size: usize,
}

impl ListenerOptions {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            outbox_capacity: settings.outbox_capacity.max(1),
            max_message_size: settings.max_message_size,
        }
    }
}

/// Accept connections until the task is aborted
pub async fn run_listener(listener: TcpListener, hub: HubHandle, options: ListenerOptions) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer, hub, options).await;
                });
            }
            Err(e) => {
                error!("Failed to accept TCP connection: {}", e);
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, hub: HubHandle, options: ListenerOptions) {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(options.max_message_size);
    config.max_frame_size = Some(options.max_message_size);

    let ws_stream = match tokio_tungstenite::accept_async_with_config(stream, Some(config)).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake failed from {}: {}", peer, e);
            return;
        }
    };

    let (channel, mut outbox) = ChannelHandle::new(options.outbox_capacity);
    info!(%peer, channel = %channel.id(), "Peer connected");

    let (mut sink, mut source) = ws_stream.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            match frame {
                Outbound::Message(message) => {
                    let text = match message.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(event = message.event_name(), "Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("WebSocket read error from {}: {}", peer, e);
                break;
            }
        };

        match frame {
            Message::Text(text) => match ClientMessage::from_json(&text) {
                Ok(message) => {
                    let command = HubCommand::Message {
                        channel: channel.clone(),
                        message,
                    };
                    if !hub.send(command).await {
                        break;
                    }
                }
                Err(e) => reject(&channel, peer, Error::malformed(format!("invalid event: {}", e))),
            },
            Message::Binary(_) => reject(
                &channel,
                peer,
                Error::ProtocolUnexpected {
                    message: "binary frames are not accepted".to_string(),
                },
            ),
            Message::Close(_) => break,
            // Pings are answered by tungstenite
            _ => {}
        }
    }

    info!(%peer, channel = %channel.id(), "Peer disconnected");
    hub.send(HubCommand::Disconnected { channel }).await;

    if tokio::time::timeout(WRITER_LINGER, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Answer an unparseable frame on the same channel
fn reject(channel: &ChannelHandle, peer: SocketAddr, err: Error) {
    warn!(%peer, code = %err.code(), "Rejected frame: {}", err);
    channel.try_deliver(Outbound::Message(ServerMessage::error(&err)));
}
